//! Storage pools

use crate::entities::node::Node;
use crate::error::{Error, Result};
use crate::object::{CoreEntity, CoreObject, EntityDriver, ObjectId};
use crate::props::PropsContainer;
use crate::security::{AccessContext, AccessType, ObjectProtection, ProtectionDrivers};
use crate::transaction::{TransactionContext, TransactionalValue};
use crate::types::{NodeName, StorPoolName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::info;
use uuid::Uuid;

// =============================================================================
// Provider Kind
// =============================================================================

/// Backing storage provider of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Lvm,
    LvmThin,
    Zfs,
    ZfsThin,
    File,
    Diskless,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Lvm => write!(f, "lvm"),
            ProviderKind::LvmThin => write!(f, "lvm-thin"),
            ProviderKind::Zfs => write!(f, "zfs"),
            ProviderKind::ZfsThin => write!(f, "zfs-thin"),
            ProviderKind::File => write!(f, "file"),
            ProviderKind::Diskless => write!(f, "diskless"),
        }
    }
}

// =============================================================================
// Storage Pool
// =============================================================================

/// A storage pool on one node, exclusively owned by that node
pub struct StorPool {
    core: CoreObject,
    name: StorPoolName,
    node_name: NodeName,
    node: Weak<Node>,
    provider: ProviderKind,
    // Reported by the node's agent; staged like any field but never persisted
    free_space: Arc<TransactionalValue<Option<u64>>>,
    total_space: Arc<TransactionalValue<Option<u64>>>,
    props: PropsContainer,
}

impl StorPool {
    pub fn name(&self) -> &StorPoolName {
        &self.name
    }

    pub fn node_name(&self) -> &NodeName {
        &self.node_name
    }

    pub fn provider_kind(&self, ctx: &AccessContext) -> Result<ProviderKind> {
        self.core.ensure_access(ctx, AccessType::View)?;
        Ok(self.provider)
    }

    /// Free/total space as last reported by the node's agent
    pub fn space_info(&self, ctx: &AccessContext) -> Result<(Option<u64>, Option<u64>)> {
        self.core.ensure_access(ctx, AccessType::View)?;
        Ok((self.free_space.get(), self.total_space.get()))
    }

    /// Record an agent space report
    pub fn update_space(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        free: u64,
        total: u64,
    ) -> Result<()> {
        self.core.ensure_access(ctx, AccessType::Change)?;
        self.free_space.set(tx, Some(free));
        self.total_space.set(tx, Some(total));
        Ok(())
    }

    pub fn props(&self, ctx: &AccessContext) -> Result<&PropsContainer> {
        self.core.ensure_access(ctx, AccessType::View)?;
        Ok(&self.props)
    }

    pub fn set_prop(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        key: impl AsRef<str>,
        value: impl Into<String>,
    ) -> Result<Option<String>> {
        self.core.ensure_access(ctx, AccessType::Change)?;
        self.props.set(tx, key, value)
    }

    /// Soft-delete this pool and detach it from its node
    pub fn delete(&self, tx: &TransactionContext, ctx: &AccessContext) -> Result<()> {
        if self.core.is_deleted() {
            return Ok(());
        }
        self.core
            .protection()
            .require_access(ctx, AccessType::Control)?;

        if let Some(node) = self.node.upgrade() {
            node.remove_stor_pool(tx, &self.name);
        }

        self.core.finish_delete(tx)
    }

    pub fn api_data(&self, ctx: &AccessContext) -> Result<StorPoolDto> {
        self.core.ensure_access(ctx, AccessType::View)?;
        Ok(StorPoolDto {
            uuid: self.core.uuid(),
            name: self.name.clone(),
            node: self.node_name.clone(),
            created_at: self.core.created_at(),
            provider: self.provider,
            free_space: self.free_space.get(),
            total_space: self.total_space.get(),
            props: self.props.map(),
        })
    }
}

impl CoreEntity for StorPool {
    fn core(&self) -> &CoreObject {
        &self.core
    }
}

/// Serializable view of a storage pool
#[derive(Debug, Clone, Serialize)]
pub struct StorPoolDto {
    pub uuid: Uuid,
    pub name: StorPoolName,
    pub node: NodeName,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub provider: ProviderKind,
    pub free_space: Option<u64>,
    pub total_space: Option<u64>,
    pub props: BTreeMap<String, String>,
}

// =============================================================================
// Stor Pool Factory
// =============================================================================

/// Sole construction path for [`StorPool`] instances
pub struct StorPoolFactory {
    driver: Option<Arc<dyn EntityDriver>>,
    public_access: Option<AccessType>,
}

impl StorPoolFactory {
    pub fn new(driver: Option<Arc<dyn EntityDriver>>, public_access: Option<AccessType>) -> Self {
        Self {
            driver,
            public_access,
        }
    }

    /// Create a pool on `node`; requires CHANGE on the node
    pub fn create(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        node: &Arc<Node>,
        name: StorPoolName,
        provider: ProviderKind,
    ) -> Result<Arc<StorPool>> {
        node.core().ensure_access(ctx, AccessType::Change)?;
        if node.stor_pool(ctx, &name)?.is_some() {
            return Err(Error::ObjectExists {
                kind: "storage pool",
                name: format!("{}/{}", node.name(), name),
            });
        }

        let id = ObjectId::generate();
        let label = format!("storage pool '{}/{}'", node.name(), name);
        let protection = ObjectProtection::new(
            id,
            label.clone(),
            ctx,
            self.public_access,
            ProtectionDrivers::default(),
        );

        let stor_pool = Arc::new(StorPool {
            core: CoreObject::new(
                id,
                "storage pool",
                label,
                protection,
                self.driver.clone(),
            ),
            name: name.clone(),
            node_name: node.name().clone(),
            node: Arc::downgrade(node),
            provider,
            free_space: TransactionalValue::new(id, None, None),
            total_space: TransactionalValue::new(id, None, None),
            props: PropsContainer::new(id, None),
        });

        stor_pool.core.driver_create()?;
        node.add_stor_pool(tx, stor_pool.clone())?;
        info!(
            node = %node.name(),
            pool = %name,
            %provider,
            uuid = %stor_pool.uuid(),
            "created storage pool"
        );
        Ok(stor_pool)
    }
}
