//! Cluster nodes

use crate::entities::resource::Resource;
use crate::entities::stor_pool::{StorPool, StorPoolDto};
use crate::error::{Error, Result};
use crate::flag_set;
use crate::flags::StateFlags;
use crate::object::{AggregateRegistry, CoreEntity, CoreObject, EntityDriver, ObjectId};
use crate::props::PropsContainer;
use crate::security::{AccessContext, AccessType, ObjectProtection, ProtectionDrivers};
use crate::transaction::{TransactionContext, TransactionalMap, TransactionalValue};
use crate::types::{NodeName, ResourceName, StorPoolName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::info;
use uuid::Uuid;

// =============================================================================
// Node Kind & Flags
// =============================================================================

/// Role of a node within the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Controller,
    Satellite,
    /// Controller and satellite in one process
    Combined,
    /// Tracked but not managed by this control plane
    Auxiliary,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Controller => write!(f, "controller"),
            NodeKind::Satellite => write!(f, "satellite"),
            NodeKind::Combined => write!(f, "combined"),
            NodeKind::Auxiliary => write!(f, "auxiliary"),
        }
    }
}

flag_set! {
    pub enum NodeFlags {
        Delete = 1,
        // Composite: an evicted node is also marked for deletion
        Evicted = 1 | 1 << 1,
        Evacuate = 1 << 2,
        Qignore = 0x10000,
    }
}

// =============================================================================
// Node
// =============================================================================

/// A cluster member hosting storage pools and resources
///
/// Owns its storage pools; resources are tracked but owned by their
/// resource definitions, so a node cannot be deleted while resources are
/// still mapped to it.
pub struct Node {
    core: CoreObject,
    name: NodeName,
    kind: Arc<TransactionalValue<NodeKind>>,
    flags: StateFlags<NodeFlags>,
    props: PropsContainer,
    stor_pools: Arc<TransactionalMap<StorPoolName, Arc<StorPool>>>,
    resources: Arc<TransactionalMap<ResourceName, Arc<Resource>>>,
    registry: Weak<AggregateRegistry<NodeName, Node>>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Node {
    pub fn name(&self) -> &NodeName {
        &self.name
    }

    pub fn node_kind(&self, ctx: &AccessContext) -> Result<NodeKind> {
        self.core.ensure_access(ctx, AccessType::View)?;
        Ok(self.kind.get())
    }

    pub fn set_node_kind(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        kind: NodeKind,
    ) -> Result<()> {
        self.core.ensure_access(ctx, AccessType::Change)?;
        self.kind.set(tx, kind);
        Ok(())
    }

    /// State flags of this node
    pub fn flags(&self) -> Result<&StateFlags<NodeFlags>> {
        self.core.check_deleted()?;
        Ok(&self.flags)
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

    pub fn remove_prop(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        key: &str,
    ) -> Result<Option<String>> {
        self.core.ensure_access(ctx, AccessType::Change)?;
        Ok(self.props.remove(tx, key))
    }

    pub fn stor_pool(
        &self,
        ctx: &AccessContext,
        name: &StorPoolName,
    ) -> Result<Option<Arc<StorPool>>> {
        self.core.ensure_access(ctx, AccessType::View)?;
        Ok(self.stor_pools.get(name))
    }

    pub fn stor_pools(&self, ctx: &AccessContext) -> Result<Vec<Arc<StorPool>>> {
        self.core.ensure_access(ctx, AccessType::View)?;
        Ok(self.stor_pools.values())
    }

    pub fn resource(
        &self,
        ctx: &AccessContext,
        name: &ResourceName,
    ) -> Result<Option<Arc<Resource>>> {
        self.core.ensure_access(ctx, AccessType::View)?;
        Ok(self.resources.get(name))
    }

    pub fn resources(&self, ctx: &AccessContext) -> Result<Vec<Arc<Resource>>> {
        self.core.ensure_access(ctx, AccessType::View)?;
        Ok(self.resources.values())
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Raise the DELETE flag so remote agents observe the pending deletion
    /// before the final [`delete`](Node::delete)
    pub fn mark_deleted(&self, tx: &TransactionContext, ctx: &AccessContext) -> Result<()> {
        self.core.ensure_access(ctx, AccessType::Control)?;
        self.flags.enable_flags(tx, ctx, &[NodeFlags::Delete])
    }

    /// Soft-delete this node
    ///
    /// Requires CONTROL; fails with `ImplementationError` while resources
    /// are still mapped to the node (the caller must delete or migrate them
    /// first). Cascades to the owned storage pools and detaches from the
    /// node registry. Idempotent once deleted.
    pub fn delete(&self, tx: &TransactionContext, ctx: &AccessContext) -> Result<()> {
        if self.core.is_deleted() {
            return Ok(());
        }
        self.core
            .protection()
            .require_access(ctx, AccessType::Control)?;

        if !self.resources.is_empty() {
            return Err(Error::ImplementationError(format!(
                "node '{}' with resources cannot be deleted",
                self.name
            )));
        }

        // Cascade over a snapshot copy; the children detach themselves from
        // the live map during deletion
        for stor_pool in self.stor_pools.values() {
            stor_pool.delete(tx, ctx)?;
        }

        if let Some(registry) = self.registry.upgrade() {
            registry.remove(tx, &self.name);
        }

        self.core.finish_delete(tx)
    }

    /// Read projection handed to the serialization layer
    ///
    /// Children the context may not view are filtered out rather than
    /// failing the whole projection.
    pub fn api_data(
        &self,
        ctx: &AccessContext,
        full_sync_id: Option<u64>,
        update_id: Option<u64>,
    ) -> Result<NodeDto> {
        self.core.ensure_access(ctx, AccessType::View)?;

        let stor_pools = self
            .stor_pools
            .values()
            .into_iter()
            .filter(|pool| pool.protection().query_access(ctx).is_some())
            .map(|pool| pool.api_data(ctx))
            .collect::<Result<Vec<_>>>()?;

        Ok(NodeDto {
            uuid: self.core.uuid(),
            name: self.name.clone(),
            created_at: self.core.created_at(),
            kind: self.kind.get(),
            flags: self.flags.bits(ctx)?,
            props: self.props.map(),
            stor_pools,
            resource_count: self.resources.len(),
            full_sync_id,
            update_id,
        })
    }

    pub(crate) fn add_stor_pool(
        &self,
        tx: &TransactionContext,
        stor_pool: Arc<StorPool>,
    ) -> Result<()> {
        let name = stor_pool.name().clone();
        if self.stor_pools.contains_key(&name) {
            return Err(Error::ObjectExists {
                kind: "storage pool",
                name: name.to_string(),
            });
        }
        self.stor_pools.insert(tx, name, stor_pool);
        Ok(())
    }

    pub(crate) fn remove_stor_pool(&self, tx: &TransactionContext, name: &StorPoolName) {
        self.stor_pools.remove(tx, name);
    }

    pub(crate) fn add_resource(
        &self,
        tx: &TransactionContext,
        resource: Arc<Resource>,
    ) -> Result<()> {
        let name = resource.name().clone();
        if self.resources.contains_key(&name) {
            return Err(Error::ObjectExists {
                kind: "resource",
                name: format!("{}/{}", self.name, name),
            });
        }
        self.resources.insert(tx, name, resource);
        Ok(())
    }

    pub(crate) fn remove_resource(&self, tx: &TransactionContext, name: &ResourceName) {
        self.resources.remove(tx, name);
    }
}

impl CoreEntity for Node {
    fn core(&self) -> &CoreObject {
        &self.core
    }
}

// =============================================================================
// Read Projection
// =============================================================================

/// Serializable view of a node
#[derive(Debug, Clone, Serialize)]
pub struct NodeDto {
    pub uuid: Uuid,
    pub name: NodeName,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub kind: NodeKind,
    pub flags: u64,
    pub props: BTreeMap<String, String>,
    pub stor_pools: Vec<StorPoolDto>,
    pub resource_count: usize,
    pub full_sync_id: Option<u64>,
    pub update_id: Option<u64>,
}

// =============================================================================
// Node Factory
// =============================================================================

/// Sole construction path for [`Node`] instances
///
/// Identity allocation, transactional wiring, the create driver call and
/// registry membership happen as one unit against the caller's context.
pub struct NodeFactory {
    registry: Arc<AggregateRegistry<NodeName, Node>>,
    driver: Option<Arc<dyn EntityDriver>>,
    public_access: Option<AccessType>,
}

impl NodeFactory {
    pub fn new(
        registry: Arc<AggregateRegistry<NodeName, Node>>,
        driver: Option<Arc<dyn EntityDriver>>,
        public_access: Option<AccessType>,
    ) -> Self {
        Self {
            registry,
            driver,
            public_access,
        }
    }

    pub fn create(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        name: NodeName,
        kind: NodeKind,
    ) -> Result<Arc<Node>> {
        if self.registry.contains(&name) {
            return Err(Error::ObjectExists {
                kind: "node",
                name: name.to_string(),
            });
        }

        let id = ObjectId::generate();
        let label = format!("node '{name}'");
        let protection = ObjectProtection::new(
            id,
            label.clone(),
            ctx,
            self.public_access,
            ProtectionDrivers::default(),
        );

        let node = Arc::new(Node {
            core: CoreObject::new(id, "node", label, protection.clone(), self.driver.clone()),
            name: name.clone(),
            kind: TransactionalValue::new(id, kind, None),
            flags: StateFlags::new(id, protection, 0, None),
            props: PropsContainer::new(id, None),
            stor_pools: TransactionalMap::new(id, None),
            resources: TransactionalMap::new(id, None),
            registry: Arc::downgrade(&self.registry),
        });

        node.core.driver_create()?;
        self.registry.insert(tx, name.clone(), node.clone())?;
        info!(node = %name, %kind, uuid = %node.uuid(), "created node");
        Ok(node)
    }
}
