//! Resource definitions and volume definitions

use crate::entities::resource::Resource;
use crate::error::{Error, Result};
use crate::flag_set;
use crate::flags::StateFlags;
use crate::numberpool::NumberPool;
use crate::object::{AggregateRegistry, CoreEntity, CoreObject, EntityDriver, ObjectId};
use crate::props::PropsContainer;
use crate::security::{AccessContext, AccessType, ObjectProtection, ProtectionDrivers};
use crate::transaction::{TransactionContext, TransactionalMap, TransactionalValue};
use crate::types::{NodeName, ResourceName, VolumeNumber};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::info;
use uuid::Uuid;

flag_set! {
    pub enum ResourceDefinitionFlags {
        Delete = 1,
    }
}

flag_set! {
    pub enum VolumeDefinitionFlags {
        Delete = 1,
        Resize = 1 << 1,
        Encrypted = 1 << 2,
        GrossSize = 1 << 3,
    }
}

// =============================================================================
// Resource Definition
// =============================================================================

/// Cluster-wide definition of a replicated resource
///
/// Owns its volume definitions and a TCP port drawn from the cluster-wide
/// port pool; the resources deployed from it are tracked per node but owned
/// by their own lifecycle.
pub struct ResourceDefinition {
    core: CoreObject,
    name: ResourceName,
    port: Arc<TransactionalValue<u16>>,
    flags: StateFlags<ResourceDefinitionFlags>,
    props: PropsContainer,
    volume_definitions: Arc<TransactionalMap<VolumeNumber, Arc<VolumeDefinition>>>,
    resources: Arc<TransactionalMap<NodeName, Arc<Resource>>>,
    tcp_ports: Arc<NumberPool>,
    registry: Weak<AggregateRegistry<ResourceName, ResourceDefinition>>,
}

impl ResourceDefinition {
    pub fn name(&self) -> &ResourceName {
        &self.name
    }

    /// TCP port reserved for this definition's replication traffic
    pub fn port(&self, ctx: &AccessContext) -> Result<u16> {
        self.core.ensure_access(ctx, AccessType::View)?;
        Ok(self.port.get())
    }

    /// Reassign the port: release the old one, then claim `port`, or the
    /// smallest free port when `None`
    ///
    /// The pool mutations are journaled with `tx`, so rolling back the
    /// context restores the previous reservation.
    pub fn set_port(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        port: Option<u16>,
    ) -> Result<u16> {
        self.core.ensure_access(ctx, AccessType::Change)?;
        self.tcp_ports.deallocate(tx, self.port.get() as u32);
        let new_port = match port {
            Some(wanted) => {
                self.tcp_ports.allocate(tx, wanted as u32)?;
                wanted
            }
            None => self.tcp_ports.auto_allocate(tx)? as u16,
        };
        self.port.set(tx, new_port);
        Ok(new_port)
    }

    pub fn flags(&self) -> Result<&StateFlags<ResourceDefinitionFlags>> {
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

    pub fn volume_definition(
        &self,
        ctx: &AccessContext,
        volume_nr: VolumeNumber,
    ) -> Result<Option<Arc<VolumeDefinition>>> {
        self.core.ensure_access(ctx, AccessType::View)?;
        Ok(self.volume_definitions.get(&volume_nr))
    }

    pub fn volume_definitions(&self, ctx: &AccessContext) -> Result<Vec<Arc<VolumeDefinition>>> {
        self.core.ensure_access(ctx, AccessType::View)?;
        Ok(self.volume_definitions.values())
    }

    pub fn resource(
        &self,
        ctx: &AccessContext,
        node: &NodeName,
    ) -> Result<Option<Arc<Resource>>> {
        self.core.ensure_access(ctx, AccessType::View)?;
        Ok(self.resources.get(node))
    }

    pub fn resources(&self, ctx: &AccessContext) -> Result<Vec<Arc<Resource>>> {
        self.core.ensure_access(ctx, AccessType::View)?;
        Ok(self.resources.values())
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Raise the DELETE flag ahead of the final [`delete`]
    ///
    /// [`delete`]: ResourceDefinition::delete
    pub fn mark_deleted(&self, tx: &TransactionContext, ctx: &AccessContext) -> Result<()> {
        self.core.ensure_access(ctx, AccessType::Control)?;
        self.flags
            .enable_flags(tx, ctx, &[ResourceDefinitionFlags::Delete])
    }

    /// Soft-delete this definition
    ///
    /// Requires CONTROL; fails with `ImplementationError` while resources
    /// deployed from it still exist. Cascades to the owned volume
    /// definitions, releases the TCP port and detaches from the definition
    /// registry. Idempotent once deleted.
    pub fn delete(&self, tx: &TransactionContext, ctx: &AccessContext) -> Result<()> {
        if self.core.is_deleted() {
            return Ok(());
        }
        self.core
            .protection()
            .require_access(ctx, AccessType::Control)?;

        if !self.resources.is_empty() {
            return Err(Error::ImplementationError(format!(
                "resource definition '{}' with deployed resources cannot be deleted",
                self.name
            )));
        }

        for volume_definition in self.volume_definitions.values() {
            volume_definition.delete(tx, ctx)?;
        }

        self.tcp_ports.deallocate(tx, self.port.get() as u32);

        if let Some(registry) = self.registry.upgrade() {
            registry.remove(tx, &self.name);
        }

        self.core.finish_delete(tx)
    }

    pub fn api_data(
        &self,
        ctx: &AccessContext,
        full_sync_id: Option<u64>,
        update_id: Option<u64>,
    ) -> Result<ResourceDefinitionDto> {
        self.core.ensure_access(ctx, AccessType::View)?;

        let volume_definitions = self
            .volume_definitions
            .values()
            .into_iter()
            .map(|vlm_dfn| vlm_dfn.api_data(ctx))
            .collect::<Result<Vec<_>>>()?;

        Ok(ResourceDefinitionDto {
            uuid: self.core.uuid(),
            name: self.name.clone(),
            created_at: self.core.created_at(),
            port: self.port.get(),
            flags: self.flags.bits(ctx)?,
            props: self.props.map(),
            volume_definitions,
            resource_count: self.resources.len(),
            full_sync_id,
            update_id,
        })
    }

    pub(crate) fn add_resource(
        &self,
        tx: &TransactionContext,
        resource: Arc<Resource>,
    ) -> Result<()> {
        let node = resource.node_name().clone();
        if self.resources.contains_key(&node) {
            return Err(Error::ObjectExists {
                kind: "resource",
                name: format!("{}/{}", node, self.name),
            });
        }
        self.resources.insert(tx, node, resource);
        Ok(())
    }

    pub(crate) fn remove_resource(&self, tx: &TransactionContext, node: &NodeName) {
        self.resources.remove(tx, node);
    }

    fn remove_volume_definition(&self, tx: &TransactionContext, volume_nr: VolumeNumber) {
        self.volume_definitions.remove(tx, &volume_nr);
    }

    /// Whether any deployed resource still carries a volume with this number
    fn volume_in_use(&self, volume_nr: VolumeNumber) -> bool {
        self.resources
            .values()
            .iter()
            .any(|resource| resource.has_volume(volume_nr))
    }
}

impl CoreEntity for ResourceDefinition {
    fn core(&self) -> &CoreObject {
        &self.core
    }
}

/// Serializable view of a resource definition
#[derive(Debug, Clone, Serialize)]
pub struct ResourceDefinitionDto {
    pub uuid: Uuid,
    pub name: ResourceName,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub port: u16,
    pub flags: u64,
    pub props: BTreeMap<String, String>,
    pub volume_definitions: Vec<VolumeDefinitionDto>,
    pub resource_count: usize,
    pub full_sync_id: Option<u64>,
    pub update_id: Option<u64>,
}

// =============================================================================
// Volume Definition
// =============================================================================

/// Size and shape of one volume slot within a resource definition
pub struct VolumeDefinition {
    core: CoreObject,
    volume_nr: VolumeNumber,
    size_kib: Arc<TransactionalValue<u64>>,
    flags: StateFlags<VolumeDefinitionFlags>,
    props: PropsContainer,
    definition: Weak<ResourceDefinition>,
}

impl VolumeDefinition {
    pub fn volume_number(&self) -> VolumeNumber {
        self.volume_nr
    }

    pub fn size_kib(&self, ctx: &AccessContext) -> Result<u64> {
        self.core.ensure_access(ctx, AccessType::View)?;
        Ok(self.size_kib.get())
    }

    pub fn set_size_kib(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        size_kib: u64,
    ) -> Result<()> {
        self.core.ensure_access(ctx, AccessType::Change)?;
        self.size_kib.set(tx, size_kib);
        Ok(())
    }

    pub fn flags(&self) -> Result<&StateFlags<VolumeDefinitionFlags>> {
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

    /// Soft-delete this volume definition
    ///
    /// Fails with `ImplementationError` while a deployed resource still
    /// carries a volume with this number.
    pub fn delete(&self, tx: &TransactionContext, ctx: &AccessContext) -> Result<()> {
        if self.core.is_deleted() {
            return Ok(());
        }
        self.core
            .protection()
            .require_access(ctx, AccessType::Control)?;

        if let Some(definition) = self.definition.upgrade() {
            if definition.volume_in_use(self.volume_nr) {
                return Err(Error::ImplementationError(format!(
                    "volume definition {}/{} with deployed volumes cannot be deleted",
                    definition.name(),
                    self.volume_nr
                )));
            }
            definition.remove_volume_definition(tx, self.volume_nr);
        }

        self.core.finish_delete(tx)
    }

    pub fn api_data(&self, ctx: &AccessContext) -> Result<VolumeDefinitionDto> {
        self.core.ensure_access(ctx, AccessType::View)?;
        Ok(VolumeDefinitionDto {
            uuid: self.core.uuid(),
            volume_nr: self.volume_nr,
            size_kib: self.size_kib.get(),
            flags: self.flags.bits(ctx)?,
            props: self.props.map(),
        })
    }
}

impl CoreEntity for VolumeDefinition {
    fn core(&self) -> &CoreObject {
        &self.core
    }
}

/// Serializable view of a volume definition
#[derive(Debug, Clone, Serialize)]
pub struct VolumeDefinitionDto {
    pub uuid: Uuid,
    pub volume_nr: VolumeNumber,
    pub size_kib: u64,
    pub flags: u64,
    pub props: BTreeMap<String, String>,
}

// =============================================================================
// Factories
// =============================================================================

/// Sole construction path for [`ResourceDefinition`] instances
pub struct ResourceDefinitionFactory {
    registry: Arc<AggregateRegistry<ResourceName, ResourceDefinition>>,
    tcp_ports: Arc<NumberPool>,
    driver: Option<Arc<dyn EntityDriver>>,
    public_access: Option<AccessType>,
}

impl ResourceDefinitionFactory {
    pub fn new(
        registry: Arc<AggregateRegistry<ResourceName, ResourceDefinition>>,
        tcp_ports: Arc<NumberPool>,
        driver: Option<Arc<dyn EntityDriver>>,
        public_access: Option<AccessType>,
    ) -> Self {
        Self {
            registry,
            tcp_ports,
            driver,
            public_access,
        }
    }

    /// Create a definition, claiming `port` from the cluster port pool, or
    /// the smallest free port when `None`
    pub fn create(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        name: ResourceName,
        port: Option<u16>,
    ) -> Result<Arc<ResourceDefinition>> {
        if self.registry.contains(&name) {
            return Err(Error::ObjectExists {
                kind: "resource definition",
                name: name.to_string(),
            });
        }

        let claimed_port = match port {
            Some(wanted) => {
                self.tcp_ports.allocate(tx, wanted as u32)?;
                wanted
            }
            None => self.tcp_ports.auto_allocate(tx)? as u16,
        };

        let id = ObjectId::generate();
        let label = format!("resource definition '{name}'");
        let protection = ObjectProtection::new(
            id,
            label.clone(),
            ctx,
            self.public_access,
            ProtectionDrivers::default(),
        );

        let definition = Arc::new(ResourceDefinition {
            core: CoreObject::new(
                id,
                "resource definition",
                label,
                protection.clone(),
                self.driver.clone(),
            ),
            name: name.clone(),
            port: TransactionalValue::new(id, claimed_port, None),
            flags: StateFlags::new(id, protection, 0, None),
            props: PropsContainer::new(id, None),
            volume_definitions: TransactionalMap::new(id, None),
            resources: TransactionalMap::new(id, None),
            tcp_ports: self.tcp_ports.clone(),
            registry: Arc::downgrade(&self.registry),
        });

        definition.core.driver_create()?;
        self.registry.insert(tx, name.clone(), definition.clone())?;
        info!(
            definition = %name,
            port = claimed_port,
            uuid = %definition.uuid(),
            "created resource definition"
        );
        Ok(definition)
    }
}

/// Sole construction path for [`VolumeDefinition`] instances
pub struct VolumeDefinitionFactory {
    driver: Option<Arc<dyn EntityDriver>>,
    public_access: Option<AccessType>,
}

impl VolumeDefinitionFactory {
    pub fn new(driver: Option<Arc<dyn EntityDriver>>, public_access: Option<AccessType>) -> Self {
        Self {
            driver,
            public_access,
        }
    }

    /// Create a volume definition slot; requires CHANGE on the definition
    pub fn create(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        definition: &Arc<ResourceDefinition>,
        volume_nr: VolumeNumber,
        size_kib: u64,
    ) -> Result<Arc<VolumeDefinition>> {
        definition.core().ensure_access(ctx, AccessType::Change)?;
        if definition.volume_definitions.contains_key(&volume_nr) {
            return Err(Error::ObjectExists {
                kind: "volume definition",
                name: format!("{}/{}", definition.name(), volume_nr),
            });
        }

        let id = ObjectId::generate();
        let label = format!("volume definition '{}/{}'", definition.name(), volume_nr);
        let protection = ObjectProtection::new(
            id,
            label.clone(),
            ctx,
            self.public_access,
            ProtectionDrivers::default(),
        );

        let volume_definition = Arc::new(VolumeDefinition {
            core: CoreObject::new(
                id,
                "volume definition",
                label,
                protection.clone(),
                self.driver.clone(),
            ),
            volume_nr,
            size_kib: TransactionalValue::new(id, size_kib, None),
            flags: StateFlags::new(id, protection, 0, None),
            props: PropsContainer::new(id, None),
            definition: Arc::downgrade(definition),
        });

        volume_definition.core.driver_create()?;
        definition
            .volume_definitions
            .insert(tx, volume_nr, volume_definition.clone());
        info!(
            definition = %definition.name(),
            volume_nr,
            size_kib,
            "created volume definition"
        );
        Ok(volume_definition)
    }
}
