//! Deployed resources

use crate::entities::connection::ResourceConnection;
use crate::entities::node::Node;
use crate::entities::resource_definition::ResourceDefinition;
use crate::entities::volume::{Volume, VolumeDto};
use crate::error::{Error, Result};
use crate::flag_set;
use crate::flags::StateFlags;
use crate::object::{CoreEntity, CoreObject, EntityDriver, ObjectId};
use crate::props::PropsContainer;
use crate::security::{AccessContext, AccessType, ObjectProtection, ProtectionDrivers};
use crate::transaction::{TransactionContext, TransactionalMap};
use crate::types::{NodeName, ResourceName, VolumeNumber};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::info;
use uuid::Uuid;

flag_set! {
    pub enum ResourceFlags {
        Clean = 1,
        Delete = 1 << 1,
        Diskless = 1 << 2,
        // Composite: both diskless variants contain the Diskless bit
        DrbdDiskless = 1 << 2 | 1 << 8,
        NvmeInitiator = 1 << 2 | 1 << 9,
    }
}

// =============================================================================
// Resource
// =============================================================================

/// One deployment of a resource definition on one node
///
/// Owns its volumes and its connections to peer resources; tracked, but not
/// owned, by both the node and the definition.
pub struct Resource {
    core: CoreObject,
    node_name: NodeName,
    name: ResourceName,
    node: Weak<Node>,
    definition: Weak<ResourceDefinition>,
    flags: StateFlags<ResourceFlags>,
    props: PropsContainer,
    volumes: Arc<TransactionalMap<VolumeNumber, Arc<Volume>>>,
    /// Connections keyed by the peer resource's node
    connections: Arc<TransactionalMap<NodeName, Arc<ResourceConnection>>>,
}

impl Resource {
    pub fn name(&self) -> &ResourceName {
        &self.name
    }

    pub fn node_name(&self) -> &NodeName {
        &self.node_name
    }

    /// The node hosting this resource
    pub fn node(&self) -> Result<Arc<Node>> {
        self.node.upgrade().ok_or_else(|| {
            Error::ImplementationError(format!(
                "resource '{}/{}' outlived its node",
                self.node_name, self.name
            ))
        })
    }

    /// The definition this resource was deployed from
    pub fn definition(&self) -> Result<Arc<ResourceDefinition>> {
        self.definition.upgrade().ok_or_else(|| {
            Error::ImplementationError(format!(
                "resource '{}/{}' outlived its definition",
                self.node_name, self.name
            ))
        })
    }

    pub fn flags(&self) -> Result<&StateFlags<ResourceFlags>> {
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

    pub fn volume(
        &self,
        ctx: &AccessContext,
        volume_nr: VolumeNumber,
    ) -> Result<Option<Arc<Volume>>> {
        self.core.ensure_access(ctx, AccessType::View)?;
        Ok(self.volumes.get(&volume_nr))
    }

    pub fn volumes(&self, ctx: &AccessContext) -> Result<Vec<Arc<Volume>>> {
        self.core.ensure_access(ctx, AccessType::View)?;
        Ok(self.volumes.values())
    }

    pub fn connection(
        &self,
        ctx: &AccessContext,
        peer_node: &NodeName,
    ) -> Result<Option<Arc<ResourceConnection>>> {
        self.core.ensure_access(ctx, AccessType::View)?;
        Ok(self.connections.get(peer_node))
    }

    pub fn connections(&self, ctx: &AccessContext) -> Result<Vec<Arc<ResourceConnection>>> {
        self.core.ensure_access(ctx, AccessType::View)?;
        Ok(self.connections.values())
    }

    /// Raise the DELETE flag ahead of the final [`delete`](Resource::delete)
    pub fn mark_deleted(&self, tx: &TransactionContext, ctx: &AccessContext) -> Result<()> {
        self.core.ensure_access(ctx, AccessType::Control)?;
        self.flags.enable_flags(tx, ctx, &[ResourceFlags::Delete])
    }

    /// Soft-delete this resource
    ///
    /// Requires CONTROL; cascades to the owned volumes and connections, then
    /// detaches from both the node and the definition. Idempotent once
    /// deleted.
    pub fn delete(&self, tx: &TransactionContext, ctx: &AccessContext) -> Result<()> {
        if self.core.is_deleted() {
            return Ok(());
        }
        self.core
            .protection()
            .require_access(ctx, AccessType::Control)?;

        // Cascade over snapshot copies; children detach themselves from the
        // live maps during deletion
        for volume in self.volumes.values() {
            volume.delete(tx, ctx)?;
        }
        for connection in self.connections.values() {
            connection.delete(tx, ctx)?;
        }

        if let Some(node) = self.node.upgrade() {
            node.remove_resource(tx, &self.name);
        }
        if let Some(definition) = self.definition.upgrade() {
            definition.remove_resource(tx, &self.node_name);
        }

        self.core.finish_delete(tx)
    }

    pub fn api_data(
        &self,
        ctx: &AccessContext,
        full_sync_id: Option<u64>,
        update_id: Option<u64>,
    ) -> Result<ResourceDto> {
        self.core.ensure_access(ctx, AccessType::View)?;

        let volumes = self
            .volumes
            .values()
            .into_iter()
            .map(|volume| volume.api_data(ctx))
            .collect::<Result<Vec<_>>>()?;

        Ok(ResourceDto {
            uuid: self.core.uuid(),
            name: self.name.clone(),
            node: self.node_name.clone(),
            created_at: self.core.created_at(),
            flags: self.flags.bits(ctx)?,
            props: self.props.map(),
            volumes,
            connection_count: self.connections.len(),
            full_sync_id,
            update_id,
        })
    }

    pub(crate) fn has_volume(&self, volume_nr: VolumeNumber) -> bool {
        self.volumes.contains_key(&volume_nr)
    }

    pub(crate) fn add_volume(&self, tx: &TransactionContext, volume: Arc<Volume>) -> Result<()> {
        let volume_nr = volume.volume_number();
        if self.volumes.contains_key(&volume_nr) {
            return Err(Error::ObjectExists {
                kind: "volume",
                name: format!("{}/{}/{}", self.node_name, self.name, volume_nr),
            });
        }
        self.volumes.insert(tx, volume_nr, volume);
        Ok(())
    }

    pub(crate) fn remove_volume(&self, tx: &TransactionContext, volume_nr: VolumeNumber) {
        self.volumes.remove(tx, &volume_nr);
    }

    pub(crate) fn add_connection(
        &self,
        tx: &TransactionContext,
        peer_node: NodeName,
        connection: Arc<ResourceConnection>,
    ) -> Result<()> {
        if self.connections.contains_key(&peer_node) {
            return Err(Error::ObjectExists {
                kind: "resource connection",
                name: format!("{}/{} <-> {}", self.node_name, self.name, peer_node),
            });
        }
        self.connections.insert(tx, peer_node, connection);
        Ok(())
    }

    pub(crate) fn remove_connection(&self, tx: &TransactionContext, peer_node: &NodeName) {
        self.connections.remove(tx, peer_node);
    }
}

impl CoreEntity for Resource {
    fn core(&self) -> &CoreObject {
        &self.core
    }
}

/// Serializable view of a resource
#[derive(Debug, Clone, Serialize)]
pub struct ResourceDto {
    pub uuid: Uuid,
    pub name: ResourceName,
    pub node: NodeName,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub flags: u64,
    pub props: BTreeMap<String, String>,
    pub volumes: Vec<VolumeDto>,
    pub connection_count: usize,
    pub full_sync_id: Option<u64>,
    pub update_id: Option<u64>,
}

// =============================================================================
// Resource Factory
// =============================================================================

/// Sole construction path for [`Resource`] instances
pub struct ResourceFactory {
    driver: Option<Arc<dyn EntityDriver>>,
    public_access: Option<AccessType>,
}

impl ResourceFactory {
    pub fn new(driver: Option<Arc<dyn EntityDriver>>, public_access: Option<AccessType>) -> Self {
        Self {
            driver,
            public_access,
        }
    }

    /// Deploy `definition` on `node`; requires USE on both parents
    ///
    /// The new resource is registered into the node's and the definition's
    /// resource maps as part of the same unit.
    pub fn create(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        node: &Arc<Node>,
        definition: &Arc<ResourceDefinition>,
    ) -> Result<Arc<Resource>> {
        node.core().ensure_access(ctx, AccessType::Use)?;
        definition.core().ensure_access(ctx, AccessType::Use)?;

        let id = ObjectId::generate();
        let label = format!("resource '{}/{}'", node.name(), definition.name());
        let protection = ObjectProtection::new(
            id,
            label.clone(),
            ctx,
            self.public_access,
            ProtectionDrivers::default(),
        );

        let resource = Arc::new(Resource {
            core: CoreObject::new(id, "resource", label, protection.clone(), self.driver.clone()),
            node_name: node.name().clone(),
            name: definition.name().clone(),
            node: Arc::downgrade(node),
            definition: Arc::downgrade(definition),
            flags: StateFlags::new(id, protection, 0, None),
            props: PropsContainer::new(id, None),
            volumes: TransactionalMap::new(id, None),
            connections: TransactionalMap::new(id, None),
        });

        resource.core.driver_create()?;
        node.add_resource(tx, resource.clone())?;
        definition.add_resource(tx, resource.clone())?;
        info!(
            node = %node.name(),
            resource = %definition.name(),
            uuid = %resource.uuid(),
            "created resource"
        );
        Ok(resource)
    }
}
