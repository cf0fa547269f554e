//! Wired cluster store
//!
//! Composes the aggregate registries, the cluster-wide port pool and the
//! per-entity factories into one store. Operation code resolves entities
//! here, mutates them against a [`TransactionContext`] and commits or rolls
//! back the whole context as one unit.

use crate::config::CoreConfig;
use crate::entities::{
    Node, NodeFactory, NodeKind, ProviderKind, Resource, ResourceConnection,
    ResourceConnectionFactory, ResourceDefinition, ResourceDefinitionFactory, ResourceFactory,
    StorPool, StorPoolFactory, Volume, VolumeDefinition, VolumeDefinitionFactory, VolumeFactory,
};
use crate::error::Result;
use crate::numberpool::NumberPool;
use crate::object::{AggregateRegistry, EntityDriver};
use crate::security::AccessContext;
use crate::transaction::TransactionContext;
use crate::types::{NodeName, ResourceName, StorPoolName, VolumeNumber};
use std::sync::Arc;

/// Per-entity-type persistence drivers; all `None` for an in-memory store
#[derive(Default, Clone)]
pub struct DriverSet {
    pub node: Option<Arc<dyn EntityDriver>>,
    pub stor_pool: Option<Arc<dyn EntityDriver>>,
    pub resource_definition: Option<Arc<dyn EntityDriver>>,
    pub volume_definition: Option<Arc<dyn EntityDriver>>,
    pub resource: Option<Arc<dyn EntityDriver>>,
    pub volume: Option<Arc<dyn EntityDriver>>,
    pub connection: Option<Arc<dyn EntityDriver>>,
}

/// The control-plane data layer of one cluster
pub struct ClusterStore {
    nodes: Arc<AggregateRegistry<NodeName, Node>>,
    resource_definitions: Arc<AggregateRegistry<ResourceName, ResourceDefinition>>,
    tcp_ports: Arc<NumberPool>,
    node_factory: NodeFactory,
    stor_pool_factory: StorPoolFactory,
    resource_definition_factory: ResourceDefinitionFactory,
    volume_definition_factory: VolumeDefinitionFactory,
    resource_factory: ResourceFactory,
    volume_factory: VolumeFactory,
    connection_factory: ResourceConnectionFactory,
}

impl ClusterStore {
    pub fn new(config: CoreConfig, drivers: DriverSet) -> Result<Arc<Self>> {
        let nodes = AggregateRegistry::new("node");
        let resource_definitions = AggregateRegistry::new("resource definition");
        let tcp_ports = NumberPool::new(
            "tcp-ports",
            config.tcp_port_min as u32,
            config.tcp_port_max as u32,
        )?;
        let public = config.public_access;

        Ok(Arc::new(Self {
            node_factory: NodeFactory::new(nodes.clone(), drivers.node, public),
            stor_pool_factory: StorPoolFactory::new(drivers.stor_pool, public),
            resource_definition_factory: ResourceDefinitionFactory::new(
                resource_definitions.clone(),
                tcp_ports.clone(),
                drivers.resource_definition,
                public,
            ),
            volume_definition_factory: VolumeDefinitionFactory::new(
                drivers.volume_definition,
                public,
            ),
            resource_factory: ResourceFactory::new(drivers.resource, public),
            volume_factory: VolumeFactory::new(drivers.volume, public),
            connection_factory: ResourceConnectionFactory::new(
                tcp_ports.clone(),
                drivers.connection,
                public,
            ),
            nodes,
            resource_definitions,
            tcp_ports,
        }))
    }

    pub fn nodes(&self) -> &Arc<AggregateRegistry<NodeName, Node>> {
        &self.nodes
    }

    pub fn resource_definitions(
        &self,
    ) -> &Arc<AggregateRegistry<ResourceName, ResourceDefinition>> {
        &self.resource_definitions
    }

    pub fn tcp_ports(&self) -> &Arc<NumberPool> {
        &self.tcp_ports
    }

    // =========================================================================
    // Factory Boundary
    // =========================================================================

    pub fn create_node(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        name: NodeName,
        kind: NodeKind,
    ) -> Result<Arc<Node>> {
        self.node_factory.create(tx, ctx, name, kind)
    }

    pub fn create_stor_pool(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        node: &Arc<Node>,
        name: StorPoolName,
        provider: ProviderKind,
    ) -> Result<Arc<StorPool>> {
        self.stor_pool_factory.create(tx, ctx, node, name, provider)
    }

    pub fn create_resource_definition(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        name: ResourceName,
        port: Option<u16>,
    ) -> Result<Arc<ResourceDefinition>> {
        self.resource_definition_factory.create(tx, ctx, name, port)
    }

    pub fn create_volume_definition(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        definition: &Arc<ResourceDefinition>,
        volume_nr: VolumeNumber,
        size_kib: u64,
    ) -> Result<Arc<VolumeDefinition>> {
        self.volume_definition_factory
            .create(tx, ctx, definition, volume_nr, size_kib)
    }

    pub fn create_resource(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        node: &Arc<Node>,
        definition: &Arc<ResourceDefinition>,
    ) -> Result<Arc<Resource>> {
        self.resource_factory.create(tx, ctx, node, definition)
    }

    pub fn create_volume(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        resource: &Arc<Resource>,
        definition: &Arc<VolumeDefinition>,
    ) -> Result<Arc<Volume>> {
        self.volume_factory.create(tx, ctx, resource, definition)
    }

    pub fn connect_resources(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        source: &Arc<Resource>,
        target: &Arc<Resource>,
    ) -> Result<Arc<ResourceConnection>> {
        self.connection_factory.create(tx, ctx, source, target)
    }
}
