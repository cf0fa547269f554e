//! Resource connections

use crate::entities::resource::Resource;
use crate::error::{Error, Result};
use crate::numberpool::NumberPool;
use crate::object::{CoreEntity, CoreObject, EntityDriver, ObjectId};
use crate::props::PropsContainer;
use crate::security::{AccessContext, AccessType, ObjectProtection, ProtectionDrivers};
use crate::transaction::{TransactionContext, TransactionalValue};
use crate::types::{NodeName, ResourceName};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::info;
use uuid::Uuid;

// =============================================================================
// Resource Connection
// =============================================================================

/// Replication link between two resources of the same definition on
/// different nodes
///
/// A connection spans two protected parents: every operation requires the
/// access level on **both** endpoints' protection and fails when either side
/// fails. An optional TCP port for the link is drawn from the cluster-wide
/// port pool.
pub struct ResourceConnection {
    core: CoreObject,
    resource_name: ResourceName,
    source_node: NodeName,
    target_node: NodeName,
    source: Weak<Resource>,
    target: Weak<Resource>,
    port: Arc<TransactionalValue<Option<u16>>>,
    tcp_ports: Arc<NumberPool>,
    props: PropsContainer,
}

impl ResourceConnection {
    pub fn resource_name(&self) -> &ResourceName {
        &self.resource_name
    }

    pub fn source_node(&self) -> &NodeName {
        &self.source_node
    }

    pub fn target_node(&self) -> &NodeName {
        &self.target_node
    }

    /// Deletion check plus the access check against both endpoints
    fn ensure_both(&self, ctx: &AccessContext, requested: AccessType) -> Result<()> {
        self.core.check_deleted()?;
        let (source, target) = self.endpoints()?;
        source.core().ensure_access(ctx, requested)?;
        target.core().ensure_access(ctx, requested)?;
        Ok(())
    }

    fn endpoints(&self) -> Result<(Arc<Resource>, Arc<Resource>)> {
        let source = self.source.upgrade();
        let target = self.target.upgrade();
        match (source, target) {
            (Some(source), Some(target)) => Ok((source, target)),
            _ => Err(Error::ImplementationError(format!(
                "connection '{}' {} <-> {} outlived an endpoint",
                self.resource_name, self.source_node, self.target_node
            ))),
        }
    }

    /// Effective level on the connection: the weaker of the two endpoint
    /// grants
    pub fn query_access(&self, ctx: &AccessContext) -> Option<AccessType> {
        let (source, target) = self.endpoints().ok()?;
        AccessType::intersect(
            source.protection().query_access(ctx),
            target.protection().query_access(ctx),
        )
    }

    pub fn port(&self, ctx: &AccessContext) -> Result<Option<u16>> {
        self.ensure_both(ctx, AccessType::View)?;
        Ok(self.port.get())
    }

    /// Reassign the link port: release the old one, then claim `port`, or
    /// leave the link without a port when `None`
    pub fn set_port(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        port: Option<u16>,
    ) -> Result<()> {
        self.ensure_both(ctx, AccessType::Change)?;
        if let Some(old) = self.port.get() {
            self.tcp_ports.deallocate(tx, old as u32);
        }
        if let Some(wanted) = port {
            self.tcp_ports.allocate(tx, wanted as u32)?;
        }
        self.port.set(tx, port);
        Ok(())
    }

    /// Claim the smallest free port for the link
    pub fn auto_allocate_port(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
    ) -> Result<u16> {
        self.ensure_both(ctx, AccessType::Change)?;
        if let Some(old) = self.port.get() {
            self.tcp_ports.deallocate(tx, old as u32);
        }
        let port = self.tcp_ports.auto_allocate(tx)? as u16;
        self.port.set(tx, Some(port));
        Ok(port)
    }

    pub fn props(&self, ctx: &AccessContext) -> Result<&PropsContainer> {
        self.ensure_both(ctx, AccessType::View)?;
        Ok(&self.props)
    }

    pub fn set_prop(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        key: impl AsRef<str>,
        value: impl Into<String>,
    ) -> Result<Option<String>> {
        self.ensure_both(ctx, AccessType::Change)?;
        self.props.set(tx, key, value)
    }

    /// Soft-delete this connection
    ///
    /// Requires CHANGE on both endpoints; releases the link port and
    /// detaches from both resources' connection maps. Idempotent once
    /// deleted.
    pub fn delete(&self, tx: &TransactionContext, ctx: &AccessContext) -> Result<()> {
        if self.core.is_deleted() {
            return Ok(());
        }
        let (source, target) = self.endpoints()?;
        source
            .core()
            .protection()
            .require_access(ctx, AccessType::Change)?;
        target
            .core()
            .protection()
            .require_access(ctx, AccessType::Change)?;

        if let Some(port) = self.port.get() {
            self.tcp_ports.deallocate(tx, port as u32);
        }

        source.remove_connection(tx, &self.target_node);
        target.remove_connection(tx, &self.source_node);

        self.core.finish_delete(tx)
    }

    pub fn api_data(&self, ctx: &AccessContext) -> Result<ResourceConnectionDto> {
        self.ensure_both(ctx, AccessType::View)?;
        Ok(ResourceConnectionDto {
            uuid: self.core.uuid(),
            resource: self.resource_name.clone(),
            source_node: self.source_node.clone(),
            target_node: self.target_node.clone(),
            port: self.port.get(),
            props: self.props.map(),
        })
    }
}

impl CoreEntity for ResourceConnection {
    fn core(&self) -> &CoreObject {
        &self.core
    }
}

/// Serializable view of a resource connection
#[derive(Debug, Clone, Serialize)]
pub struct ResourceConnectionDto {
    pub uuid: Uuid,
    pub resource: ResourceName,
    pub source_node: NodeName,
    pub target_node: NodeName,
    pub port: Option<u16>,
    pub props: BTreeMap<String, String>,
}

// =============================================================================
// Resource Connection Factory
// =============================================================================

/// Sole construction path for [`ResourceConnection`] instances
pub struct ResourceConnectionFactory {
    tcp_ports: Arc<NumberPool>,
    driver: Option<Arc<dyn EntityDriver>>,
    public_access: Option<AccessType>,
}

impl ResourceConnectionFactory {
    pub fn new(
        tcp_ports: Arc<NumberPool>,
        driver: Option<Arc<dyn EntityDriver>>,
        public_access: Option<AccessType>,
    ) -> Self {
        Self {
            tcp_ports,
            driver,
            public_access,
        }
    }

    /// Connect two resources of the same definition; requires CHANGE on both
    pub fn create(
        &self,
        tx: &TransactionContext,
        ctx: &AccessContext,
        source: &Arc<Resource>,
        target: &Arc<Resource>,
    ) -> Result<Arc<ResourceConnection>> {
        source.core().ensure_access(ctx, AccessType::Change)?;
        target.core().ensure_access(ctx, AccessType::Change)?;

        if source.name() != target.name() {
            return Err(Error::ImplementationError(format!(
                "cannot connect resources of different definitions: '{}' and '{}'",
                source.name(),
                target.name()
            )));
        }
        if source.node_name() == target.node_name() {
            return Err(Error::ImplementationError(format!(
                "cannot connect resource '{}' on node '{}' to itself",
                source.name(),
                source.node_name()
            )));
        }

        let id = ObjectId::generate();
        let label = format!(
            "connection '{}' {} <-> {}",
            source.name(),
            source.node_name(),
            target.node_name()
        );
        let protection = ObjectProtection::new(
            id,
            label.clone(),
            ctx,
            self.public_access,
            ProtectionDrivers::default(),
        );

        let connection = Arc::new(ResourceConnection {
            core: CoreObject::new(
                id,
                "resource connection",
                label,
                protection,
                self.driver.clone(),
            ),
            resource_name: source.name().clone(),
            source_node: source.node_name().clone(),
            target_node: target.node_name().clone(),
            source: Arc::downgrade(source),
            target: Arc::downgrade(target),
            port: TransactionalValue::new(id, None, None),
            tcp_ports: self.tcp_ports.clone(),
            props: PropsContainer::new(id, None),
        });

        connection.core.driver_create()?;
        source.add_connection(tx, target.node_name().clone(), connection.clone())?;
        target.add_connection(tx, source.node_name().clone(), connection.clone())?;
        info!(
            resource = %source.name(),
            source = %source.node_name(),
            target = %target.node_name(),
            "created resource connection"
        );
        Ok(connection)
    }
}
