//! End-to-end scenarios across the core substrate
//!
//! Exercises the contracts the entity layer is built on: atomic
//! commit/rollback across many entities, access gating before every
//! mutation, the soft-delete lifecycle with cascades, and port accounting
//! against the shared cluster pool.

use assert_matches::assert_matches;
use controlplane_core::{
    AccessContext, AccessType, AclSubject, ClusterStore, CoreConfig, CoreEntity, DriverSet,
    EntityDriver, Error, NodeFlags, NodeKind, NodeName, ObjectId, ProviderKind, ResourceName,
    Result, RoleName, StorPoolName, TransactionContext, TransactionObject, TransactionalValue,
    ValueDriver,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn store() -> Arc<ClusterStore> {
    ClusterStore::new(CoreConfig::default(), DriverSet::default()).unwrap()
}

fn store_with(config: CoreConfig, drivers: DriverSet) -> Arc<ClusterStore> {
    ClusterStore::new(config, drivers).unwrap()
}

fn admin() -> AccessContext {
    AccessContext::new("alice", "storage-admins")
}

fn node_name(name: &str) -> NodeName {
    NodeName::new(name).unwrap()
}

fn rsc_name(name: &str) -> ResourceName {
    ResourceName::new(name).unwrap()
}

// =============================================================================
// Commit / Rollback
// =============================================================================

struct CountingDriver {
    calls: AtomicUsize,
    last: Mutex<Option<(u64, u64)>>,
}

impl CountingDriver {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        })
    }
}

impl ValueDriver<u64> for CountingDriver {
    fn update(&self, _owner: &ObjectId, old: &u64, new: &u64) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock() = Some((*old, *new));
        Ok(())
    }
}

#[test]
fn rollback_restores_every_child_of_the_context() {
    let owner = ObjectId::generate();
    let first_driver = CountingDriver::new();
    let second_driver = CountingDriver::new();
    let first = TransactionalValue::new(
        owner,
        100u64,
        Some(first_driver.clone() as Arc<dyn ValueDriver<u64>>),
    );
    let second = TransactionalValue::new(
        owner,
        200u64,
        Some(second_driver.clone() as Arc<dyn ValueDriver<u64>>),
    );

    let tx = TransactionContext::new();
    first.set(&tx, 101);
    first.set(&tx, 102);
    second.set(&tx, 201);

    tx.rollback();
    assert_eq!(first.get(), 100);
    assert_eq!(second.get(), 200);
    assert!(!first.is_dirty());
    assert!(!second.is_dirty());
    assert_eq!(first_driver.calls.load(Ordering::SeqCst), 0);
    assert_eq!(second_driver.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn commit_invokes_each_childs_driver_exactly_once() {
    let owner = ObjectId::generate();
    let first_driver = CountingDriver::new();
    let second_driver = CountingDriver::new();
    let first = TransactionalValue::new(
        owner,
        100u64,
        Some(first_driver.clone() as Arc<dyn ValueDriver<u64>>),
    );
    let second = TransactionalValue::new(
        owner,
        200u64,
        Some(second_driver.clone() as Arc<dyn ValueDriver<u64>>),
    );

    let tx = TransactionContext::new();
    first.set(&tx, 101);
    first.set(&tx, 102);
    second.set(&tx, 201);
    tx.commit().unwrap();

    assert_eq!(first_driver.calls.load(Ordering::SeqCst), 1);
    assert_eq!(*first_driver.last.lock(), Some((100, 102)));
    assert_eq!(second_driver.calls.load(Ordering::SeqCst), 1);
    assert_eq!(*second_driver.last.lock(), Some((200, 201)));
}

#[test]
fn one_context_rolls_back_a_whole_operation_spanning_entities() {
    let store = store();
    let ctx = admin();

    let setup = TransactionContext::new();
    let node = store
        .create_node(&setup, &ctx, node_name("alpha"), NodeKind::Satellite)
        .unwrap();
    setup.commit().unwrap();

    // One failed operation: rename kind, set props, create a definition
    let tx = TransactionContext::new();
    node.set_node_kind(&tx, &ctx, NodeKind::Combined).unwrap();
    node.set_prop(&tx, &ctx, "site", "rack-12").unwrap();
    store
        .create_resource_definition(&tx, &ctx, rsc_name("db0"), Some(7007))
        .unwrap();
    tx.rollback();

    assert_eq!(node.node_kind(&ctx).unwrap(), NodeKind::Satellite);
    assert_eq!(node.props(&ctx).unwrap().get("site"), None);
    assert!(store.resource_definitions().is_empty());
    assert!(!store.tcp_ports().is_allocated(7007));
}

// =============================================================================
// Access Gating
// =============================================================================

#[test]
fn change_gated_mutator_denies_a_view_only_caller() {
    let store = store();
    let ctx = admin();
    // Public default is VIEW, so an unlisted caller can read but not change
    let viewer = AccessContext::new("mallory", "spectators");

    let tx = TransactionContext::new();
    let node = store
        .create_node(&tx, &ctx, node_name("alpha"), NodeKind::Satellite)
        .unwrap();
    tx.commit().unwrap();

    assert_eq!(node.node_kind(&viewer).unwrap(), NodeKind::Satellite);

    let attempt = TransactionContext::new();
    assert_matches!(
        node.set_node_kind(&attempt, &viewer, NodeKind::Combined),
        Err(Error::AccessDenied { .. })
    );
    assert!(!attempt.is_dirty());
    assert_eq!(node.node_kind(&ctx).unwrap(), NodeKind::Satellite);
}

#[test]
fn granting_change_unlocks_the_mutator() {
    let store = store();
    let ctx = admin();
    let operator = AccessContext::new("bob", "operators");

    let tx = TransactionContext::new();
    let node = store
        .create_node(&tx, &ctx, node_name("alpha"), NodeKind::Satellite)
        .unwrap();
    node.protection()
        .grant(
            &tx,
            &ctx,
            AclSubject::Role(RoleName::new("operators")),
            AccessType::Change,
        )
        .unwrap();
    tx.commit().unwrap();

    let tx = TransactionContext::new();
    node.set_node_kind(&tx, &operator, NodeKind::Combined).unwrap();
    tx.commit().unwrap();
    assert_eq!(node.node_kind(&operator).unwrap(), NodeKind::Combined);

    // CHANGE does not include CONTROL
    let attempt = TransactionContext::new();
    assert_matches!(
        node.delete(&attempt, &operator),
        Err(Error::AccessDenied { .. })
    );
}

#[test]
fn connection_operations_require_access_on_both_endpoints() {
    let store = store();
    let ctx = admin();

    let tx = TransactionContext::new();
    let alpha = store
        .create_node(&tx, &ctx, node_name("alpha"), NodeKind::Satellite)
        .unwrap();
    let beta = store
        .create_node(&tx, &ctx, node_name("beta"), NodeKind::Satellite)
        .unwrap();
    let definition = store
        .create_resource_definition(&tx, &ctx, rsc_name("db0"), None)
        .unwrap();
    let rsc_alpha = store.create_resource(&tx, &ctx, &alpha, &definition).unwrap();
    let rsc_beta = store.create_resource(&tx, &ctx, &beta, &definition).unwrap();
    let connection = store
        .connect_resources(&tx, &ctx, &rsc_alpha, &rsc_beta)
        .unwrap();

    // Grant CHANGE on one endpoint only
    let half_granted = AccessContext::new("bob", "operators");
    rsc_alpha
        .protection()
        .grant(
            &tx,
            &ctx,
            AclSubject::Role(RoleName::new("operators")),
            AccessType::Change,
        )
        .unwrap();
    tx.commit().unwrap();

    // CHANGE on alpha's resource alone does not unlock the connection
    let attempt = TransactionContext::new();
    assert_matches!(
        connection.set_port(&attempt, &half_granted, Some(7100)),
        Err(Error::AccessDenied { .. })
    );

    // The full grant on both sides does
    let grant = TransactionContext::new();
    rsc_beta
        .protection()
        .grant(
            &grant,
            &ctx,
            AclSubject::Role(RoleName::new("operators")),
            AccessType::Change,
        )
        .unwrap();
    grant.commit().unwrap();

    let tx = TransactionContext::new();
    connection.set_port(&tx, &half_granted, Some(7100)).unwrap();
    tx.commit().unwrap();
    assert_eq!(connection.port(&ctx).unwrap(), Some(7100));
    assert!(store.tcp_ports().is_allocated(7100));
}

// =============================================================================
// Soft Delete Lifecycle
// =============================================================================

struct LifecycleDriver {
    created: AtomicUsize,
    deleted: AtomicUsize,
}

impl LifecycleDriver {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            created: AtomicUsize::new(0),
            deleted: AtomicUsize::new(0),
        })
    }
}

impl EntityDriver for LifecycleDriver {
    fn create(&self, _id: &ObjectId) -> Result<()> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete(&self, _id: &ObjectId) -> Result<()> {
        self.deleted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn deleted_node_rejects_every_accessor_and_redelete_is_a_noop() {
    let driver = LifecycleDriver::new();
    let store = store_with(
        CoreConfig::default(),
        DriverSet {
            node: Some(driver.clone() as Arc<dyn EntityDriver>),
            ..DriverSet::default()
        },
    );
    let ctx = admin();

    let tx = TransactionContext::new();
    let node = store
        .create_node(&tx, &ctx, node_name("alpha"), NodeKind::Satellite)
        .unwrap();
    store
        .create_stor_pool(
            &tx,
            &ctx,
            &node,
            StorPoolName::new("fast-ssd").unwrap(),
            ProviderKind::LvmThin,
        )
        .unwrap();
    tx.commit().unwrap();
    assert_eq!(driver.created.load(Ordering::SeqCst), 1);

    let tx = TransactionContext::new();
    node.delete(&tx, &ctx).unwrap();
    tx.commit().unwrap();

    assert!(node.is_deleted());
    assert_eq!(driver.deleted.load(Ordering::SeqCst), 1);
    assert!(store.nodes().is_empty());

    assert_matches!(
        node.node_kind(&ctx),
        Err(Error::AccessToDeletedData { kind: "node" })
    );
    assert_matches!(node.props(&ctx), Err(Error::AccessToDeletedData { .. }));
    assert_matches!(node.flags(), Err(Error::AccessToDeletedData { .. }));

    // Second delete is a no-op, not an error, and the driver is not invoked
    // again
    let again = TransactionContext::new();
    node.delete(&again, &ctx).unwrap();
    again.commit().unwrap();
    assert_eq!(driver.deleted.load(Ordering::SeqCst), 1);
}

#[test]
fn node_delete_cascades_to_owned_stor_pools() {
    let store = store();
    let ctx = admin();

    let tx = TransactionContext::new();
    let node = store
        .create_node(&tx, &ctx, node_name("alpha"), NodeKind::Satellite)
        .unwrap();
    let fast = store
        .create_stor_pool(
            &tx,
            &ctx,
            &node,
            StorPoolName::new("fast-ssd").unwrap(),
            ProviderKind::LvmThin,
        )
        .unwrap();
    let slow = store
        .create_stor_pool(
            &tx,
            &ctx,
            &node,
            StorPoolName::new("slow-hdd").unwrap(),
            ProviderKind::Lvm,
        )
        .unwrap();
    tx.commit().unwrap();

    let tx = TransactionContext::new();
    node.delete(&tx, &ctx).unwrap();
    tx.commit().unwrap();

    assert!(fast.is_deleted());
    assert!(slow.is_deleted());
}

#[test]
fn node_with_resources_cannot_be_deleted() {
    let store = store();
    let ctx = admin();

    let tx = TransactionContext::new();
    let node = store
        .create_node(&tx, &ctx, node_name("alpha"), NodeKind::Satellite)
        .unwrap();
    let definition = store
        .create_resource_definition(&tx, &ctx, rsc_name("db0"), None)
        .unwrap();
    let resource = store.create_resource(&tx, &ctx, &node, &definition).unwrap();
    tx.commit().unwrap();

    let attempt = TransactionContext::new();
    assert_matches!(
        node.delete(&attempt, &ctx),
        Err(Error::ImplementationError(_))
    );
    attempt.rollback();
    assert!(!node.is_deleted());

    // Deleting the resource first unblocks the node
    let tx = TransactionContext::new();
    resource.delete(&tx, &ctx).unwrap();
    node.delete(&tx, &ctx).unwrap();
    tx.commit().unwrap();
    assert!(node.is_deleted());
}

#[test]
fn resource_definition_delete_releases_its_port() {
    let store = store();
    let ctx = admin();

    let tx = TransactionContext::new();
    let definition = store
        .create_resource_definition(&tx, &ctx, rsc_name("db0"), Some(7042))
        .unwrap();
    tx.commit().unwrap();
    assert!(store.tcp_ports().is_allocated(7042));

    let tx = TransactionContext::new();
    definition.delete(&tx, &ctx).unwrap();
    tx.commit().unwrap();

    assert!(definition.is_deleted());
    assert!(!store.tcp_ports().is_allocated(7042));
    assert!(store.resource_definitions().is_empty());
}

#[test]
fn resource_delete_cascades_and_detaches_from_both_parents() {
    let store = store();
    let ctx = admin();

    let tx = TransactionContext::new();
    let alpha = store
        .create_node(&tx, &ctx, node_name("alpha"), NodeKind::Satellite)
        .unwrap();
    let beta = store
        .create_node(&tx, &ctx, node_name("beta"), NodeKind::Satellite)
        .unwrap();
    let definition = store
        .create_resource_definition(&tx, &ctx, rsc_name("db0"), None)
        .unwrap();
    let vlm_dfn = store
        .create_volume_definition(&tx, &ctx, &definition, 0, 1_048_576)
        .unwrap();
    let rsc_alpha = store.create_resource(&tx, &ctx, &alpha, &definition).unwrap();
    let rsc_beta = store.create_resource(&tx, &ctx, &beta, &definition).unwrap();
    let volume = store
        .create_volume(&tx, &ctx, &rsc_alpha, &vlm_dfn)
        .unwrap();
    let connection = store
        .connect_resources(&tx, &ctx, &rsc_alpha, &rsc_beta)
        .unwrap();
    tx.commit().unwrap();

    let tx = TransactionContext::new();
    rsc_alpha.delete(&tx, &ctx).unwrap();
    tx.commit().unwrap();

    assert!(rsc_alpha.is_deleted());
    assert!(volume.is_deleted());
    assert!(connection.is_deleted());
    assert_eq!(alpha.resource_count(), 0);
    assert_eq!(definition.resource_count(), 1);
    assert!(rsc_beta.connections(&ctx).unwrap().is_empty());
}

// =============================================================================
// State Flags on Entities
// =============================================================================

#[test]
fn evicted_node_is_also_marked_for_deletion() {
    let store = store();
    let ctx = admin();

    let tx = TransactionContext::new();
    let node = store
        .create_node(&tx, &ctx, node_name("alpha"), NodeKind::Satellite)
        .unwrap();
    node.flags()
        .unwrap()
        .enable_flags(&tx, &ctx, &[NodeFlags::Evicted])
        .unwrap();
    tx.commit().unwrap();

    let flags = node.flags().unwrap();
    assert!(flags.is_set(&ctx, NodeFlags::Evicted).unwrap());
    assert!(flags.is_set(&ctx, NodeFlags::Delete).unwrap());

    let tx = TransactionContext::new();
    flags.reset_flags_to(&tx, &ctx, &[]).unwrap();
    tx.commit().unwrap();
    assert!(!flags.is_set(&ctx, NodeFlags::Delete).unwrap());
    assert!(!flags.is_set(&ctx, NodeFlags::Evicted).unwrap());
}

// =============================================================================
// Read Projections
// =============================================================================

#[test]
fn api_data_requires_view_and_serializes() {
    let store = store_with(
        CoreConfig {
            public_access: None,
            ..CoreConfig::default()
        },
        DriverSet::default(),
    );
    let ctx = admin();
    let stranger = AccessContext::new("mallory", "spectators");

    let tx = TransactionContext::new();
    let node = store
        .create_node(&tx, &ctx, node_name("alpha"), NodeKind::Satellite)
        .unwrap();
    store
        .create_stor_pool(
            &tx,
            &ctx,
            &node,
            StorPoolName::new("fast-ssd").unwrap(),
            ProviderKind::Zfs,
        )
        .unwrap();
    node.set_prop(&tx, &ctx, "site", "rack-12").unwrap();
    tx.commit().unwrap();

    assert_matches!(
        node.api_data(&stranger, None, None),
        Err(Error::AccessDenied { .. })
    );

    let dto = node.api_data(&ctx, Some(3), Some(17)).unwrap();
    assert_eq!(dto.name.as_str(), "alpha");
    assert_eq!(dto.stor_pools.len(), 1);
    assert_eq!(dto.full_sync_id, Some(3));

    let json = serde_json::to_value(&dto).unwrap();
    assert_eq!(json["name"], "alpha");
    assert_eq!(json["kind"], "satellite");
    assert_eq!(json["props"]["site"], "rack-12");
}

// =============================================================================
// Registry Events
// =============================================================================

#[test]
fn registry_emits_lifecycle_events_on_commit() {
    let store = store();
    let ctx = admin();
    let mut events = store.nodes().subscribe();

    let tx = TransactionContext::new();
    let node = store
        .create_node(&tx, &ctx, node_name("alpha"), NodeKind::Satellite)
        .unwrap();
    assert!(events.try_recv().is_err());
    tx.commit().unwrap();

    assert_matches!(
        events.try_recv().unwrap(),
        controlplane_core::RegistryEvent::Registered { kind: "node", .. }
    );

    let tx = TransactionContext::new();
    node.delete(&tx, &ctx).unwrap();
    tx.commit().unwrap();
    assert_matches!(
        events.try_recv().unwrap(),
        controlplane_core::RegistryEvent::Removed { kind: "node", .. }
    );
}

// =============================================================================
// Duplicate Creation
// =============================================================================

#[test]
fn factory_rejects_duplicate_names_and_keeps_the_first() {
    let store = store();
    let ctx = admin();

    let tx = TransactionContext::new();
    let first = store
        .create_node(&tx, &ctx, node_name("alpha"), NodeKind::Satellite)
        .unwrap();
    tx.commit().unwrap();

    let attempt = TransactionContext::new();
    assert_matches!(
        store.create_node(&attempt, &ctx, node_name("alpha"), NodeKind::Combined),
        Err(Error::ObjectExists { .. })
    );
    attempt.rollback();

    let survivor = store.nodes().get(&node_name("alpha")).unwrap();
    assert_eq!(survivor.uuid(), first.uuid());
    assert_eq!(survivor.node_kind(&ctx).unwrap(), NodeKind::Satellite);
}
