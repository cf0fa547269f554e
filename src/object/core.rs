//! Soft-delete entity core

use crate::error::{Error, Result};
use crate::object::ObjectId;
use crate::security::{AccessContext, AccessType, ObjectProtection};
use crate::transaction::{TransactionContext, TransactionalValue};
use chrono::{DateTime, Utc};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

// =============================================================================
// Entity Driver
// =============================================================================

/// Persistence lifecycle callbacks for one entity
///
/// `create` and `delete` are each invoked once per entity lifecycle event,
/// inside the owning transaction context. `None` where the entity is not
/// persisted.
pub trait EntityDriver: Send + Sync {
    fn create(&self, id: &ObjectId) -> Result<()>;
    fn delete(&self, id: &ObjectId) -> Result<()>;
}

// =============================================================================
// Core Object
// =============================================================================

/// Shared state of every domain entity: identity, access protection and the
/// soft-delete lifecycle
///
/// The deletion marker transitions `false -> true` exactly once and never
/// reverses (within a committed history; rolling back an uncommitted delete
/// restores the entity, like every other staged mutation). Every entity
/// accessor starts with [`check_deleted`](CoreObject::check_deleted) or the
/// combined [`ensure_access`](CoreObject::ensure_access).
pub struct CoreObject {
    id: ObjectId,
    kind: &'static str,
    /// Display label, e.g. `node 'alpha'`; used in logs and denial messages
    label: String,
    created_at: DateTime<Utc>,
    protection: Arc<ObjectProtection>,
    // The marker itself is never persisted; deletion durability comes from
    // the entity driver's delete call
    deleted: Arc<TransactionalValue<bool>>,
    driver: Option<Arc<dyn EntityDriver>>,
    lock: RwLock<()>,
}

impl CoreObject {
    pub(crate) fn new(
        id: ObjectId,
        kind: &'static str,
        label: String,
        protection: Arc<ObjectProtection>,
        driver: Option<Arc<dyn EntityDriver>>,
    ) -> Self {
        Self {
            id,
            kind,
            label,
            created_at: Utc::now(),
            protection,
            deleted: TransactionalValue::new(id, false, None),
            driver,
            lock: RwLock::new(()),
        }
    }

    #[inline]
    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    #[inline]
    pub fn uuid(&self) -> Uuid {
        self.id.uuid()
    }

    #[inline]
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// When this in-memory instance was constructed
    #[inline]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn protection(&self) -> &Arc<ObjectProtection> {
        &self.protection
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.get()
    }

    /// Fail when the entity has been soft-deleted
    pub fn check_deleted(&self) -> Result<()> {
        if self.deleted.get() {
            Err(Error::AccessToDeletedData { kind: self.kind })
        } else {
            Ok(())
        }
    }

    /// Deletion check followed by the access check, in that order; the
    /// opening sequence of every domain accessor
    pub fn ensure_access(&self, ctx: &AccessContext, requested: AccessType) -> Result<()> {
        self.check_deleted()?;
        self.protection.require_access(ctx, requested)
    }

    /// Tail of an entity's delete sequence: issue the driver delete, drop the
    /// ACL and stage the deletion marker
    ///
    /// Callers have already required CONTROL, cascaded to owned children and
    /// detached from parent collections.
    pub(crate) fn finish_delete(&self, tx: &TransactionContext) -> Result<()> {
        if let Some(driver) = &self.driver {
            driver.delete(&self.id)?;
        }
        self.protection.clear(tx);
        self.deleted.set(tx, true);
        debug!(object = %self.label, uuid = %self.id, "deleted");
        Ok(())
    }

    /// Invoke the create driver; part of the factory construction sequence
    pub(crate) fn driver_create(&self) -> Result<()> {
        if let Some(driver) = &self.driver {
            driver.create(&self.id)?;
        }
        Ok(())
    }

    /// Shared lock on this aggregate; held by readers for the duration of a
    /// consistent read sequence
    pub fn read_guard(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read()
    }

    /// Exclusive lock on this aggregate; held by a mutating sequence until
    /// its transaction context commits or rolls back
    pub fn write_guard(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write()
    }
}

/// Accessor contract shared by every domain entity
pub trait CoreEntity: Send + Sync + 'static {
    fn core(&self) -> &CoreObject;

    fn uuid(&self) -> Uuid {
        self.core().uuid()
    }

    fn is_deleted(&self) -> bool {
        self.core().is_deleted()
    }

    fn protection(&self) -> &Arc<ObjectProtection> {
        self.core().protection()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::ProtectionDrivers;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;

    struct RecordingEntityDriver {
        created: Mutex<Vec<Uuid>>,
        deleted: Mutex<Vec<Uuid>>,
    }

    impl RecordingEntityDriver {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                created: Mutex::new(Vec::new()),
                deleted: Mutex::new(Vec::new()),
            })
        }
    }

    impl EntityDriver for RecordingEntityDriver {
        fn create(&self, id: &ObjectId) -> Result<()> {
            self.created.lock().push(id.uuid());
            Ok(())
        }

        fn delete(&self, id: &ObjectId) -> Result<()> {
            self.deleted.lock().push(id.uuid());
            Ok(())
        }
    }

    fn core_object(driver: Option<Arc<dyn EntityDriver>>) -> (AccessContext, CoreObject) {
        let ctx = AccessContext::new("alice", "storage-admins");
        let id = ObjectId::generate();
        let protection = ObjectProtection::new(
            id,
            "node 'alpha'",
            &ctx,
            None,
            ProtectionDrivers::default(),
        );
        (
            ctx,
            CoreObject::new(id, "node", "node 'alpha'".into(), protection, driver),
        )
    }

    #[test]
    fn test_deleted_core_rejects_every_access() {
        let tx = TransactionContext::new();
        let (ctx, core) = core_object(None);

        assert!(core.ensure_access(&ctx, AccessType::Control).is_ok());

        core.finish_delete(&tx).unwrap();
        tx.commit().unwrap();

        assert!(core.is_deleted());
        assert_matches!(
            core.check_deleted(),
            Err(Error::AccessToDeletedData { kind: "node" })
        );
        assert_matches!(
            core.ensure_access(&ctx, AccessType::View),
            Err(Error::AccessToDeletedData { .. })
        );
    }

    #[test]
    fn test_rolled_back_delete_restores_the_entity() {
        let tx = TransactionContext::new();
        let (ctx, core) = core_object(None);

        core.finish_delete(&tx).unwrap();
        assert!(core.is_deleted());

        tx.rollback();
        assert!(!core.is_deleted());
        assert!(core.ensure_access(&ctx, AccessType::View).is_ok());
    }

    #[test]
    fn test_driver_called_once_per_lifecycle_event() {
        let driver = RecordingEntityDriver::new();
        let tx = TransactionContext::new();
        let (_ctx, core) = core_object(Some(driver.clone() as Arc<dyn EntityDriver>));

        core.driver_create().unwrap();
        assert_eq!(driver.created.lock().len(), 1);
        assert_eq!(driver.created.lock()[0], core.uuid());

        core.finish_delete(&tx).unwrap();
        tx.commit().unwrap();
        assert_eq!(driver.deleted.lock().len(), 1);
    }
}
