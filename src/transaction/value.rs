//! Staged single-value mutation wrapper

use crate::error::Result;
use crate::object::ObjectId;
use crate::transaction::{TransactionContext, TransactionObject};
use parking_lot::Mutex;
use std::sync::Arc;

// =============================================================================
// Value Driver
// =============================================================================

/// Persistence callback for a single transactional field
///
/// Invoked exactly once per commit of a dirty value, with the value before
/// the first staged mutation and the final staged value. A field without a
/// driver is transient: it stages and rolls back identically, only the
/// durability step is skipped.
pub trait ValueDriver<V>: Send + Sync {
    fn update(&self, owner: &ObjectId, old: &V, new: &V) -> Result<()>;
}

impl<V, F> ValueDriver<V> for F
where
    F: Fn(&ObjectId, &V, &V) -> Result<()> + Send + Sync,
{
    fn update(&self, owner: &ObjectId, old: &V, new: &V) -> Result<()> {
        self(owner, old, new)
    }
}

// =============================================================================
// Transactional Value
// =============================================================================

struct Staged<V> {
    current: V,
    /// `Some` exactly while the value is dirty; holds the snapshot taken on
    /// the first `set` of the dirty period
    saved: Option<V>,
}

/// A single field staged against a [`TransactionContext`]
///
/// Held as `Arc<TransactionalValue<V>>` inside its owning entity so the
/// context can retain a handle for commit/rollback after the entity borrow
/// ends.
pub struct TransactionalValue<V> {
    owner: ObjectId,
    driver: Option<Arc<dyn ValueDriver<V>>>,
    staged: Mutex<Staged<V>>,
}

impl<V: Clone + Send + 'static> TransactionalValue<V> {
    /// Wrap an initial value; `driver` is `None` for transient fields
    pub fn new(owner: ObjectId, initial: V, driver: Option<Arc<dyn ValueDriver<V>>>) -> Arc<Self> {
        Arc::new(Self {
            owner,
            driver,
            staged: Mutex::new(Staged {
                current: initial,
                saved: None,
            }),
        })
    }

    /// Current value, including uncommitted staged writes
    pub fn get(&self) -> V {
        self.staged.lock().current.clone()
    }

    /// Stage a new value
    ///
    /// The first call of a dirty period snapshots the previous value and
    /// registers this object with `tx`; later calls only replace the current
    /// value, so the driver sees the net change on commit.
    pub fn set(self: &Arc<Self>, tx: &TransactionContext, value: V) {
        let register = {
            let mut staged = self.staged.lock();
            let first_change = staged.saved.is_none();
            if first_change {
                staged.saved = Some(staged.current.clone());
            }
            staged.current = value;
            first_change
        };
        if register {
            tx.register(self.clone());
        }
    }

    /// Identity of the owning entity, as handed to the driver
    pub fn owner(&self) -> &ObjectId {
        &self.owner
    }
}

impl<V: Clone + Send + 'static> TransactionObject for TransactionalValue<V> {
    fn is_dirty(&self) -> bool {
        self.staged.lock().saved.is_some()
    }

    fn commit(&self) -> Result<()> {
        let mut staged = self.staged.lock();
        if let Some(saved) = &staged.saved {
            if let Some(driver) = &self.driver {
                driver.update(&self.owner, saved, &staged.current)?;
            }
            staged.saved = None;
        }
        Ok(())
    }

    fn rollback(&self) {
        let mut staged = self.staged.lock();
        if let Some(saved) = staged.saved.take() {
            staged.current = saved;
        }
    }
}
