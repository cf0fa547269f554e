//! Staged whole-collection mutation wrapper

use crate::error::Result;
use crate::object::ObjectId;
use crate::transaction::{TransactionContext, TransactionObject};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Map Driver
// =============================================================================

/// Persistence callback for a transactional collection
///
/// Commit hands the driver the complete resulting collection rather than an
/// incremental diff; collections are small and the simplicity wins over the
/// bandwidth.
pub trait MapDriver<K, V>: Send + Sync {
    fn persist(&self, owner: &ObjectId, entries: &BTreeMap<K, V>) -> Result<()>;
}

impl<K, V, F> MapDriver<K, V> for F
where
    F: Fn(&ObjectId, &BTreeMap<K, V>) -> Result<()> + Send + Sync,
{
    fn persist(&self, owner: &ObjectId, entries: &BTreeMap<K, V>) -> Result<()> {
        self(owner, entries)
    }
}

// =============================================================================
// Transactional Map
// =============================================================================

struct StagedMap<K, V> {
    current: BTreeMap<K, V>,
    /// Snapshot of the whole collection, taken on the first mutation of the
    /// dirty period
    saved: Option<BTreeMap<K, V>>,
}

/// A key-ordered collection staged against a [`TransactionContext`]
///
/// Any insert/remove/clear dirties the entire collection at once.
pub struct TransactionalMap<K, V> {
    owner: ObjectId,
    driver: Option<Arc<dyn MapDriver<K, V>>>,
    staged: Mutex<StagedMap<K, V>>,
}

impl<K, V> TransactionalMap<K, V>
where
    K: Ord + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    pub fn new(owner: ObjectId, driver: Option<Arc<dyn MapDriver<K, V>>>) -> Arc<Self> {
        Arc::new(Self {
            owner,
            driver,
            staged: Mutex::new(StagedMap {
                current: BTreeMap::new(),
                saved: None,
            }),
        })
    }

    fn stage(self: &Arc<Self>, tx: &TransactionContext) {
        let register = {
            let mut staged = self.staged.lock();
            let first_change = staged.saved.is_none();
            if first_change {
                staged.saved = Some(staged.current.clone());
            }
            first_change
        };
        if register {
            tx.register(self.clone());
        }
    }

    pub fn insert(self: &Arc<Self>, tx: &TransactionContext, key: K, value: V) -> Option<V> {
        self.stage(tx);
        self.staged.lock().current.insert(key, value)
    }

    pub fn remove(self: &Arc<Self>, tx: &TransactionContext, key: &K) -> Option<V> {
        self.stage(tx);
        self.staged.lock().current.remove(key)
    }

    pub fn clear(self: &Arc<Self>, tx: &TransactionContext) {
        self.stage(tx);
        self.staged.lock().current.clear();
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.staged.lock().current.get(key).cloned()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.staged.lock().current.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.staged.lock().current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.lock().current.is_empty()
    }

    /// Snapshot copy of the keys, in key order
    pub fn keys(&self) -> Vec<K> {
        self.staged.lock().current.keys().cloned().collect()
    }

    /// Snapshot copy of the values, in key order
    ///
    /// Cascading deletes iterate over this copy so removals during the
    /// cascade cannot invalidate the iteration.
    pub fn values(&self) -> Vec<V> {
        self.staged.lock().current.values().cloned().collect()
    }

    /// Snapshot copy of all entries, in key order
    pub fn entries(&self) -> Vec<(K, V)> {
        self.staged
            .lock()
            .current
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

impl<K, V> TransactionObject for TransactionalMap<K, V>
where
    K: Ord + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    fn is_dirty(&self) -> bool {
        self.staged.lock().saved.is_some()
    }

    fn commit(&self) -> Result<()> {
        let mut staged = self.staged.lock();
        if staged.saved.is_some() {
            if let Some(driver) = &self.driver {
                driver.persist(&self.owner, &staged.current)?;
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
