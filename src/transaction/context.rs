//! Unit-of-work boundary

use crate::error::Result;
use crate::transaction::TransactionObject;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

/// Aggregates every dirty transaction object touched during one logical
/// operation and commits or rolls back all of them as one unit
///
/// One external operation opens exactly one context; any number of entities
/// may stage mutations against it. Objects register on first dirtying and are
/// kept in registration order, keyed by pointer identity so an object appears
/// at most once per dirty period.
pub struct TransactionContext {
    dirty: Mutex<IndexMap<usize, Arc<dyn TransactionObject>>>,
}

impl TransactionContext {
    pub fn new() -> Self {
        Self {
            dirty: Mutex::new(IndexMap::new()),
        }
    }

    /// Register a dirty object; a no-op if it is already registered
    ///
    /// Called by the transactional wrappers themselves; operation code never
    /// needs to call this directly.
    pub fn register(&self, object: Arc<dyn TransactionObject>) {
        let key = Arc::as_ptr(&object) as *const () as usize;
        self.dirty.lock().entry(key).or_insert(object);
    }

    /// Whether any registered object still holds uncommitted state
    pub fn is_dirty(&self) -> bool {
        self.dirty.lock().values().any(|object| object.is_dirty())
    }

    /// Number of objects staged in this context
    pub fn dirty_count(&self) -> usize {
        self.dirty.lock().len()
    }

    /// Persist every staged object in registration order
    ///
    /// Stops at the first driver failure and returns the error with the
    /// remaining objects still staged; already-applied driver calls are not
    /// compensated. Callers either roll back the in-memory state or discard
    /// the whole operation. A no-op when nothing is dirty.
    pub fn commit(&self) -> Result<()> {
        let objects: Vec<Arc<dyn TransactionObject>> = {
            let dirty = self.dirty.lock();
            dirty.values().cloned().collect()
        };
        for object in &objects {
            object.commit()?;
        }
        self.dirty.lock().clear();
        Ok(())
    }

    /// Revert every staged object, in reverse registration order
    ///
    /// A no-op when nothing is dirty.
    pub fn rollback(&self) {
        let objects: Vec<Arc<dyn TransactionObject>> = {
            let mut dirty = self.dirty.lock();
            let drained = dirty.values().cloned().collect();
            dirty.clear();
            drained
        };
        for object in objects.iter().rev() {
            object.rollback();
        }
    }
}

impl Default for TransactionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TransactionContext {
    /// A context dropped while dirty indicates an operation that returned
    /// without deciding; revert the staged state rather than leak it
    fn drop(&mut self) {
        if self.is_dirty() {
            warn!(
                staged = self.dirty_count(),
                "transaction context dropped while dirty, rolling back"
            );
            self.rollback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectId;
    use crate::transaction::TransactionalValue;

    #[test]
    fn test_commit_and_rollback_are_idempotent_when_clean() {
        let tx = TransactionContext::new();
        assert!(!tx.is_dirty());
        assert!(tx.commit().is_ok());
        tx.rollback();
        assert!(tx.commit().is_ok());
    }

    #[test]
    fn test_object_registers_once_per_dirty_period() {
        let tx = TransactionContext::new();
        let value = TransactionalValue::new(ObjectId::generate(), 0u32, None);

        value.set(&tx, 1);
        value.set(&tx, 2);
        value.set(&tx, 3);
        assert_eq!(tx.dirty_count(), 1);
    }

    #[test]
    fn test_context_aggregates_many_objects() {
        let tx = TransactionContext::new();
        let first = TransactionalValue::new(ObjectId::generate(), 1u32, None);
        let second = TransactionalValue::new(ObjectId::generate(), 10u32, None);

        first.set(&tx, 2);
        second.set(&tx, 20);
        assert_eq!(tx.dirty_count(), 2);

        tx.rollback();
        assert_eq!(first.get(), 1);
        assert_eq!(second.get(), 10);
        assert_eq!(tx.dirty_count(), 0);
    }

    #[test]
    fn test_commit_clears_the_dirty_set() {
        let tx = TransactionContext::new();
        let value = TransactionalValue::new(ObjectId::generate(), 1u32, None);

        value.set(&tx, 2);
        tx.commit().unwrap();
        assert_eq!(tx.dirty_count(), 0);

        // A later dirty period registers the object again
        value.set(&tx, 3);
        assert_eq!(tx.dirty_count(), 1);
        tx.rollback();
    }
}
