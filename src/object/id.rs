//! Object identity
//!
//! Every persisted entity carries an immutable UUID assigned once at
//! creation. A separate debug instance number, drawn from a process-wide
//! counter and never persisted, disambiguates in-memory instances that share
//! a UUID while the cluster state is being resynchronized.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

static DEBUG_INSTANCE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Persistent identity of a control-plane object
///
/// Equality and hashing consider only the UUID; the debug instance number is
/// a purely in-memory disambiguator.
#[derive(Debug, Clone, Copy)]
pub struct ObjectId {
    uuid: Uuid,
    debug_instance: u64,
}

impl ObjectId {
    /// Allocate a fresh identity for a newly created object
    pub fn generate() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    /// Rebuild the identity of an object loaded from the backing store
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self {
            uuid,
            debug_instance: DEBUG_INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed),
        }
    }

    #[inline]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// In-memory instance number; never persisted
    #[inline]
    pub fn debug_instance(&self) -> u64 {
        self.debug_instance
    }
}

impl PartialEq for ObjectId {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl Eq for ObjectId {}

impl std::hash::Hash for ObjectId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_unique() {
        let first = ObjectId::generate();
        let second = ObjectId::generate();
        assert_ne!(first, second);
        assert_ne!(first.debug_instance(), second.debug_instance());
    }

    #[test]
    fn test_equality_ignores_debug_instance() {
        let uuid = Uuid::new_v4();
        let first = ObjectId::from_uuid(uuid);
        let second = ObjectId::from_uuid(uuid);
        assert_eq!(first, second);
        assert_ne!(first.debug_instance(), second.debug_instance());
    }
}
