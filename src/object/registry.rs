//! Aggregate registries
//!
//! Each aggregate root type (nodes, resource definitions, ...) is tracked in
//! one registry: a concurrent name-to-object map with lifecycle event
//! broadcasting and counters. Registry membership changes are journaled with
//! the owning transaction context, so a rolled-back create disappears from
//! the registry again; lifecycle events are emitted on commit only.

use crate::error::{Error, Result};
use crate::object::core::CoreEntity;
use crate::transaction::{TransactionContext, TransactionObject};
use dashmap::DashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

/// Default capacity of the lifecycle event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

// =============================================================================
// Registry Events
// =============================================================================

/// Lifecycle event emitted when a registry change commits
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Registered {
        kind: &'static str,
        name: String,
        uuid: Uuid,
    },
    Removed {
        kind: &'static str,
        name: String,
        uuid: Uuid,
    },
}

// =============================================================================
// Registry Statistics
// =============================================================================

#[derive(Debug, Default)]
struct RegistryStats {
    registered: AtomicU64,
    removed: AtomicU64,
}

/// Snapshot of registry counters
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    pub kind: &'static str,
    pub current: usize,
    pub registered: u64,
    pub removed: u64,
}

// =============================================================================
// Aggregate Registry
// =============================================================================

/// Name-keyed map of the live aggregates of one entity type
pub struct AggregateRegistry<K, T> {
    kind: &'static str,
    objects: DashMap<K, Arc<T>>,
    stats: RegistryStats,
    events: broadcast::Sender<RegistryEvent>,
}

impl<K, T> AggregateRegistry<K, T>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    T: CoreEntity,
{
    pub fn new(kind: &'static str) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            kind,
            objects: DashMap::new(),
            stats: RegistryStats::default(),
            events,
        })
    }

    /// Subscribe to committed lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Register a new aggregate under `key`
    ///
    /// Fails with `ObjectExists` when the key is taken. The membership change
    /// is journaled with `tx`: rollback removes the entry again, commit emits
    /// the `Registered` event.
    pub fn insert(self: &Arc<Self>, tx: &TransactionContext, key: K, object: Arc<T>) -> Result<()> {
        match self.objects.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::ObjectExists {
                kind: self.kind,
                name: key.to_string(),
            }),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let uuid = object.uuid();
                entry.insert(object.clone());
                self.stats.registered.fetch_add(1, Ordering::Relaxed);
                info!(kind = self.kind, name = %key, %uuid, "registered aggregate");
                tx.register(MembershipUndo::new(
                    self.clone(),
                    key,
                    object,
                    MembershipOp::Inserted,
                ));
                Ok(())
            }
        }
    }

    /// Remove the aggregate under `key`
    ///
    /// The membership change is journaled with `tx`: rollback re-inserts the
    /// entry, commit emits the `Removed` event.
    pub fn remove(self: &Arc<Self>, tx: &TransactionContext, key: &K) -> Option<Arc<T>> {
        let (key, object) = self.objects.remove(key)?;
        self.stats.removed.fetch_add(1, Ordering::Relaxed);
        info!(kind = self.kind, name = %key, "removed aggregate");
        tx.register(MembershipUndo::new(
            self.clone(),
            key,
            object.clone(),
            MembershipOp::Removed,
        ));
        Some(object)
    }

    pub fn get(&self, key: &K) -> Option<Arc<T>> {
        self.objects.get(key).map(|entry| entry.value().clone())
    }

    /// Resolve `key` or fail with `ObjectNotFound`
    pub fn require(&self, key: &K) -> Result<Arc<T>> {
        self.get(key).ok_or_else(|| Error::ObjectNotFound {
            kind: self.kind,
            name: key.to_string(),
        })
    }

    pub fn contains(&self, key: &K) -> bool {
        self.objects.contains_key(key)
    }

    /// Snapshot copy of all registered aggregates
    pub fn values(&self) -> Vec<Arc<T>> {
        self.objects
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Snapshot copy of all keys
    pub fn keys(&self) -> Vec<K> {
        self.objects.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn stats(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            kind: self.kind,
            current: self.objects.len(),
            registered: self.stats.registered.load(Ordering::Relaxed),
            removed: self.stats.removed.load(Ordering::Relaxed),
        }
    }

    fn emit(&self, event: RegistryEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }
}

// =============================================================================
// Membership Journal
// =============================================================================

enum MembershipOp {
    Inserted,
    Removed,
}

/// One journaled membership change; commit emits the lifecycle event,
/// rollback reverts the map
struct MembershipUndo<K, T> {
    registry: Arc<AggregateRegistry<K, T>>,
    key: K,
    object: Arc<T>,
    op: MembershipOp,
    armed: AtomicBool,
}

impl<K, T> MembershipUndo<K, T>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    T: CoreEntity,
{
    fn new(
        registry: Arc<AggregateRegistry<K, T>>,
        key: K,
        object: Arc<T>,
        op: MembershipOp,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            key,
            object,
            op,
            armed: AtomicBool::new(true),
        })
    }
}

impl<K, T> TransactionObject for MembershipUndo<K, T>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    T: CoreEntity,
{
    fn is_dirty(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    fn commit(&self) -> Result<()> {
        if self.armed.swap(false, Ordering::AcqRel) {
            let event = match self.op {
                MembershipOp::Inserted => RegistryEvent::Registered {
                    kind: self.registry.kind,
                    name: self.key.to_string(),
                    uuid: self.object.uuid(),
                },
                MembershipOp::Removed => RegistryEvent::Removed {
                    kind: self.registry.kind,
                    name: self.key.to_string(),
                    uuid: self.object.uuid(),
                },
            };
            self.registry.emit(event);
        }
        Ok(())
    }

    fn rollback(&self) {
        if self.armed.swap(false, Ordering::AcqRel) {
            match self.op {
                MembershipOp::Inserted => {
                    self.registry.objects.remove(&self.key);
                }
                MembershipOp::Removed => {
                    self.registry
                        .objects
                        .insert(self.key.clone(), self.object.clone());
                }
            }
        }
    }
}
