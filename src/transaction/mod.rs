//! Transactional staging layer
//!
//! Every mutable field of a control-plane entity is wrapped in a
//! [`TransactionalValue`] (single value) or [`TransactionalMap`] (whole
//! collection). Mutations are staged against a [`TransactionContext`] and
//! become durable only when the context commits; rolling back restores every
//! staged object to its pre-mutation snapshot.
//!
//! # Contract
//!
//! - The first mutation in a dirty period snapshots the saved state and
//!   registers the object with the context; later mutations only update the
//!   current state, so exactly the net change reaches the driver on commit.
//! - Readers holding the owning aggregate's lock observe their own staged
//!   writes; other readers acquire the lock only after commit or rollback and
//!   observe committed state exclusively.
//! - Mutating outside a context is impossible by construction: every mutator
//!   takes the context as an explicit parameter.

pub mod collection;
pub mod context;
pub mod value;

pub use collection::{MapDriver, TransactionalMap};
pub use context::TransactionContext;
pub use value::{TransactionalValue, ValueDriver};

use crate::error::Result;

/// An object whose staged state a [`TransactionContext`] can commit or revert
///
/// Implementations self-register with the active context on first dirtying
/// and stay registered until the context commits or rolls back.
pub trait TransactionObject: Send + Sync {
    /// Whether the object holds uncommitted staged state
    fn is_dirty(&self) -> bool;

    /// Persist the staged state through the attached driver and mark clean
    fn commit(&self) -> Result<()>;

    /// Discard the staged state, restoring the saved snapshot
    fn rollback(&self);
}
