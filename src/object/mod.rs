//! Entity base abstractions
//!
//! Every persisted, access-controlled, soft-deletable domain entity is a
//! composition of a [`CoreObject`] (identity + protection + deletion state)
//! with its own transactional fields. Aggregate roots are tracked in an
//! [`AggregateRegistry`] which broadcasts lifecycle events.

pub mod core;
pub mod id;
pub mod registry;

pub use self::core::{CoreEntity, CoreObject, EntityDriver};
pub use id::ObjectId;
pub use registry::{AggregateRegistry, RegistryEvent, RegistrySnapshot};
