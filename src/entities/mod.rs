//! Domain entities
//!
//! Concrete entity types composed from the core substrate: identity and
//! soft-delete via [`CoreObject`](crate::object::CoreObject), access control
//! via [`ObjectProtection`](crate::security::ObjectProtection), staged
//! mutation via the transaction layer. Entities carry no placement or sizing
//! logic; they are the cluster's bookkeeping.
//!
//! Ownership points downward only: a node owns its storage pools, a resource
//! definition owns its volume definitions, a resource owns its volumes and
//! connections. Links back toward a parent are non-owning weak handles plus
//! the parent's name, so the object graph stays cycle-free.

pub mod connection;
pub mod node;
pub mod resource;
pub mod resource_definition;
pub mod stor_pool;
pub mod volume;

pub use connection::{ResourceConnection, ResourceConnectionDto, ResourceConnectionFactory};
pub use node::{Node, NodeDto, NodeFactory, NodeFlags, NodeKind};
pub use resource::{Resource, ResourceDto, ResourceFactory, ResourceFlags};
pub use resource_definition::{
    ResourceDefinition, ResourceDefinitionDto, ResourceDefinitionFactory,
    ResourceDefinitionFlags, VolumeDefinition, VolumeDefinitionDto, VolumeDefinitionFactory,
    VolumeDefinitionFlags,
};
pub use stor_pool::{ProviderKind, StorPool, StorPoolDto, StorPoolFactory};
pub use volume::{Volume, VolumeDto, VolumeFactory, VolumeFlags};
