//! Control-Plane Core - Transactional Cluster Data Layer
//!
//! The data layer of a clustered storage orchestrator: tracks nodes, storage
//! pools, resource definitions, resources, volumes and their relationships,
//! enforces who may read or mutate each entity, and stages mutations so they
//! commit atomically toward a backing store.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            Cluster Store                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌──────────────────────┐  ┌─────────────────────┐ │
//! │  │   Aggregate     │  │      Entities        │  │    Number Pools     │ │
//! │  │   Registries    │  │  Node / StorPool /   │  │   (TCP ports, ...)  │ │
//! │  │  (events/stats) │  │  RscDfn / Rsc / Vlm  │  │                     │ │
//! │  └────────┬────────┘  └──────────┬───────────┘  └──────────┬──────────┘ │
//! │           │                      │                         │            │
//! │           └──────────────────────┼─────────────────────────┘            │
//! │                                  │                                      │
//! │                    ┌─────────────┴─────────────┐                        │
//! │                    │     Core Substrate        │                        │
//! │                    │  CoreObject (soft delete) │                        │
//! │                    │  ObjectProtection (ACL)   │                        │
//! │                    │  StateFlags (bitmasks)    │                        │
//! │                    └─────────────┬─────────────┘                        │
//! │                                  │                                      │
//! │                    ┌─────────────┴─────────────┐                        │
//! │                    │    Transaction Layer      │                        │
//! │                    │  TransactionalValue/Map   │                        │
//! │                    │  TransactionContext       │                        │
//! │                    └───────────────────────────┘                        │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │              Injected persistence drivers (SQL/etcd, out of tree)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`transaction`]: staged values/collections and the unit-of-work context
//! - [`security`]: capability levels, contexts and per-object protection
//! - [`flags`]: typed bitmask state flags
//! - [`numberpool`]: bounded integer allocator with rollback journal
//! - [`object`]: identity, soft-delete entity core, aggregate registries
//! - [`props`]: transactional key/value containers
//! - [`entities`]: the concrete domain entity compositions
//! - [`store`]: the wired cluster store
//! - [`error`]: error types and handling

pub mod config;
pub mod entities;
pub mod error;
pub mod flags;
pub mod numberpool;
pub mod object;
pub mod props;
pub mod security;
pub mod store;
pub mod transaction;
pub mod types;

// Re-export commonly used types
pub use config::CoreConfig;
pub use entities::{
    Node, NodeDto, NodeFactory, NodeFlags, NodeKind, ProviderKind, Resource,
    ResourceConnection, ResourceConnectionDto, ResourceConnectionFactory, ResourceDefinition,
    ResourceDefinitionDto, ResourceDefinitionFactory, ResourceDefinitionFlags, ResourceDto,
    ResourceFactory, ResourceFlags, StorPool, StorPoolDto, StorPoolFactory, Volume,
    VolumeDefinition, VolumeDefinitionDto, VolumeDefinitionFactory, VolumeDefinitionFlags,
    VolumeDto, VolumeFactory, VolumeFlags,
};
pub use error::{Error, Result};
pub use flags::{FlagSet, StateFlags};
pub use numberpool::NumberPool;
pub use object::{
    AggregateRegistry, CoreEntity, CoreObject, EntityDriver, ObjectId, RegistryEvent,
    RegistrySnapshot,
};
pub use props::PropsContainer;
pub use security::{AccessContext, AccessType, AclSubject, IdentityName, ObjectProtection,
    ProtectionDrivers, RoleName};
pub use store::{ClusterStore, DriverSet};
pub use transaction::{
    MapDriver, TransactionContext, TransactionObject, TransactionalMap, TransactionalValue,
    ValueDriver,
};
pub use types::{NodeName, ResourceName, StorPoolName, VolumeNumber};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
