//! Access control for control-plane objects
//!
//! Every domain entity is guarded by an [`ObjectProtection`]: an access
//! control list resolving a caller's [`AccessContext`] to an [`AccessType`]
//! capability level. Accessors require a level before touching state; the
//! levels form a total order where a granted level implies all lower ones.

pub mod access;
pub mod context;
pub mod protection;

pub use access::AccessType;
pub use context::{AccessContext, IdentityName, RoleName};
pub use protection::{AclSubject, ObjectProtection, ProtectionDrivers};
