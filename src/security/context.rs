//! Security contexts
//!
//! An [`AccessContext`] identifies the subject performing an operation: an
//! identity (who) and a role (acting as). The core never interprets either,
//! it only compares them against ACL entries and ownership records.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of an authenticated identity
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IdentityName(pub String);

impl IdentityName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for IdentityName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Name of a security role
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoleName(pub String);

impl RoleName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RoleName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

// =============================================================================
// Access Context
// =============================================================================

/// Identity of the built-in system subject
pub const SYSTEM_NAME: &str = "SYSTEM";

/// Identity of the built-in anonymous subject
pub const PUBLIC_NAME: &str = "PUBLIC";

/// The subject on whose behalf an operation runs
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessContext {
    identity: IdentityName,
    role: RoleName,
}

impl AccessContext {
    /// Create a context for the given identity acting in the given role
    pub fn new(identity: impl Into<IdentityName>, role: impl Into<RoleName>) -> Self {
        Self {
            identity: identity.into(),
            role: role.into(),
        }
    }

    /// Context of the controller itself (owner of system-created objects)
    pub fn system() -> Self {
        Self::new(IdentityName::new(SYSTEM_NAME), RoleName::new(SYSTEM_NAME))
    }

    /// Context of an unauthenticated caller
    pub fn public() -> Self {
        Self::new(IdentityName::new(PUBLIC_NAME), RoleName::new(PUBLIC_NAME))
    }

    pub fn identity(&self) -> &IdentityName {
        &self.identity
    }

    pub fn role(&self) -> &RoleName {
        &self.role
    }
}

impl From<IdentityName> for AccessContext {
    /// Context for an identity acting in its like-named default role
    fn from(identity: IdentityName) -> Self {
        let role = RoleName::new(identity.as_str());
        Self { identity, role }
    }
}

impl fmt::Display for AccessContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.identity, self.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_contexts() {
        let sys = AccessContext::system();
        assert_eq!(sys.identity().as_str(), "SYSTEM");
        assert_eq!(sys.role().as_str(), "SYSTEM");

        let anon = AccessContext::public();
        assert_eq!(anon.role().as_str(), "PUBLIC");
        assert_ne!(sys, anon);
    }

    #[test]
    fn test_default_role_from_identity() {
        let ctx: AccessContext = IdentityName::new("alice").into();
        assert_eq!(ctx.identity().as_str(), "alice");
        assert_eq!(ctx.role().as_str(), "alice");
    }
}
