//! Capability levels
//!
//! The four access levels form a total order: `View < Use < Change <
//! Control`. Granting a level implies every lower level, so access checks
//! reduce to an ordered comparison.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Capability level granted on a protected object
///
/// Declaration order defines the capability order; the derived `Ord` is
/// load-bearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessType {
    /// Read object state
    View,
    /// Use the object as a dependency of another object
    Use,
    /// Modify object state
    Change,
    /// Full control, including deletion and ACL changes
    Control,
}

impl AccessType {
    /// Check whether this granted level satisfies a requested level
    #[inline]
    pub fn implies(self, requested: AccessType) -> bool {
        self >= requested
    }

    /// The level allowed by both of two independent grants; `None` if either
    /// side grants nothing
    pub fn intersect(first: Option<AccessType>, second: Option<AccessType>) -> Option<AccessType> {
        match (first, second) {
            (Some(one), Some(other)) => Some(one.min(other)),
            _ => None,
        }
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessType::View => write!(f, "VIEW"),
            AccessType::Use => write!(f, "USE"),
            AccessType::Change => write!(f, "CHANGE"),
            AccessType::Control => write!(f, "CONTROL"),
        }
    }
}

impl FromStr for AccessType {
    type Err = ();

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "VIEW" => Ok(AccessType::View),
            "USE" => Ok(AccessType::Use),
            "CHANGE" => Ok(AccessType::Change),
            "CONTROL" => Ok(AccessType::Control),
            _ => Err(()),
        }
    }
}
