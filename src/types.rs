//! Validated entity names
//!
//! Entity names are checked once at the boundary and carried as distinct
//! types from then on, so a stor-pool name cannot be passed where a node
//! name is expected.

use crate::error::{Error, Result};

const NAME_MIN_LENGTH: usize = 2;
const NAME_MAX_LENGTH: usize = 48;

fn check_name(kind: &'static str, value: &str) -> Result<()> {
    let fail = |reason: &'static str| Error::InvalidName {
        kind,
        value: value.to_string(),
        reason,
    };
    if value.len() < NAME_MIN_LENGTH {
        return Err(fail("too short"));
    }
    if value.len() > NAME_MAX_LENGTH {
        return Err(fail("too long"));
    }
    let mut chars = value.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return Err(fail("must start with a letter")),
    }
    if !chars.all(|chr| chr.is_ascii_alphanumeric() || chr == '_' || chr == '-') {
        return Err(fail("contains invalid characters"));
    }
    Ok(())
}

macro_rules! checked_name {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl AsRef<str>) -> Result<Self> {
                let value = value.as_ref();
                check_name($kind, value)?;
                Ok(Self(value.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = Error;

            fn from_str(value: &str) -> Result<Self> {
                Self::new(value)
            }
        }

        impl TryFrom<String> for $name {
            type Error = Error;

            fn try_from(value: String) -> Result<Self> {
                Self::new(&value)
            }
        }

        impl From<$name> for String {
            fn from(name: $name) -> String {
                name.0
            }
        }
    };
}

checked_name!(
    /// Name of a cluster node
    NodeName,
    "node name"
);

checked_name!(
    /// Name of a resource definition and its resources
    ResourceName,
    "resource name"
);

checked_name!(
    /// Name of a storage pool
    StorPoolName,
    "storage pool name"
);

/// Volume number within a resource
pub type VolumeNumber = u32;
