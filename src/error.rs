//! Error types for the control-plane core
//!
//! Provides structured error types for all core components including the
//! transaction layer, object protection, state flags and number pools.

use crate::security::AccessType;
use thiserror::Error;

/// Unified error type for the control-plane core
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Access Control Errors
    // =========================================================================
    #[error("Access denied: role '{role}' requested {requested} on {object}")]
    AccessDenied {
        role: String,
        requested: AccessType,
        object: String,
    },

    #[error("Access to deleted {kind}")]
    AccessToDeletedData { kind: &'static str },

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    #[error("Persistence driver failed: {0}")]
    Persistence(String),

    // =========================================================================
    // Number Pool Errors
    // =========================================================================
    #[error("Number {number} is already in use in pool '{pool}'")]
    ValueInUse { pool: String, number: u32 },

    #[error("Number {number} is out of range [{min}, {max}] of pool '{pool}'")]
    ValueOutOfRange {
        pool: String,
        number: u32,
        min: u32,
        max: u32,
    },

    #[error("Pool '{pool}' has no free numbers left")]
    ExhaustedPool { pool: String },

    // =========================================================================
    // Naming & Lookup Errors
    // =========================================================================
    #[error("Invalid {kind} '{value}': {reason}")]
    InvalidName {
        kind: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("{kind} '{name}' already exists")]
    ObjectExists { kind: &'static str, name: String },

    #[error("{kind} '{name}' not found")]
    ObjectNotFound { kind: &'static str, name: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Implementation error: {0}")]
    ImplementationError(String),
}

impl Error {
    /// Check if this error represents a normal runtime condition the caller
    /// can recover from (pick another value, reload, surface to the user)
    pub fn is_recoverable(&self) -> bool {
        !self.is_fatal()
    }

    /// Check if this error signals a caller invariant violation, i.e. a bug
    /// that must never be silently swallowed
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ImplementationError(_))
    }

    /// Check if this error requires the owning transaction context to be
    /// rolled back before it is surfaced
    pub fn requires_rollback(&self) -> bool {
        matches!(self, Error::Persistence(_))
    }
}

/// Result type alias for the control-plane core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let denied = Error::AccessDenied {
            role: "public".into(),
            requested: AccessType::Change,
            object: "node 'alpha'".into(),
        };
        assert!(denied.is_recoverable());
        assert!(!denied.is_fatal());

        let bug = Error::ImplementationError("node with resources cannot be deleted".into());
        assert!(bug.is_fatal());
        assert!(!bug.is_recoverable());

        let db = Error::Persistence("connection reset".into());
        assert!(db.requires_rollback());
        assert!(db.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::ValueOutOfRange {
            pool: "tcp-ports".into(),
            number: 6999,
            min: 7000,
            max: 7999,
        };
        assert_eq!(
            err.to_string(),
            "Number 6999 is out of range [7000, 7999] of pool 'tcp-ports'"
        );
    }
}
