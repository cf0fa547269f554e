//! Core configuration

use crate::security::AccessType;
use serde::{Deserialize, Serialize};

/// Configuration for the control-plane data layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Lower bound of the cluster-wide TCP port pool (inclusive)
    pub tcp_port_min: u16,
    /// Upper bound of the cluster-wide TCP port pool (inclusive)
    pub tcp_port_max: u16,
    /// Access level granted to callers with no ACL entry; `None` denies
    /// everything not explicitly granted
    pub public_access: Option<AccessType>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            tcp_port_min: 7000,
            tcp_port_max: 7999,
            public_access: Some(AccessType::View),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.tcp_port_min, 7000);
        assert_eq!(config.tcp_port_max, 7999);
        assert_eq!(config.public_access, Some(AccessType::View));
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let config: CoreConfig = serde_json::from_str(r#"{"tcp_port_max": 7009}"#).unwrap();
        assert_eq!(config.tcp_port_min, 7000);
        assert_eq!(config.tcp_port_max, 7009);
        assert_eq!(config.public_access, Some(AccessType::View));
    }
}
