//! Channel configuration
//!
//! Defaults suit an interactive peer: the engine is polled every 50 ms, the
//! node re-bootstraps every 10 s while disconnected, and queued sends are
//! admitted once per second.
//!
//! # Example
//!
//! ```
//! use peerlink_core::config::ChannelConfig;
//!
//! let config = ChannelConfig::from_toml_str(r#"
//!     send_timeout_secs = 45
//!
//!     [[bootstrap_nodes]]
//!     host = "198.51.100.7"
//!     port = 33445
//!     public_key = "8E7D0B859922EF569298B4D261A8CCB5FEA14FB91ED412A7603A585A25698832"
//! "#).unwrap();
//!
//! assert_eq!(config.send_timeout_secs, 45);
//! assert_eq!(config.poll_interval_ms, 50);
//! ```

use crate::endpoint::{BootstrapNode, EndpointOptions};
use crate::error::{ChannelError, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Runtime configuration of a channel
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelConfig {
    /// Period of the network-poll tick in milliseconds
    pub poll_interval_ms: u64,

    /// Period of the bootstrap tick in seconds
    pub bootstrap_interval_secs: u64,

    /// Period of the send-admission tick in seconds
    pub admission_interval_secs: u64,

    /// Seconds an admitted send may wait for its first chunk request
    pub send_timeout_secs: u64,

    /// Capacity of the hand-off queue into the coordinator
    pub command_capacity: usize,

    /// Status message set on a fresh identity
    pub status_message: String,

    /// Fewer configured bootstrap nodes than this triggers a warning
    pub min_bootstrap_nodes: usize,

    /// Nodes used to (re)join the network
    pub bootstrap_nodes: Vec<BootstrapNode>,

    /// Enable IPv6 on the endpoint
    pub ipv6_enabled: bool,

    /// Enable UDP on the endpoint
    pub udp_enabled: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            bootstrap_interval_secs: 10,
            admission_interval_secs: 1,
            send_timeout_secs: 30,
            command_capacity: 256,
            status_message: "peerlink peer".to_string(),
            min_bootstrap_nodes: 5,
            bootstrap_nodes: Vec::new(),
            ipv6_enabled: true,
            udp_enabled: true,
        }
    }
}

impl ChannelConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| ChannelError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        tracing::debug!("Loaded channel configuration from {}", path.display());
        Self::from_toml_str(&text)
    }

    /// Reject values that would stall or spin the coordinator.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(ChannelError::InvalidConfig(
                "poll_interval_ms must be greater than 0".into(),
            ));
        }
        if self.bootstrap_interval_secs == 0 {
            return Err(ChannelError::InvalidConfig(
                "bootstrap_interval_secs must be greater than 0".into(),
            ));
        }
        if self.admission_interval_secs == 0 {
            return Err(ChannelError::InvalidConfig(
                "admission_interval_secs must be greater than 0".into(),
            ));
        }
        if self.command_capacity == 0 {
            return Err(ChannelError::InvalidConfig(
                "command_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Network-poll period.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Bootstrap period.
    pub fn bootstrap_interval(&self) -> Duration {
        Duration::from_secs(self.bootstrap_interval_secs)
    }

    /// Admission period.
    pub fn admission_interval(&self) -> Duration {
        Duration::from_secs(self.admission_interval_secs)
    }

    /// Staleness bound for admitted sends.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    /// Endpoint options derived from this configuration.
    pub fn endpoint_options(&self, saved_state: Option<Vec<u8>>) -> EndpointOptions {
        EndpointOptions {
            ipv6_enabled: self.ipv6_enabled,
            udp_enabled: self.udp_enabled,
            saved_state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_is_valid() {
        let config = ChannelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.bootstrap_interval(), Duration::from_secs(10));
        assert_eq!(config.admission_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ChannelConfig::from_toml_str("admission_interval_secs = 3").unwrap();
        assert_eq!(config.admission_interval_secs, 3);
        assert_eq!(config.command_capacity, 256);
        assert!(config.bootstrap_nodes.is_empty());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let result = ChannelConfig::from_toml_str("poll_interval_ms = 0");
        assert!(matches!(result, Err(ChannelError::InvalidConfig(_))));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = ChannelConfig::from_toml_str("no_such_option = true");
        assert!(matches!(result, Err(ChannelError::InvalidConfig(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "status_message = \"test peer\"\n\n[[bootstrap_nodes]]\nhost = \"127.0.0.1\"\nport = 33445\npublic_key = \"AA\""
        )
        .unwrap();

        let config = ChannelConfig::load(file.path()).unwrap();
        assert_eq!(config.status_message, "test peer");
        assert_eq!(config.bootstrap_nodes.len(), 1);
        assert_eq!(config.bootstrap_nodes[0].port, 33445);
    }

    #[test]
    fn test_endpoint_options_carry_saved_state() {
        let config = ChannelConfig {
            udp_enabled: false,
            ..ChannelConfig::default()
        };
        let options = config.endpoint_options(Some(vec![1, 2, 3]));
        assert!(!options.udp_enabled);
        assert_eq!(options.saved_state, Some(vec![1, 2, 3]));
    }
}
