//! Link configuration
//!
//! Configuration is plain YAML. Every field is optional; missing fields take
//! their defaults. Durations are given in milliseconds.
//!
//! ```yaml
//! target_name: iPhone
//! scan_timeout_ms: 5000
//! connect_timeout_ms: 10000
//! discovery_timeout_ms: 15000
//! exit_command: exit
//! write_with_response: true
//! allow_command_only: false
//! event_capacity: 256
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{LinkError, Result};

/// Settings for establishing and running a link session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkConfig {
    /// Substring the peripheral's advertised name must contain (case-sensitive)
    pub target_name: String,

    /// How long a scan runs before selection
    #[serde(rename = "scan_timeout_ms", with = "millis")]
    pub scan_timeout: Duration,

    /// Upper bound on establishing the transport connection
    #[serde(rename = "connect_timeout_ms", with = "millis")]
    pub connect_timeout: Duration,

    /// Upper bound on service/characteristic discovery
    #[serde(rename = "discovery_timeout_ms", with = "millis")]
    pub discovery_timeout: Duration,

    /// Input line that ends the command loop (compared case-insensitively)
    pub exit_command: String,

    /// Wait for the peripheral to acknowledge each command write
    pub write_with_response: bool,

    /// Keep the session open for commands when the characteristic cannot notify
    pub allow_command_only: bool,

    /// Capacity of the transport event channel
    pub event_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            target_name: "iPhone".to_string(),
            scan_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            discovery_timeout: Duration::from_secs(15),
            exit_command: "exit".to_string(),
            write_with_response: true,
            allow_command_only: false,
            event_capacity: 256,
        }
    }
}

impl LinkConfig {
    /// Parse configuration from a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)
            .map_err(|e| LinkError::config("<inline>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading link configuration from {}", path.display());

        let yaml = std::fs::read_to_string(path)
            .map_err(|e| LinkError::config(path, format!("cannot read file: {e}")))?;
        let config: Self =
            serde_yaml_ng::from_str(&yaml).map_err(|e| LinkError::config(path, e.to_string()))?;
        config.validate().map_err(|e| match e {
            LinkError::Config { details, .. } => LinkError::config(path, details),
            other => other,
        })?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        let zero_durations = [
            ("scan_timeout_ms", self.scan_timeout),
            ("connect_timeout_ms", self.connect_timeout),
            ("discovery_timeout_ms", self.discovery_timeout),
        ];
        if let Some((name, _)) = zero_durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(LinkError::config("<inline>", format!("{name} must be greater than zero")));
        }
        if self.event_capacity == 0 {
            return Err(LinkError::config("<inline>", "event_capacity must be greater than zero"));
        }
        if self.exit_command.trim().is_empty() {
            return Err(LinkError::config("<inline>", "exit_command must not be empty"));
        }
        Ok(())
    }

    /// Whether an input line is the exit sentinel.
    pub fn is_exit_command(&self, line: &str) -> bool {
        line.trim_end_matches(['\r', '\n']).eq_ignore_ascii_case(&self.exit_command)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
