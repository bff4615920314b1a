//! Error types for the BLE telemetry link.
//!
//! Every failure class the link can produce has its own variant so that an
//! operator (or a test harness) can tell a bad frame apart from a missing
//! device apart from a dropped link.
//!
//! ## Error Categories
//!
//! - **Frame Errors**: A notification payload that is not a 32-byte frame
//! - **Establishment Errors**: Discovery, connection and endpoint resolution failures
//! - **Degraded Sessions**: The telemetry characteristic cannot notify
//! - **Command Errors**: A write to the command characteristic was rejected
//! - **Link Errors**: The transport dropped the connection mid-stream
//! - **Configuration Errors**: Unreadable or invalid configuration files
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use gaslink::LinkError;
//!
//! let error = LinkError::connection_failed("adapter refused connection");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for link operations.
pub type Result<T, E = LinkError> = std::result::Result<T, E>;

/// Main error type for link operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LinkError {
    #[error("Invalid frame length: expected 32 bytes, got {actual}")]
    FrameLength { actual: usize },

    #[error("No peripheral advertising a name containing '{pattern}' ({scanned} scanned)")]
    NoMatchingPeripheral { pattern: String, scanned: usize },

    #[error("Failed to connect to peripheral: {reason}")]
    Connection {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Characteristic {characteristic} of service {service} not found on peripheral")]
    EndpointNotFound { service: Uuid, characteristic: Uuid },

    #[error("Characteristic {characteristic} supports neither notify nor indicate")]
    UnsupportedCharacteristic { characteristic: Uuid },

    #[error("Command write failed: {reason}")]
    CommandWrite {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Link to peripheral dropped{}", reason_suffix(.reason))]
    Disconnected { reason: Option<String> },

    #[error("No active session: {operation} requires a connected peripheral")]
    NotConnected { operation: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Bluetooth transport error during {operation}")]
    Transport {
        operation: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Configuration error in {path}: {details}")]
    Config { path: PathBuf, details: String },
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default()
}

impl LinkError {
    /// Returns whether this error is potentially recoverable through retry.
    ///
    /// Establishment errors are terminal for the attempt that produced them,
    /// but the caller may start a fresh attempt from `Disconnected`.
    pub fn is_retryable(&self) -> bool {
        match self {
            LinkError::FrameLength { .. } => true,
            LinkError::NoMatchingPeripheral { .. } => true,
            LinkError::Connection { .. } => true,
            LinkError::EndpointNotFound { .. } => false,
            LinkError::UnsupportedCharacteristic { .. } => false,
            LinkError::CommandWrite { .. } => true,
            LinkError::Disconnected { .. } => true,
            LinkError::NotConnected { .. } => true,
            LinkError::Timeout { .. } => true,
            LinkError::Transport { .. } => true,
            LinkError::Config { .. } => false,
        }
    }

    /// Returns whether this error means the link itself is gone.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, LinkError::Disconnected { .. })
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            LinkError::FrameLength { .. } => vec![
                "Check the peripheral firmware sends 32-byte big-endian frames",
                "Ignore the frame; the stream continues",
            ],
            LinkError::NoMatchingPeripheral { .. } => vec![
                "Ensure the peripheral app is advertising",
                "Move the peripheral closer to the host",
                "Increase the scan timeout",
                "Check the target name filter (matching is case-sensitive)",
            ],
            LinkError::Connection { .. } => vec![
                "Retry the connection from a fresh scan",
                "Check the host Bluetooth adapter is powered on",
                "Restart Bluetooth on the peripheral",
            ],
            LinkError::EndpointNotFound { .. } => vec![
                "Verify the peripheral exposes the telemetry service",
                "Update the peripheral app to a compatible version",
            ],
            LinkError::UnsupportedCharacteristic { .. } => vec![
                "Enable notify or indicate on the telemetry characteristic",
                "Allow command-only sessions if telemetry is not needed",
            ],
            LinkError::CommandWrite { .. } => vec![
                "Check the characteristic accepts writes",
                "Resend the command",
            ],
            LinkError::Disconnected { .. } => vec![
                "Reconnect from a fresh scan",
                "Check the peripheral is still in range and awake",
            ],
            LinkError::NotConnected { .. } => vec![
                "Connect the session before sending commands",
                "Reconnect after a dropped link",
            ],
            LinkError::Timeout { .. } => vec![
                "Increase the timeout duration",
                "Check the host Bluetooth stack is responding",
            ],
            LinkError::Transport { .. } => vec![
                "Check the host Bluetooth adapter is available",
                "Check permissions for Bluetooth access",
                "Restart the Bluetooth service",
            ],
            LinkError::Config { .. } => vec![
                "Check the configuration file exists and is readable",
                "Validate the YAML syntax and field names",
            ],
        }
    }

    /// Helper constructor for frame length errors.
    pub fn frame_length(actual: usize) -> Self {
        LinkError::FrameLength { actual }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        LinkError::Connection { reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with source.
    pub fn connection_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        LinkError::Connection { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for rejected command writes.
    pub fn command_write(reason: impl Into<String>) -> Self {
        LinkError::CommandWrite { reason: reason.into(), source: None }
    }

    /// Helper constructor for a dropped link.
    pub fn disconnected(reason: Option<String>) -> Self {
        LinkError::Disconnected { reason }
    }

    /// Helper constructor for operations attempted without a session.
    pub fn not_connected(operation: impl Into<String>) -> Self {
        LinkError::NotConnected { operation: operation.into() }
    }

    /// Helper constructor for transport failures with source.
    pub fn transport(
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        LinkError::Transport { operation: operation.into(), source: Some(Box::new(source)) }
    }

    /// Helper constructor for configuration errors.
    pub fn config(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        LinkError::Config { path: path.into(), details: details.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn frame_length_message_reports_actual_length(actual in 0usize..4096usize) {
            let msg = LinkError::frame_length(actual).to_string();
            prop_assert!(msg.contains(&actual.to_string()));
            prop_assert!(msg.contains("32"));
          }

          #[test]
          fn error_messages_format_correctly_with_arbitrary_context(
            reason in ".*",
            pattern in "\\w+",
            scanned in 0usize..64usize,
            duration_ms in 1u64..60000u64
          ) {
            let connection_msg = LinkError::connection_failed(reason.clone()).to_string();
            prop_assert!(connection_msg.contains(&reason));

            let selection_msg =
              LinkError::NoMatchingPeripheral { pattern: pattern.clone(), scanned }.to_string();
            prop_assert!(selection_msg.contains(&pattern));
            prop_assert!(selection_msg.contains(&scanned.to_string()));

            let write_msg = LinkError::command_write(reason.clone()).to_string();
            prop_assert!(write_msg.contains(&reason));

            let timeout_msg = LinkError::Timeout { duration: Duration::from_millis(duration_ms) }.to_string();
            prop_assert!(!timeout_msg.is_empty());
          }

          #[test]
          fn error_source_chaining_preserves_information(
            base_message in ".*",
            reasons in prop::collection::vec(".*", 1..5)
          ) {
            let mut current: Box<dyn std::error::Error + Send + Sync> =
              Box::new(std::io::Error::other(base_message.clone()));

            for reason in &reasons {
              current = Box::new(LinkError::Connection {
                reason: reason.clone(),
                source: Some(current),
              });
            }

            let top = LinkError::Transport { operation: "scan".to_string(), source: Some(current) };

            let mut depth = 0;
            let mut found_base = false;
            let mut cursor = std::error::Error::source(&top);
            while let Some(source) = cursor {
              depth += 1;
              if source.to_string().contains(&base_message) {
                found_base = true;
              }
              cursor = std::error::Error::source(source);
              if depth > 10 {
                break;
              }
            }

            prop_assert_eq!(depth, reasons.len() + 1);
            prop_assert!(found_base);
          }
        }
    }

    #[test]
    fn error_classes_are_distinguishable() {
        let service = Uuid::from_u128(1);
        let characteristic = Uuid::from_u128(2);
        let errors = [
            LinkError::frame_length(31),
            LinkError::NoMatchingPeripheral { pattern: "iPhone".into(), scanned: 0 },
            LinkError::connection_failed("refused"),
            LinkError::EndpointNotFound { service, characteristic },
            LinkError::UnsupportedCharacteristic { characteristic },
            LinkError::command_write("rejected"),
            LinkError::disconnected(None),
        ];

        let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
        for (i, a) in messages.iter().enumerate() {
            for b in &messages[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn disconnected_message_includes_optional_reason() {
        assert_eq!(LinkError::disconnected(None).to_string(), "Link to peripheral dropped");
        assert_eq!(
            LinkError::disconnected(Some("peer closed".into())).to_string(),
            "Link to peripheral dropped: peer closed"
        );
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<LinkError>();

        let error = LinkError::connection_failed("test");
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn recovery_methods_work() {
        let frame_error = LinkError::frame_length(0);
        let endpoint_error = LinkError::EndpointNotFound {
            service: Uuid::from_u128(1),
            characteristic: Uuid::from_u128(2),
        };

        assert!(frame_error.is_retryable());
        assert!(!endpoint_error.is_retryable());
        assert!(LinkError::disconnected(None).is_disconnect());
        assert!(!frame_error.is_disconnect());

        for suggestion in endpoint_error.recovery_suggestions() {
            assert!(suggestion.len() > 5);
        }
        assert!(!frame_error.recovery_suggestions().is_empty());
    }
}
