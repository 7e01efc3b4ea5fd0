//! Session configuration.
//!
//! All settings support serde deserialization, so configs load from TOML,
//! JSON, or can be built programmatically with `..Default::default()`.
//!
//! Validation runs through the `validator` crate: invalid configs fail at
//! `Session::open`, not mid-operation, and the error names the offending
//! field and constraint.
//!
//! # Examples
//!
//! ```ignore
//! // Load from TOML
//! let text = std::fs::read_to_string("session.toml")?;
//! let config: SessionConfig = toml::from_str(&text)?;
//!
//! // Or construct programmatically
//! let config = SessionConfig {
//!     client_id: "telemetry-uploader".into(),
//!     confirm_timeout_ms: 2_000,
//!     ..Default::default()
//! };
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Configuration for a session.
///
/// Every field has a documented default; an all-defaults config connects to
/// a local unauthenticated broker and behaves like the stock client.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SessionConfig {
    /// Unique identifier for this client.
    ///
    /// If empty, a UUID is generated when the session opens. Brokers use
    /// the id for collision policies and (with `clean_session = false`)
    /// persistent subscription state.
    ///
    /// # Validation
    /// - Length: 0-36 characters (empty means "generate one")
    ///
    /// # Examples
    /// ```toml
    /// client_id = "plant-floor-gw-01"
    /// client_id = ""  # generate a UUID
    /// ```
    #[validate(length(max = 36, message = "Client ID must not exceed 36 characters"))]
    pub client_id: String,

    /// Keep-alive interval in seconds.
    ///
    /// The transport pings the broker at this interval when idle; the broker
    /// drops the connection if nothing arrives for 1.5x this long.
    ///
    /// # Validation
    /// - Range: 5-3600 seconds
    ///
    /// # Examples
    /// ```toml
    /// keep_alive = 60
    /// ```
    #[validate(range(
        min = 5,
        max = 3600,
        message = "Keep alive must be between 5 and 3600 seconds"
    ))]
    pub keep_alive: u64,

    /// Whether to request a clean session from the broker.
    ///
    /// If true, the broker discards prior subscriptions and queued messages
    /// for this client id. The session re-establishes its own subscriptions
    /// after every reconnect regardless of this flag.
    pub clean_session: bool,

    /// How long to wait for a broker acknowledgment, in milliseconds.
    ///
    /// Applies to subscribes and QoS >= 1 publishes. When the
    /// window elapses without an ack the operation returns
    /// `ConfirmationTimedOut`.
    ///
    /// # Validation
    /// - Range: 100-300000 ms
    ///
    /// # Examples
    /// ```toml
    /// confirm_timeout_ms = 5000
    /// ```
    #[validate(range(
        min = 100,
        max = 300_000,
        message = "Confirm timeout must be between 100 and 300000 milliseconds"
    ))]
    pub confirm_timeout_ms: u64,

    /// How long close() waits for the transport to confirm shutdown, in
    /// milliseconds. On expiry the session is forced closed with a warning
    /// rather than blocking the caller indefinitely.
    ///
    /// # Validation
    /// - Range: 100-300000 ms
    ///
    /// # Examples
    /// ```toml
    /// close_timeout_ms = 10000
    /// ```
    #[validate(range(
        min = 100,
        max = 300_000,
        message = "Close timeout must be between 100 and 300000 milliseconds"
    ))]
    pub close_timeout_ms: u64,

    /// Capacity of the transport's internal request channel.
    ///
    /// How many operations can queue inside the client before submission
    /// blocks. The default of 10 matches typical per-session traffic.
    ///
    /// # Validation
    /// - Range: 1-255
    ///
    /// # Examples
    /// ```toml
    /// request_channel_capacity = 10
    /// ```
    #[validate(range(
        min = 1,
        max = 255,
        message = "Request channel capacity must be between 1 and 255"
    ))]
    pub request_channel_capacity: usize,

    /// Initial delay before the first reconnection attempt (seconds).
    ///
    /// # Validation
    /// - Range: 1-60 seconds
    ///
    /// # Examples
    /// ```toml
    /// reconnect_delay = 1
    /// ```
    #[validate(range(
        min = 1,
        max = 60,
        message = "Reconnect delay must be between 1 and 60 seconds"
    ))]
    pub reconnect_delay: u64,

    /// Cap on the reconnect backoff delay (seconds).
    ///
    /// # Validation
    /// - Range: 1-600 seconds
    #[validate(range(
        min = 1,
        max = 600,
        message = "Max reconnect delay must be between 1 and 600 seconds"
    ))]
    pub max_reconnect_delay: u64,

    /// Exponential backoff multiplier applied between reconnect attempts.
    ///
    /// # Validation
    /// - Range: 1-30
    ///
    /// # Examples
    /// ```toml
    /// reconnect_backoff_multiplier = 2.0  # 1s -> 2s -> 4s -> ...
    /// ```
    #[validate(range(
        min = 1.0,
        max = 30.0,
        message = "Reconnect backoff multiplier must be between 1 and 30"
    ))]
    pub reconnect_backoff_multiplier: f64,

    /// Maximum number of reconnection attempts. 0 means retry forever.
    ///
    /// # Validation
    /// - Range: 0-100
    ///
    /// # Examples
    /// ```toml
    /// max_reconnect_attempts = 0  # never give up
    /// ```
    #[validate(range(
        min = 0,
        max = 100,
        message = "Max reconnect attempts must be between 0 and 100"
    ))]
    pub max_reconnect_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            client_id: String::new(),
            keep_alive: 60,
            clean_session: true,
            confirm_timeout_ms: 5_000,
            close_timeout_ms: 10_000,
            request_channel_capacity: 10,
            reconnect_delay: 1,
            max_reconnect_delay: 60,
            reconnect_backoff_multiplier: 2.0,
            max_reconnect_attempts: 0,
        }
    }
}

impl SessionConfig {
    /// Returns the client id to use on the wire, generating a UUID when the
    /// configured one is empty.
    pub fn resolved_client_id(&self) -> String {
        if self.client_id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            self.client_id.clone()
        }
    }

    /// The confirmation window as a `Duration`.
    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }

    /// The close wait window as a `Duration`.
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.confirm_timeout_ms, 5_000);
        assert_eq!(config.close_timeout_ms, 10_000);
        assert!(config.clean_session);
        assert_eq!(config.max_reconnect_attempts, 0);
    }

    #[test]
    fn test_resolved_client_id_generates_uuid_when_empty() {
        let config = SessionConfig::default();
        let id = config.resolved_client_id();
        assert!(!id.is_empty());
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_resolved_client_id_keeps_explicit_value() {
        let config = SessionConfig {
            client_id: "gw-42".into(),
            ..Default::default()
        };
        assert_eq!(config.resolved_client_id(), "gw-42");
    }

    #[test]
    fn test_validation_rejects_out_of_range_timeout() {
        let config = SessionConfig {
            confirm_timeout_ms: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_long_client_id() {
        let config = SessionConfig {
            client_id: "x".repeat(64),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_loads_from_toml() {
        let text = r#"
            client_id = "bench-client"
            keep_alive = 30
            clean_session = false
            confirm_timeout_ms = 2500
        "#;
        let config: SessionConfig = toml::from_str(text).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.client_id, "bench-client");
        assert_eq!(config.keep_alive, 30);
        assert!(!config.clean_session);
        assert_eq!(config.confirm_timeout(), Duration::from_millis(2500));
        // Unspecified fields fall back to defaults
        assert_eq!(config.close_timeout_ms, 10_000);
    }

    #[test]
    fn test_config_toml_round_trip() {
        let config = SessionConfig {
            client_id: "round-trip".into(),
            reconnect_delay: 3,
            ..Default::default()
        };
        let text = toml::to_string(&config).unwrap();
        let parsed: SessionConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.client_id, "round-trip");
        assert_eq!(parsed.reconnect_delay, 3);
    }
}
