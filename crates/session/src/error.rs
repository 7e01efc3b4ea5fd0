//! Error handling for session operations.
//!
//! This module defines `SessionError`, the unified error type for everything
//! in the session manager. It aggregates failures from argument validation,
//! the transport layer, and broker confirmation timing into a single type
//! that application code can pattern-match on.
//!
//! # Error Categories
//!
//! **Caller errors** (fix the call site, don't retry):
//! - `InvalidArgument`: empty topic, QoS out of range, malformed input
//! - `Serialization`: typed payload could not be encoded
//!
//! **Transport errors** (transient or fatal connectivity issues):
//! - `TransportRejected`: the transport refused to accept the operation
//! - `ConnectFailed`: the initial connection attempt did not succeed
//! - `ConfirmationTimedOut`: the broker never acknowledged within the window
//!
//! **Configuration errors** (caught at startup):
//! - `Config`: validation failures in `SessionConfig`
//!
//! # Usage
//!
//! ```ignore
//! match session.publish_raw("sensors/temp", 1, false, payload) {
//!     Ok(()) => {}
//!     Err(SessionError::ConfirmationTimedOut) => {
//!         // Broker is alive but slow, or the ack was lost. Caller decides
//!         // whether to resend; the session never retries silently.
//!     }
//!     Err(SessionError::InvalidArgument(msg)) => {
//!         eprintln!("Bad publish call: {msg}");
//!     }
//!     Err(e) => eprintln!("Transport problem: {e}"),
//! }
//! ```

use thiserror::Error;

/// The unified error type for session operations.
///
/// Covers argument validation, transport submission failures, connection
/// establishment, and broker confirmation timeouts.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A caller-supplied argument is invalid.
    ///
    /// Typical causes:
    /// - Empty topic string
    /// - QoS value that is not 0, 1, or 2
    /// - Subscribing or publishing on a session that is shutting down
    ///
    /// This is a programming error at the call site and is never retried.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The transport refused to accept an operation.
    ///
    /// The subscribe, unsubscribe, or publish never left the client. This is
    /// distinct from `ConfirmationTimedOut`: here the local send itself
    /// failed (client shut down, internal queue unavailable).
    #[error("Transport rejected operation: {0}")]
    TransportRejected(String),

    /// The broker did not confirm an operation within the configured window.
    ///
    /// The request was sent but no acknowledgment arrived before
    /// `confirm_timeout_ms` elapsed. The operation may still have taken
    /// effect broker-side; the caller decides whether to resend.
    #[error("Timed out waiting for broker confirmation")]
    ConfirmationTimedOut,

    /// Opening the session failed.
    ///
    /// Either the transport rejected the connect call outright or the
    /// connection was lost again before it was ever established.
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    /// A typed payload could not be serialized.
    ///
    /// Recovery: fix the data. Not retryable.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration validation failed.
    ///
    /// `SessionConfig` carries validation rules (via the `validator` crate)
    /// for timeouts, keep-alive range, client-id length and so on. Caught at
    /// `Session::open`, before anything touches the network.
    #[error("Configuration error: {0}")]
    Config(#[from] validator::ValidationErrors),
}

impl From<rumqttc::ClientError> for SessionError {
    fn from(err: rumqttc::ClientError) -> Self {
        SessionError::TransportRejected(err.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Serialization(err.to_string())
    }
}
