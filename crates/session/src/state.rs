//! Connection state tracking for a session.
//!
//! A session moves through a small, strictly ordered lifecycle. The state is
//! held behind the session's state lock and observed by blocking callers
//! (open, close) through a condition variable.
//!
//! # Examples
//!
//! ```ignore
//! use mqtt_session::SessionState;
//!
//! let state = SessionState::Connecting;
//! println!("Status: {}", state); // "Connecting"
//! assert!(!state.is_connected());
//! ```

use std::fmt;

/// The lifecycle state of a session.
///
/// Transitions:
/// - `Disconnected` -> `Connecting` (open() submits the connect)
/// - `Connecting` -> `Connected` (transport reports the handshake done)
/// - `Connected` -> `Disconnected` (unexpected connection loss; the
///   transport keeps retrying and the session resubscribes on recovery)
/// - any -> `Closing` (close() called)
/// - `Closing` -> `Closed` (transport confirms the disconnect; terminal)
///
/// A session in `Closing` or `Closed` is never resurrected: a late
/// connection event arriving during shutdown is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection. Initial state, and the state after an unexpected
    /// connection loss while the transport retries in the background.
    Disconnected,

    /// A connect has been submitted; waiting for the broker handshake.
    Connecting,

    /// Connected with active subscriptions. The only state in which
    /// publishes and subscribes reach the broker immediately.
    Connected,

    /// close() was called; waiting for the transport to confirm.
    Closing,

    /// Fully shut down. Terminal; all operations fail from here.
    Closed,
}

impl SessionState {
    /// Returns a short static identifier for the state, for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "Disconnected",
            SessionState::Connecting => "Connecting",
            SessionState::Connected => "Connected",
            SessionState::Closing => "Closing",
            SessionState::Closed => "Closed",
        }
    }

    /// True only in `Connected`: operations will reach the broker.
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }

    /// True once close() has begun. A session in this phase rejects new
    /// operations and ignores late connection events.
    pub fn is_shutting_down(&self) -> bool {
        matches!(self, SessionState::Closing | SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_as_str() {
        assert_eq!(SessionState::Disconnected.as_str(), "Disconnected");
        assert_eq!(SessionState::Connecting.as_str(), "Connecting");
        assert_eq!(SessionState::Connected.as_str(), "Connected");
        assert_eq!(SessionState::Closing.as_str(), "Closing");
        assert_eq!(SessionState::Closed.as_str(), "Closed");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Connected.to_string(), "Connected");
        assert_eq!(SessionState::Closing.to_string(), "Closing");
    }

    #[test]
    fn test_is_connected() {
        assert!(SessionState::Connected.is_connected());
        assert!(!SessionState::Connecting.is_connected());
        assert!(!SessionState::Disconnected.is_connected());
        assert!(!SessionState::Closing.is_connected());
        assert!(!SessionState::Closed.is_connected());
    }

    #[test]
    fn test_is_shutting_down() {
        assert!(SessionState::Closing.is_shutting_down());
        assert!(SessionState::Closed.is_shutting_down());
        assert!(!SessionState::Connected.is_shutting_down());
        assert!(!SessionState::Disconnected.is_shutting_down());
    }
}
