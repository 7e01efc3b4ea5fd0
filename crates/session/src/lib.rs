//! # mqtt-session: blocking pub/sub session manager
//!
//! A client-side session layer for MQTT-style pub/sub, built on `rumqttc`.
//! It owns the bookkeeping a raw client leaves to the application:
//!
//! - **Confirmation tracking**: subscribes and QoS >= 1 publishes block
//!   until the broker acknowledges or a configurable window (default 5 s)
//!   expires; unsubscribes are fire-and-forget
//! - **Refcounted subscriptions**: any number of local callbacks per topic
//!   pattern, exactly one broker SUBSCRIBE while the count is nonzero
//! - **Automatic resubscription** after reconnects, once per live topic
//! - **Wildcard dispatch** (`+`, `#`, with the `$`-topic exclusion)
//! - **A process-wide registry** for passing sessions across module
//!   boundaries by id
//!
//! The API is deliberately blocking: callers are ordinary threads, and the
//! only internal thread is the transport's I/O loop.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use mqtt_session::{RumqttcTransport, Session, SessionConfig};
//!
//! fn main() -> mqtt_session::Result<()> {
//!     let config = SessionConfig::default();
//!     let transport = Arc::new(RumqttcTransport::new(&config));
//!     let session = Session::open(transport, "localhost:1883", config)?;
//!
//!     let sub = session.subscribe("plant/+/temperature", |topic, payload| {
//!         println!("{topic}: {} bytes", payload.len());
//!     })?;
//!
//!     // QoS 1: blocks until the broker's PUBACK
//!     session.publish_raw("plant/boiler/temperature", 1, false, b"72.5")?;
//!
//!     sub.unsubscribe()?;
//!     session.close()
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │     Application threads              │
//! │ open / subscribe / publish / close   │
//! └────────────┬─────────────────────────┘
//!              │ blocking calls
//! ┌────────────▼─────────────────────────┐
//! │     Session                          │
//! │ state machine + subscription table   │
//! │ confirmation registry (submission    │
//! │ lock) + callback dispatch            │
//! └────────────┬─────────────────────────┘
//!              │ Transport trait
//! ┌────────────▼─────────────────────────┐
//! │     RumqttcTransport                 │
//! │ io thread, action/pkid pairing,      │
//! │ reconnect backoff                    │
//! └────────────┬─────────────────────────┘
//!              │
//! ┌────────────▼─────────────────────────┐
//! │     MQTT broker                      │
//! └──────────────────────────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! ```text
//! Disconnected ──open()──> Connecting ──CONNACK──> Connected
//!                                                     │
//!                                              (connection lost)
//!                                                     │
//!                                                     ▼
//!                              Disconnected (transport retries, session
//!                                            resubscribes on recovery)
//!
//! any state ──close()──> Closing ──transport confirms──> Closed
//! ```
//!
//! `Closing` and `Closed` are one-way: a late connect event during shutdown
//! is ignored, never resurrecting a closing session.
//!
//! # Error Handling
//!
//! All fallible operations return [`Result`], an alias for
//! `std::result::Result<T, SessionError>`:
//!
//! ```ignore
//! match session.publish_raw("a/b", 1, false, payload) {
//!     Ok(()) => {}
//!     Err(mqtt_session::SessionError::ConfirmationTimedOut) => {
//!         // Delivery unknown; resending is the caller's decision.
//!     }
//!     Err(e) => eprintln!("publish failed: {e}"),
//! }
//! ```
//!
//! # Delivery semantics
//!
//! A confirmation timeout does not mean the operation failed broker-side,
//! only that no acknowledgment arrived in time. The session never resends
//! on its own.

pub mod backoff;
pub mod config;
pub mod confirm;
pub mod error;
pub mod rumqtt;
pub mod session;
pub mod state;
pub mod topics;
pub mod transport;

// Re-exports: the common entry points
pub use config::SessionConfig;
pub use error::SessionError;
pub use rumqtt::RumqttcTransport;
pub use session::{Session, SessionId, SubscriptionHandle};
pub use state::SessionState;
// Re-exports: the transport seam, for test doubles and custom backends
pub use transport::{ActionId, SessionEvents, Transport, NO_CONFIRMATION};

/// Result type for session operations.
///
/// All fallible operations in this crate return this type.
pub type Result<T> = std::result::Result<T, SessionError>;
