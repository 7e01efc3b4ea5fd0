//! The broker-facing seam.
//!
//! `Transport` is the narrow surface a session drives: connect, disconnect,
//! subscribe, unsubscribe, publish. The production implementation lives in
//! [`crate::rumqtt`]; tests drive the session through a scripted in-process
//! transport instead of a broker.
//!
//! Event flow runs the other way through [`SessionEvents`]: the transport
//! owns an I/O thread that reports connection changes, broker
//! acknowledgments, and inbound messages back to the session.

use std::sync::Arc;

use crate::Result;

/// Token identifying an operation that expects a broker acknowledgment.
///
/// The transport assigns one per confirmed subscribe or QoS >= 1
/// publish, and later reports the matching ack through
/// [`SessionEvents::on_action_acked`].
pub type ActionId = u32;

/// ActionId value meaning "no acknowledgment will arrive" (QoS 0 publish).
pub const NO_CONFIRMATION: ActionId = 0;

/// Callbacks the transport's I/O thread drives into the session.
///
/// Implementations must be cheap and non-blocking: every call happens on
/// the transport's event thread, and a stalled handler stalls all traffic
/// for the session.
pub trait SessionEvents: Send + Sync {
    /// The connection (or a reconnection) has been established.
    fn on_connected(&self);

    /// The connection was lost or torn down. `reason` is human-readable.
    fn on_disconnected(&self, reason: &str);

    /// The broker acknowledged the operation identified by `action`.
    ///
    /// Covers SUBACK, PUBACK (QoS 1) and PUBCOMP (QoS 2).
    fn on_action_acked(&self, action: ActionId);

    /// An application message arrived on a subscribed topic.
    fn on_message(&self, topic: &str, payload: &[u8]);
}

/// A pluggable broker connection.
///
/// All methods are called with the session's submission lock held (except
/// `connect` and `disconnect`), which serializes submissions and lets
/// implementations pair requests with acknowledgments in FIFO order.
///
/// Methods must not block waiting for broker responses: they hand the
/// operation to the I/O machinery and return. Confirmation waiting is the
/// session's job.
pub trait Transport: Send + Sync {
    /// Starts the connection to `address` and begins delivering events.
    ///
    /// Returns once the connect has been *submitted*; the session learns of
    /// success via [`SessionEvents::on_connected`]. The transport keeps
    /// retrying on its own after unexpected losses until `disconnect`.
    fn connect(&self, address: &str, client_id: &str, events: Arc<dyn SessionEvents>)
        -> Result<()>;

    /// Requests a clean shutdown. Completion is reported through
    /// [`SessionEvents::on_disconnected`].
    fn disconnect(&self) -> Result<()>;

    /// Submits a SUBSCRIBE for `topic` and returns the token its SUBACK
    /// will carry.
    fn subscribe(&self, topic: &str) -> Result<ActionId>;

    /// Submits an UNSUBSCRIBE for `topic`. Fire-and-forget: no
    /// acknowledgment is tracked for unsubscribes.
    fn unsubscribe(&self, topic: &str) -> Result<()>;

    /// Submits a publish. Returns [`NO_CONFIRMATION`] for QoS 0; otherwise
    /// the token the final acknowledgment (PUBACK or PUBCOMP) will carry.
    fn publish(&self, topic: &str, qos: u8, retain: bool, payload: &[u8]) -> Result<ActionId>;
}
