//! The session facade.
//!
//! A [`Session`] ties the pieces together: the connection state machine, the
//! subscription table with its per-topic reference counts, the confirmation
//! registry, and the transport. Callers get a small blocking API:
//!
//! - [`Session::open`] — connect and block until the broker accepts
//! - [`Session::subscribe`] — register a callback; the first subscriber for
//!   a topic blocks on the broker's SUBACK
//! - [`SubscriptionHandle::unsubscribe`] — drop a subscription; the last
//!   subscriber for a topic sends a fire-and-forget broker UNSUBSCRIBE
//! - [`Session::publish_raw`] / [`publish_empty`](Session::publish_empty) /
//!   [`publish_json`](Session::publish_json) — QoS 0 returns immediately,
//!   QoS 1 and 2 block until the final acknowledgment
//! - [`Session::close`] — shut down and block until the transport confirms
//!
//! # Locking
//!
//! Two locks, never held across a confirmation wait:
//!
//! - the **state lock** guards connection state and the subscription table,
//!   and carries the condition variable open/close block on;
//! - the **submission lock** (owned by [`ConfirmationRegistry`]) serializes
//!   transport submissions and waiter registration.
//!
//! Message callbacks run on the transport's event thread with no session
//! lock held, so a callback may publish. A *confirmed* operation from
//! inside a callback (subscribe, QoS >= 1 publish) cannot complete, because
//! the acknowledgment would have to arrive on the very thread that is
//! blocked; it fails with `ConfirmationTimedOut` instead of deadlocking.
//!
//! # Reconnects
//!
//! When the transport reports a recovered connection, the session replays a
//! SUBSCRIBE for every topic that still has subscribers — once per topic,
//! without waiting for the acknowledgments — before marking itself
//! connected again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};
use validator::Validate;

use crate::config::SessionConfig;
use crate::confirm::ConfirmationRegistry;
use crate::error::SessionError;
use crate::state::SessionState;
use crate::topics::{MessageCallback, SubscriptionId, SubscriptionTable};
use crate::transport::{ActionId, SessionEvents, Transport};
use crate::Result;

/// Process-wide identifier for an open session, usable with
/// [`Session::lookup`].
pub type SessionId = u64;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

fn session_registry() -> &'static Mutex<HashMap<SessionId, Weak<SessionInner>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<SessionId, Weak<SessionInner>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// State guarded by the session's state lock.
struct Shared {
    state: SessionState,
    table: SubscriptionTable,
}

struct SessionInner {
    id: SessionId,
    transport: Arc<dyn Transport>,
    shared: Mutex<Shared>,
    state_changed: Condvar,
    registry: ConfirmationRegistry,
    confirm_timeout: Duration,
    close_timeout: Duration,
}

/// A connected pub/sub session. Clones share the same underlying session.
///
/// # Examples
///
/// ```ignore
/// use mqtt_session::{RumqttcTransport, Session, SessionConfig};
/// use std::sync::Arc;
///
/// let transport = Arc::new(RumqttcTransport::new(&SessionConfig::default()));
/// let session = Session::open(transport, "localhost:1883", SessionConfig::default())?;
///
/// let sub = session.subscribe("plant/+/temperature", |topic, payload| {
///     println!("{topic}: {payload:?}");
/// })?;
///
/// session.publish_raw("plant/boiler/temperature", 1, false, b"72.5")?;
///
/// sub.unsubscribe()?;
/// session.close()?;
/// ```
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

/// One local subscription. Obtained from [`Session::subscribe`].
///
/// Dropping the handle does NOT unsubscribe; call
/// [`unsubscribe`](SubscriptionHandle::unsubscribe) explicitly. A leaked
/// handle's subscription lives until the session closes.
pub struct SubscriptionHandle {
    inner: Arc<SessionInner>,
    id: SubscriptionId,
    topic: String,
}

impl Session {
    /// Opens a session over `transport` to the broker at `address`.
    ///
    /// Validates `config`, submits the connect, and blocks until the
    /// transport reports an established connection. If the transport
    /// reports a disconnect first, the attempt fails with `ConnectFailed`
    /// and the transport is told to stand down.
    ///
    /// On success the session is registered process-wide and can be
    /// retrieved with [`Session::lookup`] until it is closed.
    pub fn open(
        transport: Arc<dyn Transport>,
        address: &str,
        config: SessionConfig,
    ) -> Result<Session> {
        config.validate()?;
        let client_id = config.resolved_client_id();

        let inner = Arc::new(SessionInner {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            transport,
            shared: Mutex::new(Shared {
                state: SessionState::Connecting,
                table: SubscriptionTable::new(),
            }),
            state_changed: Condvar::new(),
            registry: ConfirmationRegistry::new(),
            confirm_timeout: config.confirm_timeout(),
            close_timeout: config.close_timeout(),
        });

        let events: Arc<dyn SessionEvents> = Arc::clone(&inner) as Arc<dyn SessionEvents>;
        inner
            .transport
            .connect(address, &client_id, events)
            .map_err(|e| SessionError::ConnectFailed(e.to_string()))?;

        // Block until the transport reports a verdict.
        {
            let mut shared = inner.lock_shared();
            while shared.state == SessionState::Connecting {
                shared = inner
                    .state_changed
                    .wait(shared)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            if shared.state != SessionState::Connected {
                let state = shared.state;
                drop(shared);
                let _ = inner.transport.disconnect();
                return Err(SessionError::ConnectFailed(format!(
                    "connection attempt ended in state {state}"
                )));
            }
        }

        info!(session = inner.id, client_id = %client_id, "session opened");
        session_registry()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(inner.id, Arc::downgrade(&inner));

        Ok(Session { inner })
    }

    /// Finds an open session by id. Returns `None` once the session has
    /// been closed or dropped.
    pub fn lookup(id: SessionId) -> Option<Session> {
        session_registry()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .and_then(Weak::upgrade)
            .map(|inner| Session { inner })
    }

    /// This session's process-wide id.
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// The current connection state.
    pub fn state(&self) -> SessionState {
        self.inner.lock_shared().state
    }

    /// Subscribes `callback` to `topic` (wildcards allowed).
    ///
    /// Only the first subscriber for a topic pattern talks to the broker;
    /// that call blocks until the SUBACK arrives or the confirmation window
    /// expires. Additional subscribers for the same pattern return
    /// immediately. If the broker subscribe fails, the local registration
    /// is rolled back completely and the next subscriber starts from zero.
    ///
    /// The callback runs on the transport's event thread and must not
    /// block.
    pub fn subscribe<F>(&self, topic: &str, callback: F) -> Result<SubscriptionHandle>
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        validate_topic(topic)?;
        let callback: MessageCallback = Arc::new(callback);

        let (id, first) = {
            let mut shared = self.inner.lock_shared();
            if shared.state.is_shutting_down() {
                return Err(SessionError::InvalidArgument(
                    "session is closed".to_string(),
                ));
            }
            shared.table.insert(topic, callback)
        };

        if first {
            if let Err(e) = self
                .inner
                .confirmed_submit(|| self.inner.transport.subscribe(topic))
            {
                // Entry and refcount roll back together so a retry is a
                // clean 0 -> 1 again.
                let mut shared = self.inner.lock_shared();
                shared.table.remove(id);
                return Err(e);
            }
            debug!(session = self.inner.id, topic, "broker subscription established");
        }

        Ok(SubscriptionHandle {
            inner: Arc::clone(&self.inner),
            id,
            topic: topic.to_string(),
        })
    }

    /// Publishes `payload` to `topic`.
    ///
    /// QoS 0 returns as soon as the transport accepts the message. QoS 1
    /// and 2 block until the broker's final acknowledgment (PUBACK or
    /// PUBCOMP) or until the confirmation window expires; a timeout means
    /// delivery is unknown, and the session never resends on its own.
    pub fn publish_raw(&self, topic: &str, qos: u8, retain: bool, payload: &[u8]) -> Result<()> {
        validate_topic(topic)?;
        validate_qos(qos)?;
        {
            let shared = self.inner.lock_shared();
            if shared.state.is_shutting_down() {
                return Err(SessionError::InvalidArgument(
                    "session is closed".to_string(),
                ));
            }
        }
        self.inner
            .confirmed_submit(|| self.inner.transport.publish(topic, qos, retain, payload))
    }

    /// Publishes a zero-length payload. Useful for clearing retained
    /// messages and for signal-only topics.
    pub fn publish_empty(&self, topic: &str, qos: u8, retain: bool) -> Result<()> {
        self.publish_raw(topic, qos, retain, &[])
    }

    /// Serializes `value` as JSON and publishes it.
    pub fn publish_json<T: Serialize>(
        &self,
        topic: &str,
        qos: u8,
        retain: bool,
        value: &T,
    ) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.publish_raw(topic, qos, retain, &payload)
    }

    /// Closes the session.
    ///
    /// Idempotent: the first call initiates the transport disconnect, any
    /// call blocks until the session reaches `Closed`. If the transport
    /// does not confirm within the configured close window, the session is
    /// forced closed with a warning. The session is removed from the
    /// process-wide registry either way.
    pub fn close(&self) -> Result<()> {
        let initiate = {
            let mut shared = self.inner.lock_shared();
            match shared.state {
                SessionState::Closed => {
                    self.unregister();
                    return Ok(());
                }
                SessionState::Closing => false,
                _ => {
                    shared.state = SessionState::Closing;
                    true
                }
            }
        };

        if initiate {
            info!(session = self.inner.id, "closing session");
            if let Err(e) = self.inner.transport.disconnect() {
                warn!(session = self.inner.id, error = %e, "transport disconnect request failed");
            }
        }

        let deadline = Instant::now() + self.inner.close_timeout;
        let mut shared = self.inner.lock_shared();
        while shared.state != SessionState::Closed {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(
                    session = self.inner.id,
                    "transport did not confirm disconnect in time, forcing closed"
                );
                shared.state = SessionState::Closed;
                break;
            }
            let (guard, _) = self
                .inner
                .state_changed
                .wait_timeout(shared, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            shared = guard;
        }
        drop(shared);

        self.unregister();
        Ok(())
    }

    fn unregister(&self) {
        session_registry()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.inner.id);
    }
}

impl SubscriptionHandle {
    /// The topic pattern this handle is subscribed to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Removes this subscription.
    ///
    /// If it was the last subscriber for its topic pattern, a broker
    /// UNSUBSCRIBE goes out through the submission lock — serialized
    /// against concurrent subscribes and resubscription, but never waiting
    /// for the broker's confirmation. During shutdown the broker call is
    /// skipped; the local entry is removed regardless.
    pub fn unsubscribe(self) -> Result<()> {
        let (removed, shutting_down) = {
            let mut shared = self.inner.lock_shared();
            (shared.table.remove(self.id), shared.state.is_shutting_down())
        };

        if let Some((topic, last)) = removed {
            if last && !shutting_down {
                self.inner
                    .registry
                    .submit_nowait(|| self.inner.transport.unsubscribe(&topic))?;
                debug!(session = self.inner.id, topic = %topic, "broker subscription removed");
            }
        }
        Ok(())
    }
}

impl SessionInner {
    fn lock_shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Submits a confirmed operation through the submission lock and blocks
    /// until its acknowledgment or the confirmation window expires.
    fn confirmed_submit<F>(&self, send: F) -> Result<()>
    where
        F: FnOnce() -> Result<ActionId>,
    {
        match self.registry.submit(send)? {
            Some(waiter) => waiter.wait(self.confirm_timeout),
            None => Ok(()),
        }
    }
}

impl SessionEvents for SessionInner {
    fn on_connected(&self) {
        // Re-establish broker subscriptions before declaring the session
        // connected, so publishers never observe Connected with a stale
        // subscription set. No waiting: blocking the event thread on each
        // SUBACK would stall the connection being restored.
        let topics = {
            let shared = self.lock_shared();
            if shared.state.is_shutting_down() {
                debug!(session = self.id, "connect event during shutdown ignored");
                return;
            }
            shared.table.active_topics()
        };

        for topic in &topics {
            match self
                .registry
                .submit_nowait(|| self.transport.subscribe(topic))
            {
                Ok(_) => debug!(session = self.id, topic = %topic, "resubscribed"),
                Err(e) => warn!(session = self.id, topic = %topic, error = %e, "resubscription failed"),
            }
        }

        let mut shared = self.lock_shared();
        if shared.state.is_shutting_down() {
            return;
        }
        shared.state = SessionState::Connected;
        info!(session = self.id, "connection established");
        self.state_changed.notify_all();
    }

    fn on_disconnected(&self, reason: &str) {
        let mut shared = self.lock_shared();
        match shared.state {
            SessionState::Closing => {
                debug!(session = self.id, "session closed");
                shared.state = SessionState::Closed;
            }
            SessionState::Closed => {}
            _ => {
                warn!(session = self.id, reason, "connection lost");
                shared.state = SessionState::Disconnected;
            }
        }
        self.state_changed.notify_all();
    }

    fn on_action_acked(&self, action: ActionId) {
        self.registry.resolve(action);
    }

    fn on_message(&self, topic: &str, payload: &[u8]) {
        // Snapshot under the lock, dispatch outside it: callbacks may call
        // back into the session.
        let callbacks = {
            let shared = self.lock_shared();
            shared.table.matching_callbacks(topic)
        };
        for callback in callbacks {
            callback(topic, payload);
        }
    }
}

fn validate_topic(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(SessionError::InvalidArgument(
            "topic must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_qos(qos: u8) -> Result<()> {
    if qos > 2 {
        return Err(SessionError::InvalidArgument(format!(
            "invalid QoS {qos}, must be 0, 1, or 2"
        )));
    }
    Ok(())
}
