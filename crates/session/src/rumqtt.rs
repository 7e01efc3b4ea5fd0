//! rumqttc-backed transport.
//!
//! `RumqttcTransport` drives a synchronous rumqttc `Client`/`Connection`
//! pair and owns the I/O thread that polls the connection. Broker traffic is
//! translated into [`SessionEvents`] calls; connection losses are retried
//! with exponential [`Backoff`] until [`Transport::disconnect`].
//!
//! # Action pairing
//!
//! rumqttc assigns packet ids inside its event loop, after the client call
//! returns, so a submission cannot learn its packet id synchronously.
//! Instead the transport allocates its own [`ActionId`] per confirmed
//! operation and pairs it with the packet id when the corresponding
//! `Outgoing` event surfaces on the I/O thread. Submissions happen under the
//! session's submission lock and rumqttc preserves request order, so the
//! pairing is a plain FIFO per operation kind.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use rumqttc::{Client, ConnectReturnCode, Event, MqttOptions, Outgoing, Packet, QoS};
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::transport::{ActionId, SessionEvents, Transport, NO_CONFIRMATION};
use crate::Result;

/// Production [`Transport`] over rumqttc's blocking client.
pub struct RumqttcTransport {
    keep_alive: Duration,
    clean_session: bool,
    channel_capacity: usize,
    backoff_template: Backoff,
    client: Mutex<Option<Client>>,
    pairing: Arc<Mutex<PairingState>>,
    stopping: Arc<AtomicBool>,
    next_action: AtomicU32,
}

/// FIFO pairing of transport-assigned actions with rumqttc packet ids.
///
/// `pending_*` holds actions whose `Outgoing` event has not surfaced yet;
/// `inflight_*` maps packet id to action until the acknowledgment arrives.
#[derive(Default)]
struct PairingState {
    pending_subscribes: VecDeque<ActionId>,
    pending_publishes: VecDeque<ActionId>,
    inflight_subscribes: HashMap<u16, ActionId>,
    inflight_publishes: HashMap<u16, ActionId>,
}

impl PairingState {
    fn expect_subscribe(&mut self, action: ActionId) {
        self.pending_subscribes.push_back(action);
    }

    fn expect_publish(&mut self, action: ActionId) {
        self.pending_publishes.push_back(action);
    }

    fn abandon_subscribe(&mut self) {
        self.pending_subscribes.pop_back();
    }

    fn abandon_publish(&mut self) {
        self.pending_publishes.pop_back();
    }

    fn pair_subscribe(&mut self, pkid: u16) {
        if let Some(action) = self.pending_subscribes.pop_front() {
            self.inflight_subscribes.insert(pkid, action);
        } else {
            debug!(pkid, "outgoing subscribe without pending action");
        }
    }

    fn pair_publish(&mut self, pkid: u16) {
        if let Some(action) = self.pending_publishes.pop_front() {
            self.inflight_publishes.insert(pkid, action);
        } else {
            debug!(pkid, "outgoing publish without pending action");
        }
    }

    fn ack_subscribe(&mut self, pkid: u16) -> Option<ActionId> {
        self.inflight_subscribes.remove(&pkid)
    }

    fn ack_publish(&mut self, pkid: u16) -> Option<ActionId> {
        self.inflight_publishes.remove(&pkid)
    }

    /// Forgets everything in flight. Called on connection loss: the broker
    /// will never acknowledge these packet ids, and the waiters reclaim
    /// themselves by timing out.
    fn clear(&mut self) {
        self.pending_subscribes.clear();
        self.pending_publishes.clear();
        self.inflight_subscribes.clear();
        self.inflight_publishes.clear();
    }
}

impl RumqttcTransport {
    /// Creates a transport configured from `config`. Nothing touches the
    /// network until [`Transport::connect`].
    pub fn new(config: &SessionConfig) -> Self {
        RumqttcTransport {
            keep_alive: Duration::from_secs(config.keep_alive),
            clean_session: config.clean_session,
            channel_capacity: config.request_channel_capacity,
            backoff_template: Backoff::new(
                Duration::from_secs(config.reconnect_delay),
                Duration::from_secs(config.max_reconnect_delay),
                config.reconnect_backoff_multiplier,
                match config.max_reconnect_attempts {
                    0 => None,
                    n => Some(n),
                },
            ),
            client: Mutex::new(None),
            pairing: Arc::new(Mutex::new(PairingState::default())),
            stopping: Arc::new(AtomicBool::new(false)),
            next_action: AtomicU32::new(1),
        }
    }

    fn allocate_action(&self) -> ActionId {
        let mut action = self.next_action.fetch_add(1, Ordering::Relaxed);
        // 0 is reserved for "no confirmation"
        if action == NO_CONFIRMATION {
            action = self.next_action.fetch_add(1, Ordering::Relaxed);
        }
        action
    }

    fn with_client<T>(&self, f: impl FnOnce(&Client) -> Result<T>) -> Result<T> {
        let guard = self.client.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(client) => f(client),
            None => Err(SessionError::TransportRejected(
                "transport is not connected".to_string(),
            )),
        }
    }

    fn lock_pairing(&self) -> std::sync::MutexGuard<'_, PairingState> {
        self.pairing.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for RumqttcTransport {
    fn connect(
        &self,
        address: &str,
        client_id: &str,
        events: Arc<dyn SessionEvents>,
    ) -> Result<()> {
        let (host, port) = parse_address(address)?;

        let mut guard = self.client.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_some() {
            return Err(SessionError::TransportRejected(
                "transport already connected".to_string(),
            ));
        }

        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(self.clean_session);

        let (client, connection) = Client::new(options, self.channel_capacity);
        *guard = Some(client);
        drop(guard);

        let pairing = Arc::clone(&self.pairing);
        let stopping = Arc::clone(&self.stopping);
        let backoff = self.backoff_template.clone();
        thread::Builder::new()
            .name("mqtt-session-io".to_string())
            .spawn(move || run_io_loop(connection, events, pairing, stopping, backoff))
            .map_err(|e| {
                SessionError::ConnectFailed(format!("failed to spawn io thread: {e}"))
            })?;

        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        self.stopping.store(true, Ordering::SeqCst);
        self.with_client(|client| {
            client.disconnect()?;
            Ok(())
        })
    }

    fn subscribe(&self, topic: &str) -> Result<ActionId> {
        let action = self.allocate_action();
        // Queue the expectation before the client call: the io thread may
        // surface the Outgoing event immediately.
        self.lock_pairing().expect_subscribe(action);
        let sent = self.with_client(|client| {
            client.subscribe(topic, QoS::AtLeastOnce)?;
            Ok(())
        });
        if let Err(e) = sent {
            self.lock_pairing().abandon_subscribe();
            return Err(e);
        }
        Ok(action)
    }

    fn unsubscribe(&self, topic: &str) -> Result<()> {
        // Fire-and-forget: no UNSUBACK tracking.
        self.with_client(|client| {
            client.unsubscribe(topic)?;
            Ok(())
        })
    }

    fn publish(&self, topic: &str, qos: u8, retain: bool, payload: &[u8]) -> Result<ActionId> {
        let qos = qos_from_u8(qos)?;
        if qos == QoS::AtMostOnce {
            self.with_client(|client| {
                client.publish(topic, qos, retain, payload.to_vec())?;
                Ok(())
            })?;
            return Ok(NO_CONFIRMATION);
        }

        let action = self.allocate_action();
        self.lock_pairing().expect_publish(action);
        let sent = self.with_client(|client| {
            client.publish(topic, qos, retain, payload.to_vec())?;
            Ok(())
        });
        if let Err(e) = sent {
            self.lock_pairing().abandon_publish();
            return Err(e);
        }
        Ok(action)
    }
}

/// Polls the rumqttc connection until shutdown, translating events for the
/// session and reconnecting with backoff on unexpected losses.
fn run_io_loop(
    mut connection: rumqttc::Connection,
    events: Arc<dyn SessionEvents>,
    pairing: Arc<Mutex<PairingState>>,
    stopping: Arc<AtomicBool>,
    mut backoff: Backoff,
) {
    debug!("io loop started");
    for event in connection.iter() {
        match event {
            Ok(Event::Incoming(packet)) => match packet {
                Packet::ConnAck(ack) => {
                    if ack.code == ConnectReturnCode::Success {
                        backoff.reset();
                        events.on_connected();
                    } else {
                        warn!(code = ?ack.code, "broker refused connection");
                        events.on_disconnected(&format!("broker refused: {:?}", ack.code));
                    }
                }
                Packet::SubAck(ack) => {
                    if let Some(action) = pairing
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .ack_subscribe(ack.pkid)
                    {
                        events.on_action_acked(action);
                    }
                }
                // QoS 1 completion
                Packet::PubAck(ack) => {
                    if let Some(action) = pairing
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .ack_publish(ack.pkid)
                    {
                        events.on_action_acked(action);
                    }
                }
                // QoS 2 completion; PubRec/PubRel are handled inside rumqttc
                Packet::PubComp(comp) => {
                    if let Some(action) = pairing
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .ack_publish(comp.pkid)
                    {
                        events.on_action_acked(action);
                    }
                }
                Packet::Publish(publish) => {
                    events.on_message(&publish.topic, &publish.payload);
                }
                Packet::Disconnect => {
                    debug!("broker sent disconnect");
                }
                _ => {}
            },
            Ok(Event::Outgoing(outgoing)) => match outgoing {
                Outgoing::Subscribe(pkid) => pairing
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pair_subscribe(pkid),
                // QoS 0 publishes go out with pkid 0 and expect nothing.
                Outgoing::Publish(pkid) if pkid != 0 => pairing
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pair_publish(pkid),
                _ => {}
            },
            Err(e) => {
                // The broker will never ack the current inflight set.
                pairing
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clear();

                if stopping.load(Ordering::SeqCst) {
                    break;
                }

                events.on_disconnected(&e.to_string());
                match backoff.next_sleep() {
                    Ok(delay) => {
                        info!(
                            attempt = backoff.attempt(),
                            delay_secs = delay.as_secs_f64(),
                            "reconnecting after connection error"
                        );
                        thread::sleep(delay);
                    }
                    Err(limit) => {
                        error!(error = %limit, "giving up on reconnection");
                        break;
                    }
                }
            }
        }
    }

    // The iterator ends either on a requested disconnect (break above or
    // rumqttc draining its request channel) or on backoff exhaustion, which
    // already reported each loss.
    if stopping.load(Ordering::SeqCst) {
        events.on_disconnected("disconnect requested");
    }
    debug!("io loop stopped");
}

/// Splits "host:port" (port optional, default 1883).
fn parse_address(address: &str) -> Result<(String, u16)> {
    if address.is_empty() {
        return Err(SessionError::InvalidArgument(
            "broker address must not be empty".to_string(),
        ));
    }
    match address.rsplit_once(':') {
        Some((host, port)) => {
            if host.is_empty() {
                return Err(SessionError::InvalidArgument(format!(
                    "invalid broker address '{address}'"
                )));
            }
            let port = port.parse::<u16>().map_err(|_| {
                SessionError::InvalidArgument(format!("invalid broker port '{port}'"))
            })?;
            Ok((host.to_string(), port))
        }
        None => Ok((address.to_string(), 1883)),
    }
}

/// Maps a wire-level QoS byte onto rumqttc's enum.
fn qos_from_u8(qos: u8) -> Result<QoS> {
    match qos {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(SessionError::InvalidArgument(format!(
            "invalid QoS {other}, must be 0, 1, or 2"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address_with_port() {
        assert_eq!(
            parse_address("broker.local:8883").unwrap(),
            ("broker.local".to_string(), 8883)
        );
    }

    #[test]
    fn test_parse_address_defaults_port() {
        assert_eq!(
            parse_address("localhost").unwrap(),
            ("localhost".to_string(), 1883)
        );
    }

    #[test]
    fn test_parse_address_rejects_garbage() {
        assert!(parse_address("").is_err());
        assert!(parse_address(":1883").is_err());
        assert!(parse_address("host:notaport").is_err());
        assert!(parse_address("host:99999").is_err());
    }

    #[test]
    fn test_qos_mapping() {
        assert_eq!(qos_from_u8(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(qos_from_u8(1).unwrap(), QoS::AtLeastOnce);
        assert_eq!(qos_from_u8(2).unwrap(), QoS::ExactlyOnce);
        assert!(qos_from_u8(3).is_err());
    }

    #[test]
    fn test_pairing_is_fifo_per_kind() {
        let mut state = PairingState::default();
        state.expect_subscribe(10);
        state.expect_subscribe(11);
        state.expect_publish(12);

        // Outgoing events surface in submission order with broker pkids
        state.pair_subscribe(1);
        state.pair_subscribe(2);
        state.pair_publish(7);

        assert_eq!(state.ack_subscribe(2), Some(11));
        assert_eq!(state.ack_subscribe(1), Some(10));
        assert_eq!(state.ack_publish(7), Some(12));
        // Duplicate ack finds nothing
        assert_eq!(state.ack_publish(7), None);
    }

    #[test]
    fn test_pairing_abandon_drops_latest_expectation() {
        let mut state = PairingState::default();
        state.expect_publish(5);
        state.abandon_publish();
        state.pair_publish(3);
        assert_eq!(state.ack_publish(3), None);
    }

    #[test]
    fn test_pairing_clear_forgets_inflight() {
        let mut state = PairingState::default();
        state.expect_subscribe(1);
        state.pair_subscribe(4);
        state.expect_publish(2);
        state.clear();
        assert_eq!(state.ack_subscribe(4), None);
        state.pair_publish(9);
        assert_eq!(state.ack_publish(9), None);
    }

    #[test]
    fn test_transport_rejects_operations_before_connect() {
        let transport = RumqttcTransport::new(&SessionConfig::default());
        assert!(matches!(
            transport.subscribe("a/b"),
            Err(SessionError::TransportRejected(_))
        ));
        assert!(matches!(
            transport.publish("a/b", 1, false, b"x"),
            Err(SessionError::TransportRejected(_))
        ));
    }

    #[test]
    fn test_allocate_action_never_returns_zero() {
        let transport = RumqttcTransport::new(&SessionConfig::default());
        for _ in 0..100 {
            assert_ne!(transport.allocate_action(), NO_CONFIRMATION);
        }
    }
}
