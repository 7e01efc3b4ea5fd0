//! Broker confirmation tracking.
//!
//! Subscribes and QoS >= 1 publishes each produce a pending
//! entry here, keyed by the [`ActionId`] the transport assigned. When the
//! matching acknowledgment arrives, [`ConfirmationRegistry::resolve`] wakes
//! the blocked caller; if nothing arrives within the configured window, the
//! caller's wait expires and the entry is reclaimed.
//!
//! # The submission lock
//!
//! The registry's internal mutex is also the session's submission lock.
//! [`ConfirmationRegistry::submit`] runs the transport call and records the
//! waiter inside one critical section, so an acknowledgment processed on the
//! I/O thread can never outrun the registration of its waiter — `resolve`
//! cannot acquire the map until the entry is in it.
//!
//! Exactly one of {resolve, timeout} decides each pending entry. Both paths
//! remove the entry under the lock, and removal is the tiebreak: whichever
//! side finds the entry present owns the outcome.

use std::collections::HashMap;
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::error::SessionError;
use crate::transport::{ActionId, NO_CONFIRMATION};
use crate::Result;

type PendingMap = HashMap<ActionId, SyncSender<()>>;

/// Tracks operations awaiting broker acknowledgment.
///
/// Cheap to clone; all clones share one pending map. The map's mutex doubles
/// as the submission lock for every confirmed transport operation.
#[derive(Clone, Default)]
pub struct ConfirmationRegistry {
    pending: Arc<Mutex<PendingMap>>,
}

/// A handle to one pending confirmation. Obtained from
/// [`ConfirmationRegistry::submit`]; consumed by [`ConfirmWaiter::wait`].
pub struct ConfirmWaiter {
    action: ActionId,
    rx: Receiver<()>,
    pending: Arc<Mutex<PendingMap>>,
}

impl ConfirmationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submits a confirmed operation.
    ///
    /// Runs `send` (the transport call) and registers the returned action,
    /// all under the submission lock. Returns `None` when the transport
    /// reports [`NO_CONFIRMATION`] — nothing to wait for.
    ///
    /// A `send` failure registers nothing and is passed straight through.
    pub fn submit<F>(&self, send: F) -> Result<Option<ConfirmWaiter>>
    where
        F: FnOnce() -> Result<ActionId>,
    {
        let mut pending = self.lock_pending();
        let action = send()?;
        if action == NO_CONFIRMATION {
            return Ok(None);
        }

        let (tx, rx) = mpsc::sync_channel(1);
        pending.insert(action, tx);
        Ok(Some(ConfirmWaiter {
            action,
            rx,
            pending: Arc::clone(&self.pending),
        }))
    }

    /// Submits an operation through the submission lock without tracking
    /// its acknowledgment.
    ///
    /// Used where waiting is wrong or pointless: resubscription after a
    /// reconnect (blocking the event thread on each SUBACK would stall the
    /// connection being restored) and fire-and-forget unsubscribes.
    pub fn submit_nowait<T, F>(&self, send: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let _pending = self.lock_pending();
        send()
    }

    /// Delivers a broker acknowledgment.
    ///
    /// Wakes the waiter registered for `action`. An unknown action is
    /// dropped with a debug log: late acks after a timeout and QoS 0 noise
    /// both land here.
    pub fn resolve(&self, action: ActionId) {
        let mut pending = self.lock_pending();
        match pending.remove(&action) {
            // Buffered channel of capacity 1 with a single sender: this
            // send never blocks.
            Some(tx) => {
                let _ = tx.send(());
            }
            None => debug!(action, "confirmation for unknown action dropped"),
        }
    }

    /// Number of operations still awaiting acknowledgment.
    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, PendingMap> {
        // A panic while holding the lock leaves the map intact; keep going.
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConfirmWaiter {
    /// The action this waiter is registered for.
    pub fn action(&self) -> ActionId {
        self.action
    }

    /// Blocks until the acknowledgment arrives or `timeout` elapses.
    ///
    /// On timeout the entry is removed under the lock. If `resolve` got
    /// there first, its signal is already buffered in the channel and the
    /// wait still succeeds.
    pub fn wait(self, timeout: Duration) -> Result<()> {
        match self.rx.recv_timeout(timeout) {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                let mut pending = self
                    .pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                if pending.remove(&self.action).is_some() {
                    // We removed the entry: the timeout owns the outcome.
                    Err(SessionError::ConfirmationTimedOut)
                } else {
                    // resolve removed it first; its signal may have landed
                    // just after recv_timeout gave up.
                    match self.rx.try_recv() {
                        Ok(()) => Ok(()),
                        Err(_) => Err(SessionError::ConfirmationTimedOut),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn submit_fixed(registry: &ConfirmationRegistry, action: ActionId) -> ConfirmWaiter {
        registry
            .submit(|| Ok(action))
            .unwrap()
            .expect("action should require confirmation")
    }

    #[test]
    fn test_resolve_before_wait_succeeds() {
        let registry = ConfirmationRegistry::new();
        let waiter = submit_fixed(&registry, 7);
        registry.resolve(7);
        assert!(waiter.wait(Duration::from_millis(100)).is_ok());
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn test_resolve_from_another_thread() {
        let registry = ConfirmationRegistry::new();
        let waiter = submit_fixed(&registry, 42);

        let resolver = registry.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            resolver.resolve(42);
        });

        assert!(waiter.wait(Duration::from_secs(2)).is_ok());
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_times_out_within_window() {
        let registry = ConfirmationRegistry::new();
        let waiter = submit_fixed(&registry, 5);

        let start = Instant::now();
        let result = waiter.wait(Duration::from_millis(50));
        let elapsed = start.elapsed();

        assert!(matches!(result, Err(SessionError::ConfirmationTimedOut)));
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(500));
        // Timed-out entries are reclaimed
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn test_late_resolve_after_timeout_is_dropped() {
        let registry = ConfirmationRegistry::new();
        let waiter = submit_fixed(&registry, 9);
        let result = waiter.wait(Duration::from_millis(10));
        assert!(result.is_err());

        // The ack finally arrives; nothing to wake, nothing panics.
        registry.resolve(9);
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn test_resolve_unknown_action_is_noop() {
        let registry = ConfirmationRegistry::new();
        registry.resolve(999);
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn test_no_confirmation_actions_are_not_tracked() {
        let registry = ConfirmationRegistry::new();
        let waiter = registry.submit(|| Ok(NO_CONFIRMATION)).unwrap();
        assert!(waiter.is_none());
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn test_failed_submission_registers_nothing() {
        let registry = ConfirmationRegistry::new();
        let result = registry.submit(|| {
            Err(SessionError::TransportRejected("client gone".into()))
        });
        assert!(result.is_err());
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn test_resolve_cannot_outrun_registration() {
        // Hammer the submit/resolve ordering: the resolver fires as fast as
        // it can while submit holds the lock across send + register. Every
        // wait must end in exactly one definite outcome.
        let registry = ConfirmationRegistry::new();
        for action in 1..50u32 {
            let resolver = registry.clone();
            let handle = thread::spawn(move || resolver.resolve(action));
            let waiter = submit_fixed(&registry, action);
            let _ = waiter.wait(Duration::from_millis(50));
            handle.join().unwrap();
            assert_eq!(registry.pending_count(), 0);
        }
    }

    #[test]
    fn test_resolve_timeout_race_is_exclusive() {
        // Resolve lands right around the deadline. Whatever the interleaving,
        // wait() returns one clean outcome and the map ends up empty.
        for i in 0..50u32 {
            let registry = ConfirmationRegistry::new();
            let waiter = submit_fixed(&registry, i + 1);

            let resolver = registry.clone();
            let action = i + 1;
            let handle = thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                resolver.resolve(action);
            });

            let _ = waiter.wait(Duration::from_millis(10));
            handle.join().unwrap();
            assert_eq!(registry.pending_count(), 0);
        }
    }
}
