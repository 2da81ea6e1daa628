//! Connection Handle
//!
//! A handle is one logical connection attempt. Its state lives behind a short
//! `parking_lot::Mutex` shared between the owner-facing [`ConnectionHandle`]
//! and the supervisor's driver task. Every transition and the event it emits
//! happen under that lock, so:
//!
//! - events are queued in transition order on one unbounded channel
//! - once `deactivated` is set, late transitions from the driver are no-ops
//! - the event sender is dropped on `Closed`, so nothing can follow
//!   `Disconnected`

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::SupervisorError;
use crate::events::{ConnectionEvent, DisconnectReason, Phase};
use crate::policy::{ConnectionPolicy, TransportKind};
use crate::protocol::{self, Packet};

/// Local handle identifier, used to correlate log lines
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandleId(Uuid);

impl HandleId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Outcome of asking for another retry
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Retry {
    /// Run attempt `attempt` after `delay`
    Attempt { attempt: u32, delay: Duration },
    /// Budget spent after this many attempts
    Exhausted(u32),
    /// Handle was deactivated or closed
    Cancelled,
}

struct HandleState {
    phase: Phase,
    identity: Option<String>,
    transport: Option<TransportKind>,
    retry_count: u32,
    deactivated: bool,
    events: Option<mpsc::UnboundedSender<ConnectionEvent>>,
    outbound: Option<mpsc::UnboundedSender<Packet>>,
}

impl HandleState {
    fn is_live(&self) -> bool {
        !self.deactivated && self.phase != Phase::Closed
    }

    fn emit(&self, event: ConnectionEvent) {
        if let Some(tx) = &self.events {
            // The owner may have dropped its receiver; that is not our concern
            let _ = tx.send(event);
        }
    }

    fn enter_closed(&mut self, reason: DisconnectReason) {
        self.phase = Phase::Closed;
        self.identity = None;
        self.outbound = None;
        self.emit(ConnectionEvent::Disconnected { reason });
        self.events = None;
    }
}

/// State shared between a handle and its driver task
pub(crate) struct Shared {
    id: HandleId,
    state: Mutex<HandleState>,
}

impl Shared {
    /// Fresh state in `Connecting`, plus the owner's event receiver
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Self {
            id: HandleId::new(),
            state: Mutex::new(HandleState {
                phase: Phase::Connecting,
                identity: None,
                transport: None,
                retry_count: 0,
                deactivated: false,
                events: Some(events),
                outbound: None,
            }),
        });
        (shared, rx)
    }

    pub(crate) fn id(&self) -> HandleId {
        self.id
    }

    pub(crate) fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    pub(crate) fn is_live(&self) -> bool {
        self.state.lock().is_live()
    }

    /// Queue an event; `false` if the handle is no longer live
    pub(crate) fn deliver(&self, event: ConnectionEvent) -> bool {
        let state = self.state.lock();
        if !state.is_live() {
            return false;
        }
        state.emit(event);
        true
    }

    /// Transition to `Open`
    pub(crate) fn enter_open(
        &self,
        identity: String,
        transport: TransportKind,
        outbound: mpsc::UnboundedSender<Packet>,
    ) -> bool {
        let mut state = self.state.lock();
        if !state.is_live() {
            return false;
        }
        state.phase = Phase::Open;
        state.identity = Some(identity.clone());
        state.transport = Some(transport);
        state.retry_count = 0;
        state.outbound = Some(outbound);
        state.emit(ConnectionEvent::Connected {
            identity,
            transport,
        });
        true
    }

    /// Every transport failed for one round
    pub(crate) fn report_connect_error(&self, message: String) -> bool {
        self.deliver(ConnectionEvent::ConnectError { message })
    }

    /// Transition from `Open` to `Reconnecting`
    pub(crate) fn link_lost(&self) -> bool {
        let mut state = self.state.lock();
        if !state.is_live() {
            return false;
        }
        state.phase = Phase::Reconnecting;
        state.identity = None;
        state.outbound = None;
        true
    }

    /// Claim the next slot of the reconnection budget
    ///
    /// Emits `Reconnecting` for the claimed attempt.
    pub(crate) fn next_retry(&self, policy: &ConnectionPolicy) -> Retry {
        let mut state = self.state.lock();
        if !state.is_live() {
            return Retry::Cancelled;
        }
        if state.retry_count >= policy.max_reconnection_attempts {
            return Retry::Exhausted(state.retry_count);
        }

        state.retry_count += 1;
        let attempt = state.retry_count;
        let delay = policy.backoff_delay(attempt);
        state.emit(ConnectionEvent::Reconnecting { attempt, delay });
        Retry::Attempt { attempt, delay }
    }

    /// Transition to `Closed`, optionally reporting an exhausted budget first
    pub(crate) fn close(&self, reason: DisconnectReason, exhausted_after: Option<u32>) {
        let mut state = self.state.lock();
        if !state.is_live() {
            return;
        }
        if let Some(attempts) = exhausted_after {
            state.emit(ConnectionEvent::ReconnectFailed { attempts });
        }
        state.enter_closed(reason);
    }

    /// Mark the handle deactivated and close it if it is not closed yet
    ///
    /// Returns `false` if it had already been deactivated.
    pub(crate) fn deactivate(&self) -> bool {
        let mut state = self.state.lock();
        if state.deactivated {
            return false;
        }
        if state.phase != Phase::Closed {
            state.enter_closed(DisconnectReason::UserInitiated);
        }
        state.deactivated = true;
        state.events = None;
        true
    }
}

/// Owner-facing view of one logical connection
///
/// Obtained from [`ConnectionSupervisor::activate`](crate::ConnectionSupervisor::activate).
/// Dropping the handle does not tear the connection down; the supervisor
/// owns the lifecycle.
pub struct ConnectionHandle {
    shared: Arc<Shared>,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl ConnectionHandle {
    pub(crate) fn new(
        shared: Arc<Shared>,
        events: mpsc::UnboundedReceiver<ConnectionEvent>,
    ) -> Self {
        Self { shared, events }
    }

    /// Local identifier
    #[must_use]
    pub fn id(&self) -> HandleId {
        self.shared.id()
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.shared.phase()
    }

    /// Identity assigned by the peer, while `Open`
    #[must_use]
    pub fn identity(&self) -> Option<String> {
        self.shared.state.lock().identity.clone()
    }

    /// Transport of the most recent successful handshake
    #[must_use]
    pub fn transport(&self) -> Option<TransportKind> {
        self.shared.state.lock().transport
    }

    /// Retries since the last successful handshake
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.shared.state.lock().retry_count
    }

    /// Whether the handle is `Open`
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.phase() == Phase::Open
    }

    /// Whether the handle has reached `Closed`
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.phase() == Phase::Closed
    }

    /// Send an application message to the peer
    ///
    /// # Errors
    ///
    /// - `SupervisorError::NotConnected` unless the handle is `Open`
    /// - `SupervisorError::Transport` if the packet cannot be encoded, e.g.
    ///   because it exceeds the maximum packet size
    pub fn emit(
        &self,
        event: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<(), SupervisorError> {
        let packet = Packet::message(event, payload);
        protocol::encode(&packet)?;

        let state = self.shared.state.lock();
        match (&state.outbound, state.phase) {
            (Some(tx), Phase::Open) if !state.deactivated => {
                tx.send(packet).map_err(|_| SupervisorError::NotConnected)
            }
            _ => Err(SupervisorError::NotConnected),
        }
    }

    /// Wait for the next event
    ///
    /// Returns `None` after `Disconnected` has been received.
    pub async fn recv_event(&mut self) -> Option<ConnectionEvent> {
        self.events.recv().await
    }

    /// Take the next event without waiting
    pub fn try_recv_event(&mut self) -> Option<ConnectionEvent> {
        self.events.try_recv().ok()
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ConnectionHandle")
            .field("id", &self.shared.id)
            .field("phase", &state.phase)
            .field("identity", &state.identity)
            .field("transport", &state.transport)
            .field("retry_count", &state.retry_count)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::transport::TransportError;
    use serde_json::json;

    fn drain(handle: &mut ConnectionHandle) -> Vec<ConnectionEvent> {
        std::iter::from_fn(|| handle.try_recv_event()).collect()
    }

    fn fresh() -> (Arc<Shared>, ConnectionHandle) {
        let (shared, rx) = Shared::new();
        let handle = ConnectionHandle::new(Arc::clone(&shared), rx);
        (shared, handle)
    }

    #[test]
    fn test_starts_connecting() {
        let (_shared, handle) = fresh();
        assert_eq!(handle.phase(), Phase::Connecting);
        assert_eq!(handle.retry_count(), 0);
        assert!(handle.identity().is_none());
    }

    #[test]
    fn test_open_resets_retry_count() {
        let (shared, mut handle) = fresh();
        let policy = ConnectionPolicy::for_testing();

        assert!(matches!(shared.next_retry(&policy), Retry::Attempt { attempt: 1, .. }));
        assert!(matches!(shared.next_retry(&policy), Retry::Attempt { attempt: 2, .. }));
        assert_eq!(handle.retry_count(), 2);

        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(shared.enter_open("u-1".into(), TransportKind::Polling, tx));
        assert_eq!(handle.retry_count(), 0);
        assert_eq!(handle.identity().as_deref(), Some("u-1"));
        assert_eq!(handle.transport(), Some(TransportKind::Polling));

        let events = drain(&mut handle);
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[2],
            ConnectionEvent::Connected {
                identity: "u-1".into(),
                transport: TransportKind::Polling
            }
        );
    }

    #[test]
    fn test_budget_is_exact() {
        let (shared, _handle) = fresh();
        let policy = ConnectionPolicy::for_testing().with_max_reconnection_attempts(3);

        for expected in 1..=3 {
            assert!(matches!(
                shared.next_retry(&policy),
                Retry::Attempt { attempt, .. } if attempt == expected
            ));
        }
        assert_eq!(shared.next_retry(&policy), Retry::Exhausted(3));
    }

    #[test]
    fn test_close_is_terminal_and_ends_stream() {
        let (shared, mut handle) = fresh();
        shared.close(DisconnectReason::ReconnectExhausted, Some(5));

        assert!(!shared.deliver(ConnectionEvent::ConnectError {
            message: "late".into()
        }));
        shared.close(DisconnectReason::RemoteClosed, None);

        assert_eq!(
            drain(&mut handle),
            vec![
                ConnectionEvent::ReconnectFailed { attempts: 5 },
                ConnectionEvent::Disconnected {
                    reason: DisconnectReason::ReconnectExhausted
                },
            ]
        );
        assert!(handle.is_closed());
    }

    #[test]
    fn test_recv_event_waits_for_delivery() {
        let (shared, mut handle) = fresh();
        let mut recv = tokio_test::task::spawn(handle.recv_event());
        tokio_test::assert_pending!(recv.poll());

        assert!(shared.report_connect_error("refused".into()));
        assert!(recv.is_woken());
        assert_eq!(
            tokio_test::assert_ready!(recv.poll()),
            Some(ConnectionEvent::ConnectError {
                message: "refused".into()
            })
        );
    }

    #[tokio::test]
    async fn test_deactivate_once() {
        let (shared, mut handle) = fresh();

        assert!(shared.deactivate());
        assert!(!shared.deactivate());
        assert!(!shared.enter_open("late".into(), TransportKind::WebSocket, mpsc::unbounded_channel().0));

        assert_eq!(
            handle.recv_event().await,
            Some(ConnectionEvent::Disconnected {
                reason: DisconnectReason::UserInitiated
            })
        );
        assert_eq!(handle.recv_event().await, None);
        assert_eq!(shared.next_retry(&ConnectionPolicy::default()), Retry::Cancelled);
    }

    #[test]
    fn test_deactivate_after_close_emits_nothing() {
        let (shared, mut handle) = fresh();
        shared.close(DisconnectReason::AuthRejected, None);
        assert!(shared.deactivate());

        assert_eq!(
            drain(&mut handle),
            vec![ConnectionEvent::Disconnected {
                reason: DisconnectReason::AuthRejected
            }]
        );
    }

    #[test]
    fn test_emit_requires_open() {
        let (shared, handle) = fresh();
        assert!(matches!(
            handle.emit("send_message", json!("hi")),
            Err(SupervisorError::NotConnected)
        ));

        let (tx, mut rx) = mpsc::unbounded_channel();
        shared.enter_open("u".into(), TransportKind::WebSocket, tx);
        handle.emit("send_message", json!("hi")).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Packet::message("send_message", json!("hi")));

        let huge = json!("x".repeat(protocol::MAX_PACKET_SIZE));
        assert!(matches!(
            handle.emit("send_message", huge),
            Err(SupervisorError::Transport(TransportError::Serialization(_)))
        ));
        assert!(rx.try_recv().is_err());

        assert!(shared.link_lost());
        assert_eq!(handle.phase(), Phase::Reconnecting);
        assert!(handle.identity().is_none());
        assert!(matches!(
            handle.emit("send_message", json!("hi")),
            Err(SupervisorError::NotConnected)
        ));
    }
}
