//! In-Process Transport
//!
//! Channel-backed peer for embedded use and deterministic tests. Nothing is
//! serialized: packets move through tokio channels as values.
//!
//! Every handshake attempt made through an [`InProcessConnector`] is handed to
//! the paired [`PeerController`], which decides its fate: accept it (yielding a
//! [`PeerLink`] that plays the server side), reject the credential, or fail it
//! at the transport level.
//!
//! # Usage
//!
//! ```ignore
//! let (connector, mut peer) = InProcessConnector::new_pair();
//! let mut supervisor = ConnectionSupervisor::new(connector, "inproc://chat");
//! let handle = supervisor.activate(&StaticCredential::new("tok"), policy)?;
//!
//! let attempt = peer.next_attempt().await.unwrap();
//! let link = attempt.accept("user-42");
//! link.send_message("receive_message", json!({"content": "hi"}));
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::traits::{Connector, HandshakeRequest, Link, TransportError};
use crate::credential::Credential;
use crate::policy::TransportKind;
use crate::protocol::Packet;

type AttemptReply = oneshot::Sender<Result<InProcessLink, TransportError>>;

/// Client side of the in-process transport
///
/// Serves every transport kind; the kind requested is recorded on the
/// attempt and on the resulting link.
#[derive(Clone)]
pub struct InProcessConnector {
    attempt_tx: mpsc::UnboundedSender<PendingAttempt>,
    attempts: Arc<AtomicUsize>,
}

impl InProcessConnector {
    /// Create a connected connector/controller pair
    #[must_use]
    pub fn new_pair() -> (Self, PeerController) {
        let (attempt_tx, attempt_rx) = mpsc::unbounded_channel();
        let attempts = Arc::new(AtomicUsize::new(0));

        let connector = Self {
            attempt_tx,
            attempts: Arc::clone(&attempts),
        };
        let controller = PeerController {
            attempt_rx,
            attempts,
        };

        (connector, controller)
    }
}

#[async_trait]
impl Connector for InProcessConnector {
    async fn connect(&self, request: &HandshakeRequest) -> Result<Box<dyn Link>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let (reply, verdict) = oneshot::channel();
        self.attempt_tx
            .send(PendingAttempt {
                request: request.clone(),
                reply,
            })
            .map_err(|_| TransportError::ConnectionFailed("in-process peer is gone".into()))?;

        match verdict.await {
            Ok(Ok(link)) => Ok(Box::new(link)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::ConnectionFailed(
                "in-process peer dropped the handshake".into(),
            )),
        }
    }
}

/// Server side controller: observes and decides every handshake attempt
pub struct PeerController {
    attempt_rx: mpsc::UnboundedReceiver<PendingAttempt>,
    attempts: Arc<AtomicUsize>,
}

impl PeerController {
    /// Wait for the next handshake attempt
    ///
    /// Returns `None` once every connector clone has been dropped.
    pub async fn next_attempt(&mut self) -> Option<PendingAttempt> {
        self.attempt_rx.recv().await
    }

    /// Take a pending attempt without waiting
    pub fn try_next_attempt(&mut self) -> Option<PendingAttempt> {
        self.attempt_rx.try_recv().ok()
    }

    /// Total number of handshake attempts made so far
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

/// A handshake waiting for the peer's verdict
pub struct PendingAttempt {
    request: HandshakeRequest,
    reply: AttemptReply,
}

impl PendingAttempt {
    /// The full handshake request
    #[must_use]
    pub fn request(&self) -> &HandshakeRequest {
        &self.request
    }

    /// Transport kind being attempted
    #[must_use]
    pub fn transport(&self) -> TransportKind {
        self.request.transport
    }

    /// Credential presented by the client
    #[must_use]
    pub fn token(&self) -> &Credential {
        &self.request.credential
    }

    /// The handshake packet as it would appear on the wire
    #[must_use]
    pub fn handshake_packet(&self) -> Packet {
        self.request.packet()
    }

    /// Accept the handshake and assign `identity`
    ///
    /// If the client already gave up on this attempt the returned link is
    /// closed from the start.
    pub fn accept(self, identity: impl Into<String>) -> PeerLink {
        let (to_client, from_peer) = mpsc::unbounded_channel();
        let (to_peer, from_client) = mpsc::unbounded_channel();

        let link = InProcessLink {
            kind: self.request.transport,
            identity: identity.into(),
            tx: Some(to_peer),
            rx: from_peer,
        };
        // A dropped receiver just means the attempt timed out or was cancelled
        let _ = self.reply.send(Ok(link));

        PeerLink {
            tx: Some(to_client),
            rx: from_client,
            next_seq: 0,
        }
    }

    /// Refuse the credential
    pub fn reject_auth(self, reason: impl Into<String>) {
        let _ = self
            .reply
            .send(Err(TransportError::AuthRejected(reason.into())));
    }

    /// Fail the attempt at the transport level
    pub fn fail(self, message: impl Into<String>) {
        let _ = self
            .reply
            .send(Err(TransportError::ConnectionFailed(message.into())));
    }
}

/// Client end of an accepted in-process link
pub struct InProcessLink {
    kind: TransportKind,
    identity: String,
    tx: Option<mpsc::UnboundedSender<Packet>>,
    rx: mpsc::UnboundedReceiver<Packet>,
}

#[async_trait]
impl Link for InProcessLink {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn identity(&self) -> &str {
        &self.identity
    }

    async fn send(&mut self, packet: Packet) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(packet)
            .map_err(|_| TransportError::SendFailed("Channel closed".to_string()))
    }

    async fn recv(&mut self) -> Result<Option<Packet>, TransportError> {
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Packet::Close { reason: None });
        }
        self.rx.close();
        Ok(())
    }
}

impl Drop for InProcessLink {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Packet::Close { reason: None });
        }
    }
}

/// Server end of an accepted in-process link
pub struct PeerLink {
    tx: Option<mpsc::UnboundedSender<Packet>>,
    rx: mpsc::UnboundedReceiver<Packet>,
    next_seq: u64,
}

impl PeerLink {
    /// Send a raw packet to the client; `false` if the client is gone
    pub fn send(&self, packet: Packet) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.send(packet).is_ok())
    }

    /// Send an application message to the client
    pub fn send_message(&self, event: impl Into<String>, payload: serde_json::Value) -> bool {
        self.send(Packet::message(event, payload))
    }

    /// Send a heartbeat ping and return its sequence number
    pub fn ping(&mut self) -> u64 {
        self.next_seq += 1;
        self.send(Packet::Ping { seq: self.next_seq });
        self.next_seq
    }

    /// Receive the next packet from the client; `None` once the client is gone
    pub async fn recv(&mut self) -> Option<Packet> {
        self.rx.recv().await
    }

    /// Take a packet from the client without waiting
    pub fn try_recv(&mut self) -> Option<Packet> {
        self.rx.try_recv().ok()
    }

    /// Close gracefully with a `close` packet
    pub fn close(&mut self, reason: Option<&str>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Packet::Close {
                reason: reason.map(str::to_string),
            });
        }
    }

    /// Vanish without a `close` packet, like a network drop
    pub fn drop_connection(&mut self) {
        self.tx = None;
        self.rx.close();
    }

    /// Resolve once the client end has been released
    pub async fn closed(&self) {
        if let Some(tx) = &self.tx {
            tx.closed().await;
        }
    }

    /// Whether the client end has been released
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().map_or(true, mpsc::UnboundedSender::is_closed)
    }
}
