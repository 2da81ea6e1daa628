//! Transport Traits
//!
//! Two traits define the client side of a connection:
//! - `Connector`: performs one handshake over one transport kind and yields a
//!   `Link` only once the peer has accepted the credential
//! - `Link`: an authenticated, bidirectional packet pipe
//!
//! The supervisor never sees sockets or HTTP requests, only these traits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::credential::Credential;
use crate::policy::{ConnectionPolicy, TransportKind};
use crate::protocol::{Packet, PROTOCOL_VERSION};

/// Errors that can occur during transport operations
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not reach the peer or the transport-level handshake failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The peer refused the credential
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    /// The handshake did not complete in time
    #[error("Handshake timed out after {0:?}")]
    Timeout(Duration),

    /// Connection was closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send a packet
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive a packet
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Packet serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// No implementation is registered for this transport kind
    #[error("Transport {0} is not available")]
    Unsupported(TransportKind),

    /// The peer violated the handshake protocol
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Whether this error means the credential itself was refused
    ///
    /// Auth rejections are fatal; every other variant is transient.
    #[must_use]
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::AuthRejected(_))
    }
}

/// Everything a connector needs for one handshake attempt
#[derive(Clone, Debug)]
pub struct HandshakeRequest {
    /// Server base URL, e.g. `ws://localhost:5000`
    pub endpoint: String,
    /// Transport kind being attempted
    pub transport: TransportKind,
    /// Credential attached to the handshake payload
    pub credential: Credential,
    /// Policy forwarded verbatim to the peer
    pub policy: ConnectionPolicy,
}

impl HandshakeRequest {
    /// The handshake packet sent as the first message on the transport
    #[must_use]
    pub fn packet(&self) -> Packet {
        Packet::Handshake {
            protocol_version: PROTOCOL_VERSION,
            token: self.credential.clone(),
            transport: self.transport,
            policy: self.policy.clone(),
        }
    }
}

/// Opens authenticated links
#[async_trait]
pub trait Connector: Send + Sync {
    /// Run one handshake over `request.transport`
    ///
    /// Returns a link only when the peer accepted the credential and assigned
    /// an identity. Must return `TransportError::AuthRejected` when the peer
    /// refused the credential so the caller does not retry.
    async fn connect(&self, request: &HandshakeRequest) -> Result<Box<dyn Link>, TransportError>;
}

#[async_trait]
impl<C: Connector + ?Sized> Connector for Arc<C> {
    async fn connect(&self, request: &HandshakeRequest) -> Result<Box<dyn Link>, TransportError> {
        (**self).connect(request).await
    }
}

#[async_trait]
impl<C: Connector + ?Sized> Connector for Box<C> {
    async fn connect(&self, request: &HandshakeRequest) -> Result<Box<dyn Link>, TransportError> {
        (**self).connect(request).await
    }
}

/// An authenticated packet pipe
///
/// `recv` must be cancel safe: the supervisor races it against outbound
/// traffic and the silence timer.
#[async_trait]
pub trait Link: Send {
    /// Transport kind this link runs over
    fn kind(&self) -> TransportKind;

    /// Identity assigned by the peer during the handshake
    fn identity(&self) -> &str;

    /// Send a packet to the peer
    async fn send(&mut self, packet: Packet) -> Result<(), TransportError>;

    /// Receive the next packet; `Ok(None)` means the peer closed the link
    async fn recv(&mut self) -> Result<Option<Packet>, TransportError>;

    /// Close the link gracefully
    async fn close(&mut self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_rejection_classification() {
        assert!(TransportError::AuthRejected("bad token".into()).is_auth_rejection());
        assert!(!TransportError::ConnectionFailed("refused".into()).is_auth_rejection());
        assert!(!TransportError::Timeout(Duration::from_secs(1)).is_auth_rejection());
        assert!(!TransportError::Unsupported(TransportKind::Polling).is_auth_rejection());
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::ConnectionFailed("test".to_string());
        assert!(err.to_string().contains("Connection failed"));

        let err = TransportError::Unsupported(TransportKind::WebSocket);
        assert_eq!(err.to_string(), "Transport websocket is not available");
    }

    #[test]
    fn test_handshake_packet_carries_credential_and_policy() {
        let policy = ConnectionPolicy::default().with_max_reconnection_attempts(3);
        let request = HandshakeRequest {
            endpoint: "ws://localhost:5000".into(),
            transport: TransportKind::Polling,
            credential: Credential::new("tok"),
            policy: policy.clone(),
        };

        match request.packet() {
            Packet::Handshake {
                protocol_version,
                token,
                transport,
                policy: sent,
            } => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(token.as_str(), "tok");
                assert_eq!(transport, TransportKind::Polling);
                assert_eq!(sent, policy);
            }
            other => panic!("expected handshake, got {other:?}"),
        }
    }
}
