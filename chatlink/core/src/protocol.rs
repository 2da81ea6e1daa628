//! Wire Protocol
//!
//! JSON packets exchanged with the chat server, internally tagged by `type`.
//!
//! ```text
//! client                                   server
//!   │ ── handshake {token, transport, policy} ──▶ │
//!   │ ◀── handshake_ack {accepted, connection_id} │
//!   │ ◀──────────────── ping {seq} ────────────── │
//!   │ ───────────────── pong {seq} ─────────────▶ │
//!   │ ◀──────── message {event, payload} ───────▶ │
//!   │ ◀────────────── close {reason} ───────────▶ │
//! ```
//!
//! The handshake is always the first packet on a transport. Application
//! messages are opaque: `event` names and `payload` values pass through
//! untouched.
//!
//! # Security
//!
//! - Maximum packet size is enforced on both encode and decode
//! - The token inside a handshake never shows up in `Debug` output

use serde::{Deserialize, Serialize};

use crate::credential::Credential;
use crate::policy::{ConnectionPolicy, TransportKind};
use crate::transport::TransportError;

/// Protocol version spoken by this client
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum encoded packet size (1 MiB)
pub const MAX_PACKET_SIZE: usize = 1024 * 1024;

/// A protocol packet
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Packet {
    /// First packet from the client on every transport
    Handshake {
        /// Protocol version (current: 1)
        protocol_version: u32,
        /// Bearer token
        token: Credential,
        /// Transport the handshake is running over
        transport: TransportKind,
        /// Client connection policy, forwarded verbatim
        policy: ConnectionPolicy,
    },

    /// Server verdict on a handshake
    HandshakeAck {
        /// Whether the credential was accepted
        accepted: bool,
        /// Identity assigned to this connection (present when accepted)
        #[serde(default)]
        connection_id: Option<String>,
        /// Reason for rejection (if not accepted)
        #[serde(default)]
        rejection_reason: Option<String>,
        /// Protocol version supported by the server
        protocol_version: u32,
    },

    /// Heartbeat request from the server
    Ping {
        /// Sequence number (echoed back in the pong)
        seq: u64,
    },

    /// Heartbeat reply
    Pong {
        /// Sequence number from the ping
        seq: u64,
    },

    /// Application message, in either direction
    Message {
        /// Event name, e.g. `join_conversation`
        event: String,
        /// Opaque payload
        #[serde(default)]
        payload: serde_json::Value,
    },

    /// Graceful close, in either direction
    Close {
        /// Optional human-readable reason
        #[serde(default)]
        reason: Option<String>,
    },
}

impl Packet {
    /// Build an application message
    pub fn message(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::Message {
            event: event.into(),
            payload,
        }
    }

    /// Short packet name for logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Handshake { .. } => "handshake",
            Self::HandshakeAck { .. } => "handshake_ack",
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
            Self::Message { .. } => "message",
            Self::Close { .. } => "close",
        }
    }
}

/// Encode a packet to JSON text
///
/// # Errors
///
/// Returns `TransportError::Serialization` if serialization fails or the
/// result exceeds `MAX_PACKET_SIZE`.
pub fn encode(packet: &Packet) -> Result<String, TransportError> {
    let json =
        serde_json::to_string(packet).map_err(|e| TransportError::Serialization(e.to_string()))?;

    if json.len() > MAX_PACKET_SIZE {
        return Err(TransportError::Serialization(format!(
            "Packet too large: {} bytes (max: {})",
            json.len(),
            MAX_PACKET_SIZE
        )));
    }

    Ok(json)
}

/// Decode one packet from JSON bytes
///
/// # Errors
///
/// Returns `TransportError::Serialization` for oversized or malformed input.
pub fn decode(data: &[u8]) -> Result<Packet, TransportError> {
    check_size(data.len())?;
    serde_json::from_slice(data).map_err(|e| TransportError::Serialization(e.to_string()))
}

/// Decode a JSON array of packets (one long-polling response)
///
/// # Errors
///
/// Returns `TransportError::Serialization` for oversized or malformed input.
pub fn decode_batch(data: &[u8]) -> Result<Vec<Packet>, TransportError> {
    check_size(data.len())?;
    serde_json::from_slice(data).map_err(|e| TransportError::Serialization(e.to_string()))
}

fn check_size(len: usize) -> Result<(), TransportError> {
    if len > MAX_PACKET_SIZE {
        return Err(TransportError::Serialization(format!(
            "Packet too large: {len} bytes (max: {MAX_PACKET_SIZE})"
        )));
    }
    Ok(())
}

/// Interpret the server's reply to a handshake
///
/// Returns the identity assigned by the server.
///
/// # Errors
///
/// - `TransportError::AuthRejected` when the server refused the credential
/// - `TransportError::Protocol` for version mismatches, a missing identity, or
///   any packet other than `handshake_ack`
pub fn interpret_ack(packet: Packet) -> Result<String, TransportError> {
    match packet {
        Packet::HandshakeAck {
            accepted: false,
            rejection_reason,
            ..
        } => Err(TransportError::AuthRejected(
            rejection_reason.unwrap_or_else(|| "Authentication error".to_string()),
        )),
        Packet::HandshakeAck {
            protocol_version, ..
        } if protocol_version != PROTOCOL_VERSION => Err(TransportError::Protocol(format!(
            "server speaks protocol version {protocol_version}, client speaks {PROTOCOL_VERSION}"
        ))),
        Packet::HandshakeAck {
            connection_id: Some(id),
            ..
        } if !id.is_empty() => Ok(id),
        Packet::HandshakeAck { .. } => Err(TransportError::Protocol(
            "handshake accepted without a connection id".to_string(),
        )),
        other => Err(TransportError::Protocol(format!(
            "expected handshake_ack, got {}",
            other.name()
        ))),
    }
}
