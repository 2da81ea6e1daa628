//! Connection Events
//!
//! Typed events delivered to the owner of a connection handle, in the order
//! the underlying phase transitions happen.
//!
//! # Lifecycle
//!
//! ```text
//!              ┌──────────── ConnectError (retry) ────────────┐
//!              ▼                                              │
//!        ┌──────────┐  Connected   ┌──────┐  link lost  ┌──────────────┐
//!  ────▶ │Connecting│ ───────────▶ │ Open │ ──────────▶ │ Reconnecting │
//!        └──────────┘              └──────┘ ◀────────── └──────────────┘
//!              │                      │     Connected         │
//!              └──────────────────────┴───────────────────────┴──▶ Closed
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::policy::TransportKind;

/// Phase of a connection handle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Handshake in flight, trying transports in preference order
    Connecting,
    /// Handshake accepted, identity assigned
    Open,
    /// Open link was lost; retrying per policy
    Reconnecting,
    /// Terminal
    Closed,
}

impl Phase {
    /// Whether no further transitions can happen
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Closed
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why a handle reached `Closed`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The owner deactivated the handle
    UserInitiated,
    /// The peer refused the credential
    AuthRejected,
    /// The reconnection budget ran out
    ReconnectExhausted,
    /// The peer went away and reconnection is disabled
    RemoteClosed,
    /// No transport could connect and reconnection is disabled
    ConnectFailed,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UserInitiated => "user initiated",
            Self::AuthRejected => "authentication rejected",
            Self::ReconnectExhausted => "reconnection attempts exhausted",
            Self::RemoteClosed => "closed by remote",
            Self::ConnectFailed => "connect failed",
        };
        f.write_str(name)
    }
}

/// Events from a connection handle to its owner
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionEvent {
    // ============================================
    // Lifecycle
    // ============================================
    /// Entered `Open`
    Connected {
        /// Identity assigned by the peer
        identity: String,
        /// Transport the handshake succeeded on
        transport: TransportKind,
    },

    /// Every transport failed for one round of attempts
    ConnectError {
        /// Last transport error seen
        message: String,
    },

    /// A reconnection attempt is scheduled
    Reconnecting {
        /// Attempt number, starting at 1
        attempt: u32,
        /// Backoff delay before the attempt runs
        #[serde(with = "duration_ms")]
        delay: Duration,
    },

    /// The reconnection budget ran out; `Disconnected` follows
    ReconnectFailed {
        /// Attempts made since the last successful handshake
        attempts: u32,
    },

    /// Entered `Closed`; always the last event
    Disconnected {
        /// Why the handle closed
        reason: DisconnectReason,
    },

    // ============================================
    // Application traffic
    // ============================================
    /// Inbound application message
    Message {
        /// Event name, e.g. `receive_message`
        event: String,
        /// Opaque payload
        payload: serde_json::Value,
    },
}

impl ConnectionEvent {
    /// Whether this is the final event of a handle
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_phase_terminal() {
        assert!(Phase::Closed.is_terminal());
        assert!(!Phase::Reconnecting.is_terminal());
        assert_eq!(Phase::Open.to_string(), "open");
    }

    #[test]
    fn test_event_serialization() {
        let event = ConnectionEvent::Reconnecting {
            attempt: 2,
            delay: Duration::from_millis(1500),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"type": "reconnecting", "attempt": 2, "delay": 1500})
        );

        let back: ConnectionEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_disconnect_reason_wire_name() {
        let event = ConnectionEvent::Disconnected {
            reason: DisconnectReason::ReconnectExhausted,
        };
        assert!(event.is_terminal());
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "disconnected", "reason": "reconnect_exhausted"})
        );
    }
}
