//! Transport Layer
//!
//! Everything below the supervisor: opening authenticated links and moving
//! packets over them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │ ConnectionSupervisor │
//! └──────────┬───────────┘
//!            │ Connector::connect(HandshakeRequest)
//!            ▼
//! ┌──────────────────────┐      ┌─────────────────────┐
//! │    MultiConnector    │ ───▶ │ WebSocketConnector  │  ws(s)://host/ws
//! │  (by TransportKind)  │ ───▶ │ PollingConnector    │  http(s)://host/poll
//! └──────────────────────┘      └─────────────────────┘
//!            │
//!            ▼
//!      Box<dyn Link>  (authenticated; identity assigned)
//! ```
//!
//! The in-process transport implements the same traits over channels.

pub mod endpoint;
pub mod in_process;
pub mod multi;
pub mod traits;

#[cfg(feature = "polling")]
pub mod polling;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use endpoint::{polling_url, websocket_url};
pub use in_process::{InProcessConnector, PeerController, PeerLink, PendingAttempt};
pub use multi::MultiConnector;
pub use traits::{Connector, HandshakeRequest, Link, TransportError};

#[cfg(feature = "polling")]
pub use polling::PollingConnector;
#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnector;
