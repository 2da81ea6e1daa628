//! chatlink Core - Authenticated Real-time Connection Supervisor
//!
//! This crate establishes and supervises one persistent, authenticated,
//! bidirectional connection to a chat server: credential gating, transport
//! fallback, bounded reconnection with backoff, and teardown that is tied to
//! the lifetime of whoever owns the connection.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Consumer Binding                        │
//! │      ConnectionScope (RAII)        ConnectionEvents (trait)   │
//! └───────────────┬───────────────────────────────▲──────────────┘
//!                 │ activate / deactivate          │ ConnectionEvent
//!                 ▼                                │ (one ordered channel)
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    ConnectionSupervisor                       │
//! │  ┌────────────────┐   ┌───────────────┐   ┌────────────────┐ │
//! │  │ Credential     │   │ Connection    │   │ Driver task    │ │
//! │  │ Provider       │   │ Policy        │   │ (state machine)│ │
//! │  └────────────────┘   └───────────────┘   └───────┬────────┘ │
//! └───────────────────────────────────────────────────┼──────────┘
//!                                                     │ Connector / Link
//!                                                     ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │        Transports: WebSocket · HTTP long-polling · in-process │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use chatlink_core::{
//!     ConnectionPolicy, ConnectionSupervisor, EnvCredential, MultiConnector,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut supervisor =
//!         ConnectionSupervisor::new(MultiConnector::standard(), "ws://localhost:5000");
//!     let mut handle = supervisor.activate(&EnvCredential::default(), ConnectionPolicy::default())?;
//!
//!     while let Some(event) = handle.recv_event().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`supervisor`]: activation, teardown and the per-handle driver
//! - [`handle`]: the owner-facing connection handle
//! - [`events`]: phases, disconnect reasons and connection events
//! - [`binding`]: RAII scope and typed event callbacks
//! - [`credential`]: bearer tokens and where they come from
//! - [`policy`]: transport preference, reconnection budget and timing
//! - [`protocol`]: JSON packets on the wire
//! - [`transport`]: connectors and links (WebSocket, polling, in-process)
//! - [`config`]: TOML/environment/CLI configuration layering
//! - [`error`]: supervisor errors

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod binding;
pub mod config;
pub mod credential;
pub mod error;
pub mod events;
pub mod handle;
pub mod policy;
pub mod protocol;
pub mod supervisor;
pub mod transport;

// Re-exports for convenience
pub use binding::{dispatch, ConnectionEvents, ConnectionScope};
pub use credential::{
    Credential, CredentialChain, CredentialProvider, EnvCredential, FileCredential,
    StaticCredential,
};
pub use error::SupervisorError;
pub use events::{ConnectionEvent, DisconnectReason, Phase};
pub use handle::{ConnectionHandle, HandleId};
pub use policy::{ConnectionPolicy, TransportKind};
pub use protocol::{Packet, PROTOCOL_VERSION};
pub use supervisor::ConnectionSupervisor;
pub use transport::{
    Connector, HandshakeRequest, InProcessConnector, Link, MultiConnector, PeerController,
    PeerLink, PendingAttempt, TransportError,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ChatlinkConfig, ChatlinkToml,
    ConfigError, ConfigOverrides, ConfigSource,
};
