//! Consumer Binding
//!
//! Glue for the unit that owns a connection:
//!
//! - [`ConnectionScope`]: activates on construction and deactivates when
//!   dropped, so the connection can never outlive its owner
//! - [`ConnectionEvents`]: typed callbacks with no-op defaults, fed by
//!   [`dispatch`] or [`ConnectionHandle::run_events`]

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use crate::credential::CredentialProvider;
use crate::error::SupervisorError;
use crate::events::{ConnectionEvent, DisconnectReason};
use crate::handle::ConnectionHandle;
use crate::policy::{ConnectionPolicy, TransportKind};
use crate::supervisor::ConnectionSupervisor;
use crate::transport::Connector;

/// Callbacks for connection events
///
/// Every method defaults to doing nothing; implement the ones you care about.
pub trait ConnectionEvents {
    /// The handle entered `Open`
    fn on_connected(&mut self, _identity: &str, _transport: TransportKind) {}

    /// Every transport failed for one round
    fn on_connect_error(&mut self, _message: &str) {}

    /// A reconnection attempt is scheduled after `delay`
    fn on_reconnecting(&mut self, _attempt: u32, _delay: Duration) {}

    /// The reconnection budget ran out
    fn on_reconnect_failed(&mut self, _attempts: u32) {}

    /// Inbound application message
    fn on_message(&mut self, _event: &str, _payload: &serde_json::Value) {}

    /// The handle reached `Closed`
    fn on_disconnected(&mut self, _reason: DisconnectReason) {}
}

/// Route one event to the matching callback
pub fn dispatch<H: ConnectionEvents + ?Sized>(handler: &mut H, event: &ConnectionEvent) {
    match event {
        ConnectionEvent::Connected {
            identity,
            transport,
        } => handler.on_connected(identity, *transport),
        ConnectionEvent::ConnectError { message } => handler.on_connect_error(message),
        ConnectionEvent::Reconnecting { attempt, delay } => {
            handler.on_reconnecting(*attempt, *delay);
        }
        ConnectionEvent::ReconnectFailed { attempts } => handler.on_reconnect_failed(*attempts),
        ConnectionEvent::Message { event, payload } => handler.on_message(event, payload),
        ConnectionEvent::Disconnected { reason } => handler.on_disconnected(*reason),
    }
}

impl ConnectionHandle {
    /// Feed events to `handler` until the handle closes
    ///
    /// Returns the close reason, or `None` if the stream ended without one.
    pub async fn run_events<H: ConnectionEvents + ?Sized>(
        &mut self,
        handler: &mut H,
    ) -> Option<DisconnectReason> {
        while let Some(event) = self.recv_event().await {
            dispatch(handler, &event);
            if let ConnectionEvent::Disconnected { reason } = event {
                return Some(reason);
            }
        }
        None
    }
}

/// A connection tied to the lifetime of its owner
///
/// Derefs to the live [`ConnectionHandle`]. Dropping the scope deactivates
/// the supervisor.
pub struct ConnectionScope<C: Connector + 'static> {
    supervisor: ConnectionSupervisor<C>,
    handle: ConnectionHandle,
}

impl<C: Connector + 'static> ConnectionScope<C> {
    /// Activate `supervisor` and bind it to the returned scope
    ///
    /// # Errors
    ///
    /// Propagates any activation error; the supervisor is dropped with it.
    pub fn activate<P: CredentialProvider + ?Sized>(
        mut supervisor: ConnectionSupervisor<C>,
        provider: &P,
        policy: ConnectionPolicy,
    ) -> Result<Self, SupervisorError> {
        let handle = supervisor.activate(provider, policy)?;
        Ok(Self { supervisor, handle })
    }

    /// The supervisor backing this scope
    #[must_use]
    pub fn supervisor(&self) -> &ConnectionSupervisor<C> {
        &self.supervisor
    }

    /// Deactivate now and hand back the handle so remaining events can be read
    pub fn close(mut self) -> ConnectionHandle {
        self.supervisor.deactivate();
        let Self { handle, .. } = self;
        handle
    }
}

impl<C: Connector + 'static> Deref for ConnectionScope<C> {
    type Target = ConnectionHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl<C: Connector + 'static> DerefMut for ConnectionScope<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.handle
    }
}
