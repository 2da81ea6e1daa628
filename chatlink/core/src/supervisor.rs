//! Connection Supervisor
//!
//! Owns the life span of exactly one [`ConnectionHandle`] at a time.
//!
//! `activate` reads the credential, validates the policy and spawns a driver
//! task; it never awaits. The driver runs the whole state machine:
//!
//! 1. **Connecting**: one handshake per transport, in preference order. A
//!    transport failure moves on to the next transport; an auth rejection ends
//!    everything.
//! 2. **Open**: answer pings, deliver inbound messages, forward outbound ones.
//!    Peer close, a transport error, or inbound silence longer than the ping
//!    timeout all count as losing the link.
//! 3. **Reconnecting**: claim a slot of the budget, wait the backoff delay,
//!    run a full round of transports again.
//!
//! The driver future is parked in a [`DriverCell`] rather than owned by the
//! task polling it. `deactivate` marks the shared state deactivated (so no
//! further event can be delivered), then takes the future out of the cell and
//! drops it on the spot. The link (which sends its close on drop), any backoff
//! timer and any pending handshake go with it before `deactivate` returns.
//! Every link operation the driver awaits is time-limited, so a stalled peer
//! shows up as a lost link rather than a handle stuck in `Open`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::credential::{Credential, CredentialProvider};
use crate::error::SupervisorError;
use crate::events::{ConnectionEvent, DisconnectReason};
use crate::handle::{ConnectionHandle, HandleId, Retry, Shared};
use crate::policy::ConnectionPolicy;
use crate::protocol::Packet;
use crate::transport::{Connector, HandshakeRequest, Link, TransportError};

type DriverFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Driver future parked where `deactivate` can reach it
///
/// The spawned task polls the future through the cell; taking it out drops
/// everything it owns synchronously. The lock is held only for one poll.
#[derive(Clone)]
struct DriverCell(Arc<Mutex<Option<DriverFuture>>>);

impl DriverCell {
    fn new(driver: impl Future<Output = ()> + Send + 'static) -> Self {
        Self(Arc::new(Mutex::new(Some(Box::pin(driver)))))
    }

    /// Poll the driver until it finishes or is taken away
    async fn run(self) {
        std::future::poll_fn(|cx| {
            let mut slot = self.0.lock();
            let Some(driver) = slot.as_mut() else {
                return Poll::Ready(());
            };
            let poll = driver.as_mut().poll(cx);
            if poll.is_ready() {
                *slot = None;
            }
            poll
        })
        .await;
    }

    fn take(&self) -> Option<DriverFuture> {
        self.0.lock().take()
    }
}

struct LiveHandle {
    shared: Arc<Shared>,
    driver: DriverCell,
    task: JoinHandle<()>,
}

/// Supervises one logical connection per activation
///
/// Supervisors share nothing; use one per consumer that needs its own
/// connection. Dropping a supervisor deactivates it.
pub struct ConnectionSupervisor<C: Connector + 'static> {
    connector: Arc<C>,
    endpoint: String,
    live: Option<LiveHandle>,
}

impl<C: Connector + 'static> ConnectionSupervisor<C> {
    /// Create a supervisor for `endpoint`
    pub fn new(connector: C, endpoint: impl Into<String>) -> Self {
        Self::from_arc(Arc::new(connector), endpoint)
    }

    /// Create a supervisor sharing an existing connector
    pub fn from_arc(connector: Arc<C>, endpoint: impl Into<String>) -> Self {
        Self {
            connector,
            endpoint: endpoint.into(),
            live: None,
        }
    }

    /// Server base URL
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The connector used for every handshake
    #[must_use]
    pub fn connector(&self) -> &Arc<C> {
        &self.connector
    }

    /// Id of the live handle, if any
    #[must_use]
    pub fn handle_id(&self) -> Option<HandleId> {
        self.live.as_ref().map(|live| live.shared.id())
    }

    /// Whether a handle exists and has not reached `Closed`
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.live.as_ref().is_some_and(|live| live.shared.is_live())
    }

    /// Start a connection
    ///
    /// Returns immediately with the handle in `Connecting`. If a handle is
    /// still live it is torn down first, as if `deactivate` had been called.
    ///
    /// # Errors
    ///
    /// - `SupervisorError::MissingCredential` if the provider has no non-blank
    ///   token; no transport attempt is made and no handle is created
    /// - `SupervisorError::InvalidPolicy` if the policy cannot drive a connection
    /// - `SupervisorError::NoRuntime` when called outside a Tokio runtime
    pub fn activate<P: CredentialProvider + ?Sized>(
        &mut self,
        provider: &P,
        policy: ConnectionPolicy,
    ) -> Result<ConnectionHandle, SupervisorError> {
        let Some(credential) = provider.get_token().filter(|token| !token.is_blank()) else {
            warn!(endpoint = %self.endpoint, "No authentication token available, not connecting");
            return Err(SupervisorError::MissingCredential);
        };
        policy.validate().map_err(SupervisorError::InvalidPolicy)?;
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| SupervisorError::NoRuntime)?;

        if self.live.is_some() {
            warn!("activate called while a connection is live; tearing it down first");
            self.deactivate();
        }

        let (shared, events) = Shared::new();
        info!(
            handle = %shared.id(),
            endpoint = %self.endpoint,
            transports = ?policy.transports,
            "Activating connection"
        );

        let driver = Driver {
            shared: Arc::clone(&shared),
            connector: Arc::clone(&self.connector),
            endpoint: self.endpoint.clone(),
            credential,
            policy,
        };
        let cell = DriverCell::new(driver.run());
        let task = runtime.spawn(cell.clone().run());

        self.live = Some(LiveHandle {
            shared: Arc::clone(&shared),
            driver: cell,
            task,
        });
        Ok(ConnectionHandle::new(shared, events))
    }

    /// Tear down the live handle, if any
    ///
    /// Idempotent. No event is delivered after the first call returns, and
    /// the link, any reconnection timer and any handshake in flight are
    /// released before it returns. Links send their close packet or frame on
    /// the way out, best effort.
    pub fn deactivate(&mut self) {
        let Some(live) = self.live.take() else {
            return;
        };
        if live.shared.deactivate() {
            info!(handle = %live.shared.id(), "Connection deactivated");
        }
        drop(live.driver.take());
        live.task.abort();
    }
}

impl<C: Connector + 'static> Drop for ConnectionSupervisor<C> {
    fn drop(&mut self) {
        self.deactivate();
    }
}

/// Why an open link stopped serving
enum LinkLoss {
    /// Peer sent `close` or ended the stream
    Closed(Option<String>),
    /// Transport error while sending or receiving
    Failed(TransportError),
    /// No inbound traffic within the ping timeout
    Silent(Duration),
    /// The handle was deactivated underneath us
    Cancelled,
}

/// Per-handle task running the state machine
struct Driver<C: Connector> {
    shared: Arc<Shared>,
    connector: Arc<C>,
    endpoint: String,
    credential: Credential,
    policy: ConnectionPolicy,
}

impl<C: Connector> Driver<C> {
    async fn run(self) {
        let mut retrying = false;

        loop {
            let Some(mut link) = self.establish(retrying).await else {
                return;
            };

            let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
            let identity = link.identity().to_string();
            let transport = link.kind();
            if !self.shared.enter_open(identity.clone(), transport, outbound_tx) {
                self.close_link(link.as_mut()).await;
                return;
            }
            info!(
                handle = %self.shared.id(),
                identity = %identity,
                transport = %transport,
                "Connection open"
            );

            let loss = self.serve(link.as_mut(), &mut outbound_rx).await;
            self.close_link(link.as_mut()).await;
            drop(link);

            match loss {
                LinkLoss::Cancelled => return,
                LinkLoss::Closed(reason) => warn!(
                    handle = %self.shared.id(),
                    reason = reason.as_deref().unwrap_or("none"),
                    "Peer closed the connection"
                ),
                LinkLoss::Failed(e) => warn!(handle = %self.shared.id(), error = %e, "Connection lost"),
                LinkLoss::Silent(after) => warn!(
                    handle = %self.shared.id(),
                    silence_ms = u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
                    "No traffic within ping timeout, treating as dropped"
                ),
            }

            if !self.policy.reconnection {
                self.shared.close(DisconnectReason::RemoteClosed, None);
                return;
            }
            if !self.shared.link_lost() {
                return;
            }
            retrying = true;
        }
    }

    /// Run handshake rounds until one yields a link
    ///
    /// Returns `None` once the handle has been closed (or deactivated).
    async fn establish(&self, mut retrying: bool) -> Option<Box<dyn Link>> {
        loop {
            if retrying {
                match self.shared.next_retry(&self.policy) {
                    Retry::Attempt { attempt, delay } => {
                        info!(
                            handle = %self.shared.id(),
                            attempt,
                            max = self.policy.max_reconnection_attempts,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            "Reconnecting"
                        );
                        // backoff between reconnection attempts
                        tokio::time::sleep(delay).await;
                    }
                    Retry::Exhausted(attempts) => {
                        error!(
                            handle = %self.shared.id(),
                            attempts,
                            "Reconnection attempts exhausted"
                        );
                        self.shared
                            .close(DisconnectReason::ReconnectExhausted, Some(attempts));
                        return None;
                    }
                    Retry::Cancelled => return None,
                }
            }

            match self.attempt_round().await {
                Ok(link) => return Some(link),
                Err(e) if e.is_auth_rejection() => {
                    warn!(handle = %self.shared.id(), error = %e, "Credential rejected, not retrying");
                    self.shared.close(DisconnectReason::AuthRejected, None);
                    return None;
                }
                Err(e) => {
                    warn!(handle = %self.shared.id(), error = %e, "All transports failed");
                    if !self.shared.report_connect_error(e.to_string()) {
                        return None;
                    }
                    if !self.policy.reconnection {
                        self.shared.close(DisconnectReason::ConnectFailed, None);
                        return None;
                    }
                    retrying = true;
                }
            }
        }
    }

    /// One handshake per transport, in preference order
    async fn attempt_round(&self) -> Result<Box<dyn Link>, TransportError> {
        let timeout = self.policy.handshake_timeout();
        let mut last_error = TransportError::ConnectionFailed("no transports configured".into());

        for &transport in &self.policy.transports {
            let request = HandshakeRequest {
                endpoint: self.endpoint.clone(),
                transport,
                credential: self.credential.clone(),
                policy: self.policy.clone(),
            };
            debug!(handle = %self.shared.id(), transport = %transport, "Attempting handshake");

            let result = match tokio::time::timeout(timeout, self.connector.connect(&request)).await
            {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(timeout)),
            };

            match result {
                Ok(link) => return Ok(link),
                Err(e) if e.is_auth_rejection() => return Err(e),
                Err(e) => {
                    debug!(
                        handle = %self.shared.id(),
                        transport = %transport,
                        error = %e,
                        "Transport failed"
                    );
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    /// Close a link, giving up after the handshake timeout
    async fn close_link(&self, link: &mut dyn Link) {
        let limit = self.policy.handshake_timeout();
        match tokio::time::timeout(limit, link.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(handle = %self.shared.id(), error = %e, "Link close failed"),
            Err(_) => debug!(
                handle = %self.shared.id(),
                timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                "Link close timed out"
            ),
        }
    }

    /// Send one packet within the link's silence budget
    ///
    /// The ping timeout if set, otherwise the handshake timeout. A send that
    /// cannot finish in time means the link is gone.
    async fn send_within(&self, link: &mut dyn Link, packet: Packet) -> Result<(), LinkLoss> {
        let limit = self
            .policy
            .ping_timeout()
            .unwrap_or_else(|| self.policy.handshake_timeout());
        match tokio::time::timeout(limit, link.send(packet)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(LinkLoss::Failed(e)),
            Err(_) => Err(LinkLoss::Failed(TransportError::Timeout(limit))),
        }
    }

    /// Pump an open link until it is lost
    async fn serve(
        &self,
        link: &mut dyn Link,
        outbound: &mut mpsc::UnboundedReceiver<Packet>,
    ) -> LinkLoss {
        let silence = self.policy.ping_timeout();
        let mut deadline = silence.map(|d| Instant::now() + d);

        loop {
            tokio::select! {
                inbound = link.recv() => {
                    if let Some(d) = silence {
                        deadline = Some(Instant::now() + d);
                    }
                    match inbound {
                        Ok(Some(Packet::Ping { seq })) => {
                            if let Err(loss) = self.send_within(link, Packet::Pong { seq }).await {
                                return loss;
                            }
                        }
                        Ok(Some(Packet::Message { event, payload })) => {
                            if !self.shared.deliver(ConnectionEvent::Message { event, payload }) {
                                return LinkLoss::Cancelled;
                            }
                        }
                        Ok(Some(Packet::Close { reason })) => return LinkLoss::Closed(reason),
                        Ok(Some(other)) => {
                            debug!(handle = %self.shared.id(), packet = other.name(), "Ignoring unexpected packet");
                        }
                        Ok(None) => return LinkLoss::Closed(None),
                        Err(e) => return LinkLoss::Failed(e),
                    }
                }
                Some(packet) = outbound.recv() => {
                    if let Err(loss) = self.send_within(link, packet).await {
                        return loss;
                    }
                }
                () = idle(deadline) => {
                    return LinkLoss::Silent(silence.unwrap_or_default());
                }
            }
        }
    }
}

/// Resolves at `deadline`, or never
async fn idle(deadline: Option<Instant>) {
    match deadline {
        // timer: ping timeout
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
