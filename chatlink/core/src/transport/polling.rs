//! HTTP Long-Polling Transport
//!
//! Fallback for networks where WebSocket upgrades are blocked.
//!
//! | Request                        | Purpose                                   |
//! |--------------------------------|-------------------------------------------|
//! | `POST {base}/poll/handshake`   | handshake packet in, `handshake_ack` out  |
//! | `GET {base}/poll/{sid}`        | held open by the server; JSON packet array |
//! | `POST {base}/poll/{sid}`       | one packet from client to server          |
//! | `DELETE {base}/poll/{sid}`     | end the session                           |
//!
//! `sid` is the `connection_id` from the ack. A background task keeps one
//! `GET` outstanding at all times and feeds the packets to [`PollingLink`].
//!
//! Every request is time-limited. The held `GET` gets [`POLL_TIMEOUT`], all
//! others [`REQUEST_TIMEOUT`]. A link dropped without `close` still ends the
//! session with a detached `DELETE`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::endpoint::polling_url;
use super::traits::{Connector, HandshakeRequest, Link, TransportError};
use crate::policy::TransportKind;
use crate::protocol::{self, Packet};

/// TCP connect limit for every request
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Limit for handshake, send and close requests
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Limit for the held `GET`; must exceed the server's poll hold time
pub const POLL_TIMEOUT: Duration = Duration::from_secs(60);

/// Connector for the `polling` transport kind
#[derive(Clone, Debug)]
pub struct PollingConnector {
    client: Client,
}

impl PollingConnector {
    /// Create a connector with a time-limited HTTP client
    #[must_use]
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build HTTP client, using defaults");
                Client::default()
            });
        Self { client }
    }

    /// Create a connector with a preconfigured HTTP client
    ///
    /// The held `GET` still uses [`POLL_TIMEOUT`]; other limits are the client's.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for PollingConnector {
    fn default() -> Self {
        Self::new()
    }
}

fn is_auth_status(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

#[async_trait]
impl Connector for PollingConnector {
    async fn connect(&self, request: &HandshakeRequest) -> Result<Box<dyn Link>, TransportError> {
        let base = polling_url(&request.endpoint)?;
        debug!(url = %base, "Starting polling handshake");

        let response = self
            .client
            .post(format!("{base}/handshake"))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(protocol::encode(&request.packet())?)
            .send()
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("Polling handshake failed: {e}")))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;

        if is_auth_status(status) {
            return Err(TransportError::AuthRejected(auth_reason(status, &body)));
        }
        if !status.is_success() {
            return Err(TransportError::ConnectionFailed(format!(
                "Polling handshake returned {status}"
            )));
        }

        let sid = protocol::interpret_ack(protocol::decode(&body)?)?;
        let session = format!("{base}/{sid}");
        debug!(session = %session, "Polling handshake accepted");

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let poller = tokio::spawn(poll_loop(self.client.clone(), session.clone(), inbound_tx));

        Ok(Box::new(PollingLink {
            client: self.client.clone(),
            session,
            identity: sid,
            inbound: inbound_rx,
            poller,
            closed: false,
        }))
    }
}

/// Reason text from a 401/403 response: an ack's reason, the raw body, or the status
fn auth_reason(status: StatusCode, body: &[u8]) -> String {
    match protocol::decode(body) {
        Ok(Packet::HandshakeAck {
            rejection_reason: Some(reason),
            ..
        }) => reason,
        _ => {
            let text = String::from_utf8_lossy(body).trim().to_string();
            if text.is_empty() {
                status.to_string()
            } else {
                text
            }
        }
    }
}

/// Keep one `GET` outstanding until the session ends
///
/// The sender is dropped on exit, which the link reports as a peer close.
async fn poll_loop(
    client: Client,
    session: String,
    inbound: mpsc::UnboundedSender<Result<Packet, TransportError>>,
) {
    loop {
        let response = match client.get(&session).timeout(POLL_TIMEOUT).send().await {
            Ok(response) => response,
            Err(e) => {
                let _ = inbound.send(Err(TransportError::ReceiveFailed(e.to_string())));
                return;
            }
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            debug!(session = %session, %status, "Polling session ended by server");
            return;
        }
        if !status.is_success() {
            let _ = inbound.send(Err(TransportError::ReceiveFailed(format!(
                "Poll returned {status}"
            ))));
            return;
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                let _ = inbound.send(Err(TransportError::ReceiveFailed(e.to_string())));
                return;
            }
        };
        if body.is_empty() || status == StatusCode::NO_CONTENT {
            continue;
        }

        let packets = match protocol::decode_batch(&body) {
            Ok(packets) => packets,
            Err(e) => {
                let _ = inbound.send(Err(e));
                return;
            }
        };
        for packet in packets {
            let closing = matches!(packet, Packet::Close { .. });
            if inbound.send(Ok(packet)).is_err() || closing {
                return;
            }
        }
    }
}

/// An authenticated long-polling session
pub struct PollingLink {
    client: Client,
    session: String,
    identity: String,
    inbound: mpsc::UnboundedReceiver<Result<Packet, TransportError>>,
    poller: JoinHandle<()>,
    closed: bool,
}

#[async_trait]
impl Link for PollingLink {
    fn kind(&self) -> TransportKind {
        TransportKind::Polling
    }

    fn identity(&self) -> &str {
        &self.identity
    }

    async fn send(&mut self, packet: Packet) -> Result<(), TransportError> {
        let response = self
            .client
            .post(&self.session)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(protocol::encode(&packet)?)
            .send()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::SendFailed(format!(
                "Server returned {}",
                response.status()
            )))
        }
    }

    async fn recv(&mut self) -> Result<Option<Packet>, TransportError> {
        self.inbound.recv().await.transpose()
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.poller.abort();
        self.closed = true;
        self.client
            .delete(&self.session)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

impl Drop for PollingLink {
    fn drop(&mut self) {
        self.poller.abort();
        if self.closed {
            return;
        }
        // Best effort: the request carries the client's own time limit
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let request = self.client.delete(&self.session);
            runtime.spawn(async move {
                if let Err(e) = request.send().await {
                    debug!(error = %e, "Session DELETE on drop failed");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::Credential;
    use crate::policy::ConnectionPolicy;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    struct Recorded {
        requests: Mutex<Vec<(String, String, Vec<u8>)>>,
        polls: AtomicUsize,
    }

    async fn read_request(stream: &mut TcpStream) -> (String, String, Vec<u8>) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let header_end = loop {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed mid-request");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let mut lines = head.lines();
        let mut request_line = lines.next().unwrap().split_whitespace();
        let method = request_line.next().unwrap().to_string();
        let path = request_line.next().unwrap().to_string();
        let length = lines
            .filter_map(|l| l.split_once(':'))
            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
            .map_or(0, |(_, v)| v.trim().parse::<usize>().unwrap());

        while buf.len() < header_end + length {
            let n = stream.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);
        }
        (method, path, buf[header_end..header_end + length].to_vec())
    }

    async fn respond(stream: &mut TcpStream, status: &str, body: &str) {
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.ok();
    }

    /// Tiny chat server: accepts token "good", hands out sid "sid-7"
    async fn serve(listener: TcpListener, recorded: Arc<Recorded>) {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            let recorded = Arc::clone(&recorded);
            tokio::spawn(async move {
                let (method, path, body) = read_request(&mut stream).await;
                recorded
                    .requests
                    .lock()
                    .push((method.clone(), path.clone(), body.clone()));

                match (method.as_str(), path.as_str()) {
                    ("POST", "/poll/handshake") => {
                        let accepted = matches!(
                            protocol::decode(&body).unwrap(),
                            Packet::Handshake { token, .. } if token.as_str() == "good"
                        );
                        if accepted {
                            let ack = json!({
                                "type": "handshake_ack", "accepted": true,
                                "connection_id": "sid-7", "protocol_version": 1
                            });
                            respond(&mut stream, "200 OK", &ack.to_string()).await;
                        } else {
                            let ack = json!({
                                "type": "handshake_ack", "accepted": false,
                                "rejection_reason": "Authentication error", "protocol_version": 1
                            });
                            respond(&mut stream, "401 Unauthorized", &ack.to_string()).await;
                        }
                    }
                    ("GET", "/poll/sid-7") => {
                        let batch = if recorded.polls.fetch_add(1, Ordering::SeqCst) == 0 {
                            json!([
                                {"type": "ping", "seq": 1},
                                {"type": "message", "event": "receive_message", "payload": {"content": "hi"}}
                            ])
                        } else {
                            json!([{"type": "close", "reason": "bye"}])
                        };
                        respond(&mut stream, "200 OK", &batch.to_string()).await;
                    }
                    ("POST" | "DELETE", "/poll/sid-7") => respond(&mut stream, "200 OK", "").await,
                    _ => respond(&mut stream, "404 Not Found", "").await,
                }
            });
        }
    }

    async fn start() -> (String, Arc<Recorded>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let recorded = Arc::new(Recorded {
            requests: Mutex::new(Vec::new()),
            polls: AtomicUsize::new(0),
        });
        tokio::spawn(serve(listener, Arc::clone(&recorded)));
        (format!("ws://{addr}"), recorded)
    }

    fn request(endpoint: String, token: &str) -> HandshakeRequest {
        HandshakeRequest {
            endpoint,
            transport: TransportKind::Polling,
            credential: Credential::new(token),
            policy: ConnectionPolicy::for_testing(),
        }
    }

    #[tokio::test]
    async fn test_polling_session() {
        let (endpoint, recorded) = start().await;

        let mut link = PollingConnector::new()
            .connect(&request(endpoint, "good"))
            .await
            .unwrap();
        assert_eq!(link.identity(), "sid-7");
        assert_eq!(link.kind(), TransportKind::Polling);

        assert_eq!(link.recv().await.unwrap(), Some(Packet::Ping { seq: 1 }));
        assert_eq!(
            link.recv().await.unwrap(),
            Some(Packet::message("receive_message", json!({"content": "hi"})))
        );

        link.send(Packet::Pong { seq: 1 }).await.unwrap();

        assert_eq!(
            link.recv().await.unwrap(),
            Some(Packet::Close {
                reason: Some("bye".into())
            })
        );
        assert_eq!(link.recv().await.unwrap(), None);
        link.close().await.unwrap();

        let requests = recorded.requests.lock();
        let pong = requests
            .iter()
            .find(|(m, p, _)| m == "POST" && p == "/poll/sid-7")
            .unwrap();
        assert_eq!(protocol::decode(&pong.2).unwrap(), Packet::Pong { seq: 1 });
        assert!(requests.iter().any(|(m, _, _)| m == "DELETE"));
    }

    #[tokio::test]
    async fn test_dropped_link_ends_session() {
        let (endpoint, recorded) = start().await;

        let link = PollingConnector::new()
            .connect(&request(endpoint, "good"))
            .await
            .unwrap();
        drop(link);

        let deleted = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let done = recorded
                    .requests
                    .lock()
                    .iter()
                    .any(|(m, p, _)| m == "DELETE" && p == "/poll/sid-7");
                if done {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(deleted.is_ok(), "no DELETE after dropping the link");
    }

    #[tokio::test]
    async fn test_polling_auth_rejected() {
        let (endpoint, _recorded) = start().await;

        let result = PollingConnector::new()
            .connect(&request(endpoint, "bad"))
            .await;
        match result {
            Err(TransportError::AuthRejected(reason)) => assert_eq!(reason, "Authentication error"),
            Err(other) => panic!("expected auth rejection, got {other}"),
            Ok(_) => panic!("expected auth rejection, got a link"),
        }
    }

    #[test]
    fn test_auth_reason_fallbacks() {
        assert_eq!(auth_reason(StatusCode::FORBIDDEN, b""), "403 Forbidden");
        assert_eq!(auth_reason(StatusCode::UNAUTHORIZED, b"token expired\n"), "token expired");
    }
}
