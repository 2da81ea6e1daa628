//! WebSocket Transport
//!
//! Persistent bidirectional stream transport. Each packet travels as one text
//! frame; the handshake packet is the first frame the client sends and the
//! server must answer with a `handshake_ack` frame.
//!
//! An HTTP 401/403 answer to the upgrade request is treated as an auth
//! rejection, same as a negative `handshake_ack`.

use std::time::Duration;

use async_trait::async_trait;
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::Message, Error as WsError},
    MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

use super::endpoint::websocket_url;
use super::traits::{Connector, HandshakeRequest, Link, TransportError};
use crate::policy::TransportKind;
use crate::protocol::{self, Packet};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// How long a dropped link may spend delivering its close frame
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Connector for the `websocket` transport kind
#[derive(Clone, Debug, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a connector
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, request: &HandshakeRequest) -> Result<Box<dyn Link>, TransportError> {
        let url = websocket_url(&request.endpoint)?;
        debug!(url = %url, "Connecting WebSocket");

        let (ws, _) = connect_async(url.as_str()).await.map_err(map_connect_error)?;
        let (mut sink, mut stream) = ws.split();

        let hello = protocol::encode(&request.packet())?;
        sink.send(Message::Text(hello))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        let reply = next_packet(&mut stream)
            .await?
            .ok_or_else(|| TransportError::ConnectionFailed("closed during handshake".into()))?;
        let identity = protocol::interpret_ack(reply)?;

        debug!(url = %url, identity = %identity, "WebSocket handshake accepted");
        Ok(Box::new(WebSocketLink {
            sink: Some(sink),
            stream,
            identity,
        }))
    }
}

fn map_connect_error(err: WsError) -> TransportError {
    match err {
        WsError::Http(response) if matches!(response.status().as_u16(), 401 | 403) => {
            let reason = response
                .body()
                .as_ref()
                .map(|body| String::from_utf8_lossy(body).into_owned())
                .filter(|body| !body.is_empty())
                .unwrap_or_else(|| response.status().to_string());
            TransportError::AuthRejected(reason)
        }
        other => TransportError::ConnectionFailed(format!("WebSocket connect failed: {other}")),
    }
}

/// Read frames until a packet arrives; `None` when the stream ends
async fn next_packet(stream: &mut WsStream) -> Result<Option<Packet>, TransportError> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return protocol::decode(text.as_bytes()).map(Some),
            Some(Ok(Message::Binary(data))) => return protocol::decode(&data).map(Some),
            Some(Ok(Message::Close(_))) | None => return Ok(None),
            // Ping/pong frames are answered by tungstenite itself
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
        }
    }
}

/// An authenticated WebSocket link
///
/// Dropping an unclosed link hands its write half to a short-lived task that
/// sends a close frame, bounded by [`CLOSE_GRACE`].
pub struct WebSocketLink {
    sink: Option<WsSink>,
    stream: WsStream,
    identity: String,
}

#[async_trait]
impl Link for WebSocketLink {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn identity(&self) -> &str {
        &self.identity
    }

    async fn send(&mut self, packet: Packet) -> Result<(), TransportError> {
        let text = protocol::encode(&packet)?;
        let sink = self.sink.as_mut().ok_or(TransportError::ConnectionClosed)?;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<Packet>, TransportError> {
        next_packet(&mut self.stream).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let Some(mut sink) = self.sink.take() else {
            return Ok(());
        };
        // The peer may already be gone; a failed close frame is not an error
        if let Err(e) = sink.send(Message::Close(None)).await {
            debug!(error = %e, "Close frame not delivered");
        }
        sink.close()
            .await
            .or_else(|e| match e {
                WsError::ConnectionClosed | WsError::AlreadyClosed => Ok(()),
                other => Err(TransportError::SendFailed(other.to_string())),
            })
    }
}

impl Drop for WebSocketLink {
    fn drop(&mut self) {
        let Some(mut sink) = self.sink.take() else {
            return;
        };
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let farewell = async {
                    sink.send(Message::Close(None)).await?;
                    sink.close().await
                };
                match tokio::time::timeout(CLOSE_GRACE, farewell).await {
                    Ok(Err(e)) => debug!(error = %e, "Close frame on drop not delivered"),
                    Err(_) => debug!("Close frame on drop timed out"),
                    Ok(Ok(())) => {}
                }
            });
        }
    }
}
