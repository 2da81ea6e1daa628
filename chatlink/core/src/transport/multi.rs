//! Transport dispatch by kind

use std::collections::HashMap;

use async_trait::async_trait;

use super::traits::{Connector, HandshakeRequest, Link, TransportError};
use crate::policy::TransportKind;

/// Routes each handshake to the connector registered for its transport kind
///
/// A kind without a connector fails with `TransportError::Unsupported`, which
/// the supervisor treats like any other transport failure and falls back.
#[derive(Default)]
pub struct MultiConnector {
    connectors: HashMap<TransportKind, Box<dyn Connector>>,
}

impl MultiConnector {
    /// No transports registered
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `connector` for `kind`, replacing any previous one
    #[must_use]
    pub fn with(mut self, kind: TransportKind, connector: impl Connector + 'static) -> Self {
        self.connectors.insert(kind, Box::new(connector));
        self
    }

    /// Every transport compiled into this build
    #[must_use]
    pub fn standard() -> Self {
        let multi = Self::new();
        #[cfg(feature = "websocket")]
        let multi = multi.with(
            TransportKind::WebSocket,
            super::websocket::WebSocketConnector::new(),
        );
        #[cfg(feature = "polling")]
        let multi = multi.with(
            TransportKind::Polling,
            super::polling::PollingConnector::new(),
        );
        multi
    }

    /// Whether `kind` has a connector
    #[must_use]
    pub fn supports(&self, kind: TransportKind) -> bool {
        self.connectors.contains_key(&kind)
    }
}

#[async_trait]
impl Connector for MultiConnector {
    async fn connect(&self, request: &HandshakeRequest) -> Result<Box<dyn Link>, TransportError> {
        match self.connectors.get(&request.transport) {
            Some(connector) => connector.connect(request).await,
            None => Err(TransportError::Unsupported(request.transport)),
        }
    }
}
