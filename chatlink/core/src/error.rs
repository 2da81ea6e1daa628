//! Supervisor errors

use thiserror::Error;

use crate::transport::TransportError;

/// Errors surfaced synchronously by the supervisor and its handles
///
/// Everything that happens after `activate` returns is reported as a
/// [`ConnectionEvent`](crate::events::ConnectionEvent) instead.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// No usable token at activation time; nothing was attempted
    #[error("No authentication token available")]
    MissingCredential,

    /// The connection policy cannot drive a connection
    #[error("Invalid connection policy: {0}")]
    InvalidPolicy(String),

    /// The handle is not `Open`
    #[error("Not connected")]
    NotConnected,

    /// `activate` was called outside a Tokio runtime
    #[error("No Tokio runtime available to drive the connection")]
    NoRuntime,

    /// The packet could not be handed to the transport (e.g. too large)
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            SupervisorError::MissingCredential.to_string(),
            "No authentication token available"
        );
        assert_eq!(
            SupervisorError::InvalidPolicy("transport list is empty".into()).to_string(),
            "Invalid connection policy: transport list is empty"
        );

        let err: SupervisorError = TransportError::ConnectionClosed.into();
        assert_eq!(err.to_string(), "Connection closed");
    }
}
