//! Endpoint URL mapping
//!
//! One configured base URL serves every transport:
//!
//! | Transport | URL                                  |
//! |-----------|--------------------------------------|
//! | websocket | `ws(s)://host[:port][/base]/ws`      |
//! | polling   | `http(s)://host[:port][/base]/poll`  |
//!
//! The base may be given with either a `ws` or an `http` scheme.

use super::TransportError;

/// Path segment of the WebSocket endpoint
pub const WEBSOCKET_PATH: &str = "ws";

/// Path segment of the long-polling endpoint
pub const POLLING_PATH: &str = "poll";

/// Split `endpoint` into `(secure, rest)` where `rest` has no scheme and no
/// trailing slash
fn split_scheme(endpoint: &str) -> Result<(bool, &str), TransportError> {
    let endpoint = endpoint.trim().trim_end_matches('/');
    let (scheme, rest) = endpoint.split_once("://").ok_or_else(|| {
        TransportError::ConnectionFailed(format!("endpoint has no scheme: {endpoint}"))
    })?;

    let secure = match scheme.to_ascii_lowercase().as_str() {
        "ws" | "http" => false,
        "wss" | "https" => true,
        other => {
            return Err(TransportError::ConnectionFailed(format!(
                "unsupported endpoint scheme: {other}"
            )))
        }
    };

    if rest.is_empty() {
        return Err(TransportError::ConnectionFailed(format!(
            "endpoint has no host: {endpoint}"
        )));
    }

    Ok((secure, rest))
}

/// URL of the WebSocket endpoint
///
/// # Errors
///
/// Returns `TransportError::ConnectionFailed` for malformed endpoints.
pub fn websocket_url(endpoint: &str) -> Result<String, TransportError> {
    let (secure, rest) = split_scheme(endpoint)?;
    let scheme = if secure { "wss" } else { "ws" };
    Ok(format!("{scheme}://{rest}/{WEBSOCKET_PATH}"))
}

/// Base URL of the long-polling endpoint
///
/// # Errors
///
/// Returns `TransportError::ConnectionFailed` for malformed endpoints.
pub fn polling_url(endpoint: &str) -> Result<String, TransportError> {
    let (secure, rest) = split_scheme(endpoint)?;
    let scheme = if secure { "https" } else { "http" };
    Ok(format!("{scheme}://{rest}/{POLLING_PATH}"))
}
