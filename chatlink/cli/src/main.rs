//! chatlink
//!
//! Headless chat connection client. Activates one supervised connection
//! against a chat server, logs every connection event, optionally joins
//! conversations once connected, and tears the connection down on Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! # Token from $CHATLINK_TOKEN or $XDG_RUNTIME_DIR/chatlink/auth.token
//! chatlink --url ws://localhost:5000
//!
//! # Join two conversations after every (re)connect
//! chatlink --join 64f1c0 --join 64f1c1
//!
//! # Polling only, no reconnection, verbose logging
//! RUST_LOG=debug chatlink --transports polling --no-reconnect
//! ```
//!
//! # Environment Variables
//!
//! - `CHATLINK_CONFIG`: Configuration file path
//! - `CHATLINK_TOKEN`: Bearer token
//! - `CHATLINK_URL`, `CHATLINK_TOKEN_FILE`, `CHATLINK_TRANSPORTS`,
//!   `CHATLINK_RECONNECTION`, `CHATLINK_RECONNECT_ATTEMPTS`: see `chatlink_core::config`
//! - `RUST_LOG`: Log filter (overrides `--log-level`)
//!
//! # Exit Status
//!
//! Zero when the connection was closed by Ctrl+C, non-zero when it closed for
//! any other reason or could not be activated.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::json;
use tokio::signal;
use tracing::{error, info, warn};

use chatlink_core::{
    config::{load_config, load_config_from_path, ConfigOverrides},
    dispatch,
    policy::parse_transport_list,
    ConnectionEvent, ConnectionEvents, ConnectionSupervisor, DisconnectReason, MultiConnector,
    SupervisorError, TransportKind,
};

/// chatlink - authenticated real-time chat connection client
#[derive(Parser, Debug)]
#[command(name = "chatlink")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Chat server base URL
    #[arg(short = 'u', long, value_name = "URL")]
    url: Option<String>,

    /// File holding the bearer token
    #[arg(short = 't', long, value_name = "FILE")]
    token_file: Option<PathBuf>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "CHATLINK_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Transports to try, most preferred first (e.g. "websocket,polling")
    #[arg(long, value_name = "LIST")]
    transports: Option<String>,

    /// Do not reconnect after an unexpected drop
    #[arg(long)]
    no_reconnect: bool,

    /// Maximum reconnection attempts
    #[arg(short = 'a', long, value_name = "N")]
    attempts: Option<u32>,

    /// Conversation to join once connected (repeatable)
    #[arg(short = 'j', long = "join", value_name = "CONVERSATION")]
    join: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "CHATLINK_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    /// CLI values that override file and environment configuration
    fn overrides(&self) -> Result<ConfigOverrides> {
        let mut overrides = ConfigOverrides::new();
        if let Some(url) = &self.url {
            overrides = overrides.with_url(url.clone());
        }
        if let Some(path) = &self.token_file {
            overrides = overrides.with_token_file(path.clone());
        }
        if let Some(list) = &self.transports {
            let transports = parse_transport_list(list).context("Invalid --transports")?;
            overrides = overrides.with_transports(transports);
        }
        if self.no_reconnect {
            overrides = overrides.with_reconnection(false);
        }
        if let Some(attempts) = self.attempts {
            overrides = overrides.with_max_reconnection_attempts(attempts);
        }
        Ok(overrides)
    }
}

/// Logs every connection event
#[derive(Default)]
struct EventLog {
    closed: Option<DisconnectReason>,
}

impl ConnectionEvents for EventLog {
    fn on_connected(&mut self, identity: &str, transport: TransportKind) {
        info!(identity, %transport, "Connected");
    }

    fn on_connect_error(&mut self, message: &str) {
        warn!(error = message, "Connect error");
    }

    fn on_reconnecting(&mut self, attempt: u32, delay: Duration) {
        info!(
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Reconnecting"
        );
    }

    fn on_reconnect_failed(&mut self, attempts: u32) {
        error!(attempts, "Reconnection failed");
    }

    fn on_message(&mut self, event: &str, payload: &serde_json::Value) {
        info!(event, %payload, "Message");
    }

    fn on_disconnected(&mut self, reason: DisconnectReason) {
        info!(%reason, "Disconnected");
        self.closed = Some(reason);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("chatlink={}", args.log_level).parse()?)
                .add_directive(format!("chatlink_core={}", args.log_level).parse()?),
        )
        .with_target(true)
        .init();

    let mut config = match &args.config {
        Some(path) => load_config_from_path(Some(path.clone())),
        None => load_config(),
    }
    .context("Failed to load configuration")?;
    args.overrides()?.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(
        url = %config.url,
        source = %config.source(),
        transports = ?config.policy.transports,
        reconnection = config.policy.reconnection,
        attempts = config.policy.max_reconnection_attempts,
        "Starting chatlink"
    );

    let provider = config.credential_provider();
    let mut supervisor = ConnectionSupervisor::new(MultiConnector::standard(), config.url.clone());
    let mut handle = match supervisor.activate(&provider, config.policy.clone()) {
        Ok(handle) => handle,
        Err(SupervisorError::MissingCredential) => bail!(
            "No authentication token: set {} or write the token to {}",
            config.token_env,
            config
                .token_file
                .clone()
                .or_else(chatlink_core::credential::default_token_path)
                .map_or_else(|| "a token file".to_string(), |p| p.display().to_string())
        ),
        Err(e) => return Err(e).context("Failed to activate connection"),
    };

    let mut log = EventLog::default();
    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = handle.recv_event() => {
                let Some(event) = event else { break };
                dispatch(&mut log, &event);
                if matches!(event, ConnectionEvent::Connected { .. }) {
                    for conversation in &args.join {
                        if let Err(e) = handle.emit("join_conversation", json!(conversation)) {
                            warn!(conversation = %conversation, error = %e, "Failed to join conversation");
                        }
                    }
                }
            }
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                }
                info!("Shutting down");
                supervisor.deactivate();
                while let Some(event) = handle.try_recv_event() {
                    dispatch(&mut log, &event);
                }
                break;
            }
        }
    }

    match log.closed {
        Some(DisconnectReason::UserInitiated) | None => Ok(()),
        Some(reason) => bail!("Connection closed: {reason}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatlink_core::config::ChatlinkConfig;

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "chatlink",
            "--url",
            "ws://chat:5000",
            "--transports",
            "poll,ws",
            "--no-reconnect",
            "-a",
            "2",
            "--join",
            "c1",
            "--join",
            "c2",
        ])
        .unwrap();

        assert_eq!(args.url.as_deref(), Some("ws://chat:5000"));
        assert!(args.no_reconnect);
        assert_eq!(args.join, vec!["c1", "c2"]);

        let mut config = ChatlinkConfig::default();
        args.overrides().unwrap().apply(&mut config);
        assert_eq!(config.url, "ws://chat:5000");
        assert_eq!(
            config.policy.transports,
            vec![TransportKind::Polling, TransportKind::WebSocket]
        );
        assert!(!config.policy.reconnection);
        assert_eq!(config.policy.max_reconnection_attempts, 2);
    }

    #[test]
    fn test_bad_transport_list() {
        let args = Args::try_parse_from(["chatlink", "--transports", "ws,fax"]).unwrap();
        assert!(args.overrides().is_err());
    }

    #[test]
    fn test_no_flags_no_overrides() {
        let args = Args::try_parse_from(["chatlink"]).unwrap();
        let mut config = ChatlinkConfig::default();
        args.overrides().unwrap().apply(&mut config);
        assert_eq!(config.source(), chatlink_core::ConfigSource::Default);
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatlink.toml");
        std::fs::write(
            &path,
            r#"
[connection]
url = "ws://from-file:5000"

[policy]
transports = ["polling"]
max_reconnection_attempts = 9
"#,
        )
        .unwrap();

        let args = Args::try_parse_from([
            "chatlink",
            "--config",
            path.to_str().unwrap(),
            "--attempts",
            "1",
        ])
        .unwrap();
        let mut config =
            chatlink_core::config::load_config_with_env(args.config.clone(), |_| None).unwrap();
        assert_eq!(config.source(), chatlink_core::ConfigSource::File);

        args.overrides().unwrap().apply(&mut config);
        assert_eq!(config.url, "ws://from-file:5000");
        assert_eq!(config.policy.transports, vec![TransportKind::Polling]);
        assert_eq!(config.policy.max_reconnection_attempts, 1);
        assert_eq!(config.source(), chatlink_core::ConfigSource::Cli);
    }

    #[test]
    fn test_event_log_records_reason() {
        let mut log = EventLog::default();
        dispatch(
            &mut log,
            &ConnectionEvent::Disconnected {
                reason: DisconnectReason::AuthRejected,
            },
        );
        assert_eq!(log.closed, Some(DisconnectReason::AuthRejected));
    }
}
