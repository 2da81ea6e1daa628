//! TOML Configuration File Support
//!
//! Centralized configuration loading for `chatlink`, with a TOML file at
//! `~/.config/chatlink/chatlink.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! - `$XDG_CONFIG_HOME/chatlink/chatlink.toml` (typically `~/.config/chatlink/chatlink.toml`)
//!
//! # Example Configuration
//!
//! ```toml
//! [connection]
//! url = "ws://localhost:5000"
//! token_file = "/run/user/1000/chatlink/auth.token"
//!
//! [policy]
//! transports = ["websocket", "polling"]
//! reconnection = true
//! max_reconnection_attempts = 5
//! reconnection_delay_ms = 1000
//! reconnection_delay_max_ms = 5000
//! randomization_factor = 0.5
//! handshake_timeout_ms = 20000
//! ping_timeout_ms = 45000
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::credential::{
    CredentialChain, EnvCredential, FileCredential, DEFAULT_TOKEN_ENV,
};
use crate::policy::{parse_transport_list, ConnectionPolicy, TransportKind};
use crate::transport::websocket_url;

/// Default server URL
pub const DEFAULT_URL: &str = "ws://localhost:5000";

/// Environment variables read by [`load_config`]
pub mod env {
    /// Server base URL
    pub const URL: &str = "CHATLINK_URL";
    /// Token file path
    pub const TOKEN_FILE: &str = "CHATLINK_TOKEN_FILE";
    /// Comma-separated transport list
    pub const TRANSPORTS: &str = "CHATLINK_TRANSPORTS";
    /// Reconnection switch: `true`/`false`, `1`/`0`, `yes`/`no` or `on`/`off`
    pub const RECONNECTION: &str = "CHATLINK_RECONNECTION";
    /// Reconnection budget
    pub const RECONNECT_ATTEMPTS: &str = "CHATLINK_RECONNECT_ATTEMPTS";
    /// Base retry delay in milliseconds
    pub const RECONNECT_DELAY: &str = "CHATLINK_RECONNECT_DELAY";
    /// Retry delay cap in milliseconds
    pub const RECONNECT_DELAY_MAX: &str = "CHATLINK_RECONNECT_DELAY_MAX";
    /// Handshake timeout in milliseconds
    pub const HANDSHAKE_TIMEOUT: &str = "CHATLINK_HANDSHAKE_TIMEOUT";
}

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Connection section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionToml {
    /// Server base URL
    pub url: Option<String>,

    /// Token file path
    pub token_file: Option<PathBuf>,

    /// Environment variable holding the token
    pub token_env: Option<String>,
}

/// Policy section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyToml {
    /// Transport names, most preferred first
    pub transports: Option<Vec<String>>,

    /// Whether to reconnect after an unexpected drop
    pub reconnection: Option<bool>,

    /// Reconnection budget
    pub max_reconnection_attempts: Option<u32>,

    /// Base retry delay in milliseconds
    pub reconnection_delay_ms: Option<u64>,

    /// Retry delay cap in milliseconds
    pub reconnection_delay_max_ms: Option<u64>,

    /// Retry jitter in `[0, 1]`
    pub randomization_factor: Option<f64>,

    /// Handshake timeout in milliseconds
    pub handshake_timeout_ms: Option<u64>,

    /// Inbound silence limit in milliseconds (0 = disabled)
    pub ping_timeout_ms: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatlinkToml {
    /// Connection configuration section
    pub connection: ConnectionToml,

    /// Policy configuration section
    pub policy: PolicyToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Effective configuration after layering every source
#[derive(Clone, Debug)]
pub struct ChatlinkConfig {
    /// Server base URL
    pub url: String,

    /// Token file; `None` means the default runtime path
    pub token_file: Option<PathBuf>,

    /// Environment variable holding the token
    pub token_env: String,

    /// Connection policy
    pub policy: ConnectionPolicy,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for ChatlinkConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            token_file: None,
            token_env: DEFAULT_TOKEN_ENV.to_string(),
            policy: ConnectionPolicy::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ChatlinkConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Check the configuration can drive a connection
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for a malformed URL or an
    /// unusable policy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        websocket_url(&self.url)
            .map_err(|e| ConfigError::ValidationError(format!("url: {e}")))?;
        self.policy
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("policy: {e}")))
    }

    /// Credential provider for this configuration
    ///
    /// Tries the configured token file, then the token environment variable,
    /// then the default token file.
    #[must_use]
    pub fn credential_provider(&self) -> CredentialChain {
        let mut chain = CredentialChain::new();
        if let Some(path) = &self.token_file {
            chain = chain.then(FileCredential::new(path));
        }
        chain = chain.then(EnvCredential::new(&self.token_env));
        if self.token_file.is_none() {
            if let Some(file) = FileCredential::with_default_path() {
                chain = chain.then(file);
            }
        }
        chain
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/chatlink/chatlink.toml` or
/// `~/.config/chatlink/chatlink.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("chatlink").join("chatlink.toml"))
}

/// Load configuration from all sources with proper priority
///
/// CLI arguments are not handled here; apply [`ConfigOverrides`] afterwards.
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if a
/// file or environment value is invalid. A missing config file is not an
/// error.
pub fn load_config() -> Result<ChatlinkConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path, reading the process environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ChatlinkConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with an explicit environment lookup
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_with_env<F>(path: Option<PathBuf>, lookup: F) -> Result<ChatlinkConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = ChatlinkConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ChatlinkToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, lookup)?;

    Ok(config)
}

fn parse_transports<S: AsRef<str>>(names: &[S]) -> Result<Vec<TransportKind>, ConfigError> {
    names
        .iter()
        .map(|name| {
            name.as_ref()
                .parse::<TransportKind>()
                .map_err(|e| ConfigError::ValidationError(e.to_string()))
        })
        .collect()
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ChatlinkConfig, toml: &ChatlinkToml) -> Result<(), ConfigError> {
    if let Some(ref url) = toml.connection.url {
        config.url.clone_from(url);
    }
    if let Some(ref path) = toml.connection.token_file {
        config.token_file = Some(path.clone());
    }
    if let Some(ref var) = toml.connection.token_env {
        config.token_env.clone_from(var);
    }

    let policy = &toml.policy;
    if let Some(ref names) = policy.transports {
        config.policy.transports = parse_transports(names)?;
    }
    if let Some(enabled) = policy.reconnection {
        config.policy.reconnection = enabled;
    }
    if let Some(attempts) = policy.max_reconnection_attempts {
        config.policy.max_reconnection_attempts = attempts;
    }
    if let Some(delay) = policy.reconnection_delay_ms {
        config.policy.reconnection_delay_ms = delay;
    }
    if let Some(delay) = policy.reconnection_delay_max_ms {
        config.policy.reconnection_delay_max_ms = delay;
    }
    if let Some(factor) = policy.randomization_factor {
        config.policy.randomization_factor = factor;
    }
    if let Some(timeout) = policy.handshake_timeout_ms {
        config.policy.handshake_timeout_ms = timeout;
    }
    if let Some(timeout) = policy.ping_timeout_ms {
        config.policy.ping_timeout_ms = timeout;
    }
    Ok(())
}

/// Apply environment variable overrides to the config
///
/// Unparseable numbers are ignored; unknown transport names and unrecognized
/// switches are an error.
fn apply_env_config<F>(config: &mut ChatlinkConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup(env::URL) {
        config.url = url;
        config.source = ConfigSource::Env;
    }
    if let Some(path) = lookup(env::TOKEN_FILE) {
        config.token_file = Some(PathBuf::from(path));
        config.source = ConfigSource::Env;
    }
    if let Some(list) = lookup(env::TRANSPORTS) {
        config.policy.transports = parse_transport_list(&list)
            .map_err(|e| ConfigError::ValidationError(format!("{}: {e}", env::TRANSPORTS)))?;
        config.source = ConfigSource::Env;
    }
    if let Some(enabled) = lookup(env::RECONNECTION) {
        config.policy.reconnection = parse_switch(&enabled).ok_or_else(|| {
            ConfigError::ValidationError(format!(
                "{}: expected true/false, 1/0, yes/no or on/off, got {enabled:?}",
                env::RECONNECTION
            ))
        })?;
        config.source = ConfigSource::Env;
    }
    if let Some(attempts) = lookup(env::RECONNECT_ATTEMPTS) {
        if let Ok(n) = attempts.parse::<u32>() {
            config.policy.max_reconnection_attempts = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(delay) = lookup(env::RECONNECT_DELAY) {
        if let Ok(ms) = delay.parse::<u64>() {
            config.policy.reconnection_delay_ms = ms;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(delay) = lookup(env::RECONNECT_DELAY_MAX) {
        if let Ok(ms) = delay.parse::<u64>() {
            config.policy.reconnection_delay_max_ms = ms;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(timeout) = lookup(env::HANDSHAKE_TIMEOUT) {
        if let Ok(ms) = timeout.parse::<u64>() {
            config.policy.handshake_timeout_ms = ms;
            config.source = ConfigSource::Env;
        }
    }
    Ok(())
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Server URL override
    pub url: Option<String>,

    /// Token file override
    pub token_file: Option<PathBuf>,

    /// Transport list override
    pub transports: Option<Vec<TransportKind>>,

    /// Reconnection enabled override
    pub reconnection: Option<bool>,

    /// Reconnection budget override
    pub max_reconnection_attempts: Option<u32>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set server URL override
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set token file override
    #[must_use]
    pub fn with_token_file(mut self, path: PathBuf) -> Self {
        self.token_file = Some(path);
        self
    }

    /// Set transport list override
    #[must_use]
    pub fn with_transports(mut self, transports: Vec<TransportKind>) -> Self {
        self.transports = Some(transports);
        self
    }

    /// Set reconnection enabled override
    #[must_use]
    pub fn with_reconnection(mut self, enabled: bool) -> Self {
        self.reconnection = Some(enabled);
        self
    }

    /// Set reconnection budget override
    #[must_use]
    pub fn with_max_reconnection_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnection_attempts = Some(attempts);
        self
    }

    fn is_empty(&self) -> bool {
        self.url.is_none()
            && self.token_file.is_none()
            && self.transports.is_none()
            && self.reconnection.is_none()
            && self.max_reconnection_attempts.is_none()
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut ChatlinkConfig) {
        if !self.is_empty() {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref url) = self.url {
            config.url.clone_from(url);
        }
        if let Some(ref path) = self.token_file {
            config.token_file = Some(path.clone());
        }
        if let Some(ref transports) = self.transports {
            config.policy.transports.clone_from(transports);
        }
        if let Some(enabled) = self.reconnection {
            config.policy.reconnection = enabled;
        }
        if let Some(attempts) = self.max_reconnection_attempts {
            config.policy.max_reconnection_attempts = attempts;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
