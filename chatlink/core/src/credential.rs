//! Credentials and Credential Providers
//!
//! A [`Credential`] is an opaque bearer token presented during the handshake.
//! The supervisor only ever *reads* credentials: providers own them, and a
//! handle keeps its own copy for its whole life span. Token refresh is the
//! provider's business.
//!
//! # Providers
//!
//! - [`StaticCredential`]: a fixed token (or a fixed absence of one)
//! - [`EnvCredential`]: reads an environment variable on every call
//! - [`FileCredential`]: reads a token file on every call, typically
//!   `$XDG_RUNTIME_DIR/chatlink/auth.token`
//! - [`CredentialChain`]: first non-blank token from a list of providers
//!
//! # Usage
//!
//! ```
//! use chatlink_core::credential::{CredentialProvider, StaticCredential};
//!
//! let provider = StaticCredential::new("s3cr3t");
//! assert_eq!(provider.get_token().unwrap().as_str(), "s3cr3t");
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Token file name within the runtime directory
pub const TOKEN_FILENAME: &str = "auth.token";

/// Runtime directory name
pub const RUNTIME_DIR_NAME: &str = "chatlink";

/// Environment variable read by [`EnvCredential::default`]
pub const DEFAULT_TOKEN_ENV: &str = "CHATLINK_TOKEN";

/// Opaque bearer token
///
/// `Debug` never prints the token itself. Serializes as the bare token string.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// Wrap a raw token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Borrow the raw token for the handshake payload
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the token is empty or whitespace only
    ///
    /// A blank token is treated exactly like an absent one.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&"<redacted>").finish()
    }
}

impl From<String> for Credential {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for Credential {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

/// Source of the current authentication token
///
/// `get_token` is synchronous and must be free of side effects observable by
/// the supervisor.
pub trait CredentialProvider: Send + Sync {
    /// Return the current token, or `None` if the user is not signed in
    fn get_token(&self) -> Option<Credential>;
}

impl<P: CredentialProvider + ?Sized> CredentialProvider for &P {
    fn get_token(&self) -> Option<Credential> {
        (**self).get_token()
    }
}

impl<P: CredentialProvider + ?Sized> CredentialProvider for Box<P> {
    fn get_token(&self) -> Option<Credential> {
        (**self).get_token()
    }
}

impl<P: CredentialProvider + ?Sized> CredentialProvider for std::sync::Arc<P> {
    fn get_token(&self) -> Option<Credential> {
        (**self).get_token()
    }
}

/// A fixed token
#[derive(Clone, Debug, Default)]
pub struct StaticCredential {
    token: Option<Credential>,
}

impl StaticCredential {
    /// Provider that always returns `token`
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(Credential::new(token)),
        }
    }

    /// Provider that never has a token
    #[must_use]
    pub fn absent() -> Self {
        Self { token: None }
    }
}

impl CredentialProvider for StaticCredential {
    fn get_token(&self) -> Option<Credential> {
        self.token.clone()
    }
}

/// Reads the token from an environment variable
#[derive(Clone, Debug)]
pub struct EnvCredential {
    var: String,
}

impl EnvCredential {
    /// Provider reading `var`
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    /// Name of the variable being read
    #[must_use]
    pub fn var(&self) -> &str {
        &self.var
    }
}

impl Default for EnvCredential {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_ENV)
    }
}

impl CredentialProvider for EnvCredential {
    fn get_token(&self) -> Option<Credential> {
        std::env::var(&self.var).ok().map(Credential::from)
    }
}

/// Reads the token from a file
///
/// The file is re-read on every call so a sign-in that happens between two
/// activations is picked up. Surrounding whitespace is trimmed.
#[derive(Clone, Debug)]
pub struct FileCredential {
    path: PathBuf,
}

impl FileCredential {
    /// Provider reading `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Provider reading the default token file, if a runtime directory exists
    #[must_use]
    pub fn with_default_path() -> Option<Self> {
        default_token_path().map(Self::new)
    }

    /// The token file location
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialProvider for FileCredential {
    fn get_token(&self) -> Option<Credential> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let token = contents.trim();
                if token.is_empty() {
                    tracing::debug!(path = %self.path.display(), "Token file is empty");
                    None
                } else {
                    Some(Credential::new(token))
                }
            }
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "Token file not readable");
                None
            }
        }
    }
}

/// Tries several providers in order and returns the first non-blank token
#[derive(Default)]
pub struct CredentialChain {
    providers: Vec<Box<dyn CredentialProvider>>,
}

impl CredentialChain {
    /// Empty chain (always absent)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider with lower priority than the ones already added
    #[must_use]
    pub fn then(mut self, provider: impl CredentialProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// Number of providers in the chain
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the chain has no providers
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl CredentialProvider for CredentialChain {
    fn get_token(&self) -> Option<Credential> {
        self.providers
            .iter()
            .filter_map(|p| p.get_token())
            .find(|token| !token.is_blank())
    }
}

/// Default token file path
///
/// `$XDG_RUNTIME_DIR/chatlink/auth.token`, falling back to the user cache
/// directory on platforms without a runtime directory.
#[must_use]
pub fn default_token_path() -> Option<PathBuf> {
    dirs::runtime_dir()
        .or_else(dirs::cache_dir)
        .map(|dir| dir.join(RUNTIME_DIR_NAME).join(TOKEN_FILENAME))
}
