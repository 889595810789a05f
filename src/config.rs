//! # Connection configuration.
//!
//! Provides [`Config`] centralized settings for a [`ConnectionManager`](crate::ConnectionManager)
//! and the [`Credentials`] attached to every new session.
//!
//! Config is used in two ways:
//! 1. **Manager creation**: `ConnectionManager::new(config, connector)`
//! 2. **Retry defaults**: `config.backoff_helper()` for node caches created on that manager
//!
//! ## Defaults
//! - `session_timeout = 60s`
//! - `backoff_initial = 1s`, `backoff_max = 60s` (never stops)
//! - no credentials

use std::fmt;
use std::time::Duration;

use crate::core::BackoffHelper;
use crate::error::ConfigError;

/// Authentication info attached to a session right after it is established.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Auth scheme, e.g. `digest`.
    pub scheme: String,
    /// Scheme-specific token.
    pub token: Vec<u8>,
}

impl Credentials {
    pub fn new(scheme: impl Into<String>, token: impl Into<Vec<u8>>) -> Self {
        Self {
            scheme: scheme.into(),
            token: token.into(),
        }
    }

    /// `digest` credentials with a `user:password` token.
    pub fn digest(user: &str, password: &str) -> Self {
        Self::new("digest", format!("{user}:{password}").into_bytes())
    }

    /// True if the scheme is non-blank and a token is present.
    pub fn is_usable(&self) -> bool {
        !self.scheme.trim().is_empty() && !self.token.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("scheme", &self.scheme)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Settings for one connection manager.
///
/// ## Field semantics
/// - `servers`: connect string handed to the [`Connector`](crate::session::Connector)
/// - `session_timeout`: session timeout requested from the ensemble
/// - `credentials`: attached to each new session when [`Credentials::is_usable`]
/// - `backoff_initial` / `backoff_max`: bounds of the default retry strategy
#[derive(Clone, Debug)]
pub struct Config {
    pub servers: String,
    pub session_timeout: Duration,
    pub credentials: Option<Credentials>,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Config {
    /// Default configuration for the given connect string.
    pub fn new(servers: impl Into<String>) -> Self {
        Self {
            servers: servers.into(),
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.backoff_initial = initial;
        self.backoff_max = max;
        self
    }

    /// Checks every field; returns the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.servers.trim().is_empty() {
            return Err(ConfigError::EmptyServers);
        }
        if self.session_timeout.is_zero() {
            return Err(ConfigError::ZeroSessionTimeout);
        }
        self.backoff_helper().map(|_| ())
    }

    /// Credentials to attach, if any are configured and usable.
    #[inline]
    pub fn usable_credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref().filter(|c| c.is_usable())
    }

    /// Builds a never-stopping [`BackoffHelper`] from the configured bounds.
    pub fn backoff_helper(&self) -> Result<BackoffHelper, ConfigError> {
        BackoffHelper::with_bounds(self.backoff_initial, self.backoff_max)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `servers = "127.0.0.1:2181"`
    /// - `session_timeout = 60s`
    /// - `credentials = None`
    /// - `backoff_initial = 1s`, `backoff_max = 60s`
    fn default() -> Self {
        Self {
            servers: "127.0.0.1:2181".to_string(),
            session_timeout: Duration::from_secs(60),
            credentials: None,
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
        }
    }
}
