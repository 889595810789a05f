//! Error types used by the connection manager, the retry driver and node caches.
//!
//! - [`ErrorCode`] / [`ServerError`]: failures reported by the coordination service.
//! - [`ConnectionError`]: a session could not be established.
//! - [`CloseError`]: releasing a session was interrupted.
//! - [`ConfigError`]: invalid construction parameters.
//! - [`RetryError`]: outcome of a backoff loop that did not produce a result.
//! - [`DataError`]: what cache operations surface to callers.
//!
//! Most types provide `as_label` for logs/metrics. Server-side retryability is decided by
//! [`ErrorCode::is_retryable`] and nowhere else.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Boxed error returned by expiration handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Server-side result codes of the coordination service.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The connection to the ensemble was lost mid-operation.
    ConnectionLoss,
    /// The session backing the request has expired.
    SessionExpired,
    /// The session was moved to another server.
    SessionMoved,
    /// The operation did not complete in time.
    OperationTimeout,
    /// The node does not exist.
    NoNode,
    /// The node already exists.
    NodeExists,
    /// The node has children.
    NotEmpty,
    /// Version check failed.
    BadVersion,
    /// Not authorized for the operation.
    NoAuth,
    /// Invalid ACL supplied.
    InvalidAcl,
    /// Authentication failed.
    AuthFailed,
    /// Request could not be (un)marshalled.
    MarshallingError,
    /// Invalid arguments.
    BadArguments,
    RuntimeInconsistency,
    DataInconsistency,
    NoChildrenForEphemerals,
    InvalidCallback,
    Unimplemented,
    SystemError,
    ApiError,
}

impl ErrorCode {
    /// True if the failed operation can be repeated unchanged and may succeed.
    ///
    /// Only transport/session level conditions qualify; every structural or
    /// application error (bad version, no auth, node exists, ...) does not.
    ///
    /// # Example
    /// ```
    /// use keeperline::ErrorCode;
    ///
    /// assert!(ErrorCode::ConnectionLoss.is_retryable());
    /// assert!(!ErrorCode::BadVersion.is_retryable());
    /// ```
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCode::ConnectionLoss
                | ErrorCode::SessionExpired
                | ErrorCode::SessionMoved
                | ErrorCode::OperationTimeout
        )
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(self) -> &'static str {
        match self {
            ErrorCode::ConnectionLoss => "connection_loss",
            ErrorCode::SessionExpired => "session_expired",
            ErrorCode::SessionMoved => "session_moved",
            ErrorCode::OperationTimeout => "operation_timeout",
            ErrorCode::NoNode => "no_node",
            ErrorCode::NodeExists => "node_exists",
            ErrorCode::NotEmpty => "not_empty",
            ErrorCode::BadVersion => "bad_version",
            ErrorCode::NoAuth => "no_auth",
            ErrorCode::InvalidAcl => "invalid_acl",
            ErrorCode::AuthFailed => "auth_failed",
            ErrorCode::MarshallingError => "marshalling_error",
            ErrorCode::BadArguments => "bad_arguments",
            ErrorCode::RuntimeInconsistency => "runtime_inconsistency",
            ErrorCode::DataInconsistency => "data_inconsistency",
            ErrorCode::NoChildrenForEphemerals => "no_children_for_ephemerals",
            ErrorCode::InvalidCallback => "invalid_callback",
            ErrorCode::Unimplemented => "unimplemented",
            ErrorCode::SystemError => "system_error",
            ErrorCode::ApiError => "api_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// A failed request against the coordination service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("server error {code} on {path}")]
pub struct ServerError {
    /// Result code returned by the service.
    pub code: ErrorCode,
    /// Path the request targeted.
    pub path: String,
}

impl ServerError {
    pub fn new(code: ErrorCode, path: impl Into<String>) -> Self {
        Self {
            code,
            path: path.into(),
        }
    }

    /// See [`ErrorCode::is_retryable`].
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

/// A session with the ensemble could not be established.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// The transport to `servers` failed.
    #[error("failed to connect to {servers}: {reason}")]
    Transport {
        /// Connect string that was used.
        servers: String,
        /// Underlying failure message.
        reason: String,
    },

    /// The new session expired before it could be handed out.
    #[error("session of generation {generation} expired while connecting")]
    SessionExpired {
        /// Generation the session was established for.
        generation: u64,
    },

    /// The owning manager was destroyed; no new session will be created.
    #[error("connection manager destroyed")]
    Destroyed,
}

impl ConnectionError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConnectionError::Transport { .. } => "connection_transport",
            ConnectionError::SessionExpired { .. } => "connection_session_expired",
            ConnectionError::Destroyed => "connection_destroyed",
        }
    }
}

/// Releasing a session did not complete.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseError {
    #[error("interrupted while closing session")]
    Interrupted,
}

/// Invalid construction parameters.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Backoff bounds must satisfy `0 < initial < max`.
    #[error("invalid backoff bounds: initial={initial:?} max={max:?}")]
    InvalidBackoff { initial: Duration, max: Duration },

    /// The server connect string is blank.
    #[error("server list is empty")]
    EmptyServers,

    /// The session timeout is zero.
    #[error("session timeout must be positive")]
    ZeroSessionTimeout,

    /// The node path is blank.
    #[error("node path is empty")]
    EmptyPath,
}

/// A backoff loop ended without producing a result.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The strategy stopped before the work succeeded.
    #[error("backoff stopped without succeeding")]
    Exhausted,

    /// Cancellation was requested while waiting between attempts.
    #[error("cancelled while backing off")]
    Cancelled,

    /// The work reported a failure that must not be retried.
    #[error("stopped on non-retryable failure: {0}")]
    Stopped(E),
}

impl<E> RetryError<E> {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RetryError::Exhausted => "backoff_exhausted",
            RetryError::Cancelled => "backoff_cancelled",
            RetryError::Stopped(_) => "backoff_stopped",
        }
    }
}

/// The background job queue no longer accepts work.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("background queue closed: connection manager destroyed")]
pub struct Destroyed;

/// Node data could not be turned into a value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot deserialize node data: {reason}")]
pub struct DeserializeError {
    pub reason: String,
}

impl DeserializeError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by node caches.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum DataError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Deserialize(#[from] DeserializeError),

    /// The retry strategy gave up before the watch was armed.
    #[error("backoff exhausted before watch was established")]
    BackoffExhausted,

    /// Cancelled while backing off between attempts.
    #[error("cancelled while re-establishing watch")]
    Cancelled,

    /// The node or its manager has been destroyed.
    #[error("node cache destroyed")]
    Destroyed,

    /// A single non-retrying sync attempt failed; a background re-arm was scheduled.
    #[error("sync of {path} failed: {source}")]
    SyncFailed {
        path: String,
        #[source]
        source: Box<DataError>,
    },
}

impl DataError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            DataError::Connection(e) => e.as_label(),
            DataError::Server(e) => e.code.as_label(),
            DataError::Deserialize(_) => "deserialize",
            DataError::BackoffExhausted => "backoff_exhausted",
            DataError::Cancelled => "cancelled",
            DataError::Destroyed => "destroyed",
            DataError::SyncFailed { .. } => "sync_failed",
        }
    }

    /// True if repeating the operation may succeed.
    ///
    /// Transport failures, sessions expired while connecting and retryable
    /// server codes qualify.
    pub fn is_retryable(&self) -> bool {
        match self {
            DataError::Connection(
                ConnectionError::Transport { .. } | ConnectionError::SessionExpired { .. },
            ) => true,
            DataError::Server(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<RetryError<DataError>> for DataError {
    fn from(err: RetryError<DataError>) -> Self {
        match err {
            RetryError::Exhausted => DataError::BackoffExhausted,
            RetryError::Cancelled => DataError::Cancelled,
            RetryError::Stopped(e) => e,
        }
    }
}
