//! Typed errors for the tunnel and session boundaries.
//!
//! Two layers of errors exist:
//!
//! 1. [`TunnelError`] is produced by the Tunnel Manager. SSH library failures
//!    arrive as plain messages and are classified into authentication or
//!    network failures by [`classify_ssh_error`].
//!
//! 2. [`SessionError`] is what every tool call ultimately returns. Tunnel
//!    failures are wrapped in [`SessionError::Tunnel`], driver failures are
//!    mapped by the database layer. Each variant carries a stable
//!    [`SessionError::kind`] that is part of the tool contract.
//!
//! # Classification Strategy
//!
//! SSH errors are matched case-insensitively against known authentication
//! phrases. Authentication patterns take precedence: a message that mentions
//! both a timeout and a rejected password is an authentication failure.
//! Everything else is treated as a network failure.

use std::time::Duration;

use thiserror::Error;

/// Authentication error patterns reported by the SSH layer.
const AUTH_ERRORS: &[&str] = &[
    "authentication failed",
    "password authentication failed",
    "key authentication failed",
    "authentication rejected",
    "permission denied",
    "publickey",
    "auth fail",
    "no authentication",
    "all authentication methods failed",
    "failed to load private key",
];

/// Failures at the Tunnel Manager boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TunnelError {
    /// The bastion rejected the supplied credentials.
    #[error("bastion rejected the SSH credentials: {0}")]
    Authentication(String),

    /// The bastion could not be reached, or the handshake did not finish in time.
    #[error("bastion unreachable: {0}")]
    Network(String),

    /// No local port could be bound for the forward.
    #[error("failed to bind local forward port {port}: {reason}")]
    PortBind { port: u16, reason: String },

    /// The forward stopped serving traffic after it was established.
    #[error("SSH tunnel is no longer alive")]
    Lost,
}

impl TunnelError {
    /// Stable error kind exposed to tool callers.
    pub fn kind(&self) -> &'static str {
        match self {
            TunnelError::Authentication(_) => "AuthenticationError",
            TunnelError::Network(_) => "NetworkError",
            TunnelError::PortBind { .. } => "PortBindError",
            TunnelError::Lost => "TunnelLost",
        }
    }
}

/// Failures at the Session Manager boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("tunnel failure ({}): {0}", .0.kind())]
    Tunnel(#[from] TunnelError),

    #[error("database authentication failed: {0}")]
    DatabaseAuth(String),

    #[error("database unreachable through tunnel: {0}")]
    Network(String),

    #[error("not connected; call connect first")]
    NotConnected,

    #[error("database '{0}' does not exist")]
    DatabaseNotFound(String),

    #[error("collection '{collection}' does not exist in database '{database}'")]
    CollectionNotFound { database: String, collection: String },

    #[error("invalid query: {0}")]
    Query(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("database error: {0}")]
    Database(String),
}

impl SessionError {
    /// Stable error kind exposed to tool callers.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Tunnel(_) => "TunnelError",
            SessionError::DatabaseAuth(_) => "DatabaseAuthError",
            SessionError::Network(_) => "NetworkError",
            SessionError::NotConnected => "NotConnectedError",
            SessionError::DatabaseNotFound(_) => "DatabaseNotFoundError",
            SessionError::CollectionNotFound { .. } => "CollectionNotFoundError",
            SessionError::Query(_) => "QueryError",
            SessionError::InvalidArgument(_) => "ValidationError",
            SessionError::Timeout { .. } => "TimeoutError",
            SessionError::Configuration(_) => "ConfigurationError",
            SessionError::Database(_) => "DatabaseError",
        }
    }

    /// Render the error as the string returned by a failed tool call.
    pub fn to_tool_message(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}

/// Classify an SSH-layer error message into a [`TunnelError`].
///
/// # Examples
///
/// ```rust,ignore
/// assert!(matches!(classify_ssh_error("Permission denied"), TunnelError::Authentication(_)));
/// assert!(matches!(classify_ssh_error("Connection refused"), TunnelError::Network(_)));
/// ```
pub(crate) fn classify_ssh_error(message: impl Into<String>) -> TunnelError {
    let message = message.into();
    if is_auth_error(&message) {
        TunnelError::Authentication(message)
    } else {
        TunnelError::Network(message)
    }
}

fn is_auth_error(error: &str) -> bool {
    let error_lower = error.to_lowercase();
    AUTH_ERRORS.iter().any(|pattern| error_lower.contains(pattern))
}
