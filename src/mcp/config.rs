//! Configuration resolution for the MongoDB tunnel server.
//!
//! Every setting comes from the process environment (or `.env`) and falls
//! back to a built-in default. Malformed numeric values in the environment are ignored and the default
//! is used instead.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SSH_HOST` | required | Bastion host |
//! | `SSH_PORT` | 22 | Bastion port |
//! | `SSH_CONNECT_TIMEOUT` | 30s | Bastion connect/handshake/auth timeout |
//! | `SSH_COMPRESSION` | true | Offer zlib compression |
//! | `LOCAL_BIND_PORT` | 0 | Local forward port (0 = ephemeral) |
//! | `MONGODB_HOST` | required | Database host as seen from the bastion |
//! | `MONGODB_PORT` | 27017 | Database port |
//! | `MONGODB_AUTH_DB` | admin | Authentication database |
//! | `REPLICA_SET` | unset | Replica set name handed to the driver |
//! | `CONNECTION_TIMEOUT_MS` | 10000 | Driver connect timeout |
//! | `SERVER_SELECTION_TIMEOUT_MS` | 10000 | Driver server selection timeout |
//! | `MAX_POOL_SIZE` | 5 | Driver connection pool size |
//! | `QUERY_TIMEOUT_SECS` | 30 | Timeout applied to every query |
//! | `MAX_QUERY_LIMIT` | 100 | Largest accepted `limit` |
//! | `DEFAULT_QUERY_LIMIT` | 10 | `limit` used when the caller omits it |

use std::env;
use std::time::Duration;

use crate::mcp::error::SessionError;
use crate::mcp::secrets::{DatabaseCredentials, SshCredentials, load_credentials};

/// Default bastion SSH port
pub(crate) const DEFAULT_SSH_PORT: u16 = 22;

/// Default MongoDB port
pub(crate) const DEFAULT_MONGODB_PORT: u16 = 27017;

/// Default SSH connect timeout in seconds
pub(crate) const DEFAULT_SSH_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default driver connect timeout in milliseconds
pub(crate) const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 10_000;

/// Default driver server selection timeout in milliseconds
pub(crate) const DEFAULT_SERVER_SELECTION_TIMEOUT_MS: u64 = 10_000;

/// Default driver pool size
pub(crate) const DEFAULT_MAX_POOL_SIZE: u32 = 5;

/// Default per-query timeout in seconds
pub(crate) const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

/// Default upper bound for result sets
pub(crate) const DEFAULT_MAX_QUERY_LIMIT: u32 = 100;

/// Default result set size when the caller gives no limit
pub(crate) const DEFAULT_QUERY_LIMIT: u32 = 10;

/// Default authentication database
pub(crate) const DEFAULT_AUTH_DB: &str = "admin";

pub(crate) const SSH_HOST_ENV_VAR: &str = "SSH_HOST";
pub(crate) const SSH_PORT_ENV_VAR: &str = "SSH_PORT";
pub(crate) const SSH_CONNECT_TIMEOUT_ENV_VAR: &str = "SSH_CONNECT_TIMEOUT";
pub(crate) const COMPRESSION_ENV_VAR: &str = "SSH_COMPRESSION";
pub(crate) const LOCAL_BIND_PORT_ENV_VAR: &str = "LOCAL_BIND_PORT";
pub(crate) const MONGODB_HOST_ENV_VAR: &str = "MONGODB_HOST";
pub(crate) const MONGODB_PORT_ENV_VAR: &str = "MONGODB_PORT";
pub(crate) const MONGODB_AUTH_DB_ENV_VAR: &str = "MONGODB_AUTH_DB";
pub(crate) const REPLICA_SET_ENV_VAR: &str = "REPLICA_SET";
pub(crate) const CONNECTION_TIMEOUT_MS_ENV_VAR: &str = "CONNECTION_TIMEOUT_MS";
pub(crate) const SERVER_SELECTION_TIMEOUT_MS_ENV_VAR: &str = "SERVER_SELECTION_TIMEOUT_MS";
pub(crate) const MAX_POOL_SIZE_ENV_VAR: &str = "MAX_POOL_SIZE";
pub(crate) const QUERY_TIMEOUT_ENV_VAR: &str = "QUERY_TIMEOUT_SECS";
pub(crate) const MAX_QUERY_LIMIT_ENV_VAR: &str = "MAX_QUERY_LIMIT";
pub(crate) const DEFAULT_QUERY_LIMIT_ENV_VAR: &str = "DEFAULT_QUERY_LIMIT";

/// Where the SSH forward goes and how long establishing it may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    pub bastion_host: String,
    pub bastion_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
    /// Local port to bind on 127.0.0.1; 0 lets the OS pick one.
    pub local_bind_port: u16,
    pub connect_timeout: Duration,
    pub compress: bool,
}

/// Driver settings for the client that connects through the tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub auth_source: String,
    pub replica_set: Option<String>,
    pub connect_timeout: Duration,
    pub server_selection_timeout: Duration,
    pub max_pool_size: u32,
}

impl DatabaseSettings {
    /// Upper bound for the whole client handshake (connect, select, ping).
    pub fn handshake_deadline(&self) -> Duration {
        self.connect_timeout + self.server_selection_timeout
    }
}

/// Bounds applied to every read operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    pub query_timeout: Duration,
    pub max_query_limit: u32,
    pub default_query_limit: u32,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
            max_query_limit: DEFAULT_MAX_QUERY_LIMIT,
            default_query_limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

impl SessionLimits {
    /// Resolve limits from the environment.
    ///
    /// A default limit above the maximum is clamped to the maximum, and a
    /// zero maximum falls back to the built-in default.
    pub fn from_env() -> Self {
        let max_query_limit = match resolve_u32(MAX_QUERY_LIMIT_ENV_VAR, DEFAULT_MAX_QUERY_LIMIT) {
            0 => DEFAULT_MAX_QUERY_LIMIT,
            max => max,
        };
        let default_query_limit = resolve_u32(DEFAULT_QUERY_LIMIT_ENV_VAR, DEFAULT_QUERY_LIMIT)
            .clamp(1, max_query_limit);

        Self {
            query_timeout: Duration::from_secs(resolve_u64(
                QUERY_TIMEOUT_ENV_VAR,
                DEFAULT_QUERY_TIMEOUT_SECS,
            )),
            max_query_limit,
            default_query_limit,
        }
    }
}

/// Everything `connect` needs: endpoints, driver settings and credentials.
#[derive(Debug, Clone)]
pub struct ConnectionProfile {
    pub tunnel: TunnelConfig,
    pub ssh_credentials: SshCredentials,
    pub database: DatabaseSettings,
    pub db_credentials: DatabaseCredentials,
}

impl ConnectionProfile {
    /// Resolve the full profile from the environment and secret storage.
    ///
    /// Fails with [`SessionError::Configuration`] when a required host or
    /// credential is missing.
    pub fn from_env() -> Result<Self, SessionError> {
        let bastion_host = require(SSH_HOST_ENV_VAR)?;
        let remote_host = require(MONGODB_HOST_ENV_VAR)?;
        let (ssh_credentials, db_credentials) = load_credentials()?;

        Ok(Self {
            tunnel: TunnelConfig {
                bastion_host,
                bastion_port: resolve_u16(SSH_PORT_ENV_VAR, DEFAULT_SSH_PORT),
                remote_host,
                remote_port: resolve_u16(MONGODB_PORT_ENV_VAR, DEFAULT_MONGODB_PORT),
                local_bind_port: resolve_u16(LOCAL_BIND_PORT_ENV_VAR, 0),
                connect_timeout: resolve_ssh_connect_timeout(),
                compress: resolve_compression(),
            },
            ssh_credentials,
            database: DatabaseSettings {
                auth_source: resolve_string(MONGODB_AUTH_DB_ENV_VAR)
                    .unwrap_or_else(|| DEFAULT_AUTH_DB.to_string()),
                replica_set: resolve_string(REPLICA_SET_ENV_VAR),
                connect_timeout: Duration::from_millis(resolve_u64(
                    CONNECTION_TIMEOUT_MS_ENV_VAR,
                    DEFAULT_CONNECTION_TIMEOUT_MS,
                )),
                server_selection_timeout: Duration::from_millis(resolve_u64(
                    SERVER_SELECTION_TIMEOUT_MS_ENV_VAR,
                    DEFAULT_SERVER_SELECTION_TIMEOUT_MS,
                )),
                max_pool_size: resolve_u32(MAX_POOL_SIZE_ENV_VAR, DEFAULT_MAX_POOL_SIZE),
            },
            db_credentials,
        })
    }
}

fn require(var: &str) -> Result<String, SessionError> {
    resolve_string(var)
        .ok_or_else(|| SessionError::Configuration(format!("{} is not set", var)))
}

/// Non-empty, trimmed environment value.
pub(crate) fn resolve_string(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// SSH connect timeout: env var -> default
pub(crate) fn resolve_ssh_connect_timeout() -> Duration {
    Duration::from_secs(resolve_u64(
        SSH_CONNECT_TIMEOUT_ENV_VAR,
        DEFAULT_SSH_CONNECT_TIMEOUT_SECS,
    ))
}

/// Compression setting: env var -> default (true)
pub(crate) fn resolve_compression() -> bool {
    if let Ok(env_compress) = env::var(COMPRESSION_ENV_VAR) {
        return env_compress.eq_ignore_ascii_case("true") || env_compress == "1";
    }

    true
}

pub(crate) fn resolve_u64(var: &str, default: u64) -> u64 {
    if let Ok(env_value) = env::var(var)
        && let Ok(value) = env_value.trim().parse::<u64>()
    {
        return value;
    }

    default
}

pub(crate) fn resolve_u32(var: &str, default: u32) -> u32 {
    if let Ok(env_value) = env::var(var)
        && let Ok(value) = env_value.trim().parse::<u32>()
    {
        return value;
    }

    default
}

pub(crate) fn resolve_u16(var: &str, default: u16) -> u16 {
    if let Ok(env_value) = env::var(var)
        && let Ok(value) = env_value.trim().parse::<u16>()
    {
        return value;
    }

    default
}
