//! MCP MongoDB module: read-only database tools behind an SSH bastion tunnel.
//!
//! This module is organized into the following submodules:
//!
//! - `config`: Configuration resolution with environment variable support
//! - `secrets`: Credential loading from secret files or the environment
//! - `error`: Tunnel and session error types with stable kinds
//! - `logging`: Tracing subscriber setup
//! - `tunnel`: SSH tunnel establishment and port forwarding
//! - `database`: Database client seam and the MongoDB driver implementation
//! - `session`: The process-wide session state machine
//! - `types`: Serializable response types for MCP tools
//! - `commands`: MCP tool implementations

pub mod commands;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub(crate) mod schema;
pub mod secrets;
pub mod session;
pub mod tunnel;
pub mod types;

pub use commands::McpMongoCommands;

use std::sync::Arc;

use config::SessionLimits;
use database::MongoConnector;
use session::SessionManager;
use tunnel::SshTunnelManager;

/// Session manager wired to the SSH tunnel and the MongoDB driver.
pub fn default_session_manager() -> Arc<SessionManager> {
    Arc::new(SessionManager::new(
        Arc::new(SshTunnelManager::new()),
        Arc::new(MongoConnector::new()),
        SessionLimits::from_env(),
    ))
}
