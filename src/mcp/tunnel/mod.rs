//! Tunnel Manager: an SSH-forwarded local port mapped to the database host.
//!
//! A [`TunnelManager`] opens a forward `127.0.0.1:<local_port> ->
//! remote_host:remote_port` through an authenticated session on a bastion
//! host and returns a [`TunnelHandle`]. The handle owns the forward through
//! its [`TunnelLink`]; dropping the last reference cancels it.
//!
//! # Lifecycle
//!
//! - `open` binds the local port, authenticates to the bastion and starts
//!   forwarding. The returned port is ready for immediate use.
//! - `is_alive` reports whether the forward is still serving traffic.
//! - `close` is idempotent and never fails; teardown problems are logged.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::mcp::error::TunnelError;
use crate::mcp::secrets::SshCredentials;

pub use crate::mcp::config::TunnelConfig;

pub(crate) mod auth;
pub(crate) mod forward;
pub mod ssh;

pub use ssh::SshTunnelManager;

/// The resource keeping a forward alive (SSH connection plus listener task).
#[async_trait]
pub trait TunnelLink: Send + Sync {
    /// Whether the forward still serves traffic.
    fn is_alive(&self) -> bool;

    /// Stop forwarding, release the port and close the SSH session.
    ///
    /// Must be idempotent and must not fail.
    async fn shutdown(&self);
}

/// A live SSH forward.
pub struct TunnelHandle {
    local_port: u16,
    remote_host: String,
    remote_port: u16,
    bastion_host: String,
    bastion_port: u16,
    username: String,
    opened_at: DateTime<Utc>,
    link: Arc<dyn TunnelLink>,
}

impl TunnelHandle {
    pub fn new(
        config: &TunnelConfig,
        username: impl Into<String>,
        local_port: u16,
        link: Arc<dyn TunnelLink>,
    ) -> Self {
        Self {
            local_port,
            remote_host: config.remote_host.clone(),
            remote_port: config.remote_port,
            bastion_host: config.bastion_host.clone(),
            bastion_port: config.bastion_port,
            username: username.into(),
            opened_at: Utc::now(),
            link,
        }
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn remote_host(&self) -> &str {
        &self.remote_host
    }

    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    pub fn bastion_host(&self) -> &str {
        &self.bastion_host
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// `127.0.0.1:<local_port>`
    pub fn local_address(&self) -> String {
        format!("127.0.0.1:{}", self.local_port)
    }

    /// `user@bastion:port`
    pub fn bastion(&self) -> String {
        format!("{}@{}:{}", self.username, self.bastion_host, self.bastion_port)
    }

    /// `remote_host:remote_port`
    pub fn remote(&self) -> String {
        format!("{}:{}", self.remote_host, self.remote_port)
    }

    pub(crate) fn link(&self) -> &Arc<dyn TunnelLink> {
        &self.link
    }
}

impl fmt::Debug for TunnelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelHandle")
            .field("local_port", &self.local_port)
            .field("remote", &self.remote())
            .field("bastion", &self.bastion())
            .field("opened_at", &self.opened_at)
            .field("alive", &self.link.is_alive())
            .finish()
    }
}

/// Establishes and tears down SSH forwards.
#[async_trait]
pub trait TunnelManager: Send + Sync {
    /// Authenticate to the bastion and start forwarding an ephemeral (or
    /// configured) local port to the remote endpoint.
    async fn open(
        &self,
        config: &TunnelConfig,
        credentials: &SshCredentials,
    ) -> Result<TunnelHandle, TunnelError>;

    /// Stop the forward. Idempotent; never fails.
    async fn close(&self, handle: &TunnelHandle) {
        handle.link().shutdown().await;
        info!(
            "SSH tunnel {} -> {} via {} closed",
            handle.local_address(),
            handle.remote(),
            handle.bastion_host()
        );
    }

    /// Whether the forward is still serving traffic.
    fn is_alive(&self, handle: &TunnelHandle) -> bool {
        handle.link().is_alive()
    }
}
