//! SSH-backed [`TunnelManager`] built on `russh`.
//!
//! # Architecture
//!
//! - `SshClientHandler`: a russh client handler that accepts all host keys
//!   (like `StrictHostKeyChecking=no` in OpenSSH).
//! - `SshTunnelManager::open` binds the local port, connects and
//!   authenticates under `SSH_CONNECT_TIMEOUT`, then starts the forwarding
//!   loop with a `direct-tcpip` channel per accepted connection.
//! - `SshLink` owns the session handle and the forwarder task. It is dead
//!   once the forwarder stops or russh reports the session closed
//!   (keepalive failures included).
//!
//! # Thread Safety
//!
//! `client::Handle<SshClientHandler>` is not `Clone`; it is shared through
//! an `Arc` between the link and the channel opener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use russh::{ChannelStream, Disconnect, client, keys};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{info, warn};

use crate::mcp::error::TunnelError;
use crate::mcp::secrets::SshCredentials;

use super::auth::{AuthChain, AuthStrategy};
use super::forward::{self, ChannelOpener};
use super::{TunnelConfig, TunnelHandle, TunnelLink, TunnelManager};

/// Client handler that accepts all host keys.
///
/// Host key verification against `known_hosts` is not performed.
pub struct SshClientHandler;

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Client configuration for a long-lived tunnel session.
///
/// No inactivity timeout: the tunnel stays up until `close`. Keepalives
/// detect a dead bastion and flip the handle to closed.
pub(crate) fn build_client_config(compress: bool) -> Arc<client::Config> {
    let compression = if compress {
        (&[russh::compression::ZLIB, russh::compression::NONE][..]).into()
    } else {
        (&[russh::compression::NONE][..]).into()
    };

    let preferred = russh::Preferred {
        compression,
        ..Default::default()
    };

    Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(Duration::from_secs(30)),
        keepalive_max: 3,
        preferred,
        ..Default::default()
    })
}

/// Opens `direct-tcpip` channels on an authenticated session.
struct SshChannelOpener {
    handle: Arc<client::Handle<SshClientHandler>>,
}

#[async_trait]
impl ChannelOpener for SshChannelOpener {
    type Stream = ChannelStream<client::Msg>;

    async fn open_channel(
        &self,
        remote_host: &str,
        remote_port: u16,
        originator: SocketAddr,
    ) -> Result<Self::Stream, String> {
        let channel = self
            .handle
            .channel_open_direct_tcpip(
                remote_host,
                remote_port as u32,
                originator.ip().to_string(),
                originator.port() as u32,
            )
            .await
            .map_err(|e| format!("Failed to open direct-tcpip channel: {}", e))?;

        Ok(channel.into_stream())
    }
}

struct SshLink {
    handle: Arc<client::Handle<SshClientHandler>>,
    cancel: CancellationToken,
    forwarder: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    // Cancels the forwarder if the link is dropped without `shutdown`
    _cancel_on_drop: DropGuard,
}

impl SshLink {
    fn new(
        handle: Arc<client::Handle<SshClientHandler>>,
        cancel: CancellationToken,
        forwarder: JoinHandle<()>,
    ) -> Self {
        Self {
            handle,
            _cancel_on_drop: cancel.clone().drop_guard(),
            cancel,
            forwarder: Mutex::new(Some(forwarder)),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl TunnelLink for SshLink {
    fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && !self.cancel.is_cancelled()
            && !self.handle.is_closed()
    }

    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.cancel.cancel();
        if let Some(task) = self.forwarder.lock().await.take()
            && let Err(e) = task.await
        {
            warn!("Port forwarding task ended abnormally: {}", e);
        }

        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "Tunnel closed", "en")
            .await
        {
            warn!(
                "Error during SSH disconnect (session may already be closed): {}",
                e
            );
        }
    }
}

/// Production [`TunnelManager`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SshTunnelManager;

impl SshTunnelManager {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TunnelManager for SshTunnelManager {
    async fn open(
        &self,
        config: &TunnelConfig,
        credentials: &SshCredentials,
    ) -> Result<TunnelHandle, TunnelError> {
        // Bind first: a busy port must not cost an SSH handshake
        let listener = forward::bind_local(config.local_bind_port).await?;
        let local_port = listener
            .local_addr()
            .map_err(|e| TunnelError::PortBind {
                port: config.local_bind_port,
                reason: e.to_string(),
            })?
            .port();

        let handle = Arc::new(connect_and_authenticate(config, credentials).await?);

        let cancel = CancellationToken::new();
        let forwarder = forward::spawn_forwarder(
            listener,
            Arc::new(SshChannelOpener {
                handle: handle.clone(),
            }),
            config.remote_host.clone(),
            config.remote_port,
            cancel.clone(),
        );

        info!(
            "SSH tunnel established: 127.0.0.1:{} -> {}:{} via {}@{}:{}",
            local_port,
            config.remote_host,
            config.remote_port,
            credentials.username,
            config.bastion_host,
            config.bastion_port
        );

        Ok(TunnelHandle::new(
            config,
            credentials.username.clone(),
            local_port,
            Arc::new(SshLink::new(handle, cancel, forwarder)),
        ))
    }
}

async fn connect_and_authenticate(
    config: &TunnelConfig,
    credentials: &SshCredentials,
) -> Result<client::Handle<SshClientHandler>, TunnelError> {
    let chain = AuthChain::for_credentials(credentials);
    if chain.is_empty() {
        return Err(TunnelError::Authentication(
            "no SSH password or private key configured".to_string(),
        ));
    }

    tokio::time::timeout(
        config.connect_timeout,
        handshake(config, &credentials.username, &chain),
    )
    .await
    .map_err(|_| {
        TunnelError::Network(format!(
            "Connection to {}:{} timed out after {:?}",
            config.bastion_host, config.bastion_port, config.connect_timeout
        ))
    })?
}

async fn handshake(
    config: &TunnelConfig,
    username: &str,
    chain: &AuthChain,
) -> Result<client::Handle<SshClientHandler>, TunnelError> {
    let mut handle = client::connect(
        build_client_config(config.compress),
        (config.bastion_host.as_str(), config.bastion_port),
        SshClientHandler,
    )
    .await
    .map_err(|e| {
        TunnelError::Network(format!(
            "Failed to connect to {}:{}: {}",
            config.bastion_host, config.bastion_port, e
        ))
    })?;

    match chain.authenticate(&mut handle, username).await {
        Ok(true) => Ok(handle),
        Ok(false) => Err(TunnelError::Authentication(
            "no authentication methods succeeded".to_string(),
        )),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn credentials() -> SshCredentials {
        SshCredentials {
            username: "ops".into(),
            password: Some("secret".into()),
            key_path: None,
        }
    }

    fn config(bastion_port: u16, local_bind_port: u16) -> TunnelConfig {
        TunnelConfig {
            bastion_host: "127.0.0.1".into(),
            bastion_port,
            remote_host: "db.internal".into(),
            remote_port: 27017,
            local_bind_port,
            connect_timeout: Duration::from_millis(500),
            compress: false,
        }
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_build_client_config_without_compression() {
        let config = build_client_config(false);
        assert!(config.inactivity_timeout.is_none());
        assert_eq!(config.keepalive_interval, Some(Duration::from_secs(30)));
        assert_eq!(config.keepalive_max, 3);
        assert_eq!(config.preferred.compression.len(), 1);
    }

    #[test]
    fn test_build_client_config_with_compression() {
        let config = build_client_config(true);
        assert_eq!(config.preferred.compression.len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_bastion_is_network_error() {
        let port = closed_port().await;
        let err = SshTunnelManager::new()
            .open(&config(port, 0), &credentials())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "NetworkError");
    }

    #[tokio::test]
    async fn test_silent_bastion_times_out_as_network_error() {
        // Accepts TCP but never speaks SSH
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let holder = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let err = SshTunnelManager::new()
            .open(&config(port, 0), &credentials())
            .await
            .unwrap_err();
        holder.abort();

        assert_eq!(err.kind(), "NetworkError");
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_occupied_local_port_is_port_bind_error() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local_port = occupied.local_addr().unwrap().port();
        let bastion = closed_port().await;

        let err = SshTunnelManager::new()
            .open(&config(bastion, local_port), &credentials())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "PortBindError");
    }

    #[tokio::test]
    async fn test_missing_auth_method_is_authentication_error() {
        let creds = SshCredentials {
            username: "ops".into(),
            password: None,
            key_path: None,
        };
        let port = closed_port().await;
        let err = SshTunnelManager::new()
            .open(&config(port, 0), &creds)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "AuthenticationError");
    }
}
