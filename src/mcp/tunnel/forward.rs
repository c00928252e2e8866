//! Local listener and bidirectional forwarding loop.
//!
//! # Architecture
//!
//! 1. **TCP Listener**: bound on `127.0.0.1` before the SSH session is
//!    established, so a busy port fails fast with `PortBindError`.
//!
//! 2. **Per-connection channels**: every accepted connection asks a
//!    [`ChannelOpener`] for a stream to the remote destination (a
//!    `direct-tcpip` channel for SSH, RFC 4254) and copies bytes both ways
//!    until either side closes.
//!
//! 3. **Cancellation**: one `CancellationToken` stops the accept loop and
//!    every live connection. When the loop exits the listener is dropped and
//!    the port is released. An accept error cancels the token itself, which
//!    marks the tunnel as dead.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::mcp::error::TunnelError;

/// Opens a stream to the forward destination for one local connection.
#[async_trait]
pub(crate) trait ChannelOpener: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + 'static;

    async fn open_channel(
        &self,
        remote_host: &str,
        remote_port: u16,
        originator: SocketAddr,
    ) -> Result<Self::Stream, String>;
}

/// Bind the local end of the forward on the loopback interface.
pub(crate) async fn bind_local(port: u16) -> Result<TcpListener, TunnelError> {
    TcpListener::bind(("127.0.0.1", port))
        .await
        .map_err(|e| TunnelError::PortBind {
            port,
            reason: e.to_string(),
        })
}

/// Spawn the accept loop. The returned task finishes once `cancel` fires
/// or the listener fails.
pub(crate) fn spawn_forwarder<O: ChannelOpener>(
    listener: TcpListener,
    opener: Arc<O>,
    remote_host: String,
    remote_port: u16,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let local_addr = listener.local_addr().ok();
        debug!(
            "Port forwarding active on {:?} -> {}:{}",
            local_addr, remote_host, remote_port
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Port forwarding on {:?} cancelled", local_addr);
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((local_stream, client_addr)) => {
                        debug!("New connection from {} to forwarded port", client_addr);

                        let opener = opener.clone();
                        let remote_host = remote_host.clone();
                        let cancel = cancel.clone();

                        tokio::spawn(async move {
                            if let Err(e) = forward_connection(
                                opener.as_ref(),
                                local_stream,
                                client_addr,
                                &remote_host,
                                remote_port,
                                &cancel,
                            )
                            .await
                            {
                                debug!("Port forwarding connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Error accepting connection on {:?}: {}", local_addr, e);
                        cancel.cancel();
                        break;
                    }
                }
            }
        }
    })
}

async fn forward_connection<O: ChannelOpener>(
    opener: &O,
    mut local_stream: TcpStream,
    client_addr: SocketAddr,
    remote_host: &str,
    remote_port: u16,
    cancel: &CancellationToken,
) -> Result<(), String> {
    let channel = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        channel = opener.open_channel(remote_host, remote_port, client_addr) => channel?,
    };
    let mut channel = Box::pin(channel);

    tokio::select! {
        _ = cancel.cancelled() => {
            debug!("Forwarded connection from {} closed by tunnel shutdown", client_addr);
        }
        result = tokio::io::copy_bidirectional(&mut local_stream, &mut channel) => {
            match result {
                Ok((sent, received)) => debug!(
                    "Forwarded connection from {} closed ({} bytes out, {} bytes in)",
                    client_addr, sent, received
                ),
                Err(e) => debug!("Forwarded connection from {} ended: {}", client_addr, e),
            }
        }
    }

    Ok(())
}
