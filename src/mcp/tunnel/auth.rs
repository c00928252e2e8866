//! Bastion authentication strategies.
//!
//! Strategies are tried in order by [`AuthChain`]; the first one the server
//! accepts wins. A configured password is tried before the private key.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use russh::{client, keys};
use tracing::debug;

use crate::mcp::error::{TunnelError, classify_ssh_error};
use crate::mcp::secrets::SshCredentials;

use super::ssh::SshClientHandler;

/// One way of proving identity to the bastion.
#[async_trait]
pub(crate) trait AuthStrategy: Send + Sync {
    /// `Ok(true)` when accepted, `Ok(false)` when rejected, `Err` when the
    /// attempt itself failed.
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        username: &str,
    ) -> Result<bool, TunnelError>;

    fn name(&self) -> &'static str;
}

pub(crate) struct PasswordAuth {
    password: String,
}

impl PasswordAuth {
    pub(crate) fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }
}

#[async_trait]
impl AuthStrategy for PasswordAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        username: &str,
    ) -> Result<bool, TunnelError> {
        let result = handle
            .authenticate_password(username, &self.password)
            .await
            .map_err(|e| attempt_error(self.name(), e))?;

        Ok(result.success())
    }

    fn name(&self) -> &'static str {
        "password"
    }
}

/// Passphrase-less private key file.
pub(crate) struct KeyAuth {
    key_path: PathBuf,
}

impl KeyAuth {
    pub(crate) fn new(key_path: impl Into<PathBuf>) -> Self {
        Self {
            key_path: key_path.into(),
        }
    }
}

#[async_trait]
impl AuthStrategy for KeyAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        username: &str,
    ) -> Result<bool, TunnelError> {
        let key_pair = keys::load_secret_key(Path::new(&self.key_path), None).map_err(|e| {
            TunnelError::Authentication(format!(
                "Failed to load private key from {:?}: {}",
                self.key_path, e
            ))
        })?;

        // RSA keys need the strongest hash the server supports
        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        debug!("Using RSA hash algorithm for key auth: {:?}", hash_alg);

        let key_with_hash = keys::PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg);

        let result = handle
            .authenticate_publickey(username, key_with_hash)
            .await
            .map_err(|e| attempt_error(self.name(), e))?;

        Ok(result.success())
    }

    fn name(&self) -> &'static str {
        "key"
    }
}

/// Classify a failed attempt on the russh error itself, so a bastion that
/// drops the connection mid-handshake reports a network failure.
fn attempt_error(strategy: &str, error: russh::Error) -> TunnelError {
    match classify_ssh_error(error.to_string()) {
        TunnelError::Authentication(reason) => TunnelError::Authentication(format!(
            "{} authentication failed: {}",
            strategy, reason
        )),
        TunnelError::Network(reason) => TunnelError::Network(format!(
            "connection lost during {} authentication: {}",
            strategy, reason
        )),
        other => other,
    }
}

/// Ordered list of strategies.
pub(crate) struct AuthChain {
    strategies: Vec<Box<dyn AuthStrategy>>,
}

impl AuthChain {
    pub(crate) fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    /// Password first, then key, for whichever of the two are configured.
    pub(crate) fn for_credentials(credentials: &SshCredentials) -> Self {
        let mut chain = Self::new();
        if let Some(password) = &credentials.password {
            chain = chain.with_password(password);
        }
        if let Some(key_path) = &credentials.key_path {
            chain = chain.with_key(key_path);
        }
        chain
    }

    pub(crate) fn with_password(mut self, password: impl Into<String>) -> Self {
        self.strategies.push(Box::new(PasswordAuth::new(password)));
        self
    }

    pub(crate) fn with_key(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.strategies.push(Box::new(KeyAuth::new(key_path)));
        self
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

#[async_trait]
impl AuthStrategy for AuthChain {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        username: &str,
    ) -> Result<bool, TunnelError> {
        if self.strategies.is_empty() {
            return Err(TunnelError::Authentication(
                "No authentication strategies configured".to_string(),
            ));
        }

        let mut last_error = None;

        for strategy in &self.strategies {
            debug!("Trying authentication strategy: {}", strategy.name());

            match strategy.authenticate(handle, username).await {
                Ok(true) => {
                    debug!(
                        "Authentication succeeded with strategy: {}",
                        strategy.name()
                    );
                    return Ok(true);
                }
                Ok(false) => {
                    debug!("Authentication failed with strategy: {}", strategy.name());
                    last_error = Some(TunnelError::Authentication(format!(
                        "{} authentication rejected",
                        strategy.name()
                    )));
                }
                // The session is gone; later strategies cannot succeed
                Err(e @ TunnelError::Network(_)) => return Err(e),
                Err(e) => {
                    debug!(
                        "Authentication error with strategy {}: {}",
                        strategy.name(),
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            TunnelError::Authentication("All authentication methods failed".to_string())
        }))
    }

    fn name(&self) -> &'static str {
        "chain"
    }
}
