//! Credential loading from secret files or environment variables.
//!
//! Each secret `NAME` is looked up as:
//!
//! 1. the contents of the file named by `NAME_FILE` (trimmed), when that
//!    variable is set and the file can be read;
//! 2. the value of `NAME`.
//!
//! This matches the way container secrets are usually mounted. Secrets are
//! handed to the tunnel and session layers as opaque strings and are
//! redacted from `Debug` output.

use std::fmt;
use std::fs;

use tracing::{info, warn};

use crate::mcp::config::resolve_string;
use crate::mcp::error::SessionError;

pub(crate) const SSH_USERNAME: &str = "SSH_USERNAME";
pub(crate) const SSH_PASSWORD: &str = "SSH_PASSWORD";
pub(crate) const SSH_KEY_PATH: &str = "SSH_KEY_PATH";
pub(crate) const MONGODB_USERNAME: &str = "MONGODB_USERNAME";
pub(crate) const MONGODB_PASSWORD: &str = "MONGODB_PASSWORD";

/// Bastion credentials. At least one of `password` or `key_path` is set.
#[derive(Clone)]
pub struct SshCredentials {
    pub username: String,
    pub password: Option<String>,
    pub key_path: Option<String>,
}

impl fmt::Debug for SshCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshCredentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key_path", &self.key_path)
            .finish()
    }
}

/// Database credentials used against the authentication database.
#[derive(Clone)]
pub struct DatabaseCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Read a secret from `NAME_FILE` or `NAME`.
pub(crate) fn get_secret(name: &str) -> Option<String> {
    let file_var = format!("{}_FILE", name);
    if let Some(path) = resolve_string(&file_var) {
        match fs::read_to_string(&path) {
            Ok(contents) => {
                let secret = contents.trim().to_string();
                if !secret.is_empty() {
                    return Some(secret);
                }
            }
            Err(e) => warn!("Failed to read secret file {} ({}): {}", path, file_var, e),
        }
    }
    resolve_string(name)
}

/// Load and validate every credential needed by `connect`.
///
/// All missing values are reported in one error so an operator can fix the
/// environment in a single pass.
pub(crate) fn load_credentials() -> Result<(SshCredentials, DatabaseCredentials), SessionError> {
    let ssh_username = get_secret(SSH_USERNAME);
    let ssh_password = get_secret(SSH_PASSWORD);
    let ssh_key_path = get_secret(SSH_KEY_PATH);
    let db_username = get_secret(MONGODB_USERNAME);
    let db_password = get_secret(MONGODB_PASSWORD);

    let mut missing = Vec::new();
    if ssh_username.is_none() {
        missing.push(SSH_USERNAME.to_string());
    }
    if ssh_password.is_none() && ssh_key_path.is_none() {
        missing.push(format!("{} or {}", SSH_PASSWORD, SSH_KEY_PATH));
    }
    if db_username.is_none() {
        missing.push(MONGODB_USERNAME.to_string());
    }
    if db_password.is_none() {
        missing.push(MONGODB_PASSWORD.to_string());
    }

    match (ssh_username, db_username, db_password) {
        (Some(ssh_username), Some(db_username), Some(db_password)) if missing.is_empty() => {
            info!("All required credentials loaded");
            Ok((
                SshCredentials {
                    username: ssh_username,
                    password: ssh_password,
                    key_path: ssh_key_path,
                },
                DatabaseCredentials {
                    username: db_username,
                    password: db_password,
                },
            ))
        }
        _ => Err(SessionError::Configuration(format!(
            "missing required credentials: {} (set NAME_FILE to a secret file or NAME directly)",
            missing.join(", ")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::config::test_env::{ENV_TEST_MUTEX, remove_env, set_env};

    const ALL: &[&str] = &[
        SSH_USERNAME,
        SSH_PASSWORD,
        SSH_KEY_PATH,
        MONGODB_USERNAME,
        MONGODB_PASSWORD,
        "SSH_USERNAME_FILE",
        "SSH_PASSWORD_FILE",
        "SSH_KEY_PATH_FILE",
        "MONGODB_USERNAME_FILE",
        "MONGODB_PASSWORD_FILE",
    ];

    /// SAFETY: Must be called while holding ENV_TEST_MUTEX.
    unsafe fn clear() {
        for var in ALL {
            // SAFETY: Caller holds ENV_TEST_MUTEX
            unsafe { remove_env(var) };
        }
    }

    fn temp_secret(contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("mongo-tunnel-secret-{}", uuid::Uuid::new_v4()));
        fs::write(&path, contents).expect("write temp secret");
        path
    }

    #[test]
    fn test_file_takes_priority_over_env() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();
        let path = temp_secret("from-file\n");
        // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
        unsafe {
            clear();
            set_env("MONGODB_PASSWORD_FILE", path.to_str().unwrap());
            set_env(MONGODB_PASSWORD, "from-env");
        }
        let secret = get_secret(MONGODB_PASSWORD);
        // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
        unsafe { clear() };
        let _ = fs::remove_file(path);
        assert_eq!(secret.as_deref(), Some("from-file"));
    }

    #[test]
    fn test_unreadable_file_falls_back_to_env() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();
        // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
        unsafe {
            clear();
            set_env("SSH_PASSWORD_FILE", "/definitely/not/a/secret/file");
            set_env(SSH_PASSWORD, "from-env");
        }
        let secret = get_secret(SSH_PASSWORD);
        // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
        unsafe { clear() };
        assert_eq!(secret.as_deref(), Some("from-env"));
    }

    #[test]
    fn test_missing_credentials_reported_together() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();
        // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
        unsafe {
            clear();
            set_env(SSH_USERNAME, "ops");
        }
        let err = load_credentials().unwrap_err();
        // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
        unsafe { clear() };

        let message = err.to_string();
        assert_eq!(err.kind(), "ConfigurationError");
        assert!(message.contains("SSH_PASSWORD or SSH_KEY_PATH"));
        assert!(message.contains(MONGODB_USERNAME));
        assert!(message.contains(MONGODB_PASSWORD));
        assert!(!message.contains("SSH_USERNAME,"));
    }

    #[test]
    fn test_key_path_satisfies_ssh_secret() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();
        // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
        unsafe {
            clear();
            set_env(SSH_USERNAME, "ops");
            set_env(SSH_KEY_PATH, "/home/ops/.ssh/id_ed25519");
            set_env(MONGODB_USERNAME, "reader");
            set_env(MONGODB_PASSWORD, "pw");
        }
        let result = load_credentials();
        // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
        unsafe { clear() };

        let (ssh, db) = result.unwrap();
        assert_eq!(ssh.password, None);
        assert_eq!(ssh.key_path.as_deref(), Some("/home/ops/.ssh/id_ed25519"));
        assert_eq!(db.username, "reader");
    }

    #[test]
    fn test_debug_redacts_passwords() {
        let ssh = SshCredentials {
            username: "ops".into(),
            password: Some("hunter2".into()),
            key_path: None,
        };
        let db = DatabaseCredentials {
            username: "reader".into(),
            password: "s3cret".into(),
        };
        let rendered = format!("{:?} {:?}", ssh, db);
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("<redacted>"));
    }
}
