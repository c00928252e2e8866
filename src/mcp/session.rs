//! Session Manager: the single tunnel/database session of the process.
//!
//! # State machine
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnecting -> Disconnected
//!                     |
//!                     +-> Disconnected (any setup failure)
//! ```
//!
//! `connect` and `disconnect` serialize on a lifecycle mutex. The state lives
//! in a `watch` channel so read operations take a snapshot without waiting
//! on that mutex: reads never queue behind a lifecycle change, they fail with
//! `NotConnectedError` unless the snapshot is `Connected`.
//!
//! A second `connect` waits for the first one, then reuses the session if
//! its tunnel is still alive. A session whose tunnel died is torn down and
//! replaced, so two live tunnels never coexist.
//!
//! # Ownership
//!
//! [`ActiveSession`] owns the [`TunnelHandle`]; the [`SessionHandle`] only
//! holds a `Weak` reference to it and never outlives it. Every read checks
//! the tunnel first and tears the pair down when the forward is gone.

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tracing::{info, warn};
use uuid::Uuid;

use crate::mcp::config::{ConnectionProfile, SessionLimits};
use crate::mcp::database::convert::{
    document_to_json, parse_document, parse_optional_document, parse_pipeline,
};
use crate::mcp::database::{
    CollectionStatistics, DatabaseClient, DatabaseConnector, DatabaseInfo, FindRequest,
};
use crate::mcp::error::{SessionError, TunnelError};
use crate::mcp::tunnel::{TunnelHandle, TunnelManager};
use crate::mcp::types::{SessionInfo, SessionStatus, SessionStatusResponse};

/// Database client bound to a live tunnel.
pub struct SessionHandle {
    session_id: String,
    tunnel: Weak<TunnelHandle>,
    client: Arc<dyn DatabaseClient>,
    connected_at: DateTime<Utc>,
    server_version: String,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The tunnel this session runs through, unless it was already released.
    pub fn tunnel(&self) -> Option<Arc<TunnelHandle>> {
        self.tunnel.upgrade()
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }
}

/// The tunnel/session pair of a `Connected` state.
pub struct ActiveSession {
    tunnel: Arc<TunnelHandle>,
    session: SessionHandle,
}

impl ActiveSession {
    pub fn tunnel(&self) -> &Arc<TunnelHandle> {
        &self.tunnel
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    fn client(&self) -> &Arc<dyn DatabaseClient> {
        &self.session.client
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.session.session_id.clone(),
            local_address: self.tunnel.local_address(),
            local_port: self.tunnel.local_port(),
            bastion: self.tunnel.bastion(),
            remote: self.tunnel.remote(),
            server_version: self.session.server_version.clone(),
            connected_at: self.session.connected_at.to_rfc3339(),
        }
    }
}

#[derive(Clone)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected(Arc<ActiveSession>),
    Disconnecting,
}

impl SessionState {
    pub fn status(&self) -> SessionStatus {
        match self {
            SessionState::Disconnected => SessionStatus::Disconnected,
            SessionState::Connecting => SessionStatus::Connecting,
            SessionState::Connected(_) => SessionStatus::Connected,
            SessionState::Disconnecting => SessionStatus::Disconnecting,
        }
    }
}

/// Result of a successful `connect`.
#[derive(Debug, Clone)]
pub struct ConnectOutcome {
    pub session: SessionInfo,
    pub reused: bool,
}

/// Arguments of `query_collection`, as received from the caller.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub database: String,
    pub collection: String,
    /// JSON filter; blank means "match everything"
    pub query: Option<String>,
    pub limit: Option<i64>,
    pub projection: Option<String>,
    pub sort: Option<String>,
}

#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub limit: u32,
    pub documents: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct CountOutcome {
    pub count: u64,
    pub estimated: bool,
}

#[derive(Debug, Clone)]
pub struct AggregateOutcome {
    pub limit: u32,
    pub documents: Vec<Value>,
    pub truncated: bool,
}

/// Resets `Connecting` to `Disconnected` unless the connect completed.
struct ConnectingGuard<'a> {
    state: &'a watch::Sender<SessionState>,
    armed: bool,
}

impl ConnectingGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.send_replace(SessionState::Disconnected);
        }
    }
}

/// Owns the process-wide session. Shared as `Arc<SessionManager>`.
pub struct SessionManager {
    tunnels: Arc<dyn TunnelManager>,
    connector: Arc<dyn DatabaseConnector>,
    limits: SessionLimits,
    lifecycle: Mutex<()>,
    state: watch::Sender<SessionState>,
}

impl SessionManager {
    pub fn new(
        tunnels: Arc<dyn TunnelManager>,
        connector: Arc<dyn DatabaseConnector>,
        limits: SessionLimits,
    ) -> Self {
        Self {
            tunnels,
            connector,
            limits,
            lifecycle: Mutex::new(()),
            state: watch::Sender::new(SessionState::Disconnected),
        }
    }

    pub fn limits(&self) -> &SessionLimits {
        &self.limits
    }

    /// Current state, without waiting on lifecycle operations.
    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Open the tunnel, then authenticate a database client through it.
    ///
    /// If anything fails after the tunnel opened, the tunnel is closed before
    /// the error is returned and the state goes back to `Disconnected`.
    pub async fn connect(
        &self,
        profile: &ConnectionProfile,
    ) -> Result<ConnectOutcome, SessionError> {
        let _lifecycle = self.lifecycle.lock().await;

        if let SessionState::Connected(active) = self.snapshot() {
            if self.tunnels.is_alive(active.tunnel()) {
                info!("Reusing session {}", active.session().session_id());
                return Ok(ConnectOutcome {
                    session: active.info(),
                    reused: true,
                });
            }
            warn!(
                "Session {} has a dead SSH tunnel; replacing it",
                active.session().session_id()
            );
            self.teardown(active).await;
        }

        self.state.send_replace(SessionState::Connecting);
        let guard = ConnectingGuard {
            state: &self.state,
            armed: true,
        };

        let active = Arc::new(self.establish(profile).await?);
        let session = active.info();
        self.state.send_replace(SessionState::Connected(active));
        guard.disarm();

        info!(
            "Session {} connected: MongoDB {} via {} -> {}",
            session.session_id, session.server_version, session.bastion, session.remote
        );
        Ok(ConnectOutcome {
            session,
            reused: false,
        })
    }

    async fn establish(&self, profile: &ConnectionProfile) -> Result<ActiveSession, SessionError> {
        let tunnel = Arc::new(
            self.tunnels
                .open(&profile.tunnel, &profile.ssh_credentials)
                .await?,
        );

        let deadline = profile.database.handshake_deadline();
        let connected = tokio::time::timeout(
            deadline,
            self.connector.connect(
                tunnel.local_port(),
                &profile.database,
                &profile.db_credentials,
            ),
        )
        .await
        .unwrap_or(Err(SessionError::Timeout {
            operation: "database handshake",
            after: deadline,
        }));

        let client = match connected {
            Ok(client) => client,
            Err(e) => {
                warn!("Database connection failed, closing SSH tunnel: {}", e);
                self.tunnels.close(&tunnel).await;
                return Err(e);
            }
        };

        let session = SessionHandle {
            session_id: Uuid::new_v4().to_string(),
            tunnel: Arc::downgrade(&tunnel),
            server_version: client.server_version().to_string(),
            client,
            connected_at: Utc::now(),
        };
        Ok(ActiveSession { tunnel, session })
    }

    /// Close the database client, then the tunnel.
    ///
    /// Idempotent: returns `false` when there was nothing to close.
    pub async fn disconnect(&self) -> bool {
        let _lifecycle = self.lifecycle.lock().await;
        match self.snapshot() {
            SessionState::Connected(active) => {
                self.teardown(active).await;
                true
            }
            _ => false,
        }
    }

    /// Caller must hold the lifecycle lock.
    async fn teardown(&self, active: Arc<ActiveSession>) {
        self.state.send_replace(SessionState::Disconnecting);

        let session_id = active.session().session_id().to_string();
        if tokio::time::timeout(self.limits.query_timeout, active.client().shutdown())
            .await
            .is_err()
        {
            warn!(
                "Database client of session {} did not shut down within {:?}",
                session_id, self.limits.query_timeout
            );
        }
        self.tunnels.close(active.tunnel()).await;

        self.state.send_replace(SessionState::Disconnected);
        info!("Session {} disconnected", session_id);
    }

    pub fn status(&self) -> SessionStatusResponse {
        let state = self.snapshot();
        match &state {
            SessionState::Connected(active) => SessionStatusResponse {
                status: state.status(),
                session: Some(active.info()),
                tunnel_alive: Some(self.tunnels.is_alive(active.tunnel())),
            },
            _ => SessionStatusResponse {
                status: state.status(),
                session: None,
                tunnel_alive: None,
            },
        }
    }

    pub async fn list_databases(&self) -> Result<Vec<DatabaseInfo>, SessionError> {
        let active = self.live_session().await?;
        self.bounded("list_databases", active.client().list_databases())
            .await
    }

    /// Sorted collection names of an existing database.
    pub async fn list_collections(&self, database: &str) -> Result<Vec<String>, SessionError> {
        require_name("database", database)?;

        let active = self.live_session().await?;
        self.ensure_database(&active, database).await?;

        let mut names = self
            .bounded(
                "list_collections",
                active.client().list_collection_names(database),
            )
            .await?;
        names.sort();
        Ok(names)
    }

    pub async fn query_collection(
        &self,
        request: &QueryRequest,
    ) -> Result<QueryOutcome, SessionError> {
        require_name("database", &request.database)?;
        require_name("collection", &request.collection)?;
        let limit = self.resolve_limit(request.limit)?;
        let find = FindRequest {
            filter: parse_document(request.query.as_deref().unwrap_or(""), "query")?,
            projection: parse_optional_document(request.projection.as_deref(), "projection")?,
            sort: parse_optional_document(request.sort.as_deref(), "sort")?,
            limit,
        };

        let active = self.live_session().await?;
        self.ensure_collection(&active, &request.database, &request.collection)
            .await?;

        let documents = self
            .bounded(
                "query_collection",
                active
                    .client()
                    .find(&request.database, &request.collection, find),
            )
            .await?;

        Ok(QueryOutcome {
            limit,
            documents: documents.into_iter().map(document_to_json).collect(),
        })
    }

    pub async fn count_documents(
        &self,
        database: &str,
        collection: &str,
        query: Option<&str>,
    ) -> Result<CountOutcome, SessionError> {
        require_name("database", database)?;
        require_name("collection", collection)?;
        let filter = parse_document(query.unwrap_or(""), "query")?;
        let estimated = filter.is_empty();

        let active = self.live_session().await?;
        self.ensure_collection(&active, database, collection).await?;

        let count = self
            .bounded(
                "count_documents",
                active.client().count_documents(database, collection, filter),
            )
            .await?;
        Ok(CountOutcome { count, estimated })
    }

    pub async fn aggregate(
        &self,
        database: &str,
        collection: &str,
        pipeline: &str,
        limit: Option<i64>,
    ) -> Result<AggregateOutcome, SessionError> {
        require_name("database", database)?;
        require_name("collection", collection)?;
        let limit = self.resolve_limit(limit)?;
        let pipeline = parse_pipeline(pipeline)?;

        let active = self.live_session().await?;
        self.ensure_collection(&active, database, collection).await?;

        let batch = self
            .bounded(
                "aggregate",
                active
                    .client()
                    .aggregate(database, collection, pipeline, limit),
            )
            .await?;

        Ok(AggregateOutcome {
            limit,
            documents: batch.documents.into_iter().map(document_to_json).collect(),
            truncated: batch.truncated,
        })
    }

    pub async fn collection_stats(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<CollectionStatistics, SessionError> {
        require_name("database", database)?;
        require_name("collection", collection)?;

        let active = self.live_session().await?;
        self.ensure_collection(&active, database, collection).await?;

        self.bounded(
            "get_collection_stats",
            active.client().collection_stats(database, collection),
        )
        .await
    }

    /// `limit` must be `1..=max_query_limit`; absent means the default.
    fn resolve_limit(&self, limit: Option<i64>) -> Result<u32, SessionError> {
        let max = self.limits.max_query_limit;
        match limit {
            None => Ok(self.limits.default_query_limit),
            Some(limit) if limit >= 1 && limit <= i64::from(max) => Ok(limit as u32),
            Some(limit) => Err(SessionError::InvalidArgument(format!(
                "limit must be between 1 and {}, got {}",
                max, limit
            ))),
        }
    }

    /// Snapshot the session and make sure its tunnel still forwards.
    ///
    /// A dead tunnel tears the session down (unless a lifecycle operation is
    /// already running) and fails with `TunnelError(TunnelLost)`.
    async fn live_session(&self) -> Result<Arc<ActiveSession>, SessionError> {
        let active = match self.snapshot() {
            SessionState::Connected(active) => active,
            _ => return Err(SessionError::NotConnected),
        };
        if self.tunnels.is_alive(active.tunnel()) {
            return Ok(active);
        }

        warn!(
            "SSH tunnel of session {} is no longer alive",
            active.session().session_id()
        );
        if let Ok(_lifecycle) = self.lifecycle.try_lock()
            && let SessionState::Connected(current) = self.snapshot()
            && Arc::ptr_eq(&current, &active)
        {
            self.teardown(active).await;
        }
        Err(TunnelError::Lost.into())
    }

    async fn ensure_database(
        &self,
        active: &ActiveSession,
        database: &str,
    ) -> Result<(), SessionError> {
        let names = self
            .bounded("list_databases", active.client().list_database_names())
            .await?;
        if names.iter().any(|name| name == database) {
            Ok(())
        } else {
            Err(SessionError::DatabaseNotFound(database.to_string()))
        }
    }

    async fn ensure_collection(
        &self,
        active: &ActiveSession,
        database: &str,
        collection: &str,
    ) -> Result<(), SessionError> {
        self.ensure_database(active, database).await?;
        let names = self
            .bounded(
                "list_collections",
                active.client().list_collection_names(database),
            )
            .await?;
        if names.iter().any(|name| name == collection) {
            Ok(())
        } else {
            Err(SessionError::CollectionNotFound {
                database: database.to_string(),
                collection: collection.to_string(),
            })
        }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, SessionError>>,
    ) -> Result<T, SessionError> {
        let after = self.limits.query_timeout;
        tokio::time::timeout(after, call)
            .await
            .map_err(|_| SessionError::Timeout { operation, after })?
    }
}

fn require_name(what: &str, value: &str) -> Result<(), SessionError> {
    if value.trim().is_empty() {
        Err(SessionError::InvalidArgument(format!("{} name is required", what)))
    } else {
        Ok(())
    }
}
