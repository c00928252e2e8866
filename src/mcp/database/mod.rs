//! Database client seam used by the Session Manager.
//!
//! [`DatabaseConnector`] authenticates a client against the local end of a
//! tunnel; [`DatabaseClient`] runs the read-only operations exposed as
//! tools. Implementations map driver errors onto [`SessionError`] so that
//! raw driver errors never cross the session boundary.

use std::sync::Arc;

use async_trait::async_trait;
use mongodb::bson::Document;

use crate::mcp::config::DatabaseSettings;
use crate::mcp::error::SessionError;
use crate::mcp::secrets::DatabaseCredentials;

pub mod convert;
pub mod mongo;

pub use mongo::MongoConnector;

/// One entry of `listDatabases`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub name: String,
    pub size_on_disk: u64,
    pub empty: bool,
}

/// Arguments of a bounded `find`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindRequest {
    pub filter: Document,
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    pub limit: u32,
}

/// Figures reported by `collStats`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionStatistics {
    pub document_count: u64,
    pub size_bytes: u64,
    pub storage_size_bytes: u64,
    pub index_count: u64,
    pub total_index_size_bytes: u64,
    pub avg_document_size_bytes: f64,
}

/// Documents from an aggregation capped at a limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateBatch {
    pub documents: Vec<Document>,
    /// The pipeline produced more documents than the limit.
    pub truncated: bool,
}

/// An authenticated, read-only database client.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Version string reported by `buildInfo` at connect time.
    fn server_version(&self) -> &str;

    async fn list_databases(&self) -> Result<Vec<DatabaseInfo>, SessionError>;

    async fn list_database_names(&self) -> Result<Vec<String>, SessionError>;

    async fn list_collection_names(&self, database: &str) -> Result<Vec<String>, SessionError>;

    async fn find(
        &self,
        database: &str,
        collection: &str,
        request: FindRequest,
    ) -> Result<Vec<Document>, SessionError>;

    /// Exact count for a non-empty filter, metadata estimate otherwise.
    async fn count_documents(
        &self,
        database: &str,
        collection: &str,
        filter: Document,
    ) -> Result<u64, SessionError>;

    async fn aggregate(
        &self,
        database: &str,
        collection: &str,
        pipeline: Vec<Document>,
        limit: u32,
    ) -> Result<AggregateBatch, SessionError>;

    async fn collection_stats(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<CollectionStatistics, SessionError>;

    /// Close pooled connections. Must not fail.
    async fn shutdown(&self);
}

/// Builds clients that talk to `127.0.0.1:<local_port>`.
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    /// Connect, authenticate and verify the server answers `ping`.
    async fn connect(
        &self,
        local_port: u16,
        settings: &DatabaseSettings,
        credentials: &DatabaseCredentials,
    ) -> Result<Arc<dyn DatabaseClient>, SessionError>;
}
