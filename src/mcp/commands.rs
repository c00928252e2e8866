//! MCP MongoDB tools.
//!
//! - `connect`: Open the SSH tunnel and authenticate to MongoDB through it
//! - `list_databases`: List databases with their size on disk
//! - `list_collections`: List the collections of a database
//! - `query_collection`: Run a bounded `find`
//! - `count_documents`: Count documents matching a filter
//! - `aggregate`: Run a bounded aggregation pipeline
//! - `get_collection_stats`: Size and index figures of a collection
//! - `session_status`: Report the session lifecycle state
//! - `disconnect`: Close the database client and the tunnel
//!
//! Failures are returned as `"<Kind>: <message>"` so callers can branch on
//! the stable error kind.

use std::sync::Arc;

use poem_mcpserver::{Tools, tool::StructuredContent};
use tracing::{error, info};

use super::config::ConnectionProfile;
use super::error::SessionError;
use super::session::{QueryRequest, SessionManager};
use super::types::{
    AggregateResponse, CollectionListResponse, CollectionStats, ConnectResponse, CountResponse,
    DatabaseListResponse, DatabaseSummary, DisconnectResponse, QueryResponse,
    SessionStatusResponse,
};

/// MCP MongoDB tool implementation.
///
/// Every MCP session served by the process shares the same
/// [`SessionManager`], and therefore the same tunnel.
pub struct McpMongoCommands {
    sessions: Arc<SessionManager>,
}

impl McpMongoCommands {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }
}

fn tool_error(tool: &str, e: SessionError) -> String {
    let message = e.to_tool_message();
    error!("{} failed: {}", tool, message);
    message
}

#[Tools]
impl McpMongoCommands {
    /// Open the SSH tunnel to the bastion and authenticate to MongoDB through it.
    ///
    /// Connection settings and credentials come from the server environment.
    /// Calling `connect` while a healthy session exists returns that session
    /// (`reused: true`).
    async fn connect(&self) -> Result<StructuredContent<ConnectResponse>, String> {
        let profile = ConnectionProfile::from_env().map_err(|e| tool_error("connect", e))?;
        info!(
            "Connecting to MongoDB {}:{} via {}@{}:{}",
            profile.tunnel.remote_host,
            profile.tunnel.remote_port,
            profile.ssh_credentials.username,
            profile.tunnel.bastion_host,
            profile.tunnel.bastion_port
        );

        let outcome = self
            .sessions
            .connect(&profile)
            .await
            .map_err(|e| tool_error("connect", e))?;

        let message = if outcome.reused {
            format!(
                "Reusing existing session {} (MongoDB {} via {}).",
                outcome.session.session_id, outcome.session.server_version, outcome.session.bastion
            )
        } else {
            format!(
                "Connected to MongoDB {} at {} through SSH tunnel {} -> {}.",
                outcome.session.server_version,
                outcome.session.remote,
                outcome.session.local_address,
                outcome.session.bastion
            )
        };

        Ok(StructuredContent(ConnectResponse {
            session: outcome.session,
            reused: outcome.reused,
            message,
        }))
    }

    /// List all databases visible to the authenticated user.
    async fn list_databases(&self) -> Result<StructuredContent<DatabaseListResponse>, String> {
        let databases = self
            .sessions
            .list_databases()
            .await
            .map_err(|e| tool_error("list_databases", e))?;

        let databases: Vec<DatabaseSummary> = databases
            .into_iter()
            .map(|db| DatabaseSummary {
                name: db.name,
                size_on_disk: db.size_on_disk,
                empty: db.empty,
            })
            .collect();

        Ok(StructuredContent(DatabaseListResponse {
            count: databases.len(),
            databases,
        }))
    }

    /// List the collections of a database, sorted by name.
    async fn list_collections(
        &self,
        /// Database name
        database_name: String,
    ) -> Result<StructuredContent<CollectionListResponse>, String> {
        let collections = self
            .sessions
            .list_collections(&database_name)
            .await
            .map_err(|e| tool_error("list_collections", e))?;

        Ok(StructuredContent(CollectionListResponse {
            database: database_name,
            count: collections.len(),
            collections,
        }))
    }

    /// Find documents in a collection.
    ///
    /// Read-only. Results are capped by `limit` (default: 10, env:
    /// DEFAULT_QUERY_LIMIT; maximum: 100, env: MAX_QUERY_LIMIT).
    async fn query_collection(
        &self,
        /// Database name
        database_name: String,
        /// Collection name
        collection_name: String,
        /// Filter as a JSON object, MongoDB extended JSON accepted (e.g. {"status": "active"}). Default: {}
        query: Option<String>,
        /// Maximum number of documents to return
        limit: Option<i64>,
        /// Projection as a JSON object (e.g. {"name": 1, "_id": 0})
        projection: Option<String>,
        /// Sort specification as a JSON object (e.g. {"created_at": -1})
        sort: Option<String>,
    ) -> Result<StructuredContent<QueryResponse>, String> {
        let request = QueryRequest {
            database: database_name,
            collection: collection_name,
            query,
            limit,
            projection,
            sort,
        };
        let outcome = self
            .sessions
            .query_collection(&request)
            .await
            .map_err(|e| tool_error("query_collection", e))?;

        Ok(StructuredContent(QueryResponse {
            database: request.database,
            collection: request.collection,
            limit: outcome.limit,
            count: outcome.documents.len(),
            documents: outcome.documents,
        }))
    }

    /// Count documents matching a filter.
    ///
    /// An empty filter returns the fast metadata estimate.
    async fn count_documents(
        &self,
        /// Database name
        database_name: String,
        /// Collection name
        collection_name: String,
        /// Filter as a JSON object (default: {})
        query: Option<String>,
    ) -> Result<StructuredContent<CountResponse>, String> {
        let outcome = self
            .sessions
            .count_documents(&database_name, &collection_name, query.as_deref())
            .await
            .map_err(|e| tool_error("count_documents", e))?;

        Ok(StructuredContent(CountResponse {
            database: database_name,
            collection: collection_name,
            count: outcome.count,
            estimated: outcome.estimated,
        }))
    }

    /// Run an aggregation pipeline.
    ///
    /// The result is capped by `limit` like `query_collection`; `truncated`
    /// is set when the pipeline produced more documents.
    async fn aggregate(
        &self,
        /// Database name
        database_name: String,
        /// Collection name
        collection_name: String,
        /// Pipeline as a JSON array of stages (e.g. [{"$group": {"_id": "$status", "n": {"$sum": 1}}}])
        pipeline: String,
        /// Maximum number of documents to return
        limit: Option<i64>,
    ) -> Result<StructuredContent<AggregateResponse>, String> {
        let outcome = self
            .sessions
            .aggregate(&database_name, &collection_name, &pipeline, limit)
            .await
            .map_err(|e| tool_error("aggregate", e))?;

        Ok(StructuredContent(AggregateResponse {
            database: database_name,
            collection: collection_name,
            limit: outcome.limit,
            count: outcome.documents.len(),
            documents: outcome.documents,
            truncated: outcome.truncated,
        }))
    }

    /// Document count, data size, storage size and index figures of a collection.
    async fn get_collection_stats(
        &self,
        /// Database name
        database_name: String,
        /// Collection name
        collection_name: String,
    ) -> Result<StructuredContent<CollectionStats>, String> {
        let stats = self
            .sessions
            .collection_stats(&database_name, &collection_name)
            .await
            .map_err(|e| tool_error("get_collection_stats", e))?;

        Ok(StructuredContent(CollectionStats {
            database: database_name,
            collection: collection_name,
            document_count: stats.document_count,
            size_bytes: stats.size_bytes,
            storage_size_bytes: stats.storage_size_bytes,
            index_count: stats.index_count,
            total_index_size_bytes: stats.total_index_size_bytes,
            avg_document_size_bytes: stats.avg_document_size_bytes,
        }))
    }

    /// Report whether a session is connected and whether its tunnel is alive.
    async fn session_status(&self) -> StructuredContent<SessionStatusResponse> {
        StructuredContent(self.sessions.status())
    }

    /// Close the MongoDB client and the SSH tunnel. Safe to call repeatedly.
    async fn disconnect(&self) -> StructuredContent<DisconnectResponse> {
        let disconnected = self.sessions.disconnect().await;
        let message = if disconnected {
            "Disconnected from MongoDB and closed the SSH tunnel.".to_string()
        } else {
            "No active session.".to_string()
        };
        StructuredContent(DisconnectResponse {
            disconnected,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poem_mcpserver::tool::Tools as ToolSet;

    fn argument_names(tool: &str) -> Vec<String> {
        let tools = <McpMongoCommands as ToolSet>::list();
        let tool = tools
            .iter()
            .find(|t| t.name == tool)
            .unwrap_or_else(|| panic!("tool {} is not registered", tool));
        tool.input_schema["properties"]
            .as_object()
            .map(|properties| properties.keys().cloned().collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_tools_registered() {
        let names: Vec<&str> = <McpMongoCommands as ToolSet>::list()
            .iter()
            .map(|t| t.name)
            .collect();
        for expected in [
            "connect",
            "list_databases",
            "list_collections",
            "query_collection",
            "get_collection_stats",
            "disconnect",
            "count_documents",
            "aggregate",
            "session_status",
        ] {
            assert!(names.contains(&expected), "missing tool {}", expected);
        }
    }

    #[test]
    fn test_database_tools_use_fixed_argument_names() {
        let list_collections = argument_names("list_collections");
        assert_eq!(list_collections, vec!["database_name".to_string()]);

        let query = argument_names("query_collection");
        for name in ["database_name", "collection_name", "query", "limit"] {
            assert!(query.iter().any(|n| n == name), "query_collection lacks {}", name);
        }

        let mut stats = argument_names("get_collection_stats");
        stats.sort();
        assert_eq!(stats, vec!["collection_name", "database_name"]);

        for tool in ["count_documents", "aggregate"] {
            let names = argument_names(tool);
            assert!(names.iter().any(|n| n == "database_name"), "{}", tool);
            assert!(names.iter().any(|n| n == "collection_name"), "{}", tool);
            assert!(!names.iter().any(|n| n == "database" || n == "collection"));
        }
    }
}
