//! Serializable response types for the MongoDB tools.
//!
//! All types implement `Serialize`, `Deserialize`, and `JsonSchema` for MCP
//! protocol compatibility. Unsigned fields use [`crate::mcp::schema::uint`]
//! so the published schemas carry no Rust-specific `uint` formats.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata of the active tunnel/session pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SessionInfo {
    pub session_id: String,
    /// Local forward endpoint (`127.0.0.1:<port>`)
    pub local_address: String,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub local_port: u16,
    /// `user@bastion:port`
    pub bastion: String,
    /// Database endpoint as seen from the bastion
    pub remote: String,
    pub server_version: String,
    /// RFC3339 timestamp
    pub connected_at: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ConnectResponse {
    pub session: SessionInfo,
    /// True when an already established session was returned
    pub reused: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DatabaseSummary {
    pub name: String,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub size_on_disk: u64,
    pub empty: bool,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct DatabaseListResponse {
    pub databases: Vec<DatabaseSummary>,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct CollectionListResponse {
    pub database: String,
    /// Collection names, sorted
    pub collections: Vec<String>,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct QueryResponse {
    pub database: String,
    pub collection: String,
    /// Limit that was applied
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub limit: u32,
    /// Matching documents (ObjectIds as hex, dates as RFC3339)
    pub documents: Vec<Value>,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct CountResponse {
    pub database: String,
    pub collection: String,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub count: u64,
    /// True when the count came from collection metadata (empty query)
    pub estimated: bool,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct AggregateResponse {
    pub database: String,
    pub collection: String,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub limit: u32,
    pub documents: Vec<Value>,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub count: usize,
    /// The pipeline produced more documents than `limit`
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CollectionStats {
    pub database: String,
    pub collection: String,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub document_count: u64,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub size_bytes: u64,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub storage_size_bytes: u64,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub index_count: u64,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub total_index_size_bytes: u64,
    pub avg_document_size_bytes: f64,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct DisconnectResponse {
    /// False when there was no session to close
    pub disconnected: bool,
    pub message: String,
}

/// Lifecycle state of the process-wide session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Disconnected,
    /// `connect` is establishing the tunnel and database client
    Connecting,
    Connected,
    /// `disconnect` is tearing the session down
    Disconnecting,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SessionStatusResponse {
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionInfo>,
    /// Whether the tunnel still forwards traffic (only when connected)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel_alive: Option<bool>,
}
