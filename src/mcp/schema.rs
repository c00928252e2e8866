//! JSON Schema helpers for MCP-compliant schemas.
//!
//! Generates standard JSON Schema without Rust-specific formats like "uint"
//! that LLMs may not understand correctly.

use schemars::Schema;
use schemars::json_schema;

/// Unsigned integer schema: `{"type": "integer", "minimum": 0}`
///
/// Use with `#[schemars(schema_with = "crate::mcp::schema::uint")]` on unsigned fields.
pub fn uint(_generator: &mut schemars::SchemaGenerator) -> Schema {
    json_schema!({
        "type": "integer",
        "minimum": 0
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::{JsonSchema, SchemaGenerator};

    fn assert_no_uint<T: JsonSchema>(name: &str) {
        let schema = SchemaGenerator::default().into_root_schema_for::<T>();
        let json_str = serde_json::to_string(&schema).expect("Failed to serialize schema");

        assert!(
            !json_str.contains("\"uint"),
            "{} schema should not contain 'uint' format: {}",
            name,
            json_str
        );
    }

    #[test]
    fn test_uint_schema_structure() {
        let mut generator = SchemaGenerator::default();
        let schema = uint(&mut generator);

        let json = serde_json::to_value(&schema).expect("Failed to serialize schema");

        assert_eq!(json.get("type"), Some(&serde_json::json!("integer")));
        assert_eq!(json.get("minimum"), Some(&serde_json::json!(0)));
        assert!(json.get("format").is_none(), "Should not have format field");
    }

    #[test]
    fn test_session_info_schema_no_uint() {
        assert_no_uint::<crate::mcp::types::SessionInfo>("SessionInfo");
    }

    #[test]
    fn test_connect_response_schema_no_uint() {
        assert_no_uint::<crate::mcp::types::ConnectResponse>("ConnectResponse");
    }

    #[test]
    fn test_database_list_response_schema_no_uint() {
        assert_no_uint::<crate::mcp::types::DatabaseListResponse>("DatabaseListResponse");
    }

    #[test]
    fn test_query_response_schema_no_uint() {
        assert_no_uint::<crate::mcp::types::QueryResponse>("QueryResponse");
    }

    #[test]
    fn test_aggregate_and_count_schemas_no_uint() {
        assert_no_uint::<crate::mcp::types::AggregateResponse>("AggregateResponse");
        assert_no_uint::<crate::mcp::types::CountResponse>("CountResponse");
    }

    #[test]
    fn test_collection_stats_schema_no_uint() {
        assert_no_uint::<crate::mcp::types::CollectionStats>("CollectionStats");
    }

    #[test]
    fn test_session_status_response_schema_no_uint() {
        assert_no_uint::<crate::mcp::types::SessionStatusResponse>("SessionStatusResponse");
    }
}
