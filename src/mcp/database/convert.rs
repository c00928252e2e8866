//! JSON <-> BSON conversion for tool arguments and results.
//!
//! Tool arguments arrive as JSON text. MongoDB extended JSON is accepted,
//! so `{"_id": {"$oid": "..."}}` and `{"at": {"$date": "..."}}` match typed
//! values. Results are rendered for readability: ObjectIds become plain hex
//! strings, datetimes become RFC 3339 strings, and everything else follows
//! relaxed extended JSON.

use mongodb::bson::{Bson, Document};
use serde_json::Value;

use crate::mcp::error::SessionError;

/// Parse a JSON object into a BSON document. Blank input is an empty
/// document.
pub fn parse_document(text: &str, what: &str) -> Result<Document, SessionError> {
    if text.trim().is_empty() {
        return Ok(Document::new());
    }
    match parse_bson(text, what)? {
        Bson::Document(document) => Ok(document),
        other => Err(SessionError::Query(format!(
            "{} must be a JSON object, got {}",
            what,
            type_name(&other)
        ))),
    }
}

/// Like [`parse_document`], but blank input means "not given".
pub fn parse_optional_document(
    text: Option<&str>,
    what: &str,
) -> Result<Option<Document>, SessionError> {
    match text {
        Some(text) if !text.trim().is_empty() => parse_document(text, what).map(Some),
        _ => Ok(None),
    }
}

/// Parse an aggregation pipeline: a JSON array of stage objects.
pub fn parse_pipeline(text: &str) -> Result<Vec<Document>, SessionError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let stages = match parse_bson(text, "pipeline")? {
        Bson::Array(stages) => stages,
        other => {
            return Err(SessionError::Query(format!(
                "pipeline must be a JSON array, got {}",
                type_name(&other)
            )));
        }
    };

    stages
        .into_iter()
        .enumerate()
        .map(|(index, stage)| match stage {
            Bson::Document(stage) => {
                reject_write_stage(index, &stage)?;
                Ok(stage)
            }
            other => Err(SessionError::Query(format!(
                "pipeline stage {} must be a JSON object, got {}",
                index,
                type_name(&other)
            ))),
        })
        .collect()
}

/// Stages that write to the server.
const WRITE_STAGES: &[&str] = &["$out", "$merge"];

fn reject_write_stage(index: usize, stage: &Document) -> Result<(), SessionError> {
    match stage.keys().find(|key| WRITE_STAGES.contains(&key.as_str())) {
        Some(key) => Err(SessionError::Query(format!(
            "pipeline stage {} uses {}, which writes to the server; only read stages are allowed",
            index, key
        ))),
        None => Ok(()),
    }
}

fn parse_bson(text: &str, what: &str) -> Result<Bson, SessionError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| SessionError::Query(format!("{} is not valid JSON: {}", what, e)))?;
    Bson::try_from(value).map_err(|e| {
        SessionError::Query(format!("{} is not valid extended JSON: {}", what, e))
    })
}

fn type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Array(_) => "an array",
        Bson::Document(_) => "an object",
        Bson::String(_) => "a string",
        Bson::Boolean(_) => "a boolean",
        Bson::Null => "null",
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => "a number",
        _ => "a scalar value",
    }
}

/// Render a result document as JSON.
pub fn document_to_json(document: Document) -> Value {
    Value::Object(
        document
            .into_iter()
            .map(|(key, value)| (key, bson_to_json(value)))
            .collect(),
    )
}

fn bson_to_json(value: Bson) -> Value {
    match value {
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(at) => match at.try_to_rfc3339_string() {
            Ok(rendered) => Value::String(rendered),
            Err(_) => Bson::DateTime(at).into_relaxed_extjson(),
        },
        Bson::Document(document) => document_to_json(document),
        Bson::Array(items) => Value::Array(items.into_iter().map(bson_to_json).collect()),
        other => other.into_relaxed_extjson(),
    }
}
