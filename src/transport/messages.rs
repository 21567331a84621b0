//! Wire message types for the coordinator's statement protocol.
//!
//! Responses from `/v1/statement` and its continuation URIs all share the
//! `QueryResults` shape; every field except `id` is optional.

use crate::error::QueryFailure;
use crate::types::TrinoType;
use serde::{Deserialize, Serialize};

/// Request and response header names used by the protocol.
pub mod headers {
    pub const USER: &str = "x-trino-user";
    pub const SOURCE: &str = "x-trino-source";
    pub const CATALOG: &str = "x-trino-catalog";
    pub const SCHEMA: &str = "x-trino-schema";
    pub const SESSION: &str = "x-trino-session";
    pub const CLIENT_INFO: &str = "x-trino-client-info";
    pub const CLIENT_TAGS: &str = "x-trino-client-tags";
    pub const TIME_ZONE: &str = "x-trino-time-zone";

    pub const SET_CATALOG: &str = "x-trino-set-catalog";
    pub const SET_SCHEMA: &str = "x-trino-set-schema";
    pub const SET_SESSION: &str = "x-trino-set-session";
    pub const CLEAR_SESSION: &str = "x-trino-clear-session";
}

/// One batch of the statement protocol.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResults {
    /// Coordinator query id
    #[serde(default)]
    pub id: String,
    /// Web UI link for the query
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info_uri: Option<String>,
    /// Continuation URI; absent once the query has finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_uri: Option<String>,
    /// Column schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<Column>>,
    /// Row data in wire order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Vec<serde_json::Value>>>,
    /// Execution statistics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<StatementStats>,
    /// Terminal query error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<QueryErrorInfo>,
    /// Non-fatal warnings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
    /// Statement kind for non-query statements, e.g. `INSERT`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_type: Option<String>,
    /// Rows affected by a DML statement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_count: Option<i64>,
    /// Minimum delay before polling `next_uri`, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_hint_millis: Option<u64>,
}

impl QueryResults {
    /// Number of rows carried by this batch.
    pub fn row_count(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    /// Column name
    pub name: String,
    /// Type signature as text, e.g. `varchar(10)`
    #[serde(rename = "type")]
    pub type_name: String,
    /// Structured type signature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_signature: Option<ClientTypeSignature>,
}

impl Column {
    /// Create a column from a name and type text.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            type_signature: None,
        }
    }

    /// Parsed Trino type of this column.
    pub fn trino_type(&self) -> TrinoType {
        TrinoType::parse(&self.type_name)
    }

    /// Whether two column definitions describe the same column.
    ///
    /// The structured signature is informational and not compared.
    pub fn same_definition(&self, other: &Column) -> bool {
        self.name == other.name && self.type_name.eq_ignore_ascii_case(&other.type_name)
    }
}

/// Structured type signature.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientTypeSignature {
    pub raw_type: String,
    #[serde(default)]
    pub arguments: Vec<serde_json::Value>,
}

/// Query error object.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryErrorInfo {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_state: Option<String>,
    #[serde(default)]
    pub error_code: i32,
    #[serde(default)]
    pub error_name: String,
    #[serde(default)]
    pub error_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_location: Option<ErrorLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_info: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLocation {
    pub line_number: u32,
    pub column_number: u32,
}

impl From<QueryErrorInfo> for QueryFailure {
    fn from(info: QueryErrorInfo) -> Self {
        QueryFailure {
            message: info.message,
            error_code: info.error_code,
            error_name: info.error_name,
            error_type: info.error_type,
            sql_state: info.sql_state,
            location: info
                .error_location
                .map(|loc| (loc.line_number, loc.column_number)),
        }
    }
}

/// Warning attached to a batch.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Warning {
    #[serde(default)]
    pub warning_code: Option<WarningCode>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WarningCode {
    pub code: i32,
    pub name: String,
}

/// Execution statistics reported with each batch.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatementStats {
    /// Query state, e.g. `QUEUED`, `RUNNING`, `FINISHED`
    pub state: String,
    pub queued: bool,
    pub scheduled: bool,
    pub nodes: u32,
    pub total_splits: u64,
    pub queued_splits: u64,
    pub running_splits: u64,
    pub completed_splits: u64,
    pub cpu_time_millis: u64,
    pub wall_time_millis: u64,
    pub queued_time_millis: u64,
    pub elapsed_time_millis: u64,
    pub processed_rows: u64,
    pub processed_bytes: u64,
    pub peak_memory_bytes: u64,
    pub progress_percentage: Option<f64>,
}

/// Body of `GET /v1/info`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerInfo {
    pub node_version: NodeVersion,
    pub environment: Option<String>,
    pub coordinator: bool,
    pub starting: bool,
    pub uptime: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeVersion {
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_info_parsing() {
        let info: ServerInfo = serde_json::from_str(
            r#"{"nodeVersion":{"version":"435"},"environment":"test","coordinator":true,"starting":false,"uptime":"1.00m"}"#,
        )
        .unwrap();
        assert_eq!(info.node_version.version, "435");
        assert!(info.coordinator);
        assert_eq!(info.environment.as_deref(), Some("test"));
    }

    const RUNNING_BATCH: &str = r#"{
        "id": "20240101_000000_00001_abcde",
        "infoUri": "http://coordinator:8080/ui/query.html?20240101_000000_00001_abcde",
        "nextUri": "http://coordinator:8080/v1/statement/executing/20240101_000000_00001_abcde/y1/1",
        "columns": [
            {"name": "_col0", "type": "integer",
             "typeSignature": {"rawType": "integer", "arguments": []}}
        ],
        "data": [[1], [2]],
        "stats": {"state": "RUNNING", "queued": false, "scheduled": true, "nodes": 1,
                  "processedRows": 2, "progressPercentage": 50.0},
        "waitHintMillis": 25
    }"#;

    #[test]
    fn test_deserialize_running_batch() {
        let results: QueryResults = serde_json::from_str(RUNNING_BATCH).unwrap();

        assert_eq!(results.id, "20240101_000000_00001_abcde");
        assert!(results.next_uri.as_deref().unwrap().ends_with("/y1/1"));
        assert_eq!(results.row_count(), 2);
        assert_eq!(results.wait_hint_millis, Some(25));

        let columns = results.columns.unwrap();
        assert_eq!(columns[0].name, "_col0");
        assert_eq!(columns[0].type_name, "integer");
        assert_eq!(columns[0].trino_type(), TrinoType::Integer);

        let stats = results.stats.unwrap();
        assert_eq!(stats.state, "RUNNING");
        assert_eq!(stats.processed_rows, 2);
        assert_eq!(stats.progress_percentage, Some(50.0));
    }

    #[test]
    fn test_deserialize_minimal_batch() {
        let results: QueryResults = serde_json::from_str(r#"{"id": "q1"}"#).unwrap();
        assert!(results.next_uri.is_none());
        assert!(results.columns.is_none());
        assert!(results.error.is_none());
        assert_eq!(results.row_count(), 0);
        assert!(results.warnings.is_empty());
    }

    #[test]
    fn test_deserialize_error_batch() {
        let json = r#"{
            "id": "q1",
            "error": {
                "message": "line 1:8: Column 'x' cannot be resolved",
                "errorCode": 47,
                "errorName": "COLUMN_NOT_FOUND",
                "errorType": "USER_ERROR",
                "errorLocation": {"lineNumber": 1, "columnNumber": 8}
            }
        }"#;
        let results: QueryResults = serde_json::from_str(json).unwrap();
        let failure = QueryFailure::from(results.error.unwrap());

        assert_eq!(failure.error_name, "COLUMN_NOT_FOUND");
        assert_eq!(failure.error_code, 47);
        assert_eq!(failure.location, Some((1, 8)));
    }

    #[test]
    fn test_deserialize_update_batch() {
        let json = r#"{"id": "q2", "updateType": "INSERT", "updateCount": 3,
                       "warnings": [{"warningCode": {"code": 1, "name": "DEPRECATED"}, "message": "old"}]}"#;
        let results: QueryResults = serde_json::from_str(json).unwrap();
        assert_eq!(results.update_type.as_deref(), Some("INSERT"));
        assert_eq!(results.update_count, Some(3));
        assert_eq!(results.warnings.len(), 1);
        assert_eq!(results.warnings[0].message, "old");
    }

    #[test]
    fn test_column_same_definition() {
        let a = Column::new("id", "bigint");
        let b = Column::new("id", "BIGINT");
        let c = Column::new("id", "integer");
        let d = Column::new("key", "bigint");

        assert!(a.same_definition(&b));
        assert!(!a.same_definition(&c));
        assert!(!a.same_definition(&d));
    }
}
