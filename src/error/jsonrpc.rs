//! JSON-RPC 2.0 error response structures.

use serde::{Deserialize, Serialize};

/// JSON-RPC 2.0 error object.
///
/// Embedded in error responses on every transport and follows the
/// JSON-RPC 2.0 specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code (standard or TaskGate-specific)
    pub code: i32,

    /// Human-readable error message
    pub message: String,

    /// Additional error data (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ErrorData>,
}

/// Additional error context data.
///
/// All fields are safe for client consumption (no raw credentials,
/// no internal URLs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    /// Unique identifier for tracing this error in logs
    pub correlation_id: String,

    /// Machine-readable error type name
    pub error_type: String,

    /// Type-specific error details (sanitized)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Suggested retry delay in seconds (for retriable errors)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// A single schema violation in a request envelope.
///
/// Produced by envelope validation: one entry per offending field, with
/// the field path and a message describing the constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldViolation {
    /// Path of the offending field (top-level field name, or "$" for the
    /// envelope itself)
    pub path: String,
    /// Description of the constraint that was violated
    pub message: String,
}

impl FieldViolation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jsonrpc_error_serialization() {
        let error = JsonRpcError {
            code: -32003,
            message: "Rate limit exceeded".to_string(),
            data: Some(ErrorData {
                correlation_id: "550e8400-e29b-41d4-a716-446655440000".to_string(),
                error_type: "rate_limited".to_string(),
                details: Some(serde_json::json!({ "burst": 120 })),
                retry_after: Some(60),
            }),
        };

        let json = serde_json::to_value(&error).unwrap();

        assert_eq!(json["code"], -32003);
        assert_eq!(json["message"], "Rate limit exceeded");
        assert_eq!(
            json["data"]["correlation_id"],
            "550e8400-e29b-41d4-a716-446655440000"
        );
        assert_eq!(json["data"]["error_type"], "rate_limited");
        assert_eq!(json["data"]["details"]["burst"], 120);
        assert_eq!(json["data"]["retry_after"], 60);
    }

    #[test]
    fn test_error_without_data() {
        let error = JsonRpcError {
            code: -32700,
            message: "Parse error".to_string(),
            data: None,
        };

        let json = serde_json::to_string(&error).unwrap();

        // data field should be omitted when None
        assert!(!json.contains("\"data\""));
    }

    #[test]
    fn test_optional_fields_omitted() {
        let error = JsonRpcError {
            code: -32000,
            message: "Internal error".to_string(),
            data: Some(ErrorData {
                correlation_id: "test-id".to_string(),
                error_type: "internal_error".to_string(),
                details: None,
                retry_after: None,
            }),
        };

        let json_str = serde_json::to_string(&error).unwrap();

        assert!(!json_str.contains("\"details\""));
        assert!(!json_str.contains("\"retry_after\""));
    }

    #[test]
    fn test_field_violation_serialization() {
        let violation = FieldViolation::new("method", "must be a string");
        let json = serde_json::to_value(&violation).unwrap();
        assert_eq!(json["path"], "method");
        assert_eq!(json["message"], "must be a string");
    }
}
