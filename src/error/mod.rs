//! Error handling for TaskGate.
//!
//! This module defines all error types the gateway can surface to clients
//! and provides JSON-RPC 2.0 compliant error response formatting.
//!
//! ## Module Organization
//!
//! - `jsonrpc` - JSON-RPC 2.0 error response structures
//! - `GatewayError` - the gateway error taxonomy

pub mod jsonrpc;

pub use jsonrpc::{ErrorData, FieldViolation, JsonRpcError};

use http::StatusCode;
use thiserror::Error;

/// All error outcomes the gateway converts into structured responses.
///
/// Each variant maps to a stable JSON-RPC error code and an HTTP status so
/// clients can branch: re-authenticate on authentication codes, back off on
/// rate-limit codes, fix the payload on validation codes.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GatewayError {
    // Authentication errors
    /// No bearer credential present on the request.
    #[error("Authentication required")]
    MissingCredentials,

    /// The identity endpoint rejected the credential as invalid or expired.
    #[error("Invalid or expired credential: {reason}")]
    InvalidToken {
        /// Upstream rejection reason
        reason: String,
    },

    /// The identity endpoint recognized the credential but refused it.
    #[error("Credential is not permitted: {reason}")]
    Forbidden {
        /// Upstream refusal reason
        reason: String,
    },

    /// The credential could not be validated because the identity endpoint
    /// was unreachable or misbehaved. Authentication fails closed.
    #[error("Credential validation failed: {reason}")]
    IdentityUnavailable {
        /// What went wrong talking to the identity endpoint
        reason: String,
    },

    // Rate limiting
    /// The credential exceeded its burst allowance in the trailing window.
    #[error("Rate limit exceeded: {burst} requests per window")]
    RateLimited {
        /// Advertised sustained rate (reporting only)
        limit: u32,
        /// Hard-enforced ceiling for the trailing window
        burst: u32,
        /// Seconds until a fresh window opens
        retry_after_secs: u64,
        /// Unix timestamp (seconds) at which the window resets
        reset_at: i64,
    },

    // Validation errors
    /// The request body is not valid JSON.
    #[error("Invalid JSON: {details}")]
    ParseError {
        /// Description of the parse failure
        details: String,
    },

    /// The request body is valid JSON but violates the envelope schema.
    #[error("Invalid request envelope")]
    InvalidEnvelope {
        /// One entry per offending field
        violations: Vec<FieldViolation>,
    },

    /// The request body exceeds the configured size limit.
    #[error("Request body exceeds maximum size of {limit_bytes} bytes")]
    PayloadTooLarge {
        /// The configured maximum, in bytes
        limit_bytes: usize,
    },

    /// A message was submitted against an event stream that is not open.
    #[error("No open event stream for session '{session_id}'")]
    StreamNotFound {
        /// The session id the message referenced
        session_id: String,
    },

    // Operational errors
    /// The shared store backing the quota gate is unreachable. Quota
    /// checks fail closed, never silently unlimited.
    #[error("Service temporarily unavailable: {reason}")]
    StoreUnavailable {
        /// What went wrong talking to the store
        reason: String,
    },

    /// The protocol engine failed to dispatch the request.
    #[error("Internal error. Reference: {correlation_id}")]
    EngineFailure {
        /// Correlation id for debugging (the underlying cause is logged,
        /// never surfaced)
        correlation_id: String,
    },

    /// Unexpected internal failure (including request timeouts).
    #[error("Internal error. Reference: {correlation_id}")]
    Internal {
        /// Correlation id for debugging
        correlation_id: String,
    },
}

impl GatewayError {
    /// Maps the error to a stable JSON-RPC 2.0 error code.
    ///
    /// Authentication is −32001, rate limiting −32003, validation the
    /// −32600 family (−32700 for unparseable JSON), internal/unavailable
    /// −32000.
    pub fn jsonrpc_code(&self) -> i32 {
        match self {
            Self::MissingCredentials
            | Self::InvalidToken { .. }
            | Self::Forbidden { .. }
            | Self::IdentityUnavailable { .. } => -32001,

            Self::RateLimited { .. } => -32003,

            Self::ParseError { .. } => -32700,
            Self::InvalidEnvelope { .. }
            | Self::PayloadTooLarge { .. }
            | Self::StreamNotFound { .. } => -32600,

            Self::StoreUnavailable { .. } | Self::EngineFailure { .. } | Self::Internal { .. } => {
                -32000
            }
        }
    }

    /// Maps the error to the HTTP status of the structured response.
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::MissingCredentials
            | Self::InvalidToken { .. }
            | Self::Forbidden { .. }
            | Self::IdentityUnavailable { .. } => StatusCode::UNAUTHORIZED,

            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            Self::ParseError { .. }
            | Self::InvalidEnvelope { .. }
            | Self::PayloadTooLarge { .. } => StatusCode::BAD_REQUEST,

            Self::StreamNotFound { .. } => StatusCode::NOT_FOUND,

            Self::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,

            Self::EngineFailure { .. } | Self::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the error type name for logs and error data.
    pub fn error_type_name(&self) -> &'static str {
        match self {
            Self::MissingCredentials => "authentication_required",
            Self::InvalidToken { .. } => "invalid_token",
            Self::Forbidden { .. } => "forbidden",
            Self::IdentityUnavailable { .. } => "validation_error",
            Self::RateLimited { .. } => "rate_limited",
            Self::ParseError { .. } => "parse_error",
            Self::InvalidEnvelope { .. } => "invalid_envelope",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::StreamNotFound { .. } => "stream_not_found",
            Self::StoreUnavailable { .. } => "service_unavailable",
            Self::EngineFailure { .. } => "engine_failure",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Returns the retry-after hint for retriable errors.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimited {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Whether this is an expected outcome (logged at info/warn) rather
    /// than a bug (logged at error severity).
    pub fn is_expected(&self) -> bool {
        !matches!(
            self,
            Self::EngineFailure { .. } | Self::Internal { .. } | Self::StoreUnavailable { .. }
        )
    }

    /// Returns safe details for client consumption (no sensitive data).
    pub fn safe_details(&self) -> Option<serde_json::Value> {
        match self {
            Self::RateLimited {
                limit,
                burst,
                reset_at,
                ..
            } => Some(serde_json::json!({
                "limit": limit,
                "burst": burst,
                "reset_at": reset_at,
            })),
            Self::InvalidEnvelope { violations } => Some(serde_json::json!({
                "violations": violations,
            })),
            Self::PayloadTooLarge { limit_bytes } => Some(serde_json::json!({
                "limit_bytes": limit_bytes,
            })),
            Self::StreamNotFound { session_id } => Some(serde_json::json!({
                "session_id": session_id,
            })),
            // Authentication reasons ride the message; store/engine causes
            // stay in the logs.
            _ => None,
        }
    }

    /// Converts the error to a JSON-RPC error object.
    pub fn to_jsonrpc_error(&self, correlation_id: &str) -> JsonRpcError {
        JsonRpcError {
            code: self.jsonrpc_code(),
            message: self.to_string(),
            data: Some(ErrorData {
                correlation_id: correlation_id.to_string(),
                error_type: self.error_type_name().to_string(),
                details: self.safe_details(),
                retry_after: self.retry_after(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(GatewayError::MissingCredentials.jsonrpc_code(), -32001);
        assert_eq!(
            GatewayError::InvalidToken {
                reason: "expired".to_string()
            }
            .jsonrpc_code(),
            -32001
        );
        assert_eq!(
            GatewayError::Forbidden {
                reason: "revoked".to_string()
            }
            .jsonrpc_code(),
            -32001
        );
        assert_eq!(
            GatewayError::IdentityUnavailable {
                reason: "connect refused".to_string()
            }
            .jsonrpc_code(),
            -32001
        );
        assert_eq!(
            GatewayError::RateLimited {
                limit: 60,
                burst: 120,
                retry_after_secs: 60,
                reset_at: 0
            }
            .jsonrpc_code(),
            -32003
        );
        assert_eq!(
            GatewayError::ParseError {
                details: "eof".to_string()
            }
            .jsonrpc_code(),
            -32700
        );
        assert_eq!(
            GatewayError::InvalidEnvelope { violations: vec![] }.jsonrpc_code(),
            -32600
        );
        assert_eq!(
            GatewayError::PayloadTooLarge { limit_bytes: 1024 }.jsonrpc_code(),
            -32600
        );
        assert_eq!(
            GatewayError::StoreUnavailable {
                reason: "down".to_string()
            }
            .jsonrpc_code(),
            -32000
        );
        assert_eq!(
            GatewayError::Internal {
                correlation_id: "c".to_string()
            }
            .jsonrpc_code(),
            -32000
        );
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            GatewayError::MissingCredentials.http_status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::RateLimited {
                limit: 60,
                burst: 120,
                retry_after_secs: 60,
                reset_at: 0
            }
            .http_status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            GatewayError::PayloadTooLarge { limit_bytes: 1024 }.http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::StreamNotFound {
                session_id: "s".to_string()
            }
            .http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::StoreUnavailable {
                reason: "down".to_string()
            }
            .http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::EngineFailure {
                correlation_id: "c".to_string()
            }
            .http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_retry_after_only_on_rate_limit() {
        assert_eq!(
            GatewayError::RateLimited {
                limit: 60,
                burst: 120,
                retry_after_secs: 42,
                reset_at: 0
            }
            .retry_after(),
            Some(42)
        );
        assert_eq!(GatewayError::MissingCredentials.retry_after(), None);
    }

    #[test]
    fn test_engine_failure_is_opaque() {
        let err = GatewayError::EngineFailure {
            correlation_id: "abc-123".to_string(),
        };
        assert_eq!(err.to_string(), "Internal error. Reference: abc-123");
        assert!(err.safe_details().is_none());
        assert!(!err.is_expected());
    }

    #[test]
    fn test_violations_in_error_data() {
        let err = GatewayError::InvalidEnvelope {
            violations: vec![FieldViolation::new("jsonrpc", "must be the string \"2.0\"")],
        };
        let rpc = err.to_jsonrpc_error("cid-1");
        assert_eq!(rpc.code, -32600);
        let data = rpc.data.unwrap();
        assert_eq!(data.correlation_id, "cid-1");
        assert_eq!(data.error_type, "invalid_envelope");
        let details = data.details.unwrap();
        assert_eq!(details["violations"][0]["path"], "jsonrpc");
    }

    #[test]
    fn test_expected_outcomes_classified() {
        assert!(GatewayError::MissingCredentials.is_expected());
        assert!(
            GatewayError::RateLimited {
                limit: 60,
                burst: 120,
                retry_after_secs: 60,
                reset_at: 0
            }
            .is_expected()
        );
        assert!(
            !GatewayError::Internal {
                correlation_id: "c".to_string()
            }
            .is_expected()
        );
    }
}
