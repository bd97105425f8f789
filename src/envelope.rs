//! Strict request-envelope schema validation.
//!
//! Incoming bodies are parsed into a typed [`RpcEnvelope`] or rejected with
//! a structured list of field violations. Expected validation failures are
//! data, not panics: callers get every offending field path in one pass.

use serde::Serialize;
use serde_json::Value;

use crate::error::{FieldViolation, GatewayError};

/// Request id per JSON-RPC 2.0: integer, string, or explicit null.
///
/// Fractional numbers, booleans, and structured values are rejected during
/// validation rather than silently coerced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(i64),
    String(String),
    Null,
}

/// A validated protocol request envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcEnvelope {
    pub method: String,
    pub params: Option<Value>,
    pub id: Option<RpcId>,
}

impl RpcEnvelope {
    /// A request without an id expects no response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Re-serialize the envelope for dispatch to the protocol engine.
    pub fn to_value(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("jsonrpc".to_string(), Value::String("2.0".to_string()));
        obj.insert("method".to_string(), Value::String(self.method.clone()));
        if let Some(params) = &self.params {
            obj.insert("params".to_string(), params.clone());
        }
        if let Some(id) = &self.id {
            let id_value = match id {
                RpcId::Number(n) => Value::from(*n),
                RpcId::String(s) => Value::String(s.clone()),
                RpcId::Null => Value::Null,
            };
            obj.insert("id".to_string(), id_value);
        }
        Value::Object(obj)
    }

    /// The id as a JSON value for echoing into responses.
    pub fn id_value(&self) -> Value {
        match &self.id {
            Some(RpcId::Number(n)) => Value::from(*n),
            Some(RpcId::String(s)) => Value::String(s.clone()),
            Some(RpcId::Null) | None => Value::Null,
        }
    }
}

const KNOWN_FIELDS: &[&str] = &["jsonrpc", "method", "params", "id"];

/// Parse and validate a request body against the envelope schema.
///
/// # Errors
///
/// `ParseError` when the body is not JSON at all; `InvalidEnvelope` with
/// one [`FieldViolation`] per offending field otherwise.
pub fn parse_envelope(body: &[u8]) -> Result<RpcEnvelope, GatewayError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| GatewayError::ParseError {
            details: e.to_string(),
        })?;

    let Some(obj) = value.as_object() else {
        return Err(GatewayError::InvalidEnvelope {
            violations: vec![FieldViolation::new("$", "request body must be a JSON object")],
        });
    };

    let mut violations = Vec::new();

    match obj.get("jsonrpc") {
        Some(Value::String(v)) if v == "2.0" => {}
        Some(_) => violations.push(FieldViolation::new(
            "jsonrpc",
            "must be the string \"2.0\"",
        )),
        None => violations.push(FieldViolation::new("jsonrpc", "field is required")),
    }

    let method = match obj.get("method") {
        Some(Value::String(m)) if !m.is_empty() => Some(m.clone()),
        Some(Value::String(_)) => {
            violations.push(FieldViolation::new("method", "must not be empty"));
            None
        }
        Some(_) => {
            violations.push(FieldViolation::new("method", "must be a string"));
            None
        }
        None => {
            violations.push(FieldViolation::new("method", "field is required"));
            None
        }
    };

    let params = match obj.get("params") {
        Some(p @ (Value::Object(_) | Value::Array(_))) => Some(p.clone()),
        Some(_) => {
            violations.push(FieldViolation::new(
                "params",
                "must be an object or an array",
            ));
            None
        }
        None => None,
    };

    let id = match obj.get("id") {
        Some(Value::Null) => Some(RpcId::Null),
        Some(Value::String(s)) => Some(RpcId::String(s.clone())),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => Some(RpcId::Number(i)),
            None => {
                violations.push(FieldViolation::new(
                    "id",
                    "must be an integer, a string, or null",
                ));
                None
            }
        },
        Some(_) => {
            violations.push(FieldViolation::new(
                "id",
                "must be an integer, a string, or null",
            ));
            None
        }
        None => None,
    };

    for key in obj.keys() {
        if !KNOWN_FIELDS.contains(&key.as_str()) {
            violations.push(FieldViolation::new(key, "unknown field"));
        }
    }

    if !violations.is_empty() {
        return Err(GatewayError::InvalidEnvelope { violations });
    }

    // method is always Some when no violations were recorded.
    Ok(RpcEnvelope {
        method: method.unwrap_or_default(),
        params,
        id,
    })
}
