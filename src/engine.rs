//! Protocol engine dispatch.
//!
//! The engine executes tool calls against a principal-scoped context. It is
//! an external collaborator: the gateway forwards validated envelopes,
//! relays the engine's JSON-RPC response verbatim, and converts transport
//! failures into opaque internal errors at the boundary.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::auth::Principal;
use crate::envelope::RpcEnvelope;

/// Failures talking to the protocol engine.
///
/// None of these reach clients directly; the gateway logs the cause and
/// responds with an opaque correlation-id error.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine unreachable: {0}")]
    Unreachable(String),
    #[error("engine returned status {0}")]
    BadStatus(u16),
    #[error("engine response malformed: {0}")]
    Malformed(String),
}

/// Dispatches validated envelopes against a principal-scoped context.
#[async_trait]
pub trait ProtocolEngine: Send + Sync {
    /// Execute one envelope, returning the engine's full JSON-RPC response.
    async fn dispatch(
        &self,
        principal: &Principal,
        envelope: &RpcEnvelope,
    ) -> Result<Value, EngineError>;
}

/// HTTP implementation forwarding envelopes to a backend engine endpoint.
///
/// The resolved principal rides as headers so the engine can scope tool
/// execution without re-validating the credential.
pub struct HttpEngine {
    client: reqwest::Client,
    dispatch_url: String,
}

impl HttpEngine {
    /// Build an engine client for the given dispatch endpoint.
    ///
    /// # Errors
    ///
    /// Returns `Unreachable` if the HTTP client cannot be built.
    pub fn new(dispatch_url: String, timeout: Duration) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Unreachable(format!("failed to build engine client: {e}")))?;
        Ok(Self {
            client,
            dispatch_url,
        })
    }
}

#[async_trait]
impl ProtocolEngine for HttpEngine {
    async fn dispatch(
        &self,
        principal: &Principal,
        envelope: &RpcEnvelope,
    ) -> Result<Value, EngineError> {
        let response = self
            .client
            .post(&self.dispatch_url)
            .header("X-Principal-Id", &principal.user_id)
            .header("X-Principal-Permissions", principal.permissions.join(","))
            .json(&envelope.to_value())
            .send()
            .await
            .map_err(|e| EngineError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::BadStatus(status.as_u16()));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| EngineError::Malformed(e.to_string()))
    }
}
