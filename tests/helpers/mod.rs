//! Shared test fixtures: mock collaborators and gateway state builders.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use taskgate::auth::{IdentityVerifier, Principal};
use taskgate::config::GatewayConfig;
use taskgate::engine::{EngineError, ProtocolEngine};
use taskgate::envelope::RpcEnvelope;
use taskgate::error::GatewayError;
use taskgate::gateway::GatewayState;
use taskgate::store::{KvStore, MemoryStore, StoreError};

pub fn test_principal() -> Principal {
    Principal {
        user_id: "user-1".to_string(),
        username: "alice".to_string(),
        email: None,
        permissions: vec!["tasks:read".to_string()],
        validated_at: Utc::now(),
    }
}

/// Identity endpoint double with a configurable outcome and call counter.
pub struct MockVerifier {
    outcome: Result<Principal, GatewayError>,
    healthy: bool,
    calls: AtomicU32,
}

impl MockVerifier {
    pub fn accepting() -> Self {
        Self {
            outcome: Ok(test_principal()),
            healthy: true,
            calls: AtomicU32::new(0),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            outcome: Err(GatewayError::InvalidToken {
                reason: "token expired".to_string(),
            }),
            healthy: true,
            calls: AtomicU32::new(0),
        }
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityVerifier for MockVerifier {
    async fn verify(&self, _credential: &str) -> Result<Principal, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }

    async fn healthy(&self) -> bool {
        self.healthy
    }
}

/// Protocol engine double returning a fixed response.
pub struct MockEngine {
    response: Result<Value, ()>,
}

impl MockEngine {
    pub fn echoing() -> Self {
        Self {
            response: Ok(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {"ok": true},
            })),
        }
    }

    pub fn failing() -> Self {
        Self { response: Err(()) }
    }
}

#[async_trait]
impl ProtocolEngine for MockEngine {
    async fn dispatch(
        &self,
        _principal: &Principal,
        envelope: &RpcEnvelope,
    ) -> Result<Value, EngineError> {
        match &self.response {
            Ok(template) => {
                let mut response = template.clone();
                response["id"] = envelope.id_value();
                Ok(response)
            }
            Err(()) => Err(EngineError::Unreachable("connection refused".to_string())),
        }
    }
}

/// Shared store double where every operation fails.
pub struct FailingStore;

#[async_trait]
impl KvStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Unavailable("store offline".to_string()))
    }

    async fn set_with_ttl(
        &self,
        _key: &str,
        _value: &str,
        _ttl: Duration,
    ) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("store offline".to_string()))
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("store offline".to_string()))
    }

    async fn window_record(
        &self,
        _key: &str,
        _member: &str,
        _now_ms: u64,
        _window: Duration,
    ) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable("store offline".to_string()))
    }

    async fn window_remove(&self, _key: &str, _member: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("store offline".to_string()))
    }

    async fn window_count(
        &self,
        _key: &str,
        _now_ms: u64,
        _window: Duration,
    ) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable("store offline".to_string()))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("store offline".to_string()))
    }
}

pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        max_body_bytes: 1024,
        rate_limit: 100,
        rate_burst: 100,
        rate_window: Duration::from_secs(60),
        request_timeout: Duration::from_secs(5),
        ..GatewayConfig::default()
    }
}

pub fn test_state(
    config: GatewayConfig,
    verifier: MockVerifier,
    engine: MockEngine,
) -> Arc<GatewayState> {
    GatewayState::new(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(verifier),
        Arc::new(engine),
    )
}

pub fn default_state() -> Arc<GatewayState> {
    test_state(test_config(), MockVerifier::accepting(), MockEngine::echoing())
}
