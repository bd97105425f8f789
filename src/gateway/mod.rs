//! HTTP request gateway.
//!
//! Owns the per-request pipeline: bearer extraction, credential validation,
//! quota admission, session resolution, envelope validation, and dispatch
//! to the protocol engine. Every failure path produces a structured
//! JSON-RPC error response; the pipeline never panics outward.
//!
//! ## Module Organization
//!
//! - `mod` - shared state, the streamable transport, error rendering
//! - `sse` - legacy event-stream transport
//! - `health` - component health aggregation

pub mod health;
pub mod sse;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditStage};
use crate::auth::{CredentialCache, IdentityVerifier, Principal, credential_fingerprint};
use crate::config::GatewayConfig;
use crate::engine::ProtocolEngine;
use crate::envelope::{RpcEnvelope, parse_envelope};
use crate::error::GatewayError;
use crate::quota::QuotaGate;
use crate::session::{Session, SessionRegistry, TransportKind};
use crate::store::KvStore;

/// Response/request header carrying the session id.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Per-session transport binding, referenced by session id.
///
/// Sessions are owned by the registry; this map only holds the plumbing a
/// transport needs (inbound queue for event streams, a cancel token) and is
/// cleaned up by the registry's termination observer.
pub struct SessionTransport {
    pub kind: TransportKind,
    /// Inbound message queue; present only on event-stream transports.
    pub inbound: Option<mpsc::Sender<RpcEnvelope>>,
    pub cancel: CancellationToken,
}

/// Shared state behind every gateway route.
pub struct GatewayState {
    pub auth: CredentialCache,
    pub quota: QuotaGate,
    pub sessions: Arc<SessionRegistry>,
    pub engine: Arc<dyn ProtocolEngine>,
    pub store: Arc<dyn KvStore>,
    pub identity: Arc<dyn IdentityVerifier>,
    pub transports: Arc<DashMap<String, SessionTransport>>,
    pub config: GatewayConfig,
}

impl GatewayState {
    /// Wire up the collaborators and register the session-termination
    /// observer that tears down the matching transport.
    pub fn new(
        config: GatewayConfig,
        store: Arc<dyn KvStore>,
        identity: Arc<dyn IdentityVerifier>,
        engine: Arc<dyn ProtocolEngine>,
    ) -> Arc<Self> {
        let sessions = Arc::new(SessionRegistry::new(config.session_config()));
        let transports: Arc<DashMap<String, SessionTransport>> = Arc::new(DashMap::new());

        let observed = Arc::clone(&transports);
        sessions.on_terminate(move |session: &Session| {
            if let Some((_, transport)) = observed.remove(&session.id) {
                transport.cancel.cancel();
            }
        });

        let state = Arc::new(Self {
            auth: CredentialCache::new(
                Arc::clone(&store),
                Arc::clone(&identity),
                config.auth_cache_ttl,
            ),
            quota: QuotaGate::new(Arc::clone(&store), config.quota_config()),
            sessions,
            engine,
            store,
            identity,
            transports,
            config,
        });

        for token in &state.config.admin_tokens {
            state.quota.mark_as_admin(&credential_fingerprint(token));
        }
        state
    }

    /// Spawn background maintenance: the session sweep plus periodic
    /// pruning of expired entries from the local credential-cache tier.
    /// Both loops stop when `shutdown` is cancelled.
    pub fn spawn_maintenance(self: &Arc<Self>, shutdown: CancellationToken) {
        self.sessions.spawn_cleanup_task(shutdown.clone());

        let state = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(state.config.cleanup_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let pruned = state.auth.prune_local();
                        if pruned > 0 {
                            debug!(pruned, "Pruned expired local cache entries");
                        }
                    }
                    _ = shutdown.cancelled() => {
                        debug!("Cache prune task stopping");
                        break;
                    }
                }
            }
        });
    }
}

/// Build the gateway router.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/mcp", post(handle_mcp))
        .route("/sse", get(sse::handle_sse_open).post(sse::handle_sse_message))
        .route("/health", get(health::handle_health))
        .with_state(state)
}

/// Extract the bearer credential from the Authorization header.
pub(crate) fn bearer_credential(headers: &HeaderMap) -> Result<String, GatewayError> {
    let raw = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(GatewayError::MissingCredentials)?;
    let token = raw
        .strip_prefix("Bearer ")
        .ok_or(GatewayError::MissingCredentials)?;
    if token.is_empty() {
        return Err(GatewayError::MissingCredentials);
    }
    Ok(token.to_string())
}

pub(crate) fn client_info(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

fn inbound_session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// Authenticate and admit one request: bearer extraction, credential
/// validation, quota check. Shared by both transports.
pub(crate) async fn authenticate(
    state: &GatewayState,
    headers: &HeaderMap,
    correlation_id: &str,
) -> Result<(Principal, String), GatewayError> {
    let started = Instant::now();
    let credential = bearer_credential(headers)?;

    let principal = match state.auth.validate(&credential).await {
        Ok(principal) => principal,
        Err(e) => {
            AuditEvent::new(AuditStage::Auth, "denied", correlation_id)
                .detail(e.error_type_name())
                .elapsed_ms(started.elapsed().as_millis() as u64)
                .emit();
            return Err(e);
        }
    };
    AuditEvent::new(AuditStage::Auth, "granted", correlation_id)
        .user_id(&principal.user_id)
        .elapsed_ms(started.elapsed().as_millis() as u64)
        .emit();

    let fingerprint = credential_fingerprint(&credential);
    if let Err(e) = state.quota.check_limit(&fingerprint).await {
        AuditEvent::new(AuditStage::Quota, "rejected", correlation_id)
            .user_id(&principal.user_id)
            .detail(e.error_type_name())
            .emit();
        return Err(e);
    }
    AuditEvent::new(AuditStage::Quota, "admitted", correlation_id)
        .user_id(&principal.user_id)
        .emit();

    Ok((principal, fingerprint))
}

/// Resolve the session for a request: reuse a live session named by the
/// inbound header, otherwise mint a fresh one. An unknown or stale id is
/// not an error.
pub(crate) fn resolve_session(
    state: &GatewayState,
    headers: &HeaderMap,
    fingerprint: &str,
    principal: &Principal,
    correlation_id: &str,
) -> Session {
    if let Some(id) = inbound_session_id(headers) {
        if let Some(session) = state.sessions.get_session(&id) {
            state.sessions.update_activity(&id);
            // A refreshed credential may ride an existing session.
            state
                .sessions
                .refresh_principal(&id, fingerprint, principal.clone());
            AuditEvent::new(AuditStage::Session, "reused", correlation_id)
                .session_id(&id)
                .user_id(&principal.user_id)
                .emit();
            return session;
        }
        debug!(session_id = %id, "Unknown session id, minting a fresh session");
    }

    let session = state.sessions.create_session(
        fingerprint,
        principal.clone(),
        TransportKind::Streamable,
        client_info(headers),
    );
    AuditEvent::new(AuditStage::Session, "created", correlation_id)
        .session_id(&session.id)
        .user_id(&principal.user_id)
        .emit();
    session
}

/// POST /mcp: the streamable request/response transport.
async fn handle_mcp(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let correlation_id = Uuid::new_v4().to_string();
    let timeout = state.config.request_timeout;

    match tokio::time::timeout(timeout, process_mcp(&state, &headers, &body, &correlation_id))
        .await
    {
        Ok(response) => response,
        Err(_) => {
            error!(
                correlation_id = %correlation_id,
                timeout_secs = timeout.as_secs(),
                path = "/mcp",
                "Request timed out"
            );
            error_response(
                &GatewayError::Internal {
                    correlation_id: correlation_id.clone(),
                },
                &correlation_id,
                Value::Null,
                None,
            )
        }
    }
}

async fn process_mcp(
    state: &GatewayState,
    headers: &HeaderMap,
    body: &Bytes,
    correlation_id: &str,
) -> Response {
    let (principal, fingerprint) = match authenticate(state, headers, correlation_id).await {
        Ok(admitted) => admitted,
        Err(e) => return error_response(&e, correlation_id, Value::Null, None),
    };

    let session = resolve_session(state, headers, &fingerprint, &principal, correlation_id);

    // Bodies exactly at the limit are accepted.
    if body.len() > state.config.max_body_bytes {
        let e = GatewayError::PayloadTooLarge {
            limit_bytes: state.config.max_body_bytes,
        };
        return error_response(&e, correlation_id, Value::Null, Some(&session.id));
    }

    let envelope = match parse_envelope(body) {
        Ok(envelope) => envelope,
        Err(e) => return error_response(&e, correlation_id, Value::Null, Some(&session.id)),
    };

    state
        .transports
        .entry(session.id.clone())
        .or_insert_with(|| SessionTransport {
            kind: TransportKind::Streamable,
            inbound: None,
            cancel: CancellationToken::new(),
        });

    let started = Instant::now();
    match state.engine.dispatch(&principal, &envelope).await {
        Ok(engine_response) => {
            AuditEvent::new(AuditStage::Dispatch, "completed", correlation_id)
                .session_id(&session.id)
                .user_id(&principal.user_id)
                .elapsed_ms(started.elapsed().as_millis() as u64)
                .emit();
            info!(
                correlation_id = %correlation_id,
                session_id = %session.id,
                method = %envelope.method,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Request dispatched"
            );
            if envelope.is_notification() {
                accepted_response(&session.id)
            } else {
                json_response(StatusCode::OK, &session.id, engine_response)
            }
        }
        Err(e) => {
            // The cause stays in the logs; the client sees an opaque
            // correlation-id error.
            error!(
                correlation_id = %correlation_id,
                session_id = %session.id,
                user_id = %principal.user_id,
                method = %envelope.method,
                path = "/mcp",
                error = %e,
                "Engine dispatch failed"
            );
            AuditEvent::new(AuditStage::Dispatch, "failed", correlation_id)
                .session_id(&session.id)
                .user_id(&principal.user_id)
                .emit();
            error_response(
                &GatewayError::EngineFailure {
                    correlation_id: correlation_id.to_string(),
                },
                correlation_id,
                envelope.id_value(),
                Some(&session.id),
            )
        }
    }
}

fn json_response(status: StatusCode, session_id: &str, body: Value) -> Response {
    let mut response = (status, axum::Json(body)).into_response();
    if let Ok(value) = session_id.parse() {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

/// 202 for notifications and accepted stream messages.
pub(crate) fn accepted_response(session_id: &str) -> Response {
    let mut response = StatusCode::ACCEPTED.into_response();
    if let Ok(value) = session_id.parse() {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

/// Render a [`GatewayError`] as a structured JSON-RPC error response.
pub(crate) fn error_response(
    err: &GatewayError,
    correlation_id: &str,
    request_id: Value,
    session_id: Option<&str>,
) -> Response {
    if err.is_expected() {
        warn!(
            correlation_id = %correlation_id,
            error_type = err.error_type_name(),
            error = %err,
            "Request rejected"
        );
    } else {
        error!(
            correlation_id = %correlation_id,
            error_type = err.error_type_name(),
            error = %err,
            "Request failed"
        );
    }

    let body = json!({
        "jsonrpc": "2.0",
        "id": request_id,
        "error": err.to_jsonrpc_error(correlation_id),
    });

    let mut response = (err.http_status(), axum::Json(body)).into_response();
    if let Some(id) = session_id {
        if let Ok(value) = id.parse() {
            response.headers_mut().insert(SESSION_HEADER, value);
        }
    }
    if let Some(retry_after) = err.retry_after() {
        if let Ok(value) = retry_after.to_string().parse() {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}
