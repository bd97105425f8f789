//! Component health aggregation.
//!
//! Reports shared-store and identity-endpoint health independently. The
//! identity endpoint is load-bearing for every request, so its outage makes
//! the gateway unhealthy (503); a store outage alone is degraded (200),
//! since auth falls back to the local cache tier and quota fails closed.

use std::sync::Arc;
use std::time::Duration;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

use super::GatewayState;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize)]
struct ComponentHealth {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    store: ComponentHealth,
    identity: ComponentHealth,
    active_sessions: usize,
}

/// GET /health
pub async fn handle_health(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let store = match tokio::time::timeout(PROBE_TIMEOUT, state.store.ping()).await {
        Ok(Ok(())) => ComponentHealth {
            status: "up",
            detail: None,
        },
        Ok(Err(e)) => ComponentHealth {
            status: "down",
            detail: Some(e.to_string()),
        },
        Err(_) => ComponentHealth {
            status: "down",
            detail: Some("probe timed out".to_string()),
        },
    };

    let identity = if state.identity.healthy().await {
        ComponentHealth {
            status: "up",
            detail: None,
        }
    } else {
        ComponentHealth {
            status: "down",
            detail: Some("identity endpoint unreachable".to_string()),
        }
    };

    let (status, http_status) = match (store.status, identity.status) {
        ("up", "up") => ("healthy", StatusCode::OK),
        (_, "up") => ("degraded", StatusCode::OK),
        _ => ("unhealthy", StatusCode::SERVICE_UNAVAILABLE),
    };

    (
        http_status,
        Json(HealthResponse {
            status,
            store,
            identity,
            active_sessions: state.sessions.session_count(),
        }),
    )
}
