//! Legacy event-stream transport.
//!
//! `GET /sse` opens a long-lived stream bound to a fresh event-stream
//! session; `POST /sse` submits one client message against that stream by
//! session id. Inbound messages flow through a per-session queue consumed
//! by a single worker, so messages on one stream dispatch in arrival
//! order. Dropping the stream terminates the session, and terminating the
//! session cancels the worker.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::Stream;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::{
    GatewayState, SessionTransport, accepted_response, authenticate, client_info, error_response,
};
use crate::audit::{AuditEvent, AuditStage};
use crate::error::{FieldViolation, GatewayError};
use crate::session::{SessionRegistry, TransportKind};

const CHANNEL_CAPACITY: usize = 64;

/// GET /sse: open an event stream.
///
/// The first event is an `endpoint` event naming the companion message
/// endpoint for this stream's session id.
pub async fn handle_sse_open(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Response {
    let correlation_id = Uuid::new_v4().to_string();

    let (principal, fingerprint) = match authenticate(&state, &headers, &correlation_id).await {
        Ok(admitted) => admitted,
        Err(e) => return error_response(&e, &correlation_id, Value::Null, None),
    };

    let session = state.sessions.create_session(
        &fingerprint,
        principal,
        TransportKind::EventStream,
        client_info(&headers),
    );
    AuditEvent::new(AuditStage::Session, "created", &correlation_id)
        .session_id(&session.id)
        .user_id(&session.principal.user_id)
        .emit();

    let (out_tx, out_rx) = mpsc::channel::<Event>(CHANNEL_CAPACITY);
    let (in_tx, mut in_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();

    state.transports.insert(
        session.id.clone(),
        SessionTransport {
            kind: TransportKind::EventStream,
            inbound: Some(in_tx),
            cancel: cancel.clone(),
        },
    );

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/sse?session_id={}", session.id));
    // Capacity is fresh, this cannot fail.
    let _ = out_tx.try_send(endpoint);

    let worker_state = Arc::clone(&state);
    let worker_session_id = session.id.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(session_id = %worker_session_id, "Event stream worker stopping");
                    break;
                }
                inbound = in_rx.recv() => {
                    let Some(envelope) = inbound else { break };
                    // The session's principal may have been refreshed since
                    // the stream opened.
                    let Some(current) = worker_state.sessions.get_session(&worker_session_id)
                    else {
                        break;
                    };
                    let dispatch_cid = Uuid::new_v4().to_string();
                    match worker_state
                        .engine
                        .dispatch(&current.principal, &envelope)
                        .await
                    {
                        Ok(response) => {
                            AuditEvent::new(AuditStage::Dispatch, "completed", &dispatch_cid)
                                .session_id(&worker_session_id)
                                .user_id(&current.principal.user_id)
                                .emit();
                            if envelope.is_notification() {
                                continue;
                            }
                            let event = Event::default()
                                .event("message")
                                .data(response.to_string());
                            if out_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            // The stream is already flushed, so the failure
                            // is logged only.
                            error!(
                                session_id = %worker_session_id,
                                user_id = %current.principal.user_id,
                                method = %envelope.method,
                                path = "/sse",
                                error = %e,
                                "Engine dispatch failed on open stream"
                            );
                            AuditEvent::new(AuditStage::Dispatch, "failed", &dispatch_cid)
                                .session_id(&worker_session_id)
                                .user_id(&current.principal.user_id)
                                .emit();
                        }
                    }
                }
            }
        }
    });

    let guard = EventStreamGuard {
        rx: out_rx,
        registry: Arc::clone(&state.sessions),
        session_id: session.id.clone(),
    };

    let mut response = Sse::new(guard)
        .keep_alive(KeepAlive::new().interval(state.config.keep_alive_interval))
        .into_response();
    if let Ok(value) = session.id.parse() {
        response.headers_mut().insert(super::SESSION_HEADER, value);
    }
    response
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    pub session_id: Option<String>,
}

/// POST /sse: submit one message against an open stream.
pub async fn handle_sse_message(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<MessageQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let correlation_id = Uuid::new_v4().to_string();
    let timeout = state.config.request_timeout;

    match tokio::time::timeout(
        timeout,
        process_sse_message(&state, query, &headers, &body, &correlation_id),
    )
    .await
    {
        Ok(response) => response,
        Err(_) => {
            error!(
                correlation_id = %correlation_id,
                timeout_secs = timeout.as_secs(),
                path = "/sse",
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

async fn process_sse_message(
    state: &GatewayState,
    query: MessageQuery,
    headers: &HeaderMap,
    body: &Bytes,
    correlation_id: &str,
) -> Response {
    let (principal, fingerprint) = match authenticate(state, headers, correlation_id).await {
        Ok(admitted) => admitted,
        Err(e) => return error_response(&e, &correlation_id, Value::Null, None),
    };

    let Some(session_id) = query.session_id else {
        let e = GatewayError::InvalidEnvelope {
            violations: vec![FieldViolation::new(
                "session_id",
                "query parameter is required",
            )],
        };
        return error_response(&e, &correlation_id, Value::Null, None);
    };

    let sender = state
        .transports
        .get(&session_id)
        .filter(|t| t.kind == TransportKind::EventStream)
        .and_then(|t| t.inbound.clone());
    let (Some(sender), Some(_)) = (sender, state.sessions.get_session(&session_id)) else {
        let e = GatewayError::StreamNotFound {
            session_id: session_id.clone(),
        };
        return error_response(&e, &correlation_id, Value::Null, None);
    };

    state.sessions.update_activity(&session_id);
    state
        .sessions
        .refresh_principal(&session_id, &fingerprint, principal);

    if body.len() > state.config.max_body_bytes {
        let e = GatewayError::PayloadTooLarge {
            limit_bytes: state.config.max_body_bytes,
        };
        return error_response(&e, &correlation_id, Value::Null, Some(&session_id));
    }

    let envelope = match crate::envelope::parse_envelope(&body) {
        Ok(envelope) => envelope,
        Err(e) => return error_response(&e, &correlation_id, Value::Null, Some(&session_id)),
    };

    if sender.send(envelope).await.is_err() {
        warn!(session_id = %session_id, "Event stream closed while enqueueing message");
        let e = GatewayError::StreamNotFound { session_id };
        return error_response(&e, &correlation_id, Value::Null, None);
    }

    accepted_response(&session_id)
}

/// Yields stream events and terminates the session when the client
/// disconnects.
struct EventStreamGuard {
    rx: mpsc::Receiver<Event>,
    registry: Arc<SessionRegistry>,
    session_id: String,
}

impl Stream for EventStreamGuard {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx).map(|event| event.map(Ok))
    }
}

impl Drop for EventStreamGuard {
    fn drop(&mut self) {
        // Disconnect is a normal close; the observer tears down the
        // transport and cancels the worker.
        self.registry.terminate_session(&self.session_id);
    }
}
