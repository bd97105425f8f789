//! Fire-and-forget audit trail.
//!
//! Every gateway decision emits one structured event to the `audit` log
//! target. Emission is never retried and never participates in request
//! correctness; collectors subscribe to the target and ship events out of
//! process.

use tracing::info;

/// The stage of the request pipeline an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStage {
    Auth,
    Quota,
    Session,
    Dispatch,
}

impl AuditStage {
    fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Quota => "quota",
            Self::Session => "session",
            Self::Dispatch => "dispatch",
        }
    }
}

/// One audit record. Build with the setters, then [`AuditEvent::emit`].
#[derive(Debug)]
pub struct AuditEvent<'a> {
    stage: AuditStage,
    outcome: &'a str,
    correlation_id: &'a str,
    session_id: Option<&'a str>,
    user_id: Option<&'a str>,
    detail: Option<&'a str>,
    elapsed_ms: Option<u64>,
}

impl<'a> AuditEvent<'a> {
    pub fn new(stage: AuditStage, outcome: &'a str, correlation_id: &'a str) -> Self {
        Self {
            stage,
            outcome,
            correlation_id,
            session_id: None,
            user_id: None,
            detail: None,
            elapsed_ms: None,
        }
    }

    pub fn session_id(mut self, session_id: &'a str) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn user_id(mut self, user_id: &'a str) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn detail(mut self, detail: &'a str) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn elapsed_ms(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = Some(elapsed_ms);
        self
    }

    /// Write the event to the audit target.
    pub fn emit(self) {
        info!(
            target: "audit",
            stage = self.stage.as_str(),
            outcome = self.outcome,
            correlation_id = self.correlation_id,
            session_id = self.session_id.unwrap_or("-"),
            user_id = self.user_id.unwrap_or("-"),
            detail = self.detail.unwrap_or("-"),
            elapsed_ms = self.elapsed_ms.unwrap_or(0),
            "audit"
        );
    }
}
