//! Session lifecycle tracking.
//!
//! A session binds one client conversation to a validated credential. The
//! registry owns the created -> active -> orphaned -> terminated lifecycle,
//! indexes sessions by credential fingerprint for bulk revocation, and runs
//! a periodic sweep that orphans idle sessions and terminates sessions that
//! stay orphaned past a grace period. Termination is idempotent and fires
//! registered observers exactly once per session.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::Principal;

/// Lifecycle states of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Minted but no follow-up request seen yet.
    Created,
    /// At least one follow-up request processed.
    Active,
    /// Idle past the timeout; kept for a grace period in case the client
    /// resumes. Orphaned sessions stay visible to lookup, and a request
    /// arriving during the grace period promotes the session back to
    /// Active instead of minting a new one.
    Orphaned,
    /// Removed. The id is never reused.
    Terminated,
}

/// Which transport a session is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Request/response over POST.
    Streamable,
    /// Long-lived server-push event stream.
    EventStream,
}

/// One tracked client conversation.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub credential_fingerprint: String,
    pub principal: Principal,
    pub transport: TransportKind,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_activity: Instant,
    pub client_info: Option<String>,
}

/// Idle and sweep timing for the registry.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Idle timeout for streamable sessions.
    pub idle_timeout: Duration,
    /// Idle timeout for event-stream sessions (longer, the stream itself
    /// is the liveness signal).
    pub stream_idle_timeout: Duration,
    /// How long an orphaned session survives before termination.
    pub orphan_grace: Duration,
    /// Sweep interval for the background cleanup task.
    pub cleanup_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(300),
            stream_idle_timeout: Duration::from_secs(900),
            orphan_grace: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(30),
        }
    }
}

type TerminationObserver = Box<dyn Fn(&Session) + Send + Sync>;

/// Concurrent registry of live sessions.
pub struct SessionRegistry {
    sessions: DashMap<String, Session>,
    /// fingerprint -> session ids holding it.
    by_credential: DashMap<String, HashSet<String>>,
    config: SessionConfig,
    observers: RwLock<Vec<TerminationObserver>>,
}

impl SessionRegistry {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            by_credential: DashMap::new(),
            config,
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Register a callback fired once when a session is terminated.
    pub fn on_terminate(&self, observer: impl Fn(&Session) + Send + Sync + 'static) {
        if let Ok(mut observers) = self.observers.write() {
            observers.push(Box::new(observer));
        }
    }

    /// Mint a fresh session bound to the credential.
    pub fn create_session(
        &self,
        fingerprint: &str,
        principal: Principal,
        transport: TransportKind,
        client_info: Option<String>,
    ) -> Session {
        let session = Session {
            id: Uuid::new_v4().to_string(),
            credential_fingerprint: fingerprint.to_string(),
            principal,
            transport,
            state: SessionState::Created,
            created_at: Utc::now(),
            last_activity: Instant::now(),
            client_info,
        };

        self.by_credential
            .entry(fingerprint.to_string())
            .or_default()
            .insert(session.id.clone());
        self.sessions.insert(session.id.clone(), session.clone());

        debug!(
            session_id = %session.id,
            user_id = %session.principal.user_id,
            transport = ?transport,
            "Session created"
        );
        session
    }

    /// Look up a live (non-terminated) session by id.
    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    /// Record activity: bumps the idle clock and promotes Created or
    /// Orphaned sessions to Active.
    pub fn update_activity(&self, session_id: &str) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(mut session) => {
                session.last_activity = Instant::now();
                if session.state != SessionState::Active {
                    session.state = SessionState::Active;
                }
                true
            }
            None => false,
        }
    }

    /// Replace the cached principal after revalidation. Re-indexes the
    /// session if the credential itself changed.
    pub fn refresh_principal(&self, session_id: &str, fingerprint: &str, principal: Principal) {
        let mut old_fingerprint = None;
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            if session.credential_fingerprint != fingerprint {
                old_fingerprint = Some(session.credential_fingerprint.clone());
                session.credential_fingerprint = fingerprint.to_string();
            }
            session.principal = principal;
        }

        if let Some(old) = old_fingerprint {
            if let Some(mut ids) = self.by_credential.get_mut(&old) {
                ids.remove(session_id);
            }
            self.by_credential.remove_if(&old, |_, ids| ids.is_empty());
            self.by_credential
                .entry(fingerprint.to_string())
                .or_default()
                .insert(session_id.to_string());
        }
    }

    /// Terminate a session, removing it from both indexes and notifying
    /// observers. Terminating an unknown id is a no-op.
    pub fn terminate_session(&self, session_id: &str) -> bool {
        let Some((_, mut session)) = self.sessions.remove(session_id) else {
            return false;
        };
        session.state = SessionState::Terminated;

        if let Some(mut ids) = self.by_credential.get_mut(&session.credential_fingerprint) {
            ids.remove(session_id);
        }
        self.by_credential
            .remove_if(&session.credential_fingerprint, |_, ids| ids.is_empty());

        info!(
            session_id = %session.id,
            user_id = %session.principal.user_id,
            "Session terminated"
        );

        if let Ok(observers) = self.observers.read() {
            for observer in observers.iter() {
                observer(&session);
            }
        }
        true
    }

    /// All live session ids bound to a credential fingerprint.
    pub fn sessions_for_credential(&self, fingerprint: &str) -> Vec<String> {
        self.by_credential
            .get(fingerprint)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// One sweep pass: orphan idle sessions, terminate long-orphaned ones.
    ///
    /// Returns (orphaned, terminated) counts.
    pub fn cleanup_stale_sessions(&self) -> (usize, usize) {
        let now = Instant::now();
        let mut to_orphan = Vec::new();
        let mut to_terminate = Vec::new();

        // Collect first, mutate after: mutating while iterating a shard
        // would deadlock.
        for entry in self.sessions.iter() {
            let session = entry.value();
            let idle = now.saturating_duration_since(session.last_activity);
            match session.state {
                SessionState::Created | SessionState::Active => {
                    let timeout = match session.transport {
                        TransportKind::Streamable => self.config.idle_timeout,
                        TransportKind::EventStream => self.config.stream_idle_timeout,
                    };
                    if idle >= timeout {
                        to_orphan.push(entry.key().clone());
                    }
                }
                SessionState::Orphaned => {
                    if idle >= self.config.orphan_grace {
                        to_terminate.push(entry.key().clone());
                    }
                }
                SessionState::Terminated => {}
            }
        }

        for id in &to_orphan {
            if let Some(mut session) = self.sessions.get_mut(id) {
                session.state = SessionState::Orphaned;
                debug!(session_id = %id, "Session orphaned after idle timeout");
            }
        }
        for id in &to_terminate {
            self.terminate_session(id);
        }

        if !to_orphan.is_empty() || !to_terminate.is_empty() {
            info!(
                orphaned = to_orphan.len(),
                terminated = to_terminate.len(),
                remaining = self.sessions.len(),
                "Session sweep completed"
            );
        }
        (to_orphan.len(), to_terminate.len())
    }

    /// Terminate every session. Used during graceful shutdown.
    pub fn drain_all(&self) -> usize {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let mut drained = 0;
        for id in ids {
            if self.terminate_session(&id) {
                drained += 1;
            }
        }
        if drained > 0 {
            info!(count = drained, "Drained all sessions");
        }
        drained
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Spawn the background sweep loop, stopped via `shutdown`.
    pub fn spawn_cleanup_task(self: &Arc<Self>, shutdown: CancellationToken) {
        let registry = Arc::clone(self);
        let interval = registry.config.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        registry.cleanup_stale_sessions();
                    }
                    _ = shutdown.cancelled() => {
                        debug!("Session sweep task stopping");
                        break;
                    }
                }
            }
        });
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_principal() -> Principal {
        Principal {
            user_id: "user-1".to_string(),
            username: "alice".to_string(),
            email: None,
            permissions: vec!["tasks:read".to_string()],
            validated_at: Utc::now(),
        }
    }

    #[test]
    fn test_create_and_get_roundtrip() {
        let registry = SessionRegistry::default();
        let session = registry.create_session(
            "fp",
            test_principal(),
            TransportKind::Streamable,
            Some("test-client/1.0".to_string()),
        );

        let fetched = registry.get_session(&session.id).unwrap();
        assert_eq!(fetched.id, session.id);
        assert_eq!(fetched.state, SessionState::Created);
        assert_eq!(fetched.credential_fingerprint, "fp");
    }

    #[test]
    fn test_session_ids_are_unique() {
        let registry = SessionRegistry::default();
        let a = registry.create_session("fp", test_principal(), TransportKind::Streamable, None);
        let b = registry.create_session("fp", test_principal(), TransportKind::Streamable, None);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_activity_promotes_to_active() {
        let registry = SessionRegistry::default();
        let session =
            registry.create_session("fp", test_principal(), TransportKind::Streamable, None);

        assert!(registry.update_activity(&session.id));
        assert_eq!(
            registry.get_session(&session.id).unwrap().state,
            SessionState::Active
        );
    }

    #[test]
    fn test_update_activity_unknown_session() {
        let registry = SessionRegistry::default();
        assert!(!registry.update_activity("no-such-id"));
    }

    #[test]
    fn test_terminate_is_idempotent() {
        let registry = SessionRegistry::default();
        let session =
            registry.create_session("fp", test_principal(), TransportKind::Streamable, None);

        assert!(registry.terminate_session(&session.id));
        assert!(!registry.terminate_session(&session.id));
        assert!(registry.get_session(&session.id).is_none());
    }

    #[test]
    fn test_observers_fire_once_per_termination() {
        let registry = SessionRegistry::default();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        registry.on_terminate(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let session =
            registry.create_session("fp", test_principal(), TransportKind::Streamable, None);
        registry.terminate_session(&session.id);
        registry.terminate_session(&session.id);

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_credential_index_tracks_sessions() {
        let registry = SessionRegistry::default();
        let a = registry.create_session("fp", test_principal(), TransportKind::Streamable, None);
        let b = registry.create_session("fp", test_principal(), TransportKind::EventStream, None);

        let mut ids = registry.sessions_for_credential("fp");
        ids.sort();
        let mut expected = vec![a.id.clone(), b.id.clone()];
        expected.sort();
        assert_eq!(ids, expected);

        registry.terminate_session(&a.id);
        assert_eq!(registry.sessions_for_credential("fp"), vec![b.id]);
    }

    #[test]
    fn test_refresh_principal_reindexes_on_new_credential() {
        let registry = SessionRegistry::default();
        let session =
            registry.create_session("fp-old", test_principal(), TransportKind::Streamable, None);

        let mut renewed = test_principal();
        renewed.permissions.push("tasks:admin".to_string());
        registry.refresh_principal(&session.id, "fp-new", renewed);

        assert!(registry.sessions_for_credential("fp-old").is_empty());
        assert_eq!(
            registry.sessions_for_credential("fp-new"),
            vec![session.id.clone()]
        );
        assert!(
            registry
                .get_session(&session.id)
                .unwrap()
                .principal
                .permissions
                .contains(&"tasks:admin".to_string())
        );
    }

    #[tokio::test]
    async fn test_sweep_orphans_then_terminates() {
        let registry = SessionRegistry::new(SessionConfig {
            idle_timeout: Duration::from_millis(10),
            stream_idle_timeout: Duration::from_millis(10),
            orphan_grace: Duration::from_millis(10),
            cleanup_interval: Duration::from_millis(5),
        });
        let session =
            registry.create_session("fp", test_principal(), TransportKind::Streamable, None);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let (orphaned, terminated) = registry.cleanup_stale_sessions();
        assert_eq!((orphaned, terminated), (1, 0));
        assert_eq!(
            registry.get_session(&session.id).unwrap().state,
            SessionState::Orphaned
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        let (orphaned, terminated) = registry.cleanup_stale_sessions();
        assert_eq!((orphaned, terminated), (0, 1));
        assert!(registry.get_session(&session.id).is_none());
    }

    #[tokio::test]
    async fn test_orphaned_session_resumes_on_activity() {
        let registry = SessionRegistry::new(SessionConfig {
            idle_timeout: Duration::from_millis(10),
            stream_idle_timeout: Duration::from_millis(10),
            orphan_grace: Duration::from_secs(60),
            cleanup_interval: Duration::from_millis(5),
        });
        let session =
            registry.create_session("fp", test_principal(), TransportKind::Streamable, None);

        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.cleanup_stale_sessions();
        assert_eq!(
            registry.get_session(&session.id).unwrap().state,
            SessionState::Orphaned
        );

        registry.update_activity(&session.id);
        assert_eq!(
            registry.get_session(&session.id).unwrap().state,
            SessionState::Active
        );
    }

    #[test]
    fn test_drain_all_terminates_everything() {
        let registry = SessionRegistry::default();
        for _ in 0..3 {
            registry.create_session("fp", test_principal(), TransportKind::Streamable, None);
        }
        assert_eq!(registry.drain_all(), 3);
        assert_eq!(registry.session_count(), 0);
    }
}
