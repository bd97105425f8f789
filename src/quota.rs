//! Sliding-window-log quota enforcement per credential.
//!
//! Each credential fingerprint owns a window key in the shared store holding
//! one scored member per admitted request. Admission records first and
//! compares after: the post-insert count is the authoritative occupancy, so
//! concurrent requests across instances can never undercount. A rejected
//! record is rolled back best-effort so a rejection does not consume quota.
//!
//! Admin-marked credentials bypass the gate entirely. Store failures fail
//! closed: a quota decision is never silently skipped.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::GatewayError;
use crate::store::KvStore;

/// Rate limiting parameters.
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    /// Advertised sustained requests per window (reporting only).
    pub limit: u32,
    /// Hard ceiling on requests in any trailing window.
    pub burst: u32,
    /// Trailing window length.
    pub window: Duration,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            limit: 60,
            burst: 120,
            window: Duration::from_secs(60),
        }
    }
}

/// Per-credential sliding-window rate limiter over the shared store.
pub struct QuotaGate {
    store: Arc<dyn KvStore>,
    config: QuotaConfig,
    /// Fingerprints of credentials exempt from quota.
    admin: DashMap<String, ()>,
}

impl QuotaGate {
    pub fn new(store: Arc<dyn KvStore>, config: QuotaConfig) -> Self {
        Self {
            store,
            config,
            admin: DashMap::new(),
        }
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    fn window_key(fingerprint: &str) -> String {
        format!("quota:{fingerprint}")
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Exempt a credential fingerprint from quota enforcement.
    pub fn mark_as_admin(&self, fingerprint: &str) {
        self.admin.insert(fingerprint.to_string(), ());
    }

    pub fn is_admin(&self, fingerprint: &str) -> bool {
        self.admin.contains_key(fingerprint)
    }

    /// Admit or reject one request for the credential.
    ///
    /// The request is recorded into the window first; if the post-insert
    /// occupancy exceeds the burst ceiling the member is removed again and
    /// the request is rejected with reset timing.
    ///
    /// # Errors
    ///
    /// `RateLimited` when the window is full, `StoreUnavailable` when the
    /// shared store cannot answer (fail closed).
    pub async fn check_limit(&self, fingerprint: &str) -> Result<(), GatewayError> {
        if self.is_admin(fingerprint) {
            debug!(fingerprint = %fingerprint, "Quota bypassed for admin credential");
            return Ok(());
        }

        let key = Self::window_key(fingerprint);
        let member = Uuid::new_v4().to_string();
        let now_ms = Self::now_ms();

        let count = self
            .store
            .window_record(&key, &member, now_ms, self.config.window)
            .await
            .map_err(|e| GatewayError::StoreUnavailable {
                reason: e.to_string(),
            })?;

        if count > u64::from(self.config.burst) {
            // Best effort: a failed rollback only makes the window
            // slightly more conservative.
            if let Err(e) = self.store.window_remove(&key, &member).await {
                warn!(error = %e, "Failed to roll back rejected quota record");
            }

            let retry_after_secs = self.config.window.as_secs().max(1);
            let reset_at = (now_ms / 1_000) as i64 + retry_after_secs as i64;
            return Err(GatewayError::RateLimited {
                limit: self.config.limit,
                burst: self.config.burst,
                retry_after_secs,
                reset_at,
            });
        }

        Ok(())
    }

    /// How many more requests the credential could make right now.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable` when the shared store cannot answer.
    pub async fn remaining_requests(&self, fingerprint: &str) -> Result<u32, GatewayError> {
        if self.is_admin(fingerprint) {
            return Ok(self.config.burst);
        }

        let count = self
            .store
            .window_count(
                &Self::window_key(fingerprint),
                Self::now_ms(),
                self.config.window,
            )
            .await
            .map_err(|e| GatewayError::StoreUnavailable {
                reason: e.to_string(),
            })?;

        Ok(self.config.burst.saturating_sub(count.min(u64::from(u32::MAX)) as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError};
    use async_trait::async_trait;

    fn gate(burst: u32) -> QuotaGate {
        QuotaGate::new(
            Arc::new(MemoryStore::new()),
            QuotaConfig {
                limit: burst / 2,
                burst,
                window: Duration::from_secs(60),
            },
        )
    }

    #[tokio::test]
    async fn test_burst_admitted_then_next_rejected() {
        let gate = gate(120);

        for i in 0..120 {
            assert!(
                gate.check_limit("fp").await.is_ok(),
                "request {} should be admitted",
                i + 1
            );
        }

        match gate.check_limit("fp").await {
            Err(GatewayError::RateLimited {
                burst,
                retry_after_secs,
                ..
            }) => {
                assert_eq!(burst, 120);
                assert!(retry_after_secs >= 1);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rejection_does_not_consume_quota() {
        let gate = gate(3);
        for _ in 0..3 {
            gate.check_limit("fp").await.unwrap();
        }
        assert!(gate.check_limit("fp").await.is_err());
        // The rejected record was rolled back, so occupancy is still 3.
        assert_eq!(gate.remaining_requests("fp").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_credentials_have_independent_windows() {
        let gate = gate(2);
        gate.check_limit("fp-a").await.unwrap();
        gate.check_limit("fp-a").await.unwrap();
        assert!(gate.check_limit("fp-a").await.is_err());

        assert!(gate.check_limit("fp-b").await.is_ok());
    }

    #[tokio::test]
    async fn test_admin_bypasses_quota() {
        let gate = gate(1);
        gate.mark_as_admin("fp-admin");

        for _ in 0..10 {
            gate.check_limit("fp-admin").await.unwrap();
        }
        assert_eq!(gate.remaining_requests("fp-admin").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_remaining_requests_counts_down() {
        let gate = gate(5);
        assert_eq!(gate.remaining_requests("fp").await.unwrap(), 5);
        gate.check_limit("fp").await.unwrap();
        gate.check_limit("fp").await.unwrap();
        assert_eq!(gate.remaining_requests("fp").await.unwrap(), 3);
    }

    struct DownStore;

    #[async_trait]
    impl KvStore for DownStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn set_with_ttl(
            &self,
            _key: &str,
            _value: &str,
            _ttl: Duration,
        ) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn delete(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn window_record(
            &self,
            _key: &str,
            _member: &str,
            _now_ms: u64,
            _window: Duration,
        ) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn window_remove(&self, _key: &str, _member: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn window_count(
            &self,
            _key: &str,
            _now_ms: u64,
            _window: Duration,
        ) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_outage_fails_closed() {
        let gate = QuotaGate::new(Arc::new(DownStore), QuotaConfig::default());
        match gate.check_limit("fp").await {
            Err(GatewayError::StoreUnavailable { .. }) => {}
            other => panic!("expected StoreUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_admin_bypass_survives_store_outage() {
        let gate = QuotaGate::new(Arc::new(DownStore), QuotaConfig::default());
        gate.mark_as_admin("fp-admin");
        assert!(gate.check_limit("fp-admin").await.is_ok());
    }
}
