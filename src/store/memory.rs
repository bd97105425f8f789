//! In-process store backing.
//!
//! Used standalone for single-instance deployments and as the default when
//! no store URL is configured. Window operations run synchronously under
//! the entry lock, which is what makes the in-process sliding-window count
//! exact under concurrent callers.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{KvStore, StoreError};

struct ValueEntry {
    value: String,
    expires_at: Instant,
}

#[derive(Default)]
struct WindowEntry {
    /// (score_ms, member), ordered by score.
    members: BTreeSet<(u64, String)>,
    expires_at: Option<Instant>,
}

impl WindowEntry {
    fn prune(&mut self, now_ms: u64, window: Duration) {
        if let Some(expires_at) = self.expires_at {
            if expires_at <= Instant::now() {
                self.members.clear();
                return;
            }
        }
        let cutoff = now_ms.saturating_sub(window.as_millis() as u64);
        self.members.retain(|(score, _)| *score > cutoff);
    }
}

/// Per-process [`KvStore`] backed by concurrent maps.
#[derive(Default)]
pub struct MemoryStore {
    values: DashMap<String, ValueEntry>,
    windows: DashMap<String, WindowEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if let Some(entry) = self.values.get(key) {
            if entry.expires_at > Instant::now() {
                return Ok(Some(entry.value.clone()));
            }
        }
        // Expired entries are reaped lazily.
        self.values
            .remove_if(key, |_, entry| entry.expires_at <= Instant::now());
        Ok(None)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.values.insert(
            key.to_string(),
            ValueEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.values.remove(key);
        Ok(())
    }

    async fn window_record(
        &self,
        key: &str,
        member: &str,
        now_ms: u64,
        window: Duration,
    ) -> Result<u64, StoreError> {
        let mut entry = self.windows.entry(key.to_string()).or_default();
        entry.prune(now_ms, window);
        entry.members.insert((now_ms, member.to_string()));
        entry.expires_at = Some(Instant::now() + window);
        Ok(entry.members.len() as u64)
    }

    async fn window_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        if let Some(mut entry) = self.windows.get_mut(key) {
            let found = entry
                .members
                .iter()
                .find(|(_, m)| m == member)
                .cloned();
            if let Some(item) = found {
                entry.members.remove(&item);
            }
        }
        Ok(())
    }

    async fn window_count(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
    ) -> Result<u64, StoreError> {
        match self.windows.get_mut(key) {
            Some(mut entry) => {
                entry.prune(now_ms, window);
                Ok(entry.members.len() as u64)
            }
            None => Ok(0),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
