//! Redis store backing for horizontally-scaled deployments.
//!
//! Plain keys use `SET ... PX`; window keys are sorted sets mutated with an
//! atomic `MULTI` pipeline (prune, insert, count, refresh expiry), so the
//! sliding-window count never undercounts across instances.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::info;

use super::{KvStore, StoreError};

/// Networked [`KvStore`] over a Redis connection manager.
///
/// The connection manager reconnects transparently; individual command
/// failures surface as [`StoreError::Unavailable`] and the caller decides
/// whether the concern fails open (auth cache) or closed (quota).
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to the store at `url` (e.g. `redis://cache:6379`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(url).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        info!(url, "Connected to shared store");
        Ok(Self { conn })
    }
}

fn store_err(e: redis::RedisError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(value)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async::<()>(&mut conn)
            .await
            .map_err(store_err)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut conn)
            .await
            .map_err(store_err)
    }

    async fn window_record(
        &self,
        key: &str,
        member: &str,
        now_ms: u64,
        window: Duration,
    ) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let window_ms = window.as_millis() as u64;
        let cutoff = now_ms.saturating_sub(window_ms);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(cutoff)
            .ignore()
            .cmd("ZADD")
            .arg(key)
            .arg(now_ms)
            .arg(member)
            .ignore()
            .cmd("ZCARD")
            .arg(key)
            .cmd("PEXPIRE")
            .arg(key)
            .arg(window_ms)
            .ignore();

        let (count,): (u64,) = pipe.query_async(&mut conn).await.map_err(store_err)?;
        Ok(count)
    }

    async fn window_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("ZREM")
            .arg(key)
            .arg(member)
            .query_async::<()>(&mut conn)
            .await
            .map_err(store_err)
    }

    async fn window_count(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
    ) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let cutoff = now_ms.saturating_sub(window.as_millis() as u64);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(cutoff)
            .ignore()
            .cmd("ZCARD")
            .arg(key);

        let (count,): (u64,) = pipe.query_async(&mut conn).await.map_err(store_err)?;
        Ok(count)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let reply: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Protocol(format!(
                "unexpected PING reply: {reply}"
            )))
        }
    }
}
