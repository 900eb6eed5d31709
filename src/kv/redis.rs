//! Redis-backed key-value store.
//!
//! Uses a `ConnectionManager`, which multiplexes one connection and
//! reconnects on failure; cloning it is cheap and every command takes a
//! clone so callers never hold the manager across awaits.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

use super::{KeyValueStore, KvError};

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to redis at `url` and verify the connection with a PING.
    ///
    /// # Errors
    ///
    /// Returns `KvError::Unavailable` if the URL is invalid or the server
    /// cannot be reached.
    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client =
            redis::Client::open(url).map_err(|err| KvError::Unavailable(err.to_string()))?;
        let mut conn = ConnectionManager::new(client)
            .await
            .map_err(|err| KvError::Unavailable(err.to_string()))?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|err| KvError::Unavailable(err.to_string()))?;
        Ok(Self { conn })
    }
}

fn map_err(err: redis::RedisError) -> KvError {
    KvError::Unavailable(err.to_string())
}

#[allow(clippy::cast_possible_wrap)]
fn ttl_seconds(ttl: Duration) -> i64 {
    ttl.as_secs() as i64
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(map_err)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        conn.set_ex(key, value, ttl.as_secs().max(1))
            .await
            .map_err(map_err)
    }

    async fn incr(&self, key: &str) -> Result<i64, KvError> {
        let mut conn = self.conn.clone();
        conn.incr(key, 1_i64).await.map_err(map_err)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .expire(key, ttl_seconds(ttl).max(1))
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>, KvError> {
        let mut conn = self.conn.clone();
        let ttl: i64 = conn.ttl(key).await.map_err(map_err)?;
        // -2 means missing, -1 means no expiry attached.
        if ttl < 0 {
            Ok(None)
        } else {
            Ok(Some(Duration::from_secs(ttl.unsigned_abs())))
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let mut conn = self.conn.clone();
        conn.exists(key).await.map_err(map_err)
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await.map_err(map_err)?;
        Ok(())
    }

    async fn count_prefix(&self, prefix: &str) -> Result<usize, KvError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn
            .keys(format!("{prefix}*"))
            .await
            .map_err(map_err)?;
        Ok(keys.len())
    }
}
