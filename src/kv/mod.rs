//! Key-value store contract backing the token blacklist and rate limiter.
//!
//! The store must provide TTL-based expiry and an atomic increment; both
//! consumers rely on those primitives instead of read-then-write sequences.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("key-value store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Set `key` to `value` with an absolute TTL.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError>;

    /// Atomically increment the counter at `key`, creating it at 1.
    async fn incr(&self, key: &str) -> Result<i64, KvError>;

    /// Attach or refresh a TTL on an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvError>;

    /// Remaining TTL, `None` when the key is missing or has no expiry.
    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>, KvError>;

    async fn exists(&self, key: &str) -> Result<bool, KvError>;

    async fn delete(&self, key: &str) -> Result<(), KvError>;

    /// Number of live keys under `prefix`. Diagnostic only.
    async fn count_prefix(&self, prefix: &str) -> Result<usize, KvError>;
}
