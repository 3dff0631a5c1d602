//! Shared key-value store abstraction.
//!
//! Multi-instance deployments keep verdicts and rate limiter state in a store
//! every instance can reach. The pipeline only needs get/set/expire, plus a
//! ping for the health endpoint.

use async_trait::async_trait;
use std::time::Duration;

pub mod memory;
pub mod redis;

pub use crate::error::StoreError;
pub use memory::MemoryStore;
pub use self::redis::RedisStore;

/// Key prefix for cached verdicts.
pub const CACHE_KEY_PREFIX: &str = "tcbc:";

/// Key prefix for rate limiter state.
pub const LIMITER_KEY_PREFIX: &str = "tcbl:";

#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Fetch a value. Missing or expired keys return `None`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store a value, optionally expiring after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Set an expiry on an existing key. Returns `false` if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;
}
