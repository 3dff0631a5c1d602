//! Per-client rate limiting.
//!
//! Token bucket per client identity: capacity = burst, refill = rate tokens
//! per second. A rate or burst of zero admits nothing.
//!
//! # Architecture
//!
//! - `Local`: the `governor` crate's token bucket, one direct limiter per
//!   identity in a DashMap. Creation goes through `entry().or_insert_with()`
//!   so concurrent first requests from one identity share a single bucket.
//! - `Shared`: GCRA (the virtual-scheduling form of the same token bucket)
//!   with its theoretical arrival time kept in the shared store under
//!   `tcbl:`. Any store failure denies.
//!
//! Buckets are never evicted.

use crate::store::{LIMITER_KEY_PREFIX, SharedStore, StoreError};
use dashmap::DashMap;
use governor::{Quota, RateLimiter as GovRateLimiter};
use std::hash::{BuildHasher, RandomState};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Type alias for governor's direct rate limiter.
type DirectRateLimiter = governor::DefaultDirectRateLimiter;

/// Lock stripes serializing shared-store updates within this process.
const SHARED_LOCK_STRIPES: usize = 64;

/// Rate limiter with a local or shared backend, chosen at construction.
pub enum RateLimiter {
    Local(LocalRateLimiter),
    Shared(SharedRateLimiter),
}

impl RateLimiter {
    /// In-process token buckets.
    pub fn local(rate: u32, burst: u32) -> Self {
        Self::Local(LocalRateLimiter::new(rate, burst))
    }

    /// Token buckets kept in the shared store.
    pub fn shared(store: Arc<dyn SharedStore>, rate: u32, burst: u32) -> Self {
        Self::Shared(SharedRateLimiter::new(store, rate, burst))
    }

    /// Consume one token for `identity`.
    ///
    /// Returns `true` if allowed, `false` if rate limited or the backend failed.
    pub async fn allow(&self, identity: &str) -> bool {
        let allowed = match self {
            Self::Local(limiter) => limiter.check(identity),
            Self::Shared(limiter) => limiter.check(identity).await,
        };
        if !allowed {
            debug!(ip = %identity, "rate limit exceeded");
        }
        allowed
    }

    /// Get current statistics.
    pub fn stats(&self) -> RateLimitStats {
        match self {
            Self::Local(limiter) => RateLimitStats {
                tracked_identities: Some(limiter.limiters.len()),
            },
            Self::Shared(_) => RateLimitStats {
                tracked_identities: None,
            },
        }
    }
}

/// Rate limiter statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitStats {
    /// Number of per-identity buckets held in memory (local backend only).
    pub tracked_identities: Option<usize>,
}

// ============================================================================
// Local backend
// ============================================================================

/// Thread-safe per-identity limiter using governor.
pub struct LocalRateLimiter {
    limiters: DashMap<String, DirectRateLimiter>,
    /// `None` when rate or burst is zero.
    quota: Option<Quota>,
}

impl LocalRateLimiter {
    pub fn new(rate: u32, burst: u32) -> Self {
        let quota = NonZeroU32::new(rate)
            .zip(NonZeroU32::new(burst))
            .map(|(rate, burst)| Quota::per_second(rate).allow_burst(burst));
        Self {
            limiters: DashMap::new(),
            quota,
        }
    }

    fn check(&self, identity: &str) -> bool {
        let Some(quota) = self.quota else {
            return false;
        };

        if let Some(limiter) = self.limiters.get(identity) {
            return limiter.check().is_ok();
        }
        let limiter = self
            .limiters
            .entry(identity.to_string())
            .or_insert_with(|| GovRateLimiter::direct(quota));
        limiter.check().is_ok()
    }
}

// ============================================================================
// Shared backend
// ============================================================================

/// GCRA limiter whose state lives in the shared store.
///
/// Requests for one identity are serialized within the process by a striped
/// lock, so a read-modify-write never interleaves with another local request
/// for the same key.
pub struct SharedRateLimiter {
    store: Arc<dyn SharedStore>,
    /// Microseconds per token; `None` when rate or burst is zero.
    emission_interval_us: Option<i64>,
    burst: i64,
    stripes: Box<[Mutex<()>]>,
    hasher: RandomState,
}

impl SharedRateLimiter {
    pub fn new(store: Arc<dyn SharedStore>, rate: u32, burst: u32) -> Self {
        let emission_interval_us = (rate > 0 && burst > 0).then(|| 1_000_000 / i64::from(rate));
        Self {
            store,
            emission_interval_us: emission_interval_us.map(|us| us.max(1)),
            burst: i64::from(burst),
            stripes: (0..SHARED_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            hasher: RandomState::new(),
        }
    }

    async fn check(&self, identity: &str) -> bool {
        let Some(interval) = self.emission_interval_us else {
            return false;
        };

        let stripe = self.hasher.hash_one(identity) as usize % self.stripes.len();
        let _guard = self.stripes[stripe].lock().await;

        match self.acquire(identity, interval).await {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(ip = %identity, error = %e, "rate limiter store failed, denying");
                false
            }
        }
    }

    async fn acquire(&self, identity: &str, interval: i64) -> Result<bool, StoreError> {
        let key = format!("{LIMITER_KEY_PREFIX}{identity}");
        let now = now_micros();

        let tat = match self.store.get(&key).await? {
            Some(value) => value
                .parse::<i64>()
                .map_err(|_| StoreError::Corrupt {
                    key: key.clone(),
                    value,
                })?,
            None => now,
        };

        let new_tat = tat.max(now) + interval;
        let allow_at = new_tat - interval * self.burst;
        if now < allow_at {
            return Ok(false);
        }

        // The key is useless once the bucket is full again.
        let ttl = Duration::from_micros(u64::try_from(new_tat - now).unwrap_or(0));
        self.store.set(&key, &new_tat.to_string(), Some(ttl)).await?;
        Ok(true)
    }
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(saturating_micros)
        .unwrap_or(0)
}

fn saturating_micros(d: Duration) -> i64 {
    i64::try_from(d.as_micros()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    struct BrokenStore;

    #[async_trait]
    impl SharedStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn set(&self, _: &str, _: &str, _: Option<Duration>) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn expire(&self, _: &str, _: Duration) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_local_burst_then_refill() {
        let limiter = RateLimiter::local(10, 3);

        for _ in 0..3 {
            assert!(limiter.allow("1.2.3.4").await);
        }
        assert!(!limiter.allow("1.2.3.4").await);

        // One token every 100ms at rate 10.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(limiter.allow("1.2.3.4").await);
        assert!(!limiter.allow("1.2.3.4").await);
    }

    #[tokio::test]
    async fn test_local_identities_independent() {
        let limiter = RateLimiter::local(1, 1);
        assert!(limiter.allow("1.1.1.1").await);
        assert!(!limiter.allow("1.1.1.1").await);
        assert!(limiter.allow("2.2.2.2").await);
        assert_eq!(limiter.stats().tracked_identities, Some(2));
    }

    #[tokio::test]
    async fn test_zero_rate_or_burst_never_allows() {
        for (rate, burst) in [(0, 5), (5, 0), (0, 0)] {
            let local = RateLimiter::local(rate, burst);
            assert!(!local.allow("1.2.3.4").await);

            let shared = RateLimiter::shared(Arc::new(MemoryStore::new()), rate, burst);
            assert!(!shared.allow("1.2.3.4").await);
        }
    }

    #[tokio::test]
    async fn test_local_single_bucket_under_concurrency() {
        let limiter = Arc::new(RateLimiter::local(1, 5));
        let mut handles = Vec::new();
        for _ in 0..50 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.allow("7.7.7.7").await }));
        }
        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap() {
                admitted += 1;
            }
        }
        // A duplicate bucket would admit more than the burst.
        assert_eq!(admitted, 5);
        assert_eq!(limiter.stats().tracked_identities, Some(1));
    }

    #[tokio::test]
    async fn test_shared_burst_then_refill() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::shared(store.clone(), 10, 3);

        for _ in 0..3 {
            assert!(limiter.allow("1.2.3.4").await);
        }
        assert!(!limiter.allow("1.2.3.4").await);
        assert!(store.get("tcbl:1.2.3.4").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(limiter.allow("1.2.3.4").await);
        assert_eq!(limiter.stats().tracked_identities, None);
    }

    #[tokio::test]
    async fn test_shared_instances_enforce_one_limit() {
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
        let a = RateLimiter::shared(store.clone(), 1, 2);
        let b = RateLimiter::shared(store, 1, 2);

        assert!(a.allow("3.3.3.3").await);
        assert!(b.allow("3.3.3.3").await);
        assert!(!a.allow("3.3.3.3").await);
        assert!(!b.allow("3.3.3.3").await);
    }

    #[tokio::test]
    async fn test_shared_concurrent_requests_share_bucket() {
        let limiter = Arc::new(RateLimiter::shared(Arc::new(MemoryStore::new()), 1, 4));
        let mut handles = Vec::new();
        for _ in 0..20 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.allow("8.8.8.8").await }));
        }
        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 4);
    }

    #[tokio::test]
    async fn test_shared_fails_closed() {
        let limiter = RateLimiter::shared(Arc::new(BrokenStore), 100, 100);
        assert!(!limiter.allow("1.2.3.4").await);
    }

    #[tokio::test]
    async fn test_shared_corrupt_state_fails_closed() {
        let store = Arc::new(MemoryStore::new());
        store.set("tcbl:4.4.4.4", "garbage", None).await.unwrap();
        let limiter = RateLimiter::shared(store, 100, 100);
        assert!(!limiter.allow("4.4.4.4").await);
    }

    #[test]
    fn test_saturating_micros() {
        assert_eq!(saturating_micros(Duration::from_millis(3)), 3_000);
        assert_eq!(saturating_micros(Duration::MAX), i64::MAX);
    }
}
