//! Verdict cache for fast repeat-request decisions.
//!
//! Remembers the Allow/Deny verdict for a client identity so the decision
//! authority is not queried on every request.
//!
//! # Architecture
//!
//! - `Local`: per-process DashMap, expiry checked on read (lazy expiration,
//!   expired entries are removed by the read that finds them)
//! - `Shared`: entries live in the shared store under `tcbc:` and expire
//!   through the store's native TTL
//!
//! A TTL of zero or less means the entry never expires.

use crate::store::{CACHE_KEY_PREFIX, SharedStore, StoreError};
use dashmap::DashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// The pipeline's own outcome for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Allow,
    Deny,
}

impl Verdict {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Allow => "Allowed",
            Verdict::Deny => "Denied",
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Verdict::Allow)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Allowed" => Ok(Verdict::Allow),
            "Denied" => Ok(Verdict::Deny),
            _ => Err(()),
        }
    }
}

/// A cached verdict with expiration tracking.
#[derive(Debug, Clone)]
pub struct CachedVerdict {
    verdict: Verdict,
    /// When the entry stops being valid (None = permanent).
    expires_at: Option<Instant>,
}

impl CachedVerdict {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Verdict cache with a local or shared backend, chosen at construction.
#[derive(Clone)]
pub enum VerdictCache {
    /// Single instance: in-process map.
    Local(Arc<DashMap<String, CachedVerdict>>),
    /// Multi-instance: shared store.
    Shared(Arc<dyn SharedStore>),
}

impl fmt::Debug for VerdictCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(map) => f.debug_tuple("Local").field(&map.len()).finish(),
            Self::Shared(_) => f.write_str("Shared"),
        }
    }
}

impl VerdictCache {
    /// Create an empty in-process cache.
    pub fn local() -> Self {
        Self::Local(Arc::new(DashMap::new()))
    }

    /// Create a cache backed by the shared store.
    pub fn shared(store: Arc<dyn SharedStore>) -> Self {
        Self::Shared(store)
    }

    /// Look up the cached verdict for `identity`.
    ///
    /// Absent and expired entries are both a miss; an expired local entry is
    /// purged by this call.
    pub async fn get(&self, identity: &str) -> Result<Option<Verdict>, StoreError> {
        match self {
            Self::Local(map) => {
                match map.get(identity) {
                    None => return Ok(None),
                    Some(entry) if !entry.is_expired() => return Ok(Some(entry.verdict)),
                    Some(_) => {}
                }
                if map.remove_if(identity, |_, e| e.is_expired()).is_some() {
                    debug!(ip = %identity, "Purged expired verdict");
                }
                Ok(None)
            }
            Self::Shared(store) => {
                let key = cache_key(identity);
                match store.get(&key).await? {
                    None => Ok(None),
                    Some(value) => value
                        .parse()
                        .map(Some)
                        .map_err(|()| StoreError::Corrupt { key, value }),
                }
            }
        }
    }

    /// Store a verdict with no expiry.
    pub async fn set(&self, identity: &str, verdict: Verdict) -> Result<(), StoreError> {
        self.store(identity, verdict, None).await
    }

    /// Store a verdict expiring `ttl_secs` from now; `ttl_secs <= 0` means
    /// no expiry.
    pub async fn set_with_ttl(
        &self,
        identity: &str,
        verdict: Verdict,
        ttl_secs: i64,
    ) -> Result<(), StoreError> {
        let ttl = u64::try_from(ttl_secs)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        self.store(identity, verdict, ttl).await
    }

    async fn store(
        &self,
        identity: &str,
        verdict: Verdict,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        match self {
            Self::Local(map) => {
                map.insert(
                    identity.to_string(),
                    CachedVerdict {
                        verdict,
                        expires_at: ttl.map(|ttl| Instant::now() + ttl),
                    },
                );
            }
            Self::Shared(store) => {
                store
                    .set(&cache_key(identity), verdict.as_str(), ttl)
                    .await?;
            }
        }
        debug!(ip = %identity, verdict = %verdict, ttl = ?ttl, "Cached verdict");
        Ok(())
    }

    /// Number of physically stored local entries (expired ones included until
    /// read). `None` for the shared backend.
    pub fn local_len(&self) -> Option<usize> {
        match self {
            Self::Local(map) => Some(map.len()),
            Self::Shared(_) => None,
        }
    }
}

fn cache_key(identity: &str) -> String {
    format!("{CACHE_KEY_PREFIX}{identity}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_verdict_expiration() {
        let expired = CachedVerdict {
            verdict: Verdict::Deny,
            expires_at: Some(Instant::now() - Duration::from_secs(1)),
        };
        assert!(expired.is_expired());

        let active = CachedVerdict {
            verdict: Verdict::Deny,
            expires_at: Some(Instant::now() + Duration::from_secs(3600)),
        };
        assert!(!active.is_expired());

        let permanent = CachedVerdict {
            verdict: Verdict::Deny,
            expires_at: None,
        };
        assert!(!permanent.is_expired());
    }

    #[test]
    fn test_verdict_round_trip_strings() {
        assert_eq!("Denied".parse::<Verdict>(), Ok(Verdict::Deny));
        assert_eq!("Allowed".parse::<Verdict>(), Ok(Verdict::Allow));
        assert!("denied".parse::<Verdict>().is_err());
    }

    #[tokio::test]
    async fn test_local_ttl_hit_then_miss() {
        let cache = VerdictCache::local();
        cache.set_with_ttl("1.2.3.4", Verdict::Deny, 1).await.unwrap();
        assert_eq!(cache.get("1.2.3.4").await.unwrap(), Some(Verdict::Deny));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(cache.get("1.2.3.4").await.unwrap(), None);
        // Expired entry was removed by the read.
        assert_eq!(cache.local_len(), Some(0));
    }

    #[tokio::test]
    async fn test_non_positive_ttl_never_expires() {
        let cache = VerdictCache::local();
        cache.set_with_ttl("a", Verdict::Deny, 0).await.unwrap();
        cache.set_with_ttl("b", Verdict::Deny, -5).await.unwrap();
        cache.set("c", Verdict::Allow).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("a").await.unwrap(), Some(Verdict::Deny));
        assert_eq!(cache.get("b").await.unwrap(), Some(Verdict::Deny));
        assert_eq!(cache.get("c").await.unwrap(), Some(Verdict::Allow));
    }

    #[tokio::test]
    async fn test_local_miss() {
        let cache = VerdictCache::local();
        assert_eq!(cache.get("9.9.9.9").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_shared_uses_prefixed_keys() {
        let store = Arc::new(MemoryStore::new());
        let cache = VerdictCache::shared(store.clone());

        cache.set_with_ttl("1.2.3.4", Verdict::Deny, 60).await.unwrap();
        assert_eq!(
            store.get("tcbc:1.2.3.4").await.unwrap().as_deref(),
            Some("Denied")
        );
        assert_eq!(store.get("1.2.3.4").await.unwrap(), None);
        assert_eq!(cache.get("1.2.3.4").await.unwrap(), Some(Verdict::Deny));
        assert_eq!(cache.local_len(), None);
    }

    #[tokio::test]
    async fn test_shared_corrupt_value_is_error() {
        let store = Arc::new(MemoryStore::new());
        store.set("tcbc:5.5.5.5", "maybe", None).await.unwrap();
        let cache = VerdictCache::shared(store);
        assert!(matches!(
            cache.get("5.5.5.5").await,
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_writers() {
        let cache = VerdictCache::local();
        let mut handles = Vec::new();
        for i in 0..32 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                let ip = format!("1.1.1.{}", i % 4);
                cache.set_with_ttl(&ip, Verdict::Deny, 60).await.unwrap();
                cache.get(&ip).await.unwrap()
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap(), Some(Verdict::Deny));
        }
        assert_eq!(cache.local_len(), Some(4));
    }
}
