//! Redis-backed [`SharedStore`].
//!
//! Uses a deadpool connection pool. Expiry is delegated to Redis (`PX`,
//! `PEXPIRE`), so entries disappear without any sweeping on our side.
//!
//! Two topologies:
//!
//! - direct: each address is a Redis server; the first answering `PING` wins.
//! - sentinel: the addresses are Sentinels and connections go to the master
//!   they report for `master`. Failover is followed when the pool reconnects.

use super::{SharedStore, StoreError};
use crate::config::RedisConfig;
use ::redis::aio::ConnectionLike;
use ::redis::sentinel::SentinelNodeConnectionInfo;
use ::redis::{AsyncCommands, Cmd, Pipeline, RedisConnectionInfo, RedisFuture, Value};
use async_trait::async_trait;
use deadpool_redis::sentinel::{self, SentinelServerType};
use deadpool_redis::{Pool, PoolConfig, Runtime, Timeouts};
use std::time::Duration;
use tracing::{info, warn};

/// Bound on acquiring, creating or recycling a pooled connection.
const STORE_TIMEOUT: Duration = Duration::from_secs(2);

enum Backend {
    Direct(Pool),
    Sentinel(sentinel::Pool),
}

pub struct RedisStore {
    backend: Backend,
    address: String,
}

impl RedisStore {
    /// Connect using the topology selected by `config.master`.
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        match config.master.as_deref() {
            Some(master) => Self::connect_sentinel(config, master).await,
            None => Self::connect_direct(config).await,
        }
    }

    /// Resolve `master` through the configured Sentinels and check it answers `PING`.
    async fn connect_sentinel(config: &RedisConfig, master: &str) -> Result<Self, StoreError> {
        if config.addresses.is_empty() {
            return Err(StoreError::Unavailable(
                "no redis addresses configured".to_string(),
            ));
        }
        let password = config.password.as_deref();
        let sentinels: Vec<String> = config
            .addresses
            .iter()
            .map(|address| redis_url(address, password))
            .collect();
        let node = SentinelNodeConnectionInfo {
            tls_mode: None,
            redis_connection_info: Some(RedisConnectionInfo {
                password: password.filter(|pw| !pw.is_empty()).map(String::from),
                ..RedisConnectionInfo::default()
            }),
        };

        let manager = sentinel::Manager::new(
            sentinels,
            master.to_string(),
            Some(node),
            SentinelServerType::Master,
        )?;
        let pool = sentinel::Pool::builder(manager)
            .config(pool_limits())
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| StoreError::Pool(e.to_string()))?;

        let store = Self {
            backend: Backend::Sentinel(pool),
            address: format!("{master} via {}", config.addresses.join(",")),
        };
        store.ping().await?;
        info!(master = %master, sentinels = ?config.addresses, "Connected to Redis master");
        Ok(store)
    }

    /// Connect to the first configured address that answers `PING`.
    async fn connect_direct(config: &RedisConfig) -> Result<Self, StoreError> {
        let mut last_error = StoreError::Unavailable("no redis addresses configured".to_string());

        for address in &config.addresses {
            let mut pool_config = deadpool_redis::Config::from_url(redis_url(
                address,
                config.password.as_deref(),
            ));
            pool_config.pool = Some(pool_limits());

            let pool = match pool_config.create_pool(Some(Runtime::Tokio1)) {
                Ok(pool) => pool,
                Err(e) => {
                    warn!(address = %address, error = %e, "Failed to create Redis pool");
                    last_error = StoreError::Pool(e.to_string());
                    continue;
                }
            };

            let store = Self {
                backend: Backend::Direct(pool),
                address: address.clone(),
            };
            match store.ping().await {
                Ok(()) => {
                    info!(address = %address, "Connected to Redis");
                    return Ok(store);
                }
                Err(e) => {
                    warn!(address = %address, error = %e, "Redis address unreachable");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    /// The connected address, or the master name and its Sentinels.
    pub fn address(&self) -> &str {
        &self.address
    }

    async fn conn(&self) -> Result<PooledConnection, StoreError> {
        Ok(match &self.backend {
            Backend::Direct(pool) => PooledConnection::Direct(pool.get().await?),
            Backend::Sentinel(pool) => PooledConnection::Sentinel(pool.get().await?),
        })
    }
}

fn pool_limits() -> PoolConfig {
    let mut timeouts = Timeouts::default();
    timeouts.wait = Some(STORE_TIMEOUT);
    timeouts.create = Some(STORE_TIMEOUT);
    timeouts.recycle = Some(STORE_TIMEOUT);
    let mut limits = PoolConfig::default();
    limits.timeouts = timeouts;
    limits
}

/// A connection checked out of either pool.
enum PooledConnection {
    Direct(deadpool_redis::Connection),
    Sentinel(sentinel::Connection),
}

impl ConnectionLike for PooledConnection {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
        match self {
            Self::Direct(conn) => conn.req_packed_command(cmd),
            Self::Sentinel(conn) => conn.req_packed_command(cmd),
        }
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        cmd: &'a Pipeline,
        offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        match self {
            Self::Direct(conn) => conn.req_packed_commands(cmd, offset, count),
            Self::Sentinel(conn) => conn.req_packed_commands(cmd, offset, count),
        }
    }

    fn get_db(&self) -> i64 {
        match self {
            Self::Direct(conn) => conn.get_db(),
            Self::Sentinel(conn) => conn.get_db(),
        }
    }
}

/// Build a connection URL from a `host:port` address and optional password.
fn redis_url(address: &str, password: Option<&str>) -> String {
    if address.starts_with("redis://") || address.starts_with("rediss://") {
        return address.to_string();
    }
    match password {
        Some(pw) if !pw.is_empty() => format!("redis://:{pw}@{address}/"),
        _ => format!("redis://{address}/"),
    }
}

/// Redis expiry is integral milliseconds; never round a positive TTL down to 0.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn().await?;
        let value = conn.get::<_, Option<String>>(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        match ttl {
            Some(ttl) => {
                conn.pset_ex::<_, _, ()>(key, value, ttl_millis(ttl))
                    .await?
            }
            None => conn.set::<_, _, ()>(key, value).await?,
        }
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let millis = i64::try_from(ttl_millis(ttl)).unwrap_or(i64::MAX);
        let applied = conn.pexpire::<_, bool>(key, millis).await?;
        Ok(applied)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: String = ::redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
