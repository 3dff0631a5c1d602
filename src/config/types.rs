//! Core configuration types and loading.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::defaults::*;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("env var {var} has invalid value {value:?}: {reason}")]
    Env {
        var: String,
        value: String,
        reason: String,
    },
}

/// Bouncer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Log level override (`DEBUG`, `INFO`, `WARN`, `ERROR`).
    /// When unset, `RUST_LOG` is consulted, then `info`.
    #[serde(default)]
    pub log_level: Option<String>,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Listener configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Decision authority (CrowdSec Local API) configuration.
    #[serde(default)]
    pub authority: AuthorityConfig,
    /// Ban response configuration.
    #[serde(default)]
    pub response: ResponseConfig,
    /// Request header names.
    #[serde(default)]
    pub headers: HeaderConfig,
    /// Country allowlist and rate limiting policy.
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Optional shared store for multi-instance deployments.
    #[serde(default)]
    pub redis: RedisConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the forward-auth endpoint binds to (default: 0.0.0.0:8080).
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Prometheus metrics HTTP port (default: 0 = disabled).
    #[serde(default)]
    pub metrics_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            metrics_port: 0,
        }
    }
}

/// Decision authority configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorityConfig {
    /// Host (and optional port) of the decision API, e.g. `crowdsec:8080`.
    #[serde(default)]
    pub host: String,
    /// URL scheme, `http` or `https` (default: http).
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Bouncer API key sent in `X-Api-Key`.
    #[serde(default)]
    pub api_key: String,
    /// Per-request timeout in seconds (default: 5).
    #[serde(default = "default_authority_timeout_secs")]
    pub timeout_secs: u64,
    /// Idle connections kept in the pool (default: 10).
    #[serde(default = "default_max_idle_connections")]
    pub max_idle_connections: usize,
    /// Seconds before an idle pooled connection is closed (default: 30).
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl AuthorityConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            scheme: default_scheme(),
            api_key: String::new(),
            timeout_secs: default_authority_timeout_secs(),
            max_idle_connections: default_max_idle_connections(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

/// Response returned for denied requests.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseConfig {
    /// HTTP status code for banned clients (default: 403).
    #[serde(default = "default_ban_code")]
    pub ban_code: u16,
    /// Response body for banned clients (default: "Forbidden").
    #[serde(default = "default_ban_body")]
    pub ban_body: String,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            ban_code: default_ban_code(),
            ban_body: default_ban_body(),
        }
    }
}

/// Request header names consulted by the pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderConfig {
    /// Header carrying the client IP, tried before `X-Real-Ip` and
    /// `X-Forwarded-For` (default: X-Real-Ip).
    #[serde(default = "default_client_ip_header")]
    pub client_ip: String,
    /// Header carrying the client's country code. Empty disables the
    /// country allowlist.
    #[serde(default)]
    pub country: String,
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            client_ip: default_client_ip_header(),
            country: String::new(),
        }
    }
}

/// Country allowlist and rate limiting policy.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    /// Country codes allowed through. Empty allows every country.
    #[serde(default)]
    pub allowed_countries: Vec<String>,
    /// Token refill rate per client, in requests per second (default: 5).
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    /// Token bucket capacity per client (default: 15).
    #[serde(default = "default_bucket_size")]
    pub bucket_size: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allowed_countries: Vec::new(),
            rate_limit: default_rate_limit(),
            bucket_size: default_bucket_size(),
        }
    }
}

/// Shared store configuration. No addresses means in-process state only.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedisConfig {
    /// `host:port` candidates, tried in order at startup. Sentinel
    /// addresses when `master` is set.
    #[serde(default)]
    pub addresses: Vec<String>,
    /// Optional password, used for Sentinels and the master alike.
    #[serde(default)]
    pub password: Option<String>,
    /// Sentinel master name. Unset connects to `addresses` directly.
    #[serde(default)]
    pub master: Option<String>,
}

impl RedisConfig {
    pub fn enabled(&self) -> bool {
        !self.addresses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
[authority]
host = "crowdsec:8080"
api_key = "secret"
"#,
        )
        .unwrap();

        assert_eq!(config.authority.scheme, "http");
        assert_eq!(config.authority.timeout(), Duration::from_secs(5));
        assert_eq!(config.authority.max_idle_connections, 10);
        assert_eq!(config.response.ban_code, 403);
        assert_eq!(config.response.ban_body, "Forbidden");
        assert_eq!(config.headers.client_ip, "X-Real-Ip");
        assert!(config.headers.country.is_empty());
        assert_eq!(config.policy.rate_limit, 5);
        assert_eq!(config.policy.bucket_size, 15);
        assert_eq!(config.server.listen, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(!config.redis.enabled());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
log_level = "debug"
log_format = "json"

[server]
listen = "127.0.0.1:9000"
metrics_port = 9100

[authority]
host = "lapi:8080"
scheme = "https"
api_key = "k"

[response]
ban_code = 401
ban_body = "go away"

[headers]
client_ip = "Cf-Connecting-Ip"
country = "Cf-Ipcountry"

[policy]
allowed_countries = ["US", "CA"]
rate_limit = 2
bucket_size = 4

[redis]
addresses = ["redis-a:6379", "redis-b:6379"]
password = "pw"
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.server.metrics_port, 9100);
        assert_eq!(config.authority.scheme, "https");
        assert_eq!(config.response.ban_code, 401);
        assert_eq!(config.headers.country, "Cf-Ipcountry");
        assert_eq!(config.policy.allowed_countries, vec!["US", "CA"]);
        assert_eq!(config.redis.addresses.len(), 2);
        assert!(config.redis.enabled());
        assert_eq!(config.redis.master, None);
    }

    #[test]
    fn test_sentinel_master_from_toml() {
        let config: Config = toml::from_str(
            r#"
[redis]
addresses = ["sentinel-a:26379", "sentinel-b:26379"]
master = "cache"
"#,
        )
        .unwrap();
        assert_eq!(config.redis.master.as_deref(), Some("cache"));
        assert_eq!(config.redis.addresses, vec!["sentinel-a:26379", "sentinel-b:26379"]);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/crowdgate.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
