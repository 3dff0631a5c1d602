//! Environment variable configuration.
//!
//! Every setting can be supplied as `CROWDSEC_BOUNCER_<NAME>`. Shared store
//! addresses use one variable per address (`CROWDSEC_BOUNCER_REDIS_ADDRESS_1`,
//! `CROWDSEC_BOUNCER_REDIS_ADDRESS_2`, ...). Those are Sentinel addresses:
//! the master name comes from `CROWDSEC_BOUNCER_REDIS_MASTER` and defaults to
//! `mymaster`.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::str::FromStr;

use super::types::{Config, ConfigError, LogFormat};

/// Prefix shared by every configuration variable.
pub const ENV_PREFIX: &str = "CROWDSEC_BOUNCER_";

const REDIS_ADDRESS_PREFIX: &str = "REDIS_ADDRESS_";

/// Sentinel master name when `REDIS_MASTER` is unset.
pub const DEFAULT_REDIS_MASTER: &str = "mymaster";

impl Config {
    /// Build configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Build configuration from `(name, value)` pairs.
    ///
    /// Variables without the `CROWDSEC_BOUNCER_` prefix and empty values are
    /// ignored, so unset and empty behave the same.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: BTreeMap<String, String> = vars
            .into_iter()
            .filter_map(|(k, v)| {
                let name = k.strip_prefix(ENV_PREFIX)?.to_string();
                (!v.is_empty()).then_some((name, v))
            })
            .collect();

        let mut config: Config = toml::from_str("")?;

        config.log_level = vars.get("LOG_LEVEL").cloned();
        if let Some(format) = vars.get("LOG_FORMAT") {
            config.log_format = match format.to_ascii_lowercase().as_str() {
                "text" => LogFormat::Text,
                "json" => LogFormat::Json,
                _ => return Err(invalid("LOG_FORMAT", format, "expected text or json")),
            };
        }

        if let Some(listen) = vars.get("LISTEN_ADDRESS") {
            config.server.listen = parse_listen_address(listen)
                .ok_or_else(|| invalid("LISTEN_ADDRESS", listen, "expected [host]:port"))?;
        }
        if let Some(port) = vars.get("METRICS_PORT") {
            config.server.metrics_port = parse_number("METRICS_PORT", port)?;
        }

        if let Some(key) = vars.get("API_KEY") {
            config.authority.api_key = key.clone();
        }
        if let Some(host) = vars.get("AGENT_HOST") {
            config.authority.host = host.clone();
        }
        if let Some(scheme) = vars.get("SCHEME") {
            config.authority.scheme = scheme.clone();
        }

        if let Some(code) = vars.get("BAN_RESPONSE_CODE") {
            config.response.ban_code = parse_number("BAN_RESPONSE_CODE", code)?;
        }
        if let Some(body) = vars.get("BAN_RESPONSE_MSG") {
            config.response.ban_body = body.clone();
        }

        if let Some(header) = vars.get("CLIENT_IP_HEADER") {
            config.headers.client_ip = header.clone();
        }
        if let Some(header) = vars.get("COUNTRY_HEADER") {
            config.headers.country = header.clone();
        }

        if let Some(countries) = vars.get("ALLOWED_COUNTRIES") {
            config.policy.allowed_countries = countries
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(rate) = vars.get("RATE_LIMIT") {
            config.policy.rate_limit = parse_number("RATE_LIMIT", rate)?;
        }
        if let Some(size) = vars.get("BUCKET_SIZE") {
            config.policy.bucket_size = parse_number("BUCKET_SIZE", size)?;
        }

        // BTreeMap iteration keeps the addresses in variable-name order.
        config.redis.addresses = vars
            .iter()
            .filter(|(k, _)| k.starts_with(REDIS_ADDRESS_PREFIX))
            .map(|(_, v)| v.clone())
            .collect();
        config.redis.password = vars.get("REDIS_PASSWORD").cloned();
        if config.redis.enabled() {
            config.redis.master = Some(
                vars.get("REDIS_MASTER")
                    .cloned()
                    .unwrap_or_else(|| DEFAULT_REDIS_MASTER.to_string()),
            );
        }

        Ok(config)
    }
}

/// Parse a listen address, accepting the `:8080` shorthand for all interfaces.
fn parse_listen_address(value: &str) -> Option<SocketAddr> {
    if let Some(port) = value.strip_prefix(':') {
        let port = port.parse::<u16>().ok()?;
        return Some(SocketAddr::from(([0, 0, 0, 0], port)));
    }
    value.parse().ok()
}

fn parse_number<T>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid(name, value, &e.to_string()))
}

fn invalid(name: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Env {
        var: format!("{ENV_PREFIX}{name}"),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
