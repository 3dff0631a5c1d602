//! Configuration validation.
//!
//! Validates configuration at startup so misconfiguration aborts the process
//! before the pipeline is constructed.

use super::Config;
use http::HeaderName;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("authority.api_key (CROWDSEC_BOUNCER_API_KEY) is required")]
    MissingApiKey,
    #[error("authority.host (CROWDSEC_BOUNCER_AGENT_HOST) is required")]
    MissingAgentHost,
    #[error("authority.scheme must be http or https, got '{0}'")]
    InvalidScheme(String),
    #[error("response.ban_code must be a valid HTTP status between 100 and 599, got {0}")]
    InvalidBanCode(u16),
    #[error("'{0}' is not a valid HTTP header name")]
    InvalidHeaderName(String),
    #[error("authority.timeout_secs must be greater than zero")]
    ZeroAuthorityTimeout,
    #[error("redis.master (CROWDSEC_BOUNCER_REDIS_MASTER) must not be empty")]
    EmptyRedisMaster,
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    // Required fields
    if config.authority.api_key.trim().is_empty() {
        errors.push(ValidationError::MissingApiKey);
    }
    if config.authority.host.trim().is_empty() {
        errors.push(ValidationError::MissingAgentHost);
    }

    if !matches!(config.authority.scheme.as_str(), "http" | "https") {
        errors.push(ValidationError::InvalidScheme(
            config.authority.scheme.clone(),
        ));
    }
    if config.authority.timeout_secs == 0 {
        errors.push(ValidationError::ZeroAuthorityTimeout);
    }

    if !(100..=599).contains(&config.response.ban_code) {
        errors.push(ValidationError::InvalidBanCode(config.response.ban_code));
    }

    // Header names
    if HeaderName::from_bytes(config.headers.client_ip.as_bytes()).is_err() {
        errors.push(ValidationError::InvalidHeaderName(
            config.headers.client_ip.clone(),
        ));
    }
    if !config.headers.country.is_empty()
        && HeaderName::from_bytes(config.headers.country.as_bytes()).is_err()
    {
        errors.push(ValidationError::InvalidHeaderName(
            config.headers.country.clone(),
        ));
    }

    if config.redis.master.as_deref().is_some_and(|m| m.trim().is_empty()) {
        errors.push(ValidationError::EmptyRedisMaster);
    }

    if config.policy.rate_limit == 0 || config.policy.bucket_size == 0 {
        tracing::warn!(
            rate = config.policy.rate_limit,
            burst = config.policy.bucket_size,
            "rate limit or bucket size is zero; every request will be denied"
        );
    }
    if !config.policy.allowed_countries.is_empty() && config.headers.country.is_empty() {
        tracing::warn!("allowed_countries is set but no country header is configured; ignoring");
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
