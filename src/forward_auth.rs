//! Forward-auth request evaluation.
//!
//! Every request runs through the same ordered stages and stops at the first
//! one that decides:
//!
//! ```text
//! identity → country allowlist → rate limiter → verdict cache → decision API
//!                                                                   │
//!                                              Deny ──> background cache write
//! ```
//!
//! Only a Deny from the decision API is cached, for the ban's remaining time.
//! Authority failures deny without caching, so the next request asks again.

use crate::config::{Config, ValidationError};
use crate::identity::IdentityResolver;
use crate::security::{DecisionClient, RateLimiter, Verdict, VerdictCache};
use http::{HeaderMap, HeaderName, StatusCode};
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Upper bound on one background Deny write.
pub const CACHE_WRITE_TIMEOUT: Duration = Duration::from_secs(60);

/// Immutable per-request settings derived from [`Config`] at startup.
#[derive(Debug, Clone)]
pub struct EvaluationConfig {
    identity: IdentityResolver,
    country_header: Option<HeaderName>,
    allowed_countries: HashSet<String>,
    ban_status: StatusCode,
    ban_body: String,
}

impl EvaluationConfig {
    pub fn from_config(config: &Config) -> Result<Self, ValidationError> {
        let client_ip = parse_header_name(&config.headers.client_ip)?;
        let country_header = match config.headers.country.trim() {
            "" => None,
            name => Some(parse_header_name(name)?),
        };
        let ban_status = StatusCode::from_u16(config.response.ban_code)
            .map_err(|_| ValidationError::InvalidBanCode(config.response.ban_code))?;

        let allowed_countries = config
            .policy
            .allowed_countries
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            identity: IdentityResolver::new(client_ip),
            country_header,
            allowed_countries,
            ban_status,
            ban_body: config.response.ban_body.clone(),
        })
    }

    pub fn ban_status(&self) -> StatusCode {
        self.ban_status
    }

    pub fn ban_body(&self) -> &str {
        &self.ban_body
    }

    /// Header carrying the client country, if configured.
    pub fn country_header(&self) -> Option<&HeaderName> {
        self.country_header.as_ref()
    }

    /// `Some(false)` when the allowlist is active and the request's country
    /// is not on it; `None` when the check does not apply.
    fn country_allowed(&self, headers: &HeaderMap) -> Option<bool> {
        let header = self.country_header.as_ref()?;
        if self.allowed_countries.is_empty() {
            return None;
        }
        let country = headers
            .get(header)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        Some(self.allowed_countries.contains(country))
    }
}

fn parse_header_name(name: &str) -> Result<HeaderName, ValidationError> {
    HeaderName::from_bytes(name.trim().as_bytes())
        .map_err(|_| ValidationError::InvalidHeaderName(name.to_string()))
}

/// Pipeline stage that produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Country,
    RateLimit,
    Cache,
    Authority,
    /// The decision API failed; always a Deny.
    Error,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Country => "country",
            Stage::RateLimit => "rate_limit",
            Stage::Cache => "cache",
            Stage::Authority => "authority",
            Stage::Error => "error",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of evaluating one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub identity: String,
    pub verdict: Verdict,
    pub stage: Stage,
}

/// The forward-auth evaluator shared by all request handlers.
pub struct ForwardAuth {
    settings: EvaluationConfig,
    limiter: RateLimiter,
    cache: VerdictCache,
    decisions: DecisionClient,
    /// Background Deny writes.
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl ForwardAuth {
    pub fn new(
        settings: EvaluationConfig,
        limiter: RateLimiter,
        cache: VerdictCache,
        decisions: DecisionClient,
    ) -> Self {
        Self {
            settings,
            limiter,
            cache,
            decisions,
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn settings(&self) -> &EvaluationConfig {
        &self.settings
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn cache(&self) -> &VerdictCache {
        &self.cache
    }

    /// Background cache writes still running.
    pub fn pending_writes(&self) -> usize {
        self.tasks.len()
    }

    /// Evaluate one request.
    ///
    /// Never fails: every error path ends in a Deny.
    pub async fn evaluate(&self, headers: &HeaderMap, peer: SocketAddr) -> Evaluation {
        let identity = self.settings.identity.resolve(headers, peer);
        let (verdict, stage) = self.decide(&identity, headers).await;
        crate::metrics::record_request(verdict.as_str(), stage.as_str());
        Evaluation {
            identity,
            verdict,
            stage,
        }
    }

    async fn decide(&self, identity: &str, headers: &HeaderMap) -> (Verdict, Stage) {
        if self.settings.country_allowed(headers) == Some(false) {
            debug!(ip = %identity, "Blocked country");
            return (Verdict::Deny, Stage::Country);
        }

        if !self.limiter.allow(identity).await {
            debug!(ip = %identity, "Rate limit hit");
            return (Verdict::Deny, Stage::RateLimit);
        }

        match self.cache.get(identity).await {
            Ok(Some(verdict)) => {
                crate::metrics::record_cache_lookup("hit");
                debug!(ip = %identity, verdict = %verdict, "Cache hit");
                return (verdict, Stage::Cache);
            }
            Ok(None) => crate::metrics::record_cache_lookup("miss"),
            Err(e) => {
                // Fall through to the authority.
                crate::metrics::record_cache_lookup("error");
                warn!(ip = %identity, error = %e, "Verdict cache lookup failed");
            }
        }

        match self.decisions.query(identity).await {
            Ok(answer) if answer.authorized => (Verdict::Allow, Stage::Authority),
            Ok(answer) => {
                self.persist_deny(identity, answer.ban_ttl);
                (Verdict::Deny, Stage::Authority)
            }
            Err(e) => {
                warn!(ip = %identity, error = %e, code = e.error_code(), "Decision lookup failed, denying");
                (Verdict::Deny, Stage::Error)
            }
        }
    }

    /// Cache a Deny in the background so the response is not held up.
    fn persist_deny(&self, identity: &str, ban_ttl: Duration) {
        let ttl_secs = ttl_to_secs(ban_ttl);
        if ttl_secs == 0 {
            // Zero would mean "never expires".
            debug!(ip = %identity, "Ban has no remaining time, not caching");
            return;
        }

        let cache = self.cache.clone();
        let token = self.shutdown.clone();
        let identity = identity.to_string();
        self.tasks.spawn(async move {
            let write = tokio::time::timeout(
                CACHE_WRITE_TIMEOUT,
                cache.set_with_ttl(&identity, Verdict::Deny, ttl_secs),
            );
            let result = tokio::select! {
                _ = token.cancelled() => "cancelled",
                outcome = write => match outcome {
                    Ok(Ok(())) => "ok",
                    Ok(Err(e)) => {
                        warn!(ip = %identity, error = %e, "Failed to cache deny verdict");
                        "error"
                    }
                    Err(_) => {
                        warn!(ip = %identity, "Timed out caching deny verdict");
                        "timeout"
                    }
                },
            };
            crate::metrics::record_cache_write(result);
        });
    }

    /// Stop accepting background work and drain what is in flight.
    ///
    /// Writes still running after `grace` are cancelled.
    pub async fn shutdown(&self, grace: Duration) {
        self.tasks.close();
        if tokio::time::timeout(grace, self.tasks.wait()).await.is_err() {
            warn!(pending = self.tasks.len(), "Cancelling unfinished cache writes");
            self.shutdown.cancel();
            self.tasks.wait().await;
        }
        info!("Background cache writes drained");
    }
}

/// Whole seconds for a cache TTL, rounded up.
fn ttl_to_secs(ttl: Duration) -> i64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    i64::try_from(secs).unwrap_or(i64::MAX)
}
