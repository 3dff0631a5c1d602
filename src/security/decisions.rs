//! Ban decision lookups against the CrowdSec Local API.
//!
//! One `GET {scheme}://{host}/v1/decisions?type=ban&ip={ip}` per cache miss,
//! authenticated with `X-Api-Key`. The authority answers either the literal
//! `null` (no decision) or a JSON array of active decisions.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   DecisionClient                     │
//! ├──────────────────────────────────────────────────────┤
//! │ ┌──────────────┐  ┌──────────────┐  ┌─────────────┐  │
//! │ │ reqwest pool │→ │ interpret    │→ │ ban TTL =   │  │
//! │ │ 5s / 10 idle │  │ null | [..]  │  │ max(dur)    │  │
//! │ └──────────────┘  └──────────────┘  └─────────────┘  │
//! └──────────────────────────────────────────────────────┘
//! ```

use super::duration::{SignedDuration, parse_duration};
use crate::config::AuthorityConfig;
use crate::error::DecisionError;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Header carrying the bouncer API key.
pub const API_KEY_HEADER: &str = "X-Api-Key";

/// Path of the decisions endpoint.
const DECISIONS_PATH: &str = "v1/decisions";

/// One active decision as reported by the authority.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BanDecision {
    pub id: i64,
    pub origin: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub scope: String,
    pub value: String,
    /// Remaining ban time, e.g. `"3h59m58s"`.
    pub duration: String,
    pub scenario: String,
    pub simulated: bool,
}

/// Interpreted authority answer for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorityVerdict {
    /// `true` when no ban decision applies.
    pub authorized: bool,
    /// Longest remaining ban among the decisions; zero when authorized.
    pub ban_ttl: Duration,
}

impl AuthorityVerdict {
    const ALLOW: Self = Self {
        authorized: true,
        ban_ttl: Duration::ZERO,
    };
}

/// HTTP client for the decision authority.
#[derive(Debug, Clone)]
pub struct DecisionClient {
    http_client: reqwest::Client,
    endpoint: Url,
    api_key: String,
}

impl DecisionClient {
    /// Build a client with a bounded connection pool and per-call timeout.
    pub fn new(config: &AuthorityConfig) -> Result<Self, DecisionError> {
        let endpoint = Url::parse(&format!(
            "{}://{}/{}",
            config.scheme, config.host, DECISIONS_PATH
        ))
        .map_err(|e| DecisionError::Url(format!("{}://{}: {e}", config.scheme, config.host)))?;

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .pool_max_idle_per_host(config.max_idle_connections)
            .pool_idle_timeout(config.idle_timeout())
            .user_agent(concat!("crowdgate/", env!("CARGO_PKG_VERSION")))
            .build()?;

        info!(endpoint = %endpoint, timeout_secs = config.timeout_secs, "Decision client initialized");

        Ok(Self {
            http_client,
            endpoint,
            api_key: config.api_key.clone(),
        })
    }

    /// URL queried for `identity`.
    pub fn decision_url(&self, identity: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("type", "ban")
            .append_pair("ip", identity);
        url
    }

    /// Ask the authority whether `identity` is banned.
    ///
    /// A `403` means the API key was rejected and surfaces as
    /// [`DecisionError::Forbidden`]; any other non-success status is
    /// [`DecisionError::Status`].
    pub async fn query(&self, identity: &str) -> Result<AuthorityVerdict, DecisionError> {
        let start = Instant::now();
        let result = self.fetch(identity).await;

        let label = match &result {
            Ok(v) if v.authorized => "allow",
            Ok(_) => "deny",
            Err(e) => e.error_code(),
        };
        crate::metrics::record_authority(label, start.elapsed().as_secs_f64());

        result
    }

    async fn fetch(&self, identity: &str) -> Result<AuthorityVerdict, DecisionError> {
        let url = self.decision_url(identity);
        debug!(url = %url, "Requesting decisions");

        let response = self
            .http_client
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;

        match response.status() {
            StatusCode::FORBIDDEN => return Err(DecisionError::Forbidden),
            status if !status.is_success() => return Err(DecisionError::Status(status.as_u16())),
            _ => {}
        }

        let body = response.bytes().await?;
        let verdict = interpret_body(&body)?;
        debug!(
            ip = %identity,
            authorized = verdict.authorized,
            ban_ttl = ?verdict.ban_ttl,
            "Decision evaluated"
        );
        Ok(verdict)
    }
}

/// Interpret a decisions response body.
///
/// `null` is checked before any JSON parsing. Otherwise the body must be an
/// array of decisions; the ban TTL is the maximum of their durations, and a
/// single malformed duration fails the whole response.
pub fn interpret_body(body: &[u8]) -> Result<AuthorityVerdict, DecisionError> {
    if body.trim_ascii() == b"null" {
        return Ok(AuthorityVerdict::ALLOW);
    }

    let decisions: Vec<BanDecision> = serde_json::from_slice(body)?;

    let mut longest = SignedDuration::ZERO;
    for decision in &decisions {
        let remaining = parse_duration(&decision.duration)?;
        if remaining > longest {
            longest = remaining;
        }
    }

    Ok(AuthorityVerdict {
        authorized: decisions.is_empty(),
        ban_ttl: longest.to_std(),
    })
}
