//! crowdgate - CrowdSec forward-auth bouncer.
//!
//! Answers a reverse proxy's forward-auth subrequests with Allow (200) or
//! Deny (configurable status and body) based on the client's address, a
//! country allowlist, a per-client rate limit and CrowdSec ban decisions.

pub mod access_log;
pub mod config;
pub mod error;
pub mod forward_auth;
pub mod http;
pub mod identity;
pub mod metrics;
pub mod security;
pub mod store;
