//! Default value functions for configuration.
//!
//! Separated into its own module for clarity and reuse.

use std::net::SocketAddr;

// =============================================================================
// Server Defaults
// =============================================================================

pub fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

// =============================================================================
// Authority Defaults
// =============================================================================

pub fn default_scheme() -> String {
    "http".to_string()
}

pub fn default_authority_timeout_secs() -> u64 {
    5
}

pub fn default_max_idle_connections() -> usize {
    10
}

pub fn default_idle_timeout_secs() -> u64 {
    30
}

// =============================================================================
// Response Defaults
// =============================================================================

pub fn default_ban_code() -> u16 {
    403
}

pub fn default_ban_body() -> String {
    "Forbidden".to_string()
}

// =============================================================================
// Header Defaults
// =============================================================================

pub fn default_client_ip_header() -> String {
    "X-Real-Ip".to_string()
}

// =============================================================================
// Policy Defaults
// =============================================================================

pub fn default_rate_limit() -> u32 {
    5
}

pub fn default_bucket_size() -> u32 {
    15
}
