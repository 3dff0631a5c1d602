//! Security module for crowdgate.
//!
//! Provides the checks the forward-auth pipeline is built from:
//! - **Rate Limiting**: Governor token buckets per client, or GCRA in the shared store
//! - **Verdict Cache**: Deny verdicts remembered for the ban's remaining duration
//! - **Decisions**: CrowdSec Local API lookups and ban TTL derivation
//! - **Duration**: Parser for the authority's textual durations
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Security Module                        │
//! ├────────────────┬────────────────┬──────────────┬─────────────┤
//! │ Rate Limiting  │ Verdict Cache  │  Decisions   │  Duration   │
//! │   Governor     │    DashMap     │   reqwest    │  "4h3m2s"   │
//! │ GCRA / Redis   │  tcbc: / Redis │  null | [..] │  signed ns  │
//! └────────────────┴────────────────┴──────────────┴─────────────┘
//! ```

pub mod decisions;
pub mod duration;
pub mod rate_limit;
pub mod verdict_cache;

pub use decisions::{AuthorityVerdict, BanDecision, DecisionClient};
pub use duration::{SignedDuration, parse_duration};
pub use rate_limit::{RateLimitStats, RateLimiter};
pub use verdict_cache::{Verdict, VerdictCache};
