//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Core config struct definitions and TOML loading
//! - [`env`]: `CROWDSEC_BOUNCER_*` environment variable loading
//! - [`defaults`]: serde default value functions
//! - [`validation`]: Startup validation (collects every error before aborting)

mod defaults;
mod env;
mod types;
pub mod validation;

pub use env::ENV_PREFIX;
pub use types::{
    AuthorityConfig, Config, ConfigError, HeaderConfig, LogFormat, PolicyConfig, RedisConfig,
    ResponseConfig, ServerConfig,
};
pub use validation::{ValidationError, validate};
