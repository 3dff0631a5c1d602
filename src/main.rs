//! crowdgate - CrowdSec forward-auth bouncer.
//!
//! Configuration comes from the TOML file named by the first argument, or
//! from `CROWDSEC_BOUNCER_*` environment variables when no file is given.

use anyhow::Context;
use crowdgate::config::{self, Config, LogFormat};
use crowdgate::forward_auth::{EvaluationConfig, ForwardAuth};
use crowdgate::http::{self, AppState};
use crowdgate::metrics;
use crowdgate::security::{DecisionClient, RateLimiter, VerdictCache};
use crowdgate::store::{RedisStore, SharedStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Time allowed for in-flight cache writes after the listener stops.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(&path).with_context(|| format!("loading {path}"))?,
        None => Config::from_env().context("reading environment")?,
    };

    init_tracing(&config);

    if let Err(errors) = config::validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        anyhow::bail!("{} configuration error(s)", errors.len());
    }

    info!(
        listen = %config.server.listen,
        authority = %config.authority.host,
        rate = config.policy.rate_limit,
        burst = config.policy.bucket_size,
        "Starting crowdgate"
    );

    let store: Option<Arc<dyn SharedStore>> = if config.redis.enabled() {
        let redis = RedisStore::connect(&config.redis)
            .await
            .context("no configured Redis address is reachable")?;
        info!(address = %redis.address(), "Using shared store for cache and rate limiter");
        Some(Arc::new(redis))
    } else {
        info!("Using in-process cache and rate limiter");
        None
    };

    let (limiter, cache) = match &store {
        Some(store) => (
            RateLimiter::shared(
                Arc::clone(store),
                config.policy.rate_limit,
                config.policy.bucket_size,
            ),
            VerdictCache::shared(Arc::clone(store)),
        ),
        None => (
            RateLimiter::local(config.policy.rate_limit, config.policy.bucket_size),
            VerdictCache::local(),
        ),
    };

    let settings = EvaluationConfig::from_config(&config)?;
    let decisions = DecisionClient::new(&config.authority)?;
    let state = Arc::new(AppState::new(
        ForwardAuth::new(settings, limiter, cache, decisions),
        store,
    ));

    // Convention: metrics_port = 0 disables the HTTP endpoint.
    let metrics_port = config.server.metrics_port;
    if metrics_port == 0 {
        info!("Metrics disabled");
    } else {
        metrics::init();
        tokio::spawn(async move {
            http::run_metrics_server(metrics_port).await;
        });
        info!(port = metrics_port, "Prometheus HTTP server started");
    }

    let listener = tokio::net::TcpListener::bind(config.server.listen)
        .await
        .with_context(|| format!("binding {}", config.server.listen))?;
    info!(addr = %config.server.listen, "Listening for forward-auth requests");

    http::serve(listener, http::router(Arc::clone(&state)), shutdown_signal()).await?;

    state.auth.shutdown(SHUTDOWN_GRACE).await;
    info!("Shutdown complete");
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = match config.log_level.as_deref().map(str::trim) {
        Some(level) if !level.is_empty() => EnvFilter::new(level.to_ascii_lowercase()),
        _ => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match config.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, draining");
}
