//! HTTP surface: the forward-auth and health endpoints, plus the Prometheus
//! metrics endpoint on its own port.

use crate::access_log::AccessLog;
use crate::forward_auth::ForwardAuth;
use crate::store::SharedStore;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode, Version};
use axum::response::{IntoResponse, Response};
use axum::{Router, routing::get};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;

/// Forward-auth endpoint polled by the reverse proxy.
pub const FORWARD_AUTH_PATH: &str = "/api/v1/forwardAuth";

/// Liveness endpoint.
pub const HEALTH_PATH: &str = "/api/v1/health";

/// State shared by the request handlers.
pub struct AppState {
    pub auth: ForwardAuth,
    pub access_log: AccessLog,
    /// Pinged by the health endpoint when configured.
    pub store: Option<Arc<dyn SharedStore>>,
}

impl AppState {
    pub fn new(auth: ForwardAuth, store: Option<Arc<dyn SharedStore>>) -> Self {
        let access_log = AccessLog::new(auth.settings().country_header().cloned());
        Self {
            auth,
            access_log,
            store,
        }
    }
}

/// Build the public router.
///
/// Handlers need the peer address, so serve it with
/// `into_make_service_with_connect_info::<SocketAddr>()` (see [`serve`]).
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(FORWARD_AUTH_PATH, get(forward_auth_handler))
        .route(HEALTH_PATH, get(health_handler))
        .with_state(state)
}

/// Handler for GET /api/v1/forwardAuth.
async fn forward_auth_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    version: Version,
    headers: HeaderMap,
) -> Response {
    let start = Instant::now();
    let evaluation = state.auth.evaluate(&headers, peer).await;

    let settings = state.auth.settings();
    let (status, response) = if evaluation.verdict.is_allow() {
        (StatusCode::OK, StatusCode::OK.into_response())
    } else {
        let status = settings.ban_status();
        (status, (status, settings.ban_body().to_string()).into_response())
    };

    state
        .access_log
        .record(&evaluation.identity, &headers, version, status, start.elapsed());
    response
}

/// Handler for GET /api/v1/health.
async fn health_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    match &state.store {
        Some(store) => match store.ping().await {
            Ok(()) => StatusCode::OK,
            Err(e) => {
                tracing::warn!(error = %e, "Health check: shared store unreachable");
                StatusCode::SERVICE_UNAVAILABLE
            }
        },
        None => StatusCode::OK,
    }
}

/// Serve the public router until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

/// Handler for GET /metrics - returns Prometheus metrics in text format.
async fn metrics_handler() -> String {
    crate::metrics::gather_metrics()
}

/// Run the HTTP server for Prometheus metrics.
///
/// Binds to `0.0.0.0:port` and serves the `/metrics` endpoint.
/// This is a long-running task that should be spawned in the background.
pub async fn run_metrics_server(port: u16) {
    let app = Router::new().route("/metrics", get(metrics_handler));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Prometheus HTTP server listening on {}", addr);

    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind metrics server on {}: {}", addr, e);
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Metrics server error: {}", e);
    }
}
