//! Integration test common infrastructure.
//!
//! Builds the forward-auth router in-process against a wiremock decision
//! API and drives it with `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use crowdgate::config::Config;
use crowdgate::forward_auth::{EvaluationConfig, ForwardAuth};
use crowdgate::http::{AppState, router};
use crowdgate::security::{DecisionClient, RateLimiter, Verdict, VerdictCache};
use crowdgate::store::SharedStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::MockServer;

pub const API_KEY: &str = "test-key";

/// Peer address used when a test does not care.
pub fn peer() -> SocketAddr {
    "203.0.113.50:41000".parse().unwrap()
}

/// A bouncer wired to a mock decision API.
pub struct TestGate {
    pub state: Arc<AppState>,
    pub app: Router,
}

impl TestGate {
    /// In-process backends; `extra` is appended to the generated TOML.
    pub async fn start(authority: &MockServer, extra: &str) -> Self {
        Self::build(authority, extra, None).await
    }

    /// Shared-store backends over `store`.
    pub async fn with_store(
        authority: &MockServer,
        extra: &str,
        store: Arc<dyn SharedStore>,
    ) -> Self {
        Self::build(authority, extra, Some(store)).await
    }

    async fn build(authority: &MockServer, extra: &str, store: Option<Arc<dyn SharedStore>>) -> Self {
        let source = format!(
            "[authority]\nhost = \"{}\"\napi_key = \"{API_KEY}\"\n{extra}",
            authority.address()
        );
        let config: Config = toml::from_str(&source).expect("test config parses");
        crowdgate::config::validate(&config).expect("test config is valid");

        let (rate, burst) = (config.policy.rate_limit, config.policy.bucket_size);
        let (limiter, cache) = match &store {
            Some(store) => (
                RateLimiter::shared(Arc::clone(store), rate, burst),
                VerdictCache::shared(Arc::clone(store)),
            ),
            None => (RateLimiter::local(rate, burst), VerdictCache::local()),
        };

        let auth = ForwardAuth::new(
            EvaluationConfig::from_config(&config).unwrap(),
            limiter,
            cache,
            DecisionClient::new(&config.authority).unwrap(),
        );
        let state = Arc::new(AppState::new(auth, store));
        let app = router(Arc::clone(&state));
        Self { state, app }
    }

    /// Issue a GET with the given headers from `peer`.
    pub async fn get(
        &self,
        path: &str,
        headers: &[(&str, &str)],
        peer: SocketAddr,
    ) -> (StatusCode, String) {
        let mut builder = Request::builder().method("GET").uri(path);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder
            .extension(ConnectInfo(peer))
            .body(Body::empty())
            .unwrap();

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    /// Forward-auth request with the given headers from the default peer.
    pub async fn authorize(&self, headers: &[(&str, &str)]) -> (StatusCode, String) {
        self.get("/api/v1/forwardAuth", headers, peer()).await
    }

    /// Wait for the background Deny write for `identity` to land.
    pub async fn wait_for_deny(&self, identity: &str) {
        for _ in 0..100 {
            if let Ok(Some(Verdict::Deny)) = self.state.auth.cache().get(identity).await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("deny verdict for {identity} was never cached");
    }
}
