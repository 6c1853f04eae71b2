use std::{collections::HashSet, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, Method, header::CONTENT_DISPOSITION},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use tokio::{net::TcpListener, signal, sync::Semaphore};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

use crate::{
    artifact,
    config::{self, Config},
    error::ApiError,
    extractor::{Extractor, YtDlp},
    handlers,
    rate_limit::{self, RateLimiter},
};

const STALE_ARTIFACT_AGE: Duration = Duration::from_secs(2 * 60 * 60);

#[derive(Clone)]
pub struct AppState {
    pub extractor: Arc<dyn Extractor>,
    pub rate_limiter: RateLimiter,
    pub conversion_permits: Arc<Semaphore>,
    pub work_dir: PathBuf,
    pub trust_proxy_headers: bool,
}

impl AppState {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        rate_limiter: RateLimiter,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            extractor,
            rate_limiter,
            conversion_permits: Arc::new(Semaphore::new(
                config::DEFAULT_MAX_CONCURRENT_CONVERSIONS,
            )),
            work_dir,
            trust_proxy_headers: false,
        }
    }

    pub fn with_max_concurrent_conversions(mut self, permits: usize) -> Self {
        self.conversion_permits = Arc::new(Semaphore::new(permits));
        self
    }

    pub fn with_trusted_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }
}

pub fn router(state: AppState, allowed_origins: Option<HashSet<String>>) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/info", post(handlers::fetch_info))
        .route("/api/convert", post(handlers::convert))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(allowed_origins))
}

pub async fn run(config: Config) -> Result<()> {
    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .with_context(|| format!("Creating work directory {}", config.work_dir.display()))?;
    artifact::cleanup_stale_artifacts(&config.work_dir, STALE_ARTIFACT_AGE).await;

    if !config.trust_proxy_headers {
        warn!("TRUST_PROXY_HEADERS=false: rate limiting uses the socket peer address.");
    }

    let cookies = config.prepare_cookies().await;
    let extractor = YtDlp::new(config.extractor_bin.clone(), &cookies);
    let rate_limiter = RateLimiter::new(
        config.rate_limit_max,
        chrono::Duration::seconds(config.rate_limit_window_seconds),
    );
    rate_limit::spawn_pruner(rate_limiter.clone());

    let state = AppState::new(Arc::new(extractor), rate_limiter, config.work_dir.clone())
        .with_max_concurrent_conversions(config.max_concurrent_conversions)
        .with_trusted_proxy_headers(config.trust_proxy_headers);
    let app = router(state, config.allowed_origins.clone());

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Binding to {}", config.bind_addr))?;
    info!("Server running on http://{}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Running HTTP server")
}

async fn shutdown_signal() {
    if let Err(error) = signal::ctrl_c().await {
        warn!("Failed to install Ctrl+C handler: {error}");
    }
    info!("Shutting down");
}

async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_key(request.headers(), peer, state.trust_proxy_headers);

    state
        .rate_limiter
        .check(&key)
        .await
        .inspect_err(|_| warn!("Rate limit exceeded for {key}"))?;

    Ok(next.run(request).await)
}

pub fn client_key(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_proxy_headers: bool,
) -> String {
    let proxied = trust_proxy_headers
        .then(|| extract_forwarded_ip(headers))
        .flatten();

    proxied
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn extract_forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let check_header = |key: &str| {
        headers
            .get(key)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
    };

    let forwarded = check_header("x-forwarded-for").and_then(|forwarded| {
        forwarded
            .split(',')
            .next()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
    });

    forwarded
        .or_else(|| check_header("cf-connecting-ip"))
        .or_else(|| check_header("x-real-ip"))
}

fn build_cors_layer(allowed_origins: Option<HashSet<String>>) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .expose_headers([CONTENT_DISPOSITION]);

    let Some(allowed_origins) = allowed_origins else {
        return layer.allow_origin(Any);
    };

    info!(
        "CORS allow-list loaded with {} origin(s): {:?}",
        allowed_origins.len(),
        allowed_origins
    );
    let allowed_origins = Arc::new(allowed_origins);
    layer.allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let normalized = origin.to_str().ok().and_then(config::normalize_origin);
        let allowed = normalized
            .as_ref()
            .is_some_and(|value| allowed_origins.contains(value));
        debug!("CORS origin check raw={origin:?} normalized={normalized:?} allowed={allowed}");
        allowed
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (key, value) in pairs {
            map.insert(*key, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn client_key_ignores_proxy_headers_unless_trusted() {
        let peer = Some(SocketAddr::from(([10, 0, 0, 1], 5000)));
        let forwarded = headers(&[("x-forwarded-for", "203.0.113.9, 10.0.0.1")]);

        assert_eq!(client_key(&forwarded, peer, false), "10.0.0.1");
        assert_eq!(client_key(&forwarded, peer, true), "203.0.113.9");
    }

    #[test]
    fn client_key_falls_back_through_proxy_headers() {
        let peer = Some(SocketAddr::from(([10, 0, 0, 1], 5000)));

        assert_eq!(
            client_key(&headers(&[("cf-connecting-ip", "198.51.100.4")]), peer, true),
            "198.51.100.4"
        );
        assert_eq!(
            client_key(&headers(&[("x-real-ip", "198.51.100.5")]), peer, true),
            "198.51.100.5"
        );
        assert_eq!(client_key(&headers(&[]), peer, true), "10.0.0.1");
        assert_eq!(client_key(&headers(&[]), None, false), "unknown");
    }
}
