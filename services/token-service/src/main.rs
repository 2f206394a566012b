//! OAuth Gateway Token Manager
//!
//! Single-binary service that:
//! 1. Keeps a registry of gateways (OAuth client credentials)
//! 2. Runs the authorization-code flow against one provider
//! 3. Stores, refreshes, and revokes the issued tokens

mod config;
mod error;
mod metrics;
mod routes;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{MatchedPath, Request, State};
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tracing::{Instrument, error, info, info_span, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metrics_exporter_prometheus::PrometheusHandle;
use oauth_client::OAuthClient;
use token_manager::{
    FlowCoordinator, Gateway, GatewayRegistry, IssuedToken, JsonFileStore, MemoryStore,
    PendingState, StateStore, Store, TokenStore,
};

use crate::config::Config;
use crate::routes::ApiState;

/// Time allowed for in-flight requests after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// State for the operational endpoints.
#[derive(Clone)]
struct AppState {
    flow: Arc<FlowCoordinator>,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

/// Build the axum router with all routes and shared state.
///
/// The concurrency limit bounds in-flight requests at `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    let api = routes::build_api_router(ApiState::new(state.flow.clone()));
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .merge(api)
        .layer(middleware::from_fn(track_request))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting oauth-token-manager");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        authorize_url = %config.provider.authorize_url,
        revocation_auth = config.provider.revocation_auth.label(),
        state_ttl_secs = config.state.ttl_secs,
        data_dir = ?config.storage.data_dir,
        "configuration loaded"
    );

    let client = OAuthClient::new(config.provider.to_provider_config()?)
        .context("failed to build provider client")?;
    let flow = Arc::new(build_coordinator(&config, client).await?);

    let app = build_router(
        AppState {
            flow,
            prometheus,
            started_at: Instant::now(),
        },
        config.server.max_connections,
    );

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts: notify the server to drain, then race it against the timer.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    info!("shutdown complete");
    Ok(())
}

/// Wire the stores and coordinator. Records persist under `storage.data_dir`
/// when set, otherwise they live in memory.
async fn build_coordinator(config: &Config, client: OAuthClient) -> Result<FlowCoordinator> {
    type Stores = (
        Arc<dyn Store<u64, Gateway>>,
        Arc<dyn Store<String, PendingState>>,
        Arc<dyn Store<u64, IssuedToken>>,
    );

    let (gateways, states, tokens): Stores = match &config.storage.data_dir {
        Some(dir) => {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("failed to create data dir {}", dir.display()))?;
            (
                Arc::new(open_store::<u64, Gateway>(dir, "gateways.json").await?),
                Arc::new(open_store::<String, PendingState>(dir, "pending_states.json").await?),
                Arc::new(open_store::<u64, IssuedToken>(dir, "issued_tokens.json").await?),
            )
        }
        None => {
            warn!("no data_dir configured, records will not survive a restart");
            (
                Arc::new(MemoryStore::<u64, Gateway>::new()),
                Arc::new(MemoryStore::<String, PendingState>::new()),
                Arc::new(MemoryStore::<u64, IssuedToken>::new()),
            )
        }
    };

    Ok(FlowCoordinator::new(
        Arc::new(GatewayRegistry::new(gateways)),
        Arc::new(StateStore::new(states, config.state.ttl())),
        Arc::new(TokenStore::new(tokens)),
        client,
    ))
}

async fn open_store<K, V>(dir: &Path, file_name: &str) -> Result<JsonFileStore<K, V>>
where
    K: Ord + serde::Serialize + serde::de::DeserializeOwned,
    V: serde::Serialize + serde::de::DeserializeOwned,
{
    let path = dir.join(file_name);
    JsonFileStore::open(path.clone())
        .await
        .with_context(|| format!("failed to open store {}", path.display()))
}

/// Tag each request with an id span and record its duration by route.
async fn track_request(request: Request, next: Next) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| String::from("unmatched"));
    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        route = %route,
    );

    let start = Instant::now();
    let mut response = next.run(request).instrument(span).await;
    metrics::record_request(route, response.status().as_u16(), start.elapsed().as_secs_f64());

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Health endpoint: returns 200 with record counts when storage answers,
/// 503 when it doesn't.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.started_at.elapsed().as_secs();
    let gateways = state.flow.gateways().list().await;
    let tokens = state.flow.tokens().list().await;

    let (status_code, body) = match (gateways, tokens) {
        (Ok(gateways), Ok(tokens)) => (
            axum::http::StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "uptime_seconds": uptime,
                "gateways": gateways.len(),
                "tokens": tokens.len(),
            }),
        ),
        (Err(e), _) | (_, Err(e)) => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "degraded",
                "uptime_seconds": uptime,
                "error": e.to_string(),
            }),
        ),
    };

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint: returns metrics in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
