//! Session Proxy
//!
//! Single-binary service that:
//! 1. Holds one user session (credential pair persisted on disk)
//! 2. Listens for local requests
//! 3. Forwards them to the API with the session's access credential
//! 4. Refreshes an expired credential once, no matter how many requests hit it
//!
//! When the session ends (refresh impossible or rejected) forwarded requests
//! answer 401 `session_ended` until someone logs in again via `/session/login`.

mod config;
mod metrics;
mod proxy;
mod session_api;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use session_auth::{CredentialStore, FileStore};
use session_gateway::{SessionClient, SessionEvent, Subscription};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::ReqwestTransport;

use crate::config::Config;

/// How long in-flight requests get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    session: Arc<SessionClient>,
    prometheus: PrometheusHandle,
    /// Flipped by the session watcher; read by `/health`
    authenticated: Arc<AtomicBool>,
    upstream_url: String,
    started_at: Instant,
    requests_total: Arc<AtomicU64>,
}

impl AppState {
    fn new(session: Arc<SessionClient>, prometheus: PrometheusHandle, upstream_url: String) -> Self {
        let authenticated = session.store().load().is_some();
        Self {
            session,
            prometheus,
            authenticated: Arc::new(AtomicBool::new(authenticated)),
            upstream_url,
            started_at: Instant::now(),
            requests_total: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// Build the axum router with all routes and shared state.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/session", get(session_api::identity))
        .route("/session/login", post(session_api::login))
        .route("/session/logout", post(session_api::logout))
        .route("/session/password", post(session_api::set_password))
        .fallback(proxy_handler)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Track session lifecycle events for `/health` and the logs.
fn spawn_session_watcher(mut events: Subscription, authenticated: Arc<AtomicBool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::LoggedIn | SessionEvent::CredentialsUpdated => {
                    authenticated.store(true, Ordering::SeqCst);
                }
                SessionEvent::SessionEnded(reason) => {
                    warn!(reason = reason.label(), "session ended, login required");
                    authenticated.store(false, Ordering::SeqCst);
                }
            }
        }
    })
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

    info!("starting session-proxy");

    // Install before anything records a metric
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

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
        listen_addr = %config.listen.addr,
        upstream_url = %config.upstream.base_url,
        timeout_secs = config.upstream.timeout_secs,
        storage_dir = %config.session.storage_dir.display(),
        "configuration loaded"
    );

    let file_store = FileStore::open(&config.session.storage_dir).with_context(|| {
        format!(
            "failed to open credential storage at {}",
            config.session.storage_dir.display()
        )
    })?;
    let store = CredentialStore::with_key(Arc::new(file_store), &config.session.storage_key);

    let transport = ReqwestTransport::new(
        reqwest::Client::new(),
        config.upstream.base_url.clone(),
        Duration::from_secs(config.upstream.timeout_secs),
    );
    let session = Arc::new(SessionClient::with_store(Arc::new(transport), store));

    let app_state = AppState::new(
        session.clone(),
        prometheus_handle,
        config.upstream.base_url.clone(),
    );
    info!(
        authenticated = app_state.authenticated.load(Ordering::SeqCst),
        "session restored from storage"
    );
    let _watcher = spawn_session_watcher(session.subscribe(), app_state.authenticated.clone());

    let app = build_router(app_state, config.listen.max_connections);

    let listener = TcpListener::bind(config.listen.addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.listen.addr))?;
    info!(addr = %config.listen.addr, "accepting requests");

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

    // The drain timer starts at signal receipt
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

/// Health endpoint: service status plus whether a session is held.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "authenticated": state.authenticated.load(Ordering::SeqCst),
        "upstream": state.upstream_url,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "requests_served": state.requests_total.load(Ordering::Relaxed),
    });

    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint
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

/// Catch-all handler that forwards every other request upstream.
async fn proxy_handler(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    let method = request.method().to_string();
    let started = Instant::now();
    state.requests_total.fetch_add(1, Ordering::Relaxed);

    let response = proxy::forward(&state.session, request, &request_id).await;

    metrics::record_request(
        response.status().as_u16(),
        &method,
        started.elapsed().as_secs_f64(),
    );
    response
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
