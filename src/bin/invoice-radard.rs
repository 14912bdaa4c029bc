//! invoice-radard - the invoice-radar HTTP daemon.
//!
//! JSON in, JSON out (camelCase):
//!
//! **Mail:**
//! - `POST /api/mail/test` - log in and report the server
//! - `POST /api/mail/fetch` - fetch and normalize messages
//!
//! **Invoices:**
//! - `POST /api/invoices/detect` - score a batch of messages
//! - `POST /api/invoices/detect-one` - score one message (cached)
//! - `POST /api/invoices/scan` - fetch, score and record
//! - `GET  /api/invoices` - recorded invoices
//! - `GET  /api/invoices/stats` - totals over recorded invoices
//!
//! **Keywords and cache:**
//! - `GET|PUT /api/keywords` - keyword configuration
//! - `DELETE /api/cache` - drop every cache entry
//!
//! **Health:**
//! - `GET  /health` - server status
//!
//! Build and run: `cargo run --features server --bin invoice-radard`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use invoice_radar::config::RadarConfig;
use invoice_radar::detect::{
    BatchDetection, DetectionResult, InvoiceRecord, InvoiceStats, KeywordConfiguration,
};
use invoice_radar::error::{RadarError, RadarResult};
use invoice_radar::mail::{FetchFilters, MailAccessConfig};
use invoice_radar::paths::RadarPaths;
use invoice_radar::service::{ConnectionOutcome, FetchOutcome, RadarService, ScanReport};

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

// ── Server state ──────────────────────────────────────────────────────────

struct ServerState {
    service: RadarService,
    operation_timeout: Duration,
    expose_errors: bool,
}

impl ServerState {
    /// Client errors keep their text; everything else is generic unless
    /// `server.expose_errors` is set.
    fn error_response(&self, err: RadarError) -> (StatusCode, String) {
        if err.is_client_error() {
            return (StatusCode::BAD_REQUEST, err.to_string());
        }
        tracing::error!(error = %err, "request failed");
        let message = if self.expose_errors {
            err.to_string()
        } else {
            "internal server error".to_string()
        };
        (StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

/// Run a blocking service call on the blocking pool under the operation timeout.
async fn run_blocking<T, F>(state: &Arc<ServerState>, op: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&RadarService) -> RadarResult<T> + Send + 'static,
{
    let task_state = Arc::clone(state);
    let task = tokio::task::spawn_blocking(move || op(&task_state.service));
    match tokio::time::timeout(state.operation_timeout, task).await {
        Ok(Ok(Ok(value))) => Ok(Json(value)),
        Ok(Ok(Err(e))) => Err(state.error_response(e)),
        Ok(Err(join)) => {
            tracing::error!(error = %join, "blocking task failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
            ))
        }
        Err(_) => {
            tracing::warn!(timeout = ?state.operation_timeout, "operation timed out");
            Err((
                StatusCode::GATEWAY_TIMEOUT,
                format!(
                    "operation timed out after {}s",
                    state.operation_timeout.as_secs()
                ),
            ))
        }
    }
}

// ── Request / response types ──────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Deserialize)]
struct MailRequest {
    #[serde(flatten)]
    access: MailAccessConfig,
    #[serde(flatten)]
    filters: FetchFilters,
}

#[derive(Deserialize)]
struct DetectRequest {
    #[serde(default)]
    messages: Vec<serde_json::Value>,
}

#[derive(Serialize)]
struct CacheClearedResponse {
    cleared: usize,
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn mail_test(
    State(state): State<Arc<ServerState>>,
    Json(access): Json<MailAccessConfig>,
) -> ApiResult<ConnectionOutcome> {
    run_blocking(&state, move |svc| svc.test_connection(&access)).await
}

async fn mail_fetch(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<MailRequest>,
) -> ApiResult<FetchOutcome> {
    run_blocking(&state, move |svc| svc.fetch(&req.access, &req.filters)).await
}

async fn detect_batch(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<DetectRequest>,
) -> ApiResult<BatchDetection> {
    run_blocking(&state, move |svc| Ok(svc.detect_batch(req.messages))).await
}

async fn detect_one(
    State(state): State<Arc<ServerState>>,
    Json(item): Json<serde_json::Value>,
) -> ApiResult<DetectionResult> {
    run_blocking(&state, move |svc| svc.detect_one(item)).await
}

async fn scan(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<MailRequest>,
) -> ApiResult<ScanReport> {
    run_blocking(&state, move |svc| svc.scan(&req.access, &req.filters)).await
}

async fn list_invoices(State(state): State<Arc<ServerState>>) -> ApiResult<Vec<InvoiceRecord>> {
    run_blocking(&state, |svc| svc.invoices()).await
}

async fn invoice_stats(State(state): State<Arc<ServerState>>) -> ApiResult<InvoiceStats> {
    run_blocking(&state, |svc| svc.invoice_stats()).await
}

async fn get_keywords(State(state): State<Arc<ServerState>>) -> ApiResult<KeywordConfiguration> {
    run_blocking(&state, |svc| Ok(svc.keywords())).await
}

async fn put_keywords(
    State(state): State<Arc<ServerState>>,
    Json(keywords): Json<KeywordConfiguration>,
) -> ApiResult<KeywordConfiguration> {
    run_blocking(&state, move |svc| svc.update_keywords(keywords)).await
}

async fn clear_cache(State(state): State<Arc<ServerState>>) -> Json<CacheClearedResponse> {
    Json(CacheClearedResponse {
        cleared: state.service.clear_cache(),
    })
}

// ── Startup ───────────────────────────────────────────────────────────────

fn load_config(paths: Option<&RadarPaths>) -> RadarResult<RadarConfig> {
    let path = std::env::var("INVOICE_RADAR_CONFIG")
        .map(PathBuf::from)
        .ok()
        .or_else(|| paths.map(RadarPaths::config_file));
    let mut config = match path {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading config");
            RadarConfig::load_or_default(&path)?
        }
        None => RadarConfig::default(),
    };
    config.apply_env()?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let paths = match RadarPaths::resolve() {
        Ok(paths) => Some(paths),
        Err(e) => {
            tracing::warn!("failed to resolve XDG paths: {e}");
            None
        }
    };

    let config = load_config(paths.as_ref()).unwrap_or_else(|e| {
        tracing::error!("invalid configuration: {e}");
        std::process::exit(1);
    });
    let service = RadarService::from_config(&config, paths.as_ref()).unwrap_or_else(|e| {
        tracing::error!("failed to start service: {e}");
        std::process::exit(1);
    });

    let state = Arc::new(ServerState {
        service,
        operation_timeout: config.mail.operation_timeout(),
        expose_errors: config.server.expose_errors,
    });
    if state.expose_errors {
        tracing::warn!("server.expose_errors is on; internal errors reach clients");
    }

    let app = Router::new()
        // Health.
        .route("/health", get(health))
        // Mail.
        .route("/api/mail/test", post(mail_test))
        .route("/api/mail/fetch", post(mail_fetch))
        // Invoices. Static paths before the collection route.
        .route("/api/invoices/detect", post(detect_batch))
        .route("/api/invoices/detect-one", post(detect_one))
        .route("/api/invoices/scan", post(scan))
        .route("/api/invoices/stats", get(invoice_stats))
        .route("/api/invoices", get(list_invoices))
        // Keywords.
        .route("/api/keywords", get(get_keywords).put(put_keywords))
        // Cache.
        .route("/api/cache", delete(clear_cache))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!("invoice-radard listening on {addr}");

    // Serve with graceful shutdown on SIGTERM/SIGINT.
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        tokio::select! {
                            _ = ctrl_c => {},
                            _ = sigterm.recv() => {},
                        }
                    }
                    Err(e) => {
                        tracing::warn!("failed to register SIGTERM handler: {e}");
                        ctrl_c.await.ok();
                    }
                }
            }
            #[cfg(not(unix))]
            {
                ctrl_c.await.ok();
            }
            tracing::info!("invoice-radard shutting down");
        })
        .await;

    if let Err(e) = served {
        tracing::error!("server error: {e}");
        std::process::exit(1);
    }
}
