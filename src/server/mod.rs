//! HTTP surface.
//!
//! | Route | Handler |
//! |-------|---------|
//! | `GET /health` | [`handlers::health`] |
//! | `GET /api/v1/supported-formats` | [`handlers::supported_formats`] |
//! | `POST /api/v1/convert/file` | [`handlers::convert_file`] |
//! | `POST /api/v1/convert/url` | [`handlers::convert_url`] |
//! | `POST /api/v1/convert/file/download` | [`handlers::convert_file_download`] |
//! | `POST /api/v1/convert/url/download` | [`handlers::convert_url_download`] |

pub mod download;
pub mod error;
pub mod handlers;
pub mod models;

use crate::config::ServiceConfig;
use crate::engine::lifecycle::EngineCell;
use crate::error::Doc2MdError;
use crate::pipeline::ConversionPipeline;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Multipart framing and the non-file fields on top of the upload itself.
const FORM_OVERHEAD: usize = 1024 * 1024;

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub pipeline: ConversionPipeline,
}

impl AppState {
    pub fn new(pipeline: ConversionPipeline) -> Self {
        Self { pipeline }
    }
}

/// Build the router with CORS and request tracing.
pub fn router(state: AppState) -> Router {
    let body_limit =
        usize::try_from(state.pipeline.config().max_file_size).unwrap_or(usize::MAX)
            .saturating_add(FORM_OVERHEAD);

    let api = Router::new()
        .route("/supported-formats", get(handlers::supported_formats))
        .route("/convert/file", post(handlers::convert_file))
        .route("/convert/url", post(handlers::convert_url))
        .route("/convert/file/download", post(handlers::convert_file_download))
        .route("/convert/url/download", post(handlers::convert_url_download));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", api)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the service until `shutdown` resolves.
///
/// Scratch directories are created and the engine is built before the
/// listener binds; failing either is fatal.
pub async fn serve<F>(config: ServiceConfig, shutdown: F) -> Result<(), Doc2MdError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let config = Arc::new(config);
    let engine = Arc::new(EngineCell::from_config(config.engine.clone()));
    let pipeline = ConversionPipeline::new(Arc::clone(&config), engine)?;
    pipeline.prepare().await?;

    let ready = pipeline.engine().get_or_create().await?;
    info!(engine = ready.name(), workers = ready.workers(), "Engine warmed up");

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| Doc2MdError::Internal(format!("Failed to bind {addr}: {e}")))?;
    info!(
        "{} {} listening on http://{}",
        config.app_name, config.app_version, addr
    );

    axum::serve(listener, router(AppState::new(pipeline)))
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("Shutting down; finishing in-flight requests");
        })
        .await
        .map_err(|e| Doc2MdError::Internal(format!("Server error: {e}")))
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
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
}
