//! HTTP surface: axum routing over the content service and the LLM gateway.

mod extract;
mod files;
mod folders;
mod llm;

use crate::config::ServerConfig;
use crate::error::Error;
use crate::files::FileStore;
use crate::llm::{LlmError, LlmGateway};
use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

pub struct AppState {
    pub store: FileStore,
    pub llm: LlmGateway,
}

pub type SharedState = Arc<AppState>;

pub fn router(state: SharedState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/api/files", get(files::list))
        .route("/api/files/move", post(files::move_files))
        .route("/api/files/delete-backup", post(files::delete_backup))
        .route("/api/files/save-draft/{*path}", post(files::save_draft))
        .route("/api/files/fix/{id}/preview", post(files::fix_preview))
        .route("/api/files/fix/{id}/apply", post(files::fix_apply))
        .route(
            "/api/files/id/{id}",
            get(files::read_by_id)
                .patch(files::write_by_id)
                .delete(files::delete_by_id),
        )
        .route(
            "/api/files/{*path}",
            get(files::read).patch(files::write).delete(files::delete),
        )
        .route("/api/upload", post(files::upload))
        .route("/api/migrate-files", post(files::migrate))
        .route("/api/discussion", get(files::discussion))
        .route("/api/users/{*path}", get(files::users))
        .route("/api/folders", get(folders::list).post(folders::create))
        .route("/api/folders/{*path}", axum::routing::delete(folders::delete))
        .route("/api/llm/health", get(llm::health))
        .route("/api/llm/generate-bio", post(llm::generate_bio))
        .route("/api/llm/rewrite-message", post(llm::rewrite_message))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn serve(state: SharedState, config: &ServerConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let bound = listener.local_addr()?;
    info!("Listening on http://{}", bound);

    axum::serve(listener, router(state, config.max_upload_bytes))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        })
        .await
        .context("HTTP server failed")
}

/// Run registry and directory-walk work off the async workers.
async fn blocking<T, F>(work: F) -> crate::error::Result<T>
where
    F: FnOnce() -> crate::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Storage {
            message: format!("blocking task failed: {}", e),
            path: None,
            source: None,
        })?
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::InvalidPath(_) | Error::MalformedInput(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::UnsupportedMedia(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        Error::Storage { .. } | Error::Database { .. } | Error::Json { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        Error::Llm(llm) => match llm {
            LlmError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            LlmError::Network(_) => StatusCode::SERVICE_UNAVAILABLE,
            LlmError::Authentication(_) | LlmError::Unknown(_) | LlmError::Output { .. } => {
                StatusCode::BAD_GATEWAY
            }
        },
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            error!(kind = self.kind(), "{}", self);
        } else {
            warn!(kind = self.kind(), "{}", self);
        }
        let body = json!({ "error": self.kind(), "detail": self.to_string() });
        (status, Json(body)).into_response()
    }
}
