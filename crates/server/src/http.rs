//! HTTP surface: byte serving, set listing, reload trigger

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use skiff_core::{ContentHash, VersionedSet};

use crate::files::FileSetService;
use crate::notify::NotifyRegistry;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub files: Arc<FileSetService>,
    pub registry: Arc<NotifyRegistry>,
}

/// Build the HTTP router:
/// - `GET /file/{hash}`: raw bytes for the origin entry, 404 unknown
/// - `GET /sets`: JSON listing of every group's versioned set
/// - `POST /reload`: rescan the definition, notify changed groups
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/file/{hash}", get(serve_file))
        .route("/sets", get(serve_sets))
        .route("/reload", post(reload))
        .with_state(state)
}

async fn serve_file(State(state): State<AppState>, Path(hash): Path<String>) -> Response {
    let Some(hash) = ContentHash::from_decimal(&hash) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(path) = state.files.origin(hash) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match tokio::fs::File::open(&path).await {
        Ok(file) => Body::from_stream(ReaderStream::new(file)).into_response(),
        Err(err) => {
            warn!(%hash, path = %path.display(), %err, "origin file unreadable");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

async fn serve_sets(State(state): State<AppState>) -> Json<HashMap<String, VersionedSet>> {
    Json(state.files.all_sets())
}

#[derive(Serialize)]
struct ErrorBody {
    error: u16,
    msg: String,
}

async fn reload(State(state): State<AppState>) -> Response {
    let files = state.files.clone();
    let result =
        tokio::task::spawn_blocking(move || files.rescan(&CancellationToken::new())).await;

    let outcome = match result {
        Ok(inner) => inner,
        Err(join_err) => Err(join_err.into()),
    };

    match outcome {
        Ok(changed) => {
            state.registry.notify(&changed);
            StatusCode::OK.into_response()
        }
        Err(err) => {
            error!(%err, "reload failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                    msg: err.to_string(),
                }),
            )
                .into_response()
        }
    }
}
