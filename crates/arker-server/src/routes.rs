//! Axum surface (spec §4.7): `POST /archive`, `GET /:short_id/:type`,
//! `GET /healthz`. Route bodies are kept to the minimal wiring the spec
//! calls for (spec.md §1 Non-goals: no HTML templates, no content
//! transformation beyond serving archived bytes back).

use std::str::FromStr;
use std::sync::Arc;

use arker_common::types::ArchiveKind;
use arker_store::BlobStore;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::auth::require_api_key;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub store: Arc<dyn BlobStore>,
}

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/archive", post(create_archive))
        .route_layer(axum::middleware::from_fn_with_state(
            state.pool.clone(),
            require_api_key,
        ));

    Router::new()
        .merge(protected)
        .route("/healthz", get(healthz))
        .route("/{short_id}/{type}", get(serve_item))
        .with_state(state)
}

#[derive(Deserialize)]
struct CreateArchiveRequest {
    url: String,
    #[serde(default)]
    kinds: Option<Vec<String>>,
}

#[derive(Serialize)]
struct CreateArchiveResponse {
    capture_id: Uuid,
    short_id: String,
}

async fn create_archive(
    State(state): State<AppState>,
    Json(body): Json<CreateArchiveRequest>,
) -> Result<Json<CreateArchiveResponse>, (StatusCode, String)> {
    let kinds = match body.kinds {
        Some(raw) => raw
            .iter()
            .map(|s| ArchiveKind::from_str(s))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| (StatusCode::BAD_REQUEST, e))?,
        None => ArchiveKind::ALL.to_vec(),
    };
    if kinds.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "kinds must not be empty".into()));
    }

    let (capture_id, short_id) =
        arker_queue::enqueue_capture(&state.pool, &body.url, &kinds, None)
            .await
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(CreateArchiveResponse {
        capture_id,
        short_id,
    }))
}

async fn serve_item(
    State(state): State<AppState>,
    Path((short_id, kind)): Path<(String, String)>,
) -> Result<Response, StatusCode> {
    let kind = ArchiveKind::from_str(&kind).map_err(|_| StatusCode::NOT_FOUND)?;

    let item: Option<(Option<String>, Option<String>, String)> = sqlx::query_as(
        "SELECT ai.storage_key, ai.extension, ai.status
         FROM archive_items ai
         JOIN captures c ON c.id = ai.capture_id
         WHERE c.short_id = $1 AND ai.kind = $2",
    )
    .bind(&short_id)
    .bind(kind.to_string())
    .fetch_optional(&state.pool)
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let Some((storage_key, extension, status)) = item else {
        return Err(StatusCode::NOT_FOUND);
    };
    if status != "completed" {
        return Err(StatusCode::NOT_FOUND);
    }
    let Some(storage_key) = storage_key else {
        return Err(StatusCode::NOT_FOUND);
    };

    let reader = state
        .store
        .reader(&storage_key)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;
    let stream = ReaderStream::new(reader);
    let mime = extension
        .as_deref()
        .map(mime_for_extension)
        .unwrap_or("application/octet-stream");

    Ok(([(axum::http::header::CONTENT_TYPE, mime)], Body::from_stream(stream)).into_response())
}

fn mime_for_extension(ext: &str) -> &'static str {
    match ext {
        ".mhtml" => "application/x-mhtml",
        ".png" => "image/png",
        ".jpg" | ".jpeg" => "image/jpeg",
        ".webp" => "image/webp",
        ".tar" => "application/x-tar",
        ".mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

async fn healthz() -> &'static str {
    "ok"
}
