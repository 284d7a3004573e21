//! Bearer-auth middleware keyed off `api_keys.hash` (spec §4.7). Token
//! hashing only; issuing/revoking keys is out of scope (spec.md §1).

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};
use sqlx::PgPool;

pub async fn require_api_key(
    State(pool): State<PgPool>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let hash = hex::encode(Sha256::digest(token.as_bytes()));
    let enabled: Option<bool> = sqlx::query_scalar("SELECT enabled FROM api_keys WHERE hash = $1")
        .bind(&hash)
        .fetch_optional(&pool)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    match enabled {
        Some(true) => Ok(next.run(req).await),
        Some(false) => Err(StatusCode::FORBIDDEN),
        None => Err(StatusCode::UNAUTHORIZED),
    }
}
