//! Feed download and health endpoints

use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use crate::routes::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ics/{token}", get(download_feed))
        .route("/health", get(health))
}

/// GET /ics/:token.ics - Calendar feed for the link holding this token.
/// The token is the only credential; anyone holding it can download the feed.
async fn download_feed(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let token = token.strip_suffix(".ics").unwrap_or(&token);
    let body = state.engine.export_feed(token)?;
    Ok((
        [(header::CONTENT_TYPE, "text/calendar; charset=utf-8")],
        body,
    ))
}

/// GET /health
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
