pub mod auth;
pub mod conflicts;
pub mod feeds;
pub mod listings;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use staysync_core::StaySyncError;

/// Standard API error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Engine and auth failures mapped to HTTP responses.
pub enum AppError {
    Engine(StaySyncError),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
}

impl From<StaySyncError> for AppError {
    fn from(err: StaySyncError) -> Self {
        AppError::Engine(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Engine(err) => {
                let status = match &err {
                    StaySyncError::NotFound(_) => StatusCode::NOT_FOUND,
                    StaySyncError::InvalidInterval
                    | StaySyncError::InvalidWinner
                    | StaySyncError::InvalidSource
                    | StaySyncError::MissingSpan
                    | StaySyncError::Timezone(_) => StatusCode::BAD_REQUEST,
                    StaySyncError::MissingEvent(_)
                    | StaySyncError::FeedFetch(_)
                    | StaySyncError::Store(_)
                    | StaySyncError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.to_string())
            }
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            AppError::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message),
            AppError::Forbidden(message) => (StatusCode::FORBIDDEN, message),
        };
        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}
