//! Login, user management, and the current-user endpoint

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::auth::{User, UserRole};
use crate::routes::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/users", post(create_user))
        .route("/auth/me", get(current_user))
}

/// Resolve the bearer token in `Authorization` to an active user.
fn bearer_user(state: &AppState, headers: &HeaderMap) -> Result<User, AppError> {
    let header = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Not authenticated".to_string()))?;
    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Invalid authentication header".to_string()))?;
    state
        .auth
        .user_for_token(token)
        .ok_or_else(|| AppError::Unauthorized("Invalid token".to_string()))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub access_token: String,
}

/// POST /auth/login
async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let access_token = state
        .auth
        .login(&req.email, &req.password)
        .ok_or_else(|| AppError::Unauthorized("Invalid credentials".to_string()))?;
    Ok(Json(TokenResponse { access_token }))
}

#[derive(Deserialize)]
pub struct UserCreateRequest {
    pub email: String,
    pub password: String,
    pub role: UserRole,
}

/// POST /auth/users - Admin-only staff account creation
async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<UserCreateRequest>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let caller = bearer_user(&state, &headers)?;
    if caller.role != UserRole::Admin {
        return Err(AppError::Forbidden("Insufficient permissions".to_string()));
    }
    let user = state
        .auth
        .create_user(&req.email, &req.password, req.role)
        .ok_or_else(|| AppError::BadRequest("Email already registered".to_string()))?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /auth/me
async fn current_user(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<User>, AppError> {
    Ok(Json(bearer_user(&state, &headers)?))
}
