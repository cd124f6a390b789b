//! Conflict listing and resolution endpoints

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use staysync_core::{Conflict, ConflictStatus, Engine, EventSource, EventType};

use crate::routes::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/conflicts", get(list_conflicts))
        .route("/conflicts/{conflict_id}/resolve", post(resolve_conflict))
}

/// The slice of an event staff need to pick a winner
#[derive(Serialize)]
pub struct ConflictEvent {
    pub id: i64,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub source: EventSource,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub summary: Option<String>,
    pub is_shadowed: bool,
}

#[derive(Serialize)]
pub struct ConflictRead {
    pub id: i64,
    pub listing_id: i64,
    pub status: ConflictStatus,
    pub event_a: ConflictEvent,
    pub event_b: ConflictEvent,
    pub winner_event_id: Option<i64>,
    pub resolution: Option<String>,
}

fn conflict_event(engine: &Engine, event_id: i64) -> Result<ConflictEvent, AppError> {
    let event = engine.get_event(event_id)?;
    Ok(ConflictEvent {
        id: event.id,
        start_utc: event.start_utc,
        end_utc: event.end_utc,
        source: event.source,
        kind: event.kind,
        summary: event.summary,
        is_shadowed: event.is_shadowed,
    })
}

fn conflict_read(engine: &Engine, conflict: Conflict) -> Result<ConflictRead, AppError> {
    Ok(ConflictRead {
        event_a: conflict_event(engine, conflict.event_a_id)?,
        event_b: conflict_event(engine, conflict.event_b_id)?,
        id: conflict.id,
        listing_id: conflict.listing_id,
        status: conflict.status,
        winner_event_id: conflict.winner_event_id,
        resolution: conflict.resolution,
    })
}

/// GET /conflicts - All conflicts, newest first, with both events embedded
async fn list_conflicts(
    State(state): State<AppState>,
) -> Result<Json<Vec<ConflictRead>>, AppError> {
    let conflicts = state.engine.list_conflicts()?;
    let views = conflicts
        .into_iter()
        .map(|conflict| conflict_read(&state.engine, conflict))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(views))
}

#[derive(Deserialize)]
pub struct ConflictResolutionRequest {
    pub winner_event_id: i64,
    pub resolution: Option<String>,
}

/// POST /conflicts/:id/resolve - Pick a winner; the loser is shadowed
async fn resolve_conflict(
    State(state): State<AppState>,
    Path(conflict_id): Path<i64>,
    Json(req): Json<ConflictResolutionRequest>,
) -> Result<Json<ConflictRead>, AppError> {
    let resolved = state.engine.resolve_conflict(
        conflict_id,
        req.winner_event_id,
        req.resolution.as_deref(),
    )?;
    Ok(Json(conflict_read(&state.engine, resolved)?))
}
