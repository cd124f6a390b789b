//! Listing, channel-link, block, and event endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use staysync_core::{Channel, ChannelLink, Event, EventSource, Listing};

use crate::routes::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/listings", post(create_listing).get(list_listings))
        .route("/listings/{listing_id}/channel-links", post(upsert_channel_link))
        .route("/listings/{listing_id}/blocks", post(create_manual_block))
        .route("/listings/{listing_id}/events/imported", post(register_imported_event))
        .route("/listings/{listing_id}/events", get(list_events))
}

fn default_timezone() -> String {
    "Africa/Kampala".to_string()
}

#[derive(Deserialize)]
pub struct ListingCreate {
    pub name: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

/// POST /listings - Register a rental unit
async fn create_listing(
    State(state): State<AppState>,
    Json(req): Json<ListingCreate>,
) -> Result<(StatusCode, Json<Listing>), AppError> {
    let listing = state.engine.create_listing(&req.name, &req.timezone)?;
    Ok((StatusCode::CREATED, Json(listing)))
}

/// GET /listings - List all rental units
async fn list_listings(State(state): State<AppState>) -> Result<Json<Vec<Listing>>, AppError> {
    Ok(Json(state.engine.list_listings()?))
}

#[derive(Deserialize)]
pub struct ChannelLinkCreate {
    pub channel: Channel,
    pub import_url: Option<String>,
}

/// POST /listings/:id/channel-links - Create or update a channel pairing
async fn upsert_channel_link(
    State(state): State<AppState>,
    Path(listing_id): Path<i64>,
    Json(req): Json<ChannelLinkCreate>,
) -> Result<(StatusCode, Json<ChannelLink>), AppError> {
    let link =
        state
            .engine
            .upsert_channel_link(listing_id, req.channel, req.import_url.as_deref())?;
    Ok((StatusCode::CREATED, Json(link)))
}

#[derive(Deserialize)]
pub struct ManualBlockRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub note: Option<String>,
}

#[derive(serde::Serialize)]
pub struct ManualBlockResponse {
    pub event: Event,
    /// Ids of every conflict the block touched, so staff see "N conflicts"
    /// without a second query.
    pub conflicts: Vec<i64>,
}

/// POST /listings/:id/blocks - Block out an inclusive local date range
async fn create_manual_block(
    State(state): State<AppState>,
    Path(listing_id): Path<i64>,
    Json(req): Json<ManualBlockRequest>,
) -> Result<(StatusCode, Json<ManualBlockResponse>), AppError> {
    let (event, conflicts) = state.engine.create_manual_block(
        listing_id,
        req.start_date,
        req.end_date,
        req.note.as_deref(),
    )?;
    let response = ManualBlockResponse {
        event,
        conflicts: conflicts.iter().map(|conflict| conflict.id).collect(),
    };
    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Deserialize)]
pub struct ImportedEventRequest {
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub source: EventSource,
    pub external_res_id: Option<String>,
    pub summary: Option<String>,
    pub guest_name: Option<String>,
}

/// POST /listings/:id/events/imported - Record a channel reservation directly
async fn register_imported_event(
    State(state): State<AppState>,
    Path(listing_id): Path<i64>,
    Json(req): Json<ImportedEventRequest>,
) -> Result<(StatusCode, Json<Event>), AppError> {
    let (event, _) = state.engine.register_imported_event(
        listing_id,
        req.start_utc,
        req.end_utc,
        req.source,
        req.summary.as_deref(),
        req.guest_name.as_deref(),
        req.external_res_id.as_deref(),
    )?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// GET /listings/:id/events - Events for a listing, start ascending
async fn list_events(
    State(state): State<AppState>,
    Path(listing_id): Path<i64>,
) -> Result<Json<Vec<Event>>, AppError> {
    Ok(Json(state.engine.list_events(listing_id)?))
}
