//! Domain types shared by the stores, the engine, and the feed pipeline.
//!
//! A `Listing` owns its `ChannelLink`s and `Event`s. A `Conflict` cross-references
//! two events by id; resolving a conflict shadows the losing event but deletes
//! nothing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An external booking marketplace that maintains its own reservation calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Airbnb,
    Booking,
}

impl Channel {
    /// The source tagged onto reservations imported through this channel's feed.
    pub fn source(self) -> EventSource {
        match self {
            Channel::Airbnb => EventSource::Airbnb,
            Channel::Booking => EventSource::Booking,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Airbnb => "AIRBNB",
            Channel::Booking => "BOOKING",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "AIRBNB" => Some(Channel::Airbnb),
            "BOOKING" => Some(Channel::Booking),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Reservation,
    Block,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Reservation => "RESERVATION",
            EventType::Block => "BLOCK",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "RESERVATION" => Some(EventType::Reservation),
            "BLOCK" => Some(EventType::Block),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSource {
    Airbnb,
    Booking,
    Manual,
}

impl EventSource {
    pub fn as_str(self) -> &'static str {
        match self {
            EventSource::Airbnb => "AIRBNB",
            EventSource::Booking => "BOOKING",
            EventSource::Manual => "MANUAL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "AIRBNB" => Some(EventSource::Airbnb),
            "BOOKING" => Some(EventSource::Booking),
            "MANUAL" => Some(EventSource::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictStatus {
    Open,
    Resolved,
}

impl ConflictStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictStatus::Open => "OPEN",
            ConflictStatus::Resolved => "RESOLVED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "OPEN" => Some(ConflictStatus::Open),
            "RESOLVED" => Some(ConflictStatus::Resolved),
            _ => None,
        }
    }
}

/// A rental unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: i64,
    pub name: String,
    /// IANA timezone name, e.g. "Africa/Kampala". Used to localize all-day
    /// date boundaries; never re-localizes events already stored.
    pub timezone: String,
    pub active: bool,
}

/// Pairing between a listing and an external channel: where we pull the
/// channel's calendar from, and the token under which we publish ours.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelLink {
    pub id: i64,
    pub listing_id: i64,
    pub channel: Channel,
    pub import_url: Option<String>,
    /// Opaque bearer capability for the outgoing feed. Generated once at
    /// creation, never rotated.
    pub export_token: String,
}

/// A time-bounded occurrence on a listing. Instants are stored in UTC.
/// Immutable after creation except for `is_shadowed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub listing_id: i64,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub source: EventSource,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub guest_name: Option<String>,
    /// External reservation id, used to dedup re-imports of the same feed.
    pub external_res_id: Option<String>,
    pub summary: Option<String>,
    pub is_shadowed: bool,
    pub created_at: DateTime<Utc>,
}

/// A detected temporal overlap between two events on the same listing.
/// Identity is the unordered event-id pair; conflicts are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub id: i64,
    pub listing_id: i64,
    pub event_a_id: i64,
    pub event_b_id: i64,
    pub status: ConflictStatus,
    pub winner_event_id: Option<i64>,
    pub resolution: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Conflict {
    pub fn involves(&self, event_id: i64) -> bool {
        self.event_a_id == event_id || self.event_b_id == event_id
    }

    /// True if this conflict covers the unordered pair `{a, b}`.
    pub fn matches_pair(&self, a: i64, b: i64) -> bool {
        (self.event_a_id == a && self.event_b_id == b)
            || (self.event_a_id == b && self.event_b_id == a)
    }
}
