//! Storage abstraction over listings, channel links, events, and conflicts.
//!
//! The engine and the feed worker only ever see `dyn CalendarStore`; which
//! backend is active is a configuration decision. Both backends serialize
//! event creation and conflict resolution behind their own lock so two
//! concurrent insertions cannot race to create duplicate conflicts.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};

use crate::error::StaySyncResult;
use crate::model::{Channel, ChannelLink, Conflict, Event, EventSource, EventType, Listing};

/// Parameters for inserting one event through the ingestion funnel.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub kind: EventType,
    pub source: EventSource,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub summary: Option<String>,
    pub guest_name: Option<String>,
    pub external_res_id: Option<String>,
}

pub trait CalendarStore: Send + Sync {
    fn create_listing(&self, name: &str, timezone: &str) -> StaySyncResult<Listing>;

    /// All listings in ascending id order.
    fn list_listings(&self) -> StaySyncResult<Vec<Listing>>;

    fn get_listing(&self, listing_id: i64) -> StaySyncResult<Option<Listing>>;

    /// Create or update the link for `(listing, channel)`. An existing link
    /// keeps its export token; only the import URL changes.
    fn upsert_channel_link(
        &self,
        listing_id: i64,
        channel: Channel,
        import_url: Option<&str>,
    ) -> StaySyncResult<ChannelLink>;

    fn list_channel_links(&self, listing_id: i64) -> StaySyncResult<Vec<ChannelLink>>;

    fn find_channel_link_by_token(&self, token: &str) -> StaySyncResult<Option<ChannelLink>>;

    /// Insert an event and detect conflicts in one atomic unit. Returns the
    /// stored event together with every conflict touched by the insertion,
    /// whether pre-existing or newly created. Fails with `InvalidInterval`
    /// (nothing persisted) when `end_utc <= start_utc`.
    fn create_event(&self, listing_id: i64, new_event: NewEvent)
        -> StaySyncResult<(Event, Vec<Conflict>)>;

    fn get_event(&self, event_id: i64) -> StaySyncResult<Option<Event>>;

    /// Events of one listing, ordered by start time ascending.
    fn list_events(&self, listing_id: i64) -> StaySyncResult<Vec<Event>>;

    fn find_event_by_external_id(
        &self,
        listing_id: i64,
        source: EventSource,
        external_id: &str,
    ) -> StaySyncResult<Option<Event>>;

    /// All conflicts, newest first.
    fn list_conflicts(&self) -> StaySyncResult<Vec<Conflict>>;

    fn get_conflict(&self, conflict_id: i64) -> StaySyncResult<Option<Conflict>>;

    /// Resolve a conflict in favor of `winner_event_id`: shadow the loser,
    /// mark the conflict RESOLVED, record winner, note, and resolution time.
    /// Fails with `InvalidWinner` or `MissingEvent` leaving state untouched.
    fn resolve_conflict(
        &self,
        conflict_id: i64,
        winner_event_id: i64,
        resolution: Option<&str>,
    ) -> StaySyncResult<Conflict>;
}
