//! Request-facing operations over the store.
//!
//! The engine owns all business-rule validation (interval ordering, winner
//! membership, channel-source checks, date math for manual blocks); the HTTP
//! layer only marshals payloads into these calls.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{StaySyncError, StaySyncResult};
use crate::feed::export;
use crate::model::{Channel, ChannelLink, Conflict, Event, EventSource, EventType, Listing};
use crate::store::{CalendarStore, NewEvent};

#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn CalendarStore>,
}

impl Engine {
    pub fn new(store: Arc<dyn CalendarStore>) -> Self {
        Self { store }
    }

    pub fn create_listing(&self, name: &str, timezone: &str) -> StaySyncResult<Listing> {
        self.store.create_listing(name, timezone)
    }

    pub fn list_listings(&self) -> StaySyncResult<Vec<Listing>> {
        self.store.list_listings()
    }

    fn require_listing(&self, listing_id: i64) -> StaySyncResult<Listing> {
        self.store
            .get_listing(listing_id)?
            .ok_or(StaySyncError::NotFound("Listing"))
    }

    pub fn upsert_channel_link(
        &self,
        listing_id: i64,
        channel: Channel,
        import_url: Option<&str>,
    ) -> StaySyncResult<ChannelLink> {
        let listing = self.require_listing(listing_id)?;
        self.store.upsert_channel_link(listing.id, channel, import_url)
    }

    /// Block out the inclusive local date range `[start_date, end_date]` on a
    /// listing. Midnights are taken in the listing's timezone; the stored end
    /// is the midnight after `end_date`.
    pub fn create_manual_block(
        &self,
        listing_id: i64,
        start_date: NaiveDate,
        end_date: NaiveDate,
        note: Option<&str>,
    ) -> StaySyncResult<(Event, Vec<Conflict>)> {
        let listing = self.require_listing(listing_id)?;
        if end_date < start_date {
            return Err(StaySyncError::InvalidInterval);
        }
        let tz: Tz = listing
            .timezone
            .parse()
            .map_err(|_| StaySyncError::Timezone(listing.timezone.clone()))?;
        let start_utc = local_midnight(&tz, &listing.timezone, start_date)?;
        let end_utc = local_midnight(&tz, &listing.timezone, end_date + Duration::days(1))?;
        self.store.create_event(
            listing.id,
            NewEvent {
                kind: EventType::Block,
                source: EventSource::Manual,
                start_utc,
                end_utc,
                summary: note.map(str::to_string),
                guest_name: None,
                external_res_id: None,
            },
        )
    }

    /// Record a reservation already known from a channel (ad-hoc import path).
    /// The source must be a channel source; manual entries go through blocks.
    #[allow(clippy::too_many_arguments)]
    pub fn register_imported_event(
        &self,
        listing_id: i64,
        start_utc: DateTime<Utc>,
        end_utc: DateTime<Utc>,
        source: EventSource,
        summary: Option<&str>,
        guest_name: Option<&str>,
        external_res_id: Option<&str>,
    ) -> StaySyncResult<(Event, Vec<Conflict>)> {
        let listing = self.require_listing(listing_id)?;
        if source == EventSource::Manual {
            return Err(StaySyncError::InvalidSource);
        }
        self.store.create_event(
            listing.id,
            NewEvent {
                kind: EventType::Reservation,
                source,
                start_utc,
                end_utc,
                summary: summary.map(str::to_string),
                guest_name: guest_name.map(str::to_string),
                external_res_id: external_res_id.map(str::to_string),
            },
        )
    }

    /// The single ingestion funnel: insert an event and run conflict
    /// detection in one atomic unit. Manual blocks and imports both end here.
    pub fn create_event(
        &self,
        listing_id: i64,
        new_event: NewEvent,
    ) -> StaySyncResult<(Event, Vec<Conflict>)> {
        let listing = self.require_listing(listing_id)?;
        self.store.create_event(listing.id, new_event)
    }

    pub fn list_events(&self, listing_id: i64) -> StaySyncResult<Vec<Event>> {
        let listing = self.require_listing(listing_id)?;
        self.store.list_events(listing.id)
    }

    /// Event lookup for conflict views. Absence here means a conflict
    /// references an event the store no longer has.
    pub fn get_event(&self, event_id: i64) -> StaySyncResult<Event> {
        self.store
            .get_event(event_id)?
            .ok_or(StaySyncError::MissingEvent(event_id))
    }

    pub fn list_conflicts(&self) -> StaySyncResult<Vec<Conflict>> {
        self.store.list_conflicts()
    }

    pub fn get_conflict(&self, conflict_id: i64) -> StaySyncResult<Conflict> {
        self.store
            .get_conflict(conflict_id)?
            .ok_or(StaySyncError::NotFound("Conflict"))
    }

    pub fn resolve_conflict(
        &self,
        conflict_id: i64,
        winner_event_id: i64,
        resolution: Option<&str>,
    ) -> StaySyncResult<Conflict> {
        // Surface a lookup failure before the store's resolution path runs
        self.get_conflict(conflict_id)?;
        self.store
            .resolve_conflict(conflict_id, winner_event_id, resolution)
    }

    /// Render the outgoing feed for the channel link holding `token`.
    pub fn export_feed(&self, token: &str) -> StaySyncResult<String> {
        let link = self
            .store
            .find_channel_link_by_token(token)?
            .ok_or(StaySyncError::NotFound("Calendar"))?;
        let listing = self.require_listing(link.listing_id)?;
        let events = self.store.list_events(listing.id)?;
        let visible = export::events_for_channel(link.channel, &events);
        export::build_feed(&listing, &visible)
    }
}

fn local_midnight(tz: &Tz, tz_name: &str, date: NaiveDate) -> StaySyncResult<DateTime<Utc>> {
    // Some zones start DST exactly at midnight (America/Santiago, parts of
    // Lebanon), so 00:00 may not exist on a transition day. Step forward in
    // 15-minute increments to the first wall time after the gap; DST gaps
    // never exceed a couple of hours.
    let mut local = date.and_time(NaiveTime::MIN);
    for _ in 0..16 {
        if let Some(resolved) = tz.from_local_datetime(&local).earliest() {
            return Ok(resolved.with_timezone(&Utc));
        }
        local += Duration::minutes(15);
    }
    Err(StaySyncError::Timezone(tz_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConflictStatus;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn engine() -> Engine {
        Engine::new(Arc::new(MemoryStore::new()))
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn manual_block_localizes_midnights() {
        let engine = engine();
        // UTC+3, no DST
        let listing = engine.create_listing("Hilltop", "Africa/Nairobi").unwrap();
        let (event, conflicts) = engine
            .create_manual_block(listing.id, date(2024, 2, 10), date(2024, 2, 12), None)
            .unwrap();
        assert!(conflicts.is_empty());
        assert_eq!(
            event.start_utc,
            Utc.with_ymd_and_hms(2024, 2, 9, 21, 0, 0).unwrap()
        );
        assert_eq!(
            event.end_utc,
            Utc.with_ymd_and_hms(2024, 2, 12, 21, 0, 0).unwrap()
        );
        assert_eq!(event.kind, EventType::Block);
        assert_eq!(event.source, EventSource::Manual);
    }

    #[test]
    fn manual_block_survives_a_dst_gap_at_midnight() {
        let engine = engine();
        // Chile springs forward at midnight: on 2024-09-08 the clock jumps
        // straight from 23:59:59 (-04) to 01:00 (-03), so local 00:00 does
        // not exist. The block lands on the first instant after the gap.
        let listing = engine
            .create_listing("Valparaiso Loft", "America/Santiago")
            .unwrap();
        let (event, conflicts) = engine
            .create_manual_block(listing.id, date(2024, 9, 8), date(2024, 9, 8), None)
            .unwrap();
        assert!(conflicts.is_empty());
        assert_eq!(
            event.start_utc,
            Utc.with_ymd_and_hms(2024, 9, 8, 4, 0, 0).unwrap()
        );
        // The night after the transition has a plain -03 midnight.
        assert_eq!(
            event.end_utc,
            Utc.with_ymd_and_hms(2024, 9, 9, 3, 0, 0).unwrap()
        );
    }

    #[test]
    fn inverted_block_range_is_rejected() {
        let engine = engine();
        let listing = engine.create_listing("Hilltop", "UTC").unwrap();
        let err = engine
            .create_manual_block(listing.id, date(2024, 2, 12), date(2024, 2, 10), None)
            .unwrap_err();
        assert!(matches!(err, StaySyncError::InvalidInterval));
        assert!(engine.list_events(listing.id).unwrap().is_empty());
    }

    #[test]
    fn imported_events_must_come_from_a_channel() {
        let engine = engine();
        let listing = engine.create_listing("Hilltop", "UTC").unwrap();
        let err = engine
            .register_imported_event(
                listing.id,
                Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 3, 3, 10, 0, 0).unwrap(),
                EventSource::Manual,
                None,
                None,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, StaySyncError::InvalidSource));
    }

    #[test]
    fn operations_on_unknown_listings_are_lookup_failures() {
        let engine = engine();
        assert!(matches!(
            engine.list_events(99),
            Err(StaySyncError::NotFound("Listing"))
        ));
        assert!(matches!(
            engine.upsert_channel_link(99, Channel::Airbnb, None),
            Err(StaySyncError::NotFound("Listing"))
        ));
        assert!(matches!(
            engine.export_feed("no-such-token"),
            Err(StaySyncError::NotFound("Calendar"))
        ));
    }

    #[test]
    fn booking_feed_carries_manual_blocks() {
        let engine = engine();
        let listing = engine.create_listing("Hilltop", "UTC").unwrap();
        let link = engine
            .upsert_channel_link(listing.id, Channel::Booking, None)
            .unwrap();
        engine
            .create_manual_block(listing.id, date(2024, 2, 10), date(2024, 2, 12), None)
            .unwrap();

        let body = engine.export_feed(&link.export_token).unwrap();
        assert!(body.contains("SUMMARY:BLOCK"));
        assert!(body.contains("DTSTART;VALUE=DATE:20240210"));
        assert!(body.contains("DTEND;VALUE=DATE:20240213"));
    }

    #[test]
    fn resolving_a_double_booking_swaps_the_feeds() {
        let engine = engine();
        let listing = engine.create_listing("Hilltop", "UTC").unwrap();
        let booking_link = engine
            .upsert_channel_link(listing.id, Channel::Booking, None)
            .unwrap();

        let (block, _) = engine
            .create_manual_block(listing.id, date(2024, 3, 10), date(2024, 3, 12), None)
            .unwrap();
        let (airbnb_event, conflicts) = engine
            .register_imported_event(
                listing.id,
                Utc.with_ymd_and_hms(2024, 3, 11, 12, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 3, 13, 10, 0, 0).unwrap(),
                EventSource::Airbnb,
                None,
                None,
                Some("ABNB-1"),
            )
            .unwrap();
        assert_eq!(conflicts.len(), 1);

        let resolved = engine
            .resolve_conflict(conflicts[0].id, airbnb_event.id, Some("guest already traveling"))
            .unwrap();
        assert_eq!(resolved.status, ConflictStatus::Resolved);

        let events = engine.list_events(listing.id).unwrap();
        let block = events.iter().find(|e| e.id == block.id).unwrap();
        assert!(block.is_shadowed);

        let body = engine.export_feed(&booking_link.export_token).unwrap();
        assert!(!body.contains("SUMMARY:BLOCK"));
        assert!(body.contains("SUMMARY:Airbnb Reservation"));
    }

    #[test]
    fn resolving_with_a_foreign_winner_changes_nothing() {
        let engine = engine();
        let listing = engine.create_listing("Hilltop", "UTC").unwrap();
        engine
            .create_manual_block(listing.id, date(2024, 3, 10), date(2024, 3, 12), None)
            .unwrap();
        let (_, conflicts) = engine
            .create_manual_block(listing.id, date(2024, 3, 11), date(2024, 3, 13), None)
            .unwrap();
        let err = engine
            .resolve_conflict(conflicts[0].id, 12345, None)
            .unwrap_err();
        assert!(matches!(err, StaySyncError::InvalidWinner));
        assert_eq!(
            engine.get_conflict(conflicts[0].id).unwrap().status,
            ConflictStatus::Open
        );
    }

    #[test]
    fn detection_reruns_return_the_same_conflict() {
        let engine = engine();
        let listing = engine.create_listing("Hilltop", "UTC").unwrap();
        engine
            .create_manual_block(listing.id, date(2024, 4, 1), date(2024, 4, 5), None)
            .unwrap();
        let (_, first) = engine
            .create_manual_block(listing.id, date(2024, 4, 3), date(2024, 4, 7), None)
            .unwrap();
        // A third overlapping both: its conflict set includes two records, and
        // the original pair's record is the one already stored.
        let (_, second) = engine
            .create_manual_block(listing.id, date(2024, 4, 2), date(2024, 4, 6), None)
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 2);
        assert_eq!(engine.list_conflicts().unwrap().len(), 3);
    }
}
