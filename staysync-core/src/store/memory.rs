//! In-memory store: arena maps keyed by integer ids, with secondary indexes
//! for the lookups the engine and worker need.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use crate::conflicts;
use crate::error::{StaySyncError, StaySyncResult};
use crate::model::{
    Channel, ChannelLink, Conflict, ConflictStatus, Event, EventSource, Listing,
};
use crate::store::{CalendarStore, NewEvent};
use crate::token::generate_token;

#[derive(Default)]
struct Arena {
    listings: BTreeMap<i64, Listing>,
    links: BTreeMap<i64, ChannelLink>,
    links_by_pair: HashMap<(i64, Channel), i64>,
    links_by_token: HashMap<String, i64>,
    events: BTreeMap<i64, Event>,
    events_by_listing: HashMap<i64, Vec<i64>>,
    conflicts: BTreeMap<i64, Conflict>,
    next_listing_id: i64,
    next_link_id: i64,
    next_event_id: i64,
    next_conflict_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Arena>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Arena> {
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

impl CalendarStore for MemoryStore {
    fn create_listing(&self, name: &str, timezone: &str) -> StaySyncResult<Listing> {
        let mut arena = self.lock();
        arena.next_listing_id += 1;
        let listing = Listing {
            id: arena.next_listing_id,
            name: name.to_string(),
            timezone: timezone.to_string(),
            active: true,
        };
        arena.listings.insert(listing.id, listing.clone());
        Ok(listing)
    }

    fn list_listings(&self) -> StaySyncResult<Vec<Listing>> {
        Ok(self.lock().listings.values().cloned().collect())
    }

    fn get_listing(&self, listing_id: i64) -> StaySyncResult<Option<Listing>> {
        Ok(self.lock().listings.get(&listing_id).cloned())
    }

    fn upsert_channel_link(
        &self,
        listing_id: i64,
        channel: Channel,
        import_url: Option<&str>,
    ) -> StaySyncResult<ChannelLink> {
        let mut arena = self.lock();
        if let Some(&link_id) = arena.links_by_pair.get(&(listing_id, channel)) {
            let link = arena
                .links
                .get_mut(&link_id)
                .ok_or(StaySyncError::Store("channel link index out of sync".into()))?;
            link.import_url = import_url.map(str::to_string);
            return Ok(link.clone());
        }
        arena.next_link_id += 1;
        let link = ChannelLink {
            id: arena.next_link_id,
            listing_id,
            channel,
            import_url: import_url.map(str::to_string),
            export_token: generate_token(),
        };
        arena.links_by_pair.insert((listing_id, channel), link.id);
        arena.links_by_token.insert(link.export_token.clone(), link.id);
        arena.links.insert(link.id, link.clone());
        Ok(link)
    }

    fn list_channel_links(&self, listing_id: i64) -> StaySyncResult<Vec<ChannelLink>> {
        Ok(self
            .lock()
            .links
            .values()
            .filter(|link| link.listing_id == listing_id)
            .cloned()
            .collect())
    }

    fn find_channel_link_by_token(&self, token: &str) -> StaySyncResult<Option<ChannelLink>> {
        let arena = self.lock();
        Ok(arena
            .links_by_token
            .get(token)
            .and_then(|link_id| arena.links.get(link_id))
            .cloned())
    }

    fn create_event(
        &self,
        listing_id: i64,
        new_event: NewEvent,
    ) -> StaySyncResult<(Event, Vec<Conflict>)> {
        if new_event.end_utc <= new_event.start_utc {
            return Err(StaySyncError::InvalidInterval);
        }
        let mut arena = self.lock();
        arena.next_event_id += 1;
        let event = Event {
            id: arena.next_event_id,
            listing_id,
            kind: new_event.kind,
            source: new_event.source,
            start_utc: new_event.start_utc,
            end_utc: new_event.end_utc,
            guest_name: new_event.guest_name,
            external_res_id: new_event.external_res_id,
            summary: new_event.summary,
            is_shadowed: false,
            created_at: Utc::now(),
        };

        let listing_events: Vec<Event> = arena
            .events_by_listing
            .get(&listing_id)
            .map(|ids| ids.iter().filter_map(|id| arena.events.get(id)).cloned().collect())
            .unwrap_or_default();

        arena.events.insert(event.id, event.clone());
        arena
            .events_by_listing
            .entry(listing_id)
            .or_default()
            .push(event.id);

        let mut touched = Vec::new();
        let all_conflicts: Vec<Conflict> = arena.conflicts.values().cloned().collect();
        for other in conflicts::find_overlaps(&event, &listing_events) {
            if let Some(existing) =
                conflicts::find_conflict_for_pair(&all_conflicts, event.id, other.id)
            {
                touched.push(existing.clone());
                continue;
            }
            arena.next_conflict_id += 1;
            let conflict = Conflict {
                id: arena.next_conflict_id,
                listing_id,
                event_a_id: event.id,
                event_b_id: other.id,
                status: ConflictStatus::Open,
                winner_event_id: None,
                resolution: None,
                created_at: Utc::now(),
                resolved_at: None,
            };
            arena.conflicts.insert(conflict.id, conflict.clone());
            touched.push(conflict);
        }
        Ok((event, touched))
    }

    fn get_event(&self, event_id: i64) -> StaySyncResult<Option<Event>> {
        Ok(self.lock().events.get(&event_id).cloned())
    }

    fn list_events(&self, listing_id: i64) -> StaySyncResult<Vec<Event>> {
        let arena = self.lock();
        let mut events: Vec<Event> = arena
            .events_by_listing
            .get(&listing_id)
            .map(|ids| ids.iter().filter_map(|id| arena.events.get(id)).cloned().collect())
            .unwrap_or_default();
        events.sort_by_key(|event| event.start_utc);
        Ok(events)
    }

    fn find_event_by_external_id(
        &self,
        listing_id: i64,
        source: EventSource,
        external_id: &str,
    ) -> StaySyncResult<Option<Event>> {
        Ok(self
            .lock()
            .events
            .values()
            .find(|event| {
                event.listing_id == listing_id
                    && event.source == source
                    && event.external_res_id.as_deref() == Some(external_id)
            })
            .cloned())
    }

    fn list_conflicts(&self) -> StaySyncResult<Vec<Conflict>> {
        let mut conflicts: Vec<Conflict> = self.lock().conflicts.values().cloned().collect();
        conflicts.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(conflicts)
    }

    fn get_conflict(&self, conflict_id: i64) -> StaySyncResult<Option<Conflict>> {
        Ok(self.lock().conflicts.get(&conflict_id).cloned())
    }

    fn resolve_conflict(
        &self,
        conflict_id: i64,
        winner_event_id: i64,
        resolution: Option<&str>,
    ) -> StaySyncResult<Conflict> {
        let mut arena = self.lock();
        let conflict = arena
            .conflicts
            .get(&conflict_id)
            .cloned()
            .ok_or(StaySyncError::NotFound("Conflict"))?;
        let loser_id = conflicts::loser_event_id(&conflict, winner_event_id)?;
        let loser = arena
            .events
            .get_mut(&loser_id)
            .ok_or(StaySyncError::MissingEvent(loser_id))?;
        loser.is_shadowed = true;

        let conflict = arena
            .conflicts
            .get_mut(&conflict_id)
            .ok_or(StaySyncError::NotFound("Conflict"))?;
        conflict.status = ConflictStatus::Resolved;
        conflict.winner_event_id = Some(winner_event_id);
        conflict.resolution = resolution.map(str::to_string);
        conflict.resolved_at = Some(Utc::now());
        Ok(conflict.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventType;
    use chrono::{DateTime, TimeZone, Utc};

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn reservation(start: DateTime<Utc>, end: DateTime<Utc>) -> NewEvent {
        NewEvent {
            kind: EventType::Reservation,
            source: EventSource::Manual,
            start_utc: start,
            end_utc: end,
            summary: None,
            guest_name: None,
            external_res_id: None,
        }
    }

    #[test]
    fn overlapping_insert_creates_exactly_one_conflict() {
        let store = MemoryStore::new();
        let listing = store.create_listing("Lake House", "UTC").unwrap();
        let (a, conflicts) = store
            .create_event(listing.id, reservation(utc(2024, 2, 10, 0), utc(2024, 2, 12, 0)))
            .unwrap();
        assert!(conflicts.is_empty());
        let (b, conflicts) = store
            .create_event(listing.id, reservation(utc(2024, 2, 11, 0), utc(2024, 2, 13, 0)))
            .unwrap();
        assert_eq!(conflicts.len(), 1);
        assert!(conflicts[0].matches_pair(a.id, b.id));
        assert_eq!(conflicts[0].status, ConflictStatus::Open);
        assert_eq!(store.list_conflicts().unwrap().len(), 1);
    }

    #[test]
    fn back_to_back_events_do_not_conflict() {
        let store = MemoryStore::new();
        let listing = store.create_listing("Lake House", "UTC").unwrap();
        store
            .create_event(listing.id, reservation(utc(2024, 2, 10, 0), utc(2024, 2, 12, 0)))
            .unwrap();
        let (_, conflicts) = store
            .create_event(listing.id, reservation(utc(2024, 2, 12, 0), utc(2024, 2, 14, 0)))
            .unwrap();
        assert!(conflicts.is_empty());
    }

    #[test]
    fn degenerate_interval_is_rejected_and_not_stored() {
        let store = MemoryStore::new();
        let listing = store.create_listing("Lake House", "UTC").unwrap();
        let at = utc(2024, 2, 10, 0);
        let err = store.create_event(listing.id, reservation(at, at)).unwrap_err();
        assert!(matches!(err, StaySyncError::InvalidInterval));
        assert!(store.list_events(listing.id).unwrap().is_empty());
    }

    #[test]
    fn invalid_winner_leaves_state_untouched() {
        let store = MemoryStore::new();
        let listing = store.create_listing("Lake House", "UTC").unwrap();
        store
            .create_event(listing.id, reservation(utc(2024, 2, 10, 0), utc(2024, 2, 12, 0)))
            .unwrap();
        let (_, conflicts) = store
            .create_event(listing.id, reservation(utc(2024, 2, 11, 0), utc(2024, 2, 13, 0)))
            .unwrap();
        let conflict = &conflicts[0];

        let err = store.resolve_conflict(conflict.id, 999, None).unwrap_err();
        assert!(matches!(err, StaySyncError::InvalidWinner));
        let unresolved = store.get_conflict(conflict.id).unwrap().unwrap();
        assert_eq!(unresolved.status, ConflictStatus::Open);
        assert!(store
            .list_events(listing.id)
            .unwrap()
            .iter()
            .all(|event| !event.is_shadowed));
    }

    #[test]
    fn resolution_shadows_the_loser_and_closes_the_conflict() {
        let store = MemoryStore::new();
        let listing = store.create_listing("Lake House", "UTC").unwrap();
        let (loser, _) = store
            .create_event(listing.id, reservation(utc(2024, 2, 10, 0), utc(2024, 2, 12, 0)))
            .unwrap();
        let (winner, conflicts) = store
            .create_event(listing.id, reservation(utc(2024, 2, 11, 0), utc(2024, 2, 13, 0)))
            .unwrap();

        let resolved = store
            .resolve_conflict(conflicts[0].id, winner.id, Some("kept the direct booking"))
            .unwrap();
        assert_eq!(resolved.status, ConflictStatus::Resolved);
        assert_eq!(resolved.winner_event_id, Some(winner.id));
        assert!(resolved.resolved_at.is_some());

        assert!(store.get_event(loser.id).unwrap().unwrap().is_shadowed);
        assert!(!store.get_event(winner.id).unwrap().unwrap().is_shadowed);
    }

    #[test]
    fn shadowed_events_are_excluded_from_future_detection() {
        let store = MemoryStore::new();
        let listing = store.create_listing("Lake House", "UTC").unwrap();
        let (loser, _) = store
            .create_event(listing.id, reservation(utc(2024, 2, 10, 0), utc(2024, 2, 12, 0)))
            .unwrap();
        let (winner, conflicts) = store
            .create_event(listing.id, reservation(utc(2024, 2, 11, 0), utc(2024, 2, 13, 0)))
            .unwrap();
        store.resolve_conflict(conflicts[0].id, winner.id, None).unwrap();

        // Overlaps only the now-shadowed loser
        let (_, conflicts) = store
            .create_event(listing.id, reservation(utc(2024, 2, 10, 0), utc(2024, 2, 11, 0)))
            .unwrap();
        assert!(conflicts.is_empty(), "shadowed loser {} must not conflict", loser.id);
    }

    #[test]
    fn upserting_a_channel_link_twice_keeps_the_token() {
        let store = MemoryStore::new();
        let listing = store.create_listing("Lake House", "UTC").unwrap();
        let first = store
            .upsert_channel_link(listing.id, Channel::Airbnb, Some("https://a.example/feed.ics"))
            .unwrap();
        let second = store
            .upsert_channel_link(listing.id, Channel::Airbnb, Some("https://b.example/feed.ics"))
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.export_token, second.export_token);
        assert_eq!(second.import_url.as_deref(), Some("https://b.example/feed.ics"));
        assert_eq!(store.list_channel_links(listing.id).unwrap().len(), 1);

        let by_token = store
            .find_channel_link_by_token(&first.export_token)
            .unwrap()
            .unwrap();
        assert_eq!(by_token.id, first.id);
    }

    #[test]
    fn events_list_in_start_order() {
        let store = MemoryStore::new();
        let listing = store.create_listing("Lake House", "UTC").unwrap();
        store
            .create_event(listing.id, reservation(utc(2024, 5, 1, 0), utc(2024, 5, 2, 0)))
            .unwrap();
        store
            .create_event(listing.id, reservation(utc(2024, 4, 1, 0), utc(2024, 4, 2, 0)))
            .unwrap();
        let events = store.list_events(listing.id).unwrap();
        assert!(events.windows(2).all(|w| w[0].start_utc <= w[1].start_utc));
    }

    #[test]
    fn external_id_lookup_matches_listing_and_source() {
        let store = MemoryStore::new();
        let listing = store.create_listing("Lake House", "UTC").unwrap();
        let mut imported = reservation(utc(2024, 6, 1, 0), utc(2024, 6, 3, 0));
        imported.source = EventSource::Airbnb;
        imported.external_res_id = Some("ABC123".into());
        store.create_event(listing.id, imported).unwrap();

        assert!(store
            .find_event_by_external_id(listing.id, EventSource::Airbnb, "ABC123")
            .unwrap()
            .is_some());
        assert!(store
            .find_event_by_external_id(listing.id, EventSource::Booking, "ABC123")
            .unwrap()
            .is_none());
        assert!(store
            .find_event_by_external_id(listing.id, EventSource::Airbnb, "XYZ")
            .unwrap()
            .is_none());
    }
}
