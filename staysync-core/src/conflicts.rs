//! Overlap detection and conflict identity rules.
//!
//! Both store backends funnel event insertion and resolution through these
//! functions, so the interval convention and pair identity live in exactly one
//! place regardless of which backend is active.

use chrono::{DateTime, Utc};

use crate::error::{StaySyncError, StaySyncResult};
use crate::model::{Conflict, Event};

/// Half-open intersection of `[a_start, a_end)` and `[b_start, b_end)`.
/// An event ending exactly when another starts does not overlap.
pub fn intervals_overlap(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && b_start < a_end
}

/// Events among `existing` that conflict with `candidate`: same listing, not
/// the candidate itself, not shadowed, spans intersecting. Shadowed events are
/// superseded bookings and never generate new conflicts.
pub fn find_overlaps<'a>(candidate: &Event, existing: &'a [Event]) -> Vec<&'a Event> {
    existing
        .iter()
        .filter(|other| {
            other.listing_id == candidate.listing_id
                && other.id != candidate.id
                && !other.is_shadowed
                && intervals_overlap(
                    candidate.start_utc,
                    candidate.end_utc,
                    other.start_utc,
                    other.end_utc,
                )
        })
        .collect()
}

/// The conflict already covering the unordered pair `{a, b}`, if any.
/// Re-detecting the same pair from either direction must reuse this record.
pub fn find_conflict_for_pair(conflicts: &[Conflict], a: i64, b: i64) -> Option<&Conflict> {
    conflicts.iter().find(|conflict| conflict.matches_pair(a, b))
}

/// The event shadowed by resolving `conflict` in favor of `winner_event_id`.
pub fn loser_event_id(conflict: &Conflict, winner_event_id: i64) -> StaySyncResult<i64> {
    if winner_event_id == conflict.event_a_id {
        Ok(conflict.event_b_id)
    } else if winner_event_id == conflict.event_b_id {
        Ok(conflict.event_a_id)
    } else {
        Err(StaySyncError::InvalidWinner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConflictStatus, EventSource, EventType};
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn event(id: i64, listing_id: i64, start: DateTime<Utc>, end: DateTime<Utc>) -> Event {
        Event {
            id,
            listing_id,
            kind: EventType::Reservation,
            source: EventSource::Manual,
            start_utc: start,
            end_utc: end,
            guest_name: None,
            external_res_id: None,
            summary: None,
            is_shadowed: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn touching_intervals_do_not_overlap() {
        let a_end = utc(2024, 2, 12, 0);
        assert!(!intervals_overlap(
            utc(2024, 2, 10, 0),
            a_end,
            a_end,
            utc(2024, 2, 14, 0)
        ));
    }

    #[test]
    fn partial_overlap_is_detected_symmetrically() {
        let a = (utc(2024, 2, 10, 0), utc(2024, 2, 12, 0));
        let b = (utc(2024, 2, 11, 0), utc(2024, 2, 13, 0));
        assert!(intervals_overlap(a.0, a.1, b.0, b.1));
        assert!(intervals_overlap(b.0, b.1, a.0, a.1));
    }

    #[test]
    fn find_overlaps_skips_self_shadowed_and_other_listings() {
        let candidate = event(1, 1, utc(2024, 3, 10, 0), utc(2024, 3, 12, 0));
        let mut shadowed = event(2, 1, utc(2024, 3, 11, 0), utc(2024, 3, 13, 0));
        shadowed.is_shadowed = true;
        let other_listing = event(3, 2, utc(2024, 3, 11, 0), utc(2024, 3, 13, 0));
        let live = event(4, 1, utc(2024, 3, 11, 0), utc(2024, 3, 13, 0));
        let myself = candidate.clone();

        let existing = vec![shadowed, other_listing, live, myself];
        let overlaps = find_overlaps(&candidate, &existing);
        assert_eq!(overlaps.len(), 1);
        assert_eq!(overlaps[0].id, 4);
    }

    #[test]
    fn loser_is_the_other_half_of_the_pair() {
        let conflict = Conflict {
            id: 1,
            listing_id: 1,
            event_a_id: 10,
            event_b_id: 20,
            status: ConflictStatus::Open,
            winner_event_id: None,
            resolution: None,
            created_at: Utc::now(),
            resolved_at: None,
        };
        assert_eq!(loser_event_id(&conflict, 10).unwrap(), 20);
        assert_eq!(loser_event_id(&conflict, 20).unwrap(), 10);
        assert!(matches!(
            loser_event_id(&conflict, 30),
            Err(StaySyncError::InvalidWinner)
        ));
    }
}
