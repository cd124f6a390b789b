//! Outbound per-channel feed filtering and serialization.
//!
//! Each channel only ever sees blocks and the other channels' bookings as
//! opaque all-day blocks. Its own reservations are never reflected back, and
//! no guest-identifying detail leaves the system.

use chrono::{Duration, Utc};
use chrono_tz::Tz;

use crate::error::{StaySyncError, StaySyncResult};
use crate::model::{Channel, Event, EventSource, EventType, Listing};

/// Events visible to `channel`: shadowed events never, BLOCK events always,
/// reservations only when sourced from MANUAL or the opposite channel.
pub fn events_for_channel(channel: Channel, events: &[Event]) -> Vec<Event> {
    events
        .iter()
        .filter(|event| {
            if event.is_shadowed {
                return false;
            }
            if event.kind == EventType::Block {
                return true;
            }
            match channel {
                Channel::Airbnb => {
                    matches!(event.source, EventSource::Manual | EventSource::Booking)
                }
                Channel::Booking => {
                    matches!(event.source, EventSource::Manual | EventSource::Airbnb)
                }
            }
        })
        .cloned()
        .collect()
}

/// Human-readable summary for an exported event. Channel-sourced reservations
/// summarize generically; the stored summary only surfaces for manual entries.
pub fn event_summary(event: &Event) -> String {
    if event.kind == EventType::Block {
        return "BLOCK".to_string();
    }
    match event.source {
        EventSource::Airbnb => "Airbnb Reservation".to_string(),
        EventSource::Booking => "Booking Reservation".to_string(),
        EventSource::Manual => event
            .summary
            .clone()
            .unwrap_or_else(|| "Reservation".to_string()),
    }
}

/// Serialize `events` as an all-day calendar feed in the listing's timezone.
/// Emitted end dates are exclusive and every block spans at least one night.
/// Lines are CRLF-terminated, including the last one.
pub fn build_feed(listing: &Listing, events: &[Event]) -> StaySyncResult<String> {
    let tz: Tz = listing
        .timezone
        .parse()
        .map_err(|_| StaySyncError::Timezone(listing.timezone.clone()))?;
    let dtstamp = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();

    let mut lines = vec![
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        "PRODID:-//staysync//Channel Sync//EN".to_string(),
        "CALSCALE:GREGORIAN".to_string(),
        "METHOD:PUBLISH".to_string(),
    ];
    for event in events {
        let start_date = event.start_utc.with_timezone(&tz).date_naive();
        let mut end_date = event.end_utc.with_timezone(&tz).date_naive();
        if end_date <= start_date {
            end_date = start_date + Duration::days(1);
        }
        lines.push("BEGIN:VEVENT".to_string());
        lines.push(format!("UID:{}@staysync", event.id));
        lines.push(format!("DTSTAMP:{dtstamp}"));
        lines.push(format!("DTSTART;VALUE=DATE:{}", start_date.format("%Y%m%d")));
        lines.push(format!("DTEND;VALUE=DATE:{}", end_date.format("%Y%m%d")));
        lines.push(format!("SUMMARY:{}", event_summary(event)));
        lines.push(format!(
            "LAST-MODIFIED:{}",
            event.created_at.format("%Y%m%dT%H%M%SZ")
        ));
        lines.push("END:VEVENT".to_string());
    }
    lines.push("END:VCALENDAR".to_string());
    Ok(lines.join("\r\n") + "\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone};

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn listing(timezone: &str) -> Listing {
        Listing {
            id: 1,
            name: "Lake House".to_string(),
            timezone: timezone.to_string(),
            active: true,
        }
    }

    fn event(
        id: i64,
        kind: EventType,
        source: EventSource,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Event {
        Event {
            id,
            listing_id: 1,
            kind,
            source,
            start_utc: start,
            end_utc: end,
            guest_name: None,
            external_res_id: None,
            summary: None,
            is_shadowed: false,
            created_at: utc(2024, 1, 1, 0),
        }
    }

    #[test]
    fn channels_never_see_their_own_reservations() {
        let events = vec![
            event(1, EventType::Reservation, EventSource::Airbnb, utc(2024, 2, 1, 0), utc(2024, 2, 3, 0)),
            event(2, EventType::Reservation, EventSource::Booking, utc(2024, 2, 4, 0), utc(2024, 2, 6, 0)),
            event(3, EventType::Block, EventSource::Manual, utc(2024, 2, 7, 0), utc(2024, 2, 9, 0)),
        ];
        let for_airbnb = events_for_channel(Channel::Airbnb, &events);
        assert!(for_airbnb.iter().all(|e| e.id != 1));
        assert_eq!(for_airbnb.len(), 2);

        let for_booking = events_for_channel(Channel::Booking, &events);
        assert!(for_booking.iter().all(|e| e.id != 2));
        assert_eq!(for_booking.len(), 2);
    }

    #[test]
    fn blocks_pass_regardless_of_source_but_shadowed_never() {
        let own_channel_block =
            event(1, EventType::Block, EventSource::Airbnb, utc(2024, 2, 1, 0), utc(2024, 2, 2, 0));
        let mut shadowed =
            event(2, EventType::Block, EventSource::Manual, utc(2024, 2, 3, 0), utc(2024, 2, 4, 0));
        shadowed.is_shadowed = true;

        let visible = events_for_channel(Channel::Airbnb, &[own_channel_block, shadowed]);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, 1);
    }

    #[test]
    fn summaries_omit_guest_detail() {
        let mut airbnb =
            event(1, EventType::Reservation, EventSource::Airbnb, utc(2024, 2, 1, 0), utc(2024, 2, 2, 0));
        airbnb.guest_name = Some("Ada Lovelace".to_string());
        airbnb.summary = Some("Ada's stay".to_string());
        assert_eq!(event_summary(&airbnb), "Airbnb Reservation");

        let block = event(2, EventType::Block, EventSource::Manual, utc(2024, 2, 1, 0), utc(2024, 2, 2, 0));
        assert_eq!(event_summary(&block), "BLOCK");

        let mut manual =
            event(3, EventType::Reservation, EventSource::Manual, utc(2024, 2, 1, 0), utc(2024, 2, 2, 0));
        assert_eq!(event_summary(&manual), "Reservation");
        manual.summary = Some("Direct booking".to_string());
        assert_eq!(event_summary(&manual), "Direct booking");
    }

    #[test]
    fn all_day_block_exports_with_exclusive_end() {
        // Inclusive 2024-02-10..2024-02-12 stored as [10th 00:00, 13th 00:00)
        let block = event(
            7,
            EventType::Block,
            EventSource::Manual,
            utc(2024, 2, 10, 0),
            utc(2024, 2, 13, 0),
        );
        let body = build_feed(&listing("UTC"), &[block]).unwrap();
        assert!(body.contains("DTSTART;VALUE=DATE:20240210"));
        assert!(body.contains("DTEND;VALUE=DATE:20240213"));
        assert!(body.contains("UID:7@staysync"));
        assert!(body.contains("SUMMARY:BLOCK"));
        assert!(body.contains("LAST-MODIFIED:20240101T000000Z"));
    }

    #[test]
    fn short_events_still_span_one_night() {
        let short = event(
            1,
            EventType::Reservation,
            EventSource::Booking,
            utc(2024, 2, 10, 9),
            utc(2024, 2, 10, 17),
        );
        let body = build_feed(&listing("UTC"), &[short]).unwrap();
        assert!(body.contains("DTSTART;VALUE=DATE:20240210"));
        assert!(body.contains("DTEND;VALUE=DATE:20240211"));
    }

    #[test]
    fn dates_are_localized_to_the_listing_timezone() {
        // 21:00Z on the 9th is already the 10th in UTC+3
        let block = event(
            1,
            EventType::Block,
            EventSource::Manual,
            utc(2024, 2, 9, 21),
            utc(2024, 2, 12, 21),
        );
        let body = build_feed(&listing("Africa/Nairobi"), &[block]).unwrap();
        assert!(body.contains("DTSTART;VALUE=DATE:20240210"));
        assert!(body.contains("DTEND;VALUE=DATE:20240213"));
    }

    #[test]
    fn feed_uses_crlf_and_publish_header() {
        let body = build_feed(&listing("UTC"), &[]).unwrap();
        assert!(body.starts_with("BEGIN:VCALENDAR\r\n"));
        assert!(body.ends_with("END:VCALENDAR\r\n"));
        assert!(body.contains("METHOD:PUBLISH"));
        assert!(!body.replace("\r\n", "").contains('\n'));
    }

    #[test]
    fn unknown_timezone_is_an_error() {
        let result = build_feed(&listing("Mars/Olympus_Mons"), &[]);
        assert!(matches!(result, Err(StaySyncError::Timezone(_))));
    }
}
