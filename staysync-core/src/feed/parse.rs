//! Tolerant line-oriented parser for inbound channel calendar feeds.
//!
//! Channel exports are frequently sloppy, so the parser never fails a whole
//! feed: lines outside a VEVENT block, lines without a `:` delimiter, and
//! unparseable entries are skipped one at a time.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};

use crate::error::{StaySyncError, StaySyncResult};

/// One VEVENT block, reduced to its property map. Values keep everything past
/// the first `:`, so timestamps with colons survive intact.
pub type FeedEntry = HashMap<String, String>;

/// Scan feed text and collect the property maps of every VEVENT block.
/// `DTSTART;...` / `DTEND;...` keys are normalized to plain `DTSTART`/`DTEND`
/// (parameters such as `VALUE=DATE` or `TZID` are discarded).
pub fn parse_feed(content: &str) -> Vec<FeedEntry> {
    let mut entries = Vec::new();
    let mut current: Option<FeedEntry> = None;
    for raw_line in content.lines() {
        let line = raw_line.trim();
        if line == "BEGIN:VEVENT" {
            current = Some(FeedEntry::new());
            continue;
        }
        if line == "END:VEVENT" {
            if let Some(entry) = current.take() {
                if !entry.is_empty() {
                    entries.push(entry);
                }
            }
            continue;
        }
        let Some(entry) = current.as_mut() else {
            continue;
        };
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = if key.starts_with("DTSTART") {
            "DTSTART"
        } else if key.starts_with("DTEND") {
            "DTEND"
        } else {
            key
        };
        entry.insert(key.to_string(), value.to_string());
    }
    entries
}

/// Decode one DTSTART/DTEND value. Recognized encodings:
/// `YYYYMMDDTHHMMSSZ` (UTC), `YYYYMMDDTHHMMSS` (floating, read as UTC),
/// `YYYYMMDD` (all-day, UTC midnight), and ISO-8601 as a fallback with any
/// offset discarded in favor of UTC.
pub fn parse_feed_datetime(value: &str) -> Option<DateTime<Utc>> {
    if value.ends_with('Z') {
        return NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%SZ")
            .ok()
            .map(|naive| naive.and_utc());
    }
    if value.len() == 15 && value.matches('T').count() == 1 {
        return NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S")
            .ok()
            .map(|naive| naive.and_utc());
    }
    if value.len() == 8 {
        return NaiveDate::parse_from_str(value, "%Y%m%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_local().and_utc());
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Derive the event span from a parsed block. Fails with `MissingSpan` when
/// either boundary is absent or undecodable; callers skip the entry, never the
/// batch. An all-day entry whose start equals its end becomes one full day.
/// A span that still fails to end after its start imports as a half-day
/// instead of erroring, so one malformed remote event cannot stall the feed.
pub fn derive_span(entry: &FeedEntry) -> StaySyncResult<(DateTime<Utc>, DateTime<Utc>)> {
    let start_raw = entry.get("DTSTART").ok_or(StaySyncError::MissingSpan)?;
    let end_raw = entry.get("DTEND").ok_or(StaySyncError::MissingSpan)?;
    let start = parse_feed_datetime(start_raw).ok_or(StaySyncError::MissingSpan)?;
    let mut end = parse_feed_datetime(end_raw).ok_or(StaySyncError::MissingSpan)?;
    if start_raw.len() == 8 && start == end {
        end = start + Duration::days(1);
    }
    if end <= start {
        end = start + Duration::hours(12);
    }
    Ok((start, end))
}
