//! SQLite-backed store (rusqlite, bundled).
//!
//! One connection behind a mutex; event creation and conflict resolution run
//! inside SQL transactions so conflict detection is atomic with the insert.
//! Instants are stored as RFC 3339 text and compared in Rust, through the same
//! overlap logic the in-memory store uses.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row, Transaction};

use crate::conflicts;
use crate::error::{StaySyncError, StaySyncResult};
use crate::model::{
    Channel, ChannelLink, Conflict, ConflictStatus, Event, EventSource, EventType, Listing,
};
use crate::store::{CalendarStore, NewEvent};
use crate::token::generate_token;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (and migrate) the database at `path`.
    pub fn open(path: &Path) -> StaySyncResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory database (for tests).
    #[cfg(test)]
    pub fn open_in_memory() -> StaySyncResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> StaySyncResult<()> {
        self.lock().execute_batch(
            "CREATE TABLE IF NOT EXISTS listings (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                name      TEXT NOT NULL,
                timezone  TEXT NOT NULL,
                active    INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS channel_links (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                listing_id   INTEGER NOT NULL REFERENCES listings(id) ON DELETE CASCADE,
                channel      TEXT NOT NULL,
                import_url   TEXT,
                export_token TEXT NOT NULL UNIQUE,
                UNIQUE(listing_id, channel)
            );

            CREATE TABLE IF NOT EXISTS events (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                listing_id      INTEGER NOT NULL REFERENCES listings(id) ON DELETE CASCADE,
                kind            TEXT NOT NULL,
                source          TEXT NOT NULL,
                start_utc       TEXT NOT NULL,
                end_utc         TEXT NOT NULL,
                guest_name      TEXT,
                external_res_id TEXT,
                summary         TEXT,
                is_shadowed     INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS conflicts (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                listing_id      INTEGER NOT NULL,
                event_a_id      INTEGER NOT NULL REFERENCES events(id),
                event_b_id      INTEGER NOT NULL REFERENCES events(id),
                status          TEXT NOT NULL DEFAULT 'OPEN',
                winner_event_id INTEGER,
                resolution      TEXT,
                created_at      TEXT NOT NULL,
                resolved_at     TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_events_listing ON events(listing_id);
            CREATE INDEX IF NOT EXISTS idx_events_external
                ON events(listing_id, source, external_res_id);
            CREATE INDEX IF NOT EXISTS idx_conflicts_pair
                ON conflicts(event_a_id, event_b_id);",
        )?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

fn bad_column(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, message.into())
}

fn get_datetime(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(index)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| bad_column(index, format!("bad timestamp {raw:?}: {err}")))
}

fn get_datetime_opt(row: &Row<'_>, index: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(index)?;
    raw.map(|raw| {
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|err| bad_column(index, format!("bad timestamp {raw:?}: {err}")))
    })
    .transpose()
}

fn listing_from_row(row: &Row<'_>) -> rusqlite::Result<Listing> {
    Ok(Listing {
        id: row.get(0)?,
        name: row.get(1)?,
        timezone: row.get(2)?,
        active: row.get(3)?,
    })
}

fn link_from_row(row: &Row<'_>) -> rusqlite::Result<ChannelLink> {
    let channel: String = row.get(2)?;
    Ok(ChannelLink {
        id: row.get(0)?,
        listing_id: row.get(1)?,
        channel: Channel::parse(&channel)
            .ok_or_else(|| bad_column(2, format!("bad channel {channel:?}")))?,
        import_url: row.get(3)?,
        export_token: row.get(4)?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    let kind: String = row.get(2)?;
    let source: String = row.get(3)?;
    Ok(Event {
        id: row.get(0)?,
        listing_id: row.get(1)?,
        kind: EventType::parse(&kind)
            .ok_or_else(|| bad_column(2, format!("bad event type {kind:?}")))?,
        source: EventSource::parse(&source)
            .ok_or_else(|| bad_column(3, format!("bad event source {source:?}")))?,
        start_utc: get_datetime(row, 4)?,
        end_utc: get_datetime(row, 5)?,
        guest_name: row.get(6)?,
        external_res_id: row.get(7)?,
        summary: row.get(8)?,
        is_shadowed: row.get(9)?,
        created_at: get_datetime(row, 10)?,
    })
}

fn conflict_from_row(row: &Row<'_>) -> rusqlite::Result<Conflict> {
    let status: String = row.get(4)?;
    Ok(Conflict {
        id: row.get(0)?,
        listing_id: row.get(1)?,
        event_a_id: row.get(2)?,
        event_b_id: row.get(3)?,
        status: ConflictStatus::parse(&status)
            .ok_or_else(|| bad_column(4, format!("bad conflict status {status:?}")))?,
        winner_event_id: row.get(5)?,
        resolution: row.get(6)?,
        created_at: get_datetime(row, 7)?,
        resolved_at: get_datetime_opt(row, 8)?,
    })
}

const EVENT_COLUMNS: &str = "id, listing_id, kind, source, start_utc, end_utc, \
     guest_name, external_res_id, summary, is_shadowed, created_at";
const CONFLICT_COLUMNS: &str = "id, listing_id, event_a_id, event_b_id, status, \
     winner_event_id, resolution, created_at, resolved_at";

fn listing_events(tx: &Transaction<'_>, listing_id: i64) -> StaySyncResult<Vec<Event>> {
    let mut stmt = tx.prepare(&format!(
        "SELECT {EVENT_COLUMNS} FROM events WHERE listing_id = ?1"
    ))?;
    let events = stmt
        .query_map(params![listing_id], event_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(events)
}

fn conflict_by_id(conn: &Connection, conflict_id: i64) -> StaySyncResult<Option<Conflict>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CONFLICT_COLUMNS} FROM conflicts WHERE id = ?1"
    ))?;
    let mut rows = stmt.query_map(params![conflict_id], conflict_from_row)?;
    rows.next().transpose().map_err(Into::into)
}

impl CalendarStore for SqliteStore {
    fn create_listing(&self, name: &str, timezone: &str) -> StaySyncResult<Listing> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO listings (name, timezone, active) VALUES (?1, ?2, 1)",
            params![name, timezone],
        )?;
        Ok(Listing {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            timezone: timezone.to_string(),
            active: true,
        })
    }

    fn list_listings(&self) -> StaySyncResult<Vec<Listing>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT id, name, timezone, active FROM listings ORDER BY id")?;
        let listings = stmt
            .query_map([], listing_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(listings)
    }

    fn get_listing(&self, listing_id: i64) -> StaySyncResult<Option<Listing>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT id, name, timezone, active FROM listings WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![listing_id], listing_from_row)?;
        rows.next().transpose().map_err(Into::into)
    }

    fn upsert_channel_link(
        &self,
        listing_id: i64,
        channel: Channel,
        import_url: Option<&str>,
    ) -> StaySyncResult<ChannelLink> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let existing = {
            let mut stmt = tx.prepare(
                "SELECT id, listing_id, channel, import_url, export_token
                 FROM channel_links WHERE listing_id = ?1 AND channel = ?2",
            )?;
            let mut rows = stmt.query_map(params![listing_id, channel.as_str()], link_from_row)?;
            rows.next().transpose()?
        };
        let link = match existing {
            Some(mut link) => {
                tx.execute(
                    "UPDATE channel_links SET import_url = ?1 WHERE id = ?2",
                    params![import_url, link.id],
                )?;
                link.import_url = import_url.map(str::to_string);
                link
            }
            None => {
                let token = generate_token();
                tx.execute(
                    "INSERT INTO channel_links (listing_id, channel, import_url, export_token)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![listing_id, channel.as_str(), import_url, token],
                )?;
                ChannelLink {
                    id: tx.last_insert_rowid(),
                    listing_id,
                    channel,
                    import_url: import_url.map(str::to_string),
                    export_token: token,
                }
            }
        };
        tx.commit()?;
        Ok(link)
    }

    fn list_channel_links(&self, listing_id: i64) -> StaySyncResult<Vec<ChannelLink>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, listing_id, channel, import_url, export_token
             FROM channel_links WHERE listing_id = ?1 ORDER BY id",
        )?;
        let links = stmt
            .query_map(params![listing_id], link_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(links)
    }

    fn find_channel_link_by_token(&self, token: &str) -> StaySyncResult<Option<ChannelLink>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, listing_id, channel, import_url, export_token
             FROM channel_links WHERE export_token = ?1",
        )?;
        let mut rows = stmt.query_map(params![token], link_from_row)?;
        rows.next().transpose().map_err(Into::into)
    }

    fn create_event(
        &self,
        listing_id: i64,
        new_event: NewEvent,
    ) -> StaySyncResult<(Event, Vec<Conflict>)> {
        if new_event.end_utc <= new_event.start_utc {
            return Err(StaySyncError::InvalidInterval);
        }
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let existing = listing_events(&tx, listing_id)?;

        let created_at = Utc::now();
        tx.execute(
            "INSERT INTO events (listing_id, kind, source, start_utc, end_utc,
                                 guest_name, external_res_id, summary, is_shadowed, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9)",
            params![
                listing_id,
                new_event.kind.as_str(),
                new_event.source.as_str(),
                new_event.start_utc.to_rfc3339(),
                new_event.end_utc.to_rfc3339(),
                new_event.guest_name,
                new_event.external_res_id,
                new_event.summary,
                created_at.to_rfc3339(),
            ],
        )?;
        let event = Event {
            id: tx.last_insert_rowid(),
            listing_id,
            kind: new_event.kind,
            source: new_event.source,
            start_utc: new_event.start_utc,
            end_utc: new_event.end_utc,
            guest_name: new_event.guest_name,
            external_res_id: new_event.external_res_id,
            summary: new_event.summary,
            is_shadowed: false,
            created_at,
        };

        let mut touched = Vec::new();
        for other in conflicts::find_overlaps(&event, &existing) {
            let prior = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {CONFLICT_COLUMNS} FROM conflicts
                     WHERE (event_a_id = ?1 AND event_b_id = ?2)
                        OR (event_a_id = ?2 AND event_b_id = ?1)"
                ))?;
                let mut rows = stmt.query_map(params![event.id, other.id], conflict_from_row)?;
                rows.next().transpose()?
            };
            if let Some(conflict) = prior {
                touched.push(conflict);
                continue;
            }
            let conflict_created = Utc::now();
            tx.execute(
                "INSERT INTO conflicts (listing_id, event_a_id, event_b_id, status, created_at)
                 VALUES (?1, ?2, ?3, 'OPEN', ?4)",
                params![listing_id, event.id, other.id, conflict_created.to_rfc3339()],
            )?;
            touched.push(Conflict {
                id: tx.last_insert_rowid(),
                listing_id,
                event_a_id: event.id,
                event_b_id: other.id,
                status: ConflictStatus::Open,
                winner_event_id: None,
                resolution: None,
                created_at: conflict_created,
                resolved_at: None,
            });
        }
        tx.commit()?;
        Ok((event, touched))
    }

    fn get_event(&self, event_id: i64) -> StaySyncResult<Option<Event>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"))?;
        let mut rows = stmt.query_map(params![event_id], event_from_row)?;
        rows.next().transpose().map_err(Into::into)
    }

    fn list_events(&self, listing_id: i64) -> StaySyncResult<Vec<Event>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE listing_id = ?1"
        ))?;
        let mut events = stmt
            .query_map(params![listing_id], event_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        events.sort_by_key(|event| event.start_utc);
        Ok(events)
    }

    fn find_event_by_external_id(
        &self,
        listing_id: i64,
        source: EventSource,
        external_id: &str,
    ) -> StaySyncResult<Option<Event>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE listing_id = ?1 AND source = ?2 AND external_res_id = ?3"
        ))?;
        let mut rows = stmt.query_map(
            params![listing_id, source.as_str(), external_id],
            event_from_row,
        )?;
        rows.next().transpose().map_err(Into::into)
    }

    fn list_conflicts(&self) -> StaySyncResult<Vec<Conflict>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!("SELECT {CONFLICT_COLUMNS} FROM conflicts"))?;
        let mut conflicts = stmt
            .query_map([], conflict_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        conflicts.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(conflicts)
    }

    fn get_conflict(&self, conflict_id: i64) -> StaySyncResult<Option<Conflict>> {
        conflict_by_id(&self.lock(), conflict_id)
    }

    fn resolve_conflict(
        &self,
        conflict_id: i64,
        winner_event_id: i64,
        resolution: Option<&str>,
    ) -> StaySyncResult<Conflict> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut conflict =
            conflict_by_id(&tx, conflict_id)?.ok_or(StaySyncError::NotFound("Conflict"))?;
        let loser_id = conflicts::loser_event_id(&conflict, winner_event_id)?;

        let shadowed = tx.execute(
            "UPDATE events SET is_shadowed = 1 WHERE id = ?1",
            params![loser_id],
        )?;
        if shadowed == 0 {
            return Err(StaySyncError::MissingEvent(loser_id));
        }

        let resolved_at = Utc::now();
        tx.execute(
            "UPDATE conflicts
             SET status = 'RESOLVED', winner_event_id = ?1, resolution = ?2, resolved_at = ?3
             WHERE id = ?4",
            params![winner_event_id, resolution, resolved_at.to_rfc3339(), conflict_id],
        )?;
        tx.commit()?;

        conflict.status = ConflictStatus::Resolved;
        conflict.winner_event_id = Some(winner_event_id);
        conflict.resolution = resolution.map(str::to_string);
        conflict.resolved_at = Some(resolved_at);
        Ok(conflict)
    }
}
