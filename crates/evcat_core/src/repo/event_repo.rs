//! Event repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide CRUD over canonical `events` storage and its child tables.
//! - Serve the scalar pre-filters the evaluation engine scans with.
//!
//! # Invariants
//! - Write paths call `Event::validate()` before SQL mutations.
//! - Read paths reject invalid persisted state instead of masking it.
//! - Deleting an event detaches it from every static catalogue in the same
//!   write.

use crate::model::catalogue::CatalogueId;
use crate::model::event::{Event, EventId};
use crate::repo::error::{EntityRef, RepoError, RepoResult};
use crate::repo::records::{
    atomically, bool_to_int, int_to_bool, load_attributes, load_labels, parse_uuid,
    write_attributes, write_labels, EVENT_ATTRIBUTES, EVENT_PRODUCTS, EVENT_TAGS,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

const EVENT_SELECT_SQL: &str = "SELECT
    uuid,
    start_ms,
    stop_ms,
    author,
    rating,
    is_removed
FROM events";

/// Upper bound on ids bound into one statement; SQLite caps host
/// parameters per statement.
const ID_BATCH_SIZE: usize = 500;

/// Scalar pre-filters for event scans.
///
/// All set filters are combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventQuery {
    /// Restrict to these ids. An empty list matches nothing.
    pub ids: Option<Vec<EventId>>,
    /// Restrict to members of this static catalogue.
    pub catalogue: Option<CatalogueId>,
    /// Closed-interval overlap window `(start, stop)`.
    pub overlapping: Option<(i64, i64)>,
    pub author: Option<String>,
    pub include_removed: bool,
}

impl EventQuery {
    /// Every active event.
    pub fn active() -> Self {
        Self::default()
    }

    pub fn by_ids(ids: impl IntoIterator<Item = EventId>) -> Self {
        Self {
            ids: Some(ids.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Members of one static catalogue, resolved inside the store.
    pub fn in_catalogue(catalogue: CatalogueId) -> Self {
        Self {
            catalogue: Some(catalogue),
            ..Self::default()
        }
    }

    pub fn overlapping(start: i64, stop: i64) -> Self {
        Self {
            overlapping: Some((start, stop)),
            ..Self::default()
        }
    }

    pub fn including_removed(mut self) -> Self {
        self.include_removed = true;
        self
    }
}

/// Repository interface for event records.
pub trait EventRepository {
    fn create_event(&self, event: &Event) -> RepoResult<EventId>;
    fn update_event(&self, event: &Event) -> RepoResult<()>;
    /// Loads one event, soft-removed or not.
    fn get_event(&self, id: EventId) -> RepoResult<Event>;
    /// Events matching `query`, ordered by `start, stop, uuid`.
    fn query_events(&self, query: &EventQuery) -> RepoResult<Vec<Event>>;
    fn set_event_removed(&self, id: EventId, removed: bool) -> RepoResult<()>;
    /// Deletes the event permanently and returns how many static catalogue
    /// memberships were detached.
    fn delete_event(&self, id: EventId) -> RepoResult<usize>;
}

/// SQLite-backed event repository.
pub struct SqliteEventRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteEventRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn event_exists(&self, id: EventId) -> RepoResult<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM events WHERE uuid = ?1;",
                [id.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn write_children(&self, event: &Event, uuid: &str) -> RepoResult<()> {
        write_labels(self.conn, EVENT_TAGS, uuid, &event.tags)?;
        write_labels(self.conn, EVENT_PRODUCTS, uuid, &event.products)?;
        write_attributes(self.conn, EVENT_ATTRIBUTES, uuid, &event.attributes)
    }

    fn collect_events(&self, sql: &str, bind_values: Vec<Value>) -> RepoResult<Vec<Event>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(self.load_event(row)?);
        }
        Ok(events)
    }

    fn load_event(&self, row: &Row<'_>) -> RepoResult<Event> {
        let mut event = parse_event_row(row)?;
        let uuid = event.uuid.to_string();
        event.tags = load_labels(self.conn, EVENT_TAGS, &uuid)?;
        event.products = load_labels(self.conn, EVENT_PRODUCTS, &uuid)?;
        event.attributes = load_attributes(self.conn, EVENT_ATTRIBUTES, &uuid)?;
        event.validate().map_err(|err| {
            RepoError::InvalidData(format!("stored event {} is invalid: {err}", event.uuid))
        })?;
        Ok(event)
    }
}

impl EventRepository for SqliteEventRepository<'_> {
    fn create_event(&self, event: &Event) -> RepoResult<EventId> {
        event.validate()?;
        if self.event_exists(event.uuid)? {
            return Err(RepoError::AlreadyExists(EntityRef::Event(event.uuid)));
        }

        let uuid = event.uuid.to_string();
        atomically(self.conn, || {
            self.conn.execute(
                "INSERT INTO events (
                    uuid,
                    start_ms,
                    stop_ms,
                    author,
                    rating,
                    is_removed,
                    created_at,
                    updated_at
                ) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6,
                    (strftime('%s', 'now') * 1000),
                    (strftime('%s', 'now') * 1000)
                );",
                params![
                    uuid.as_str(),
                    event.start,
                    event.stop,
                    event.author.as_str(),
                    event.rating,
                    bool_to_int(event.is_removed),
                ],
            )?;
            self.write_children(event, &uuid)
        })?;

        Ok(event.uuid)
    }

    fn update_event(&self, event: &Event) -> RepoResult<()> {
        event.validate()?;

        let uuid = event.uuid.to_string();
        atomically(self.conn, || {
            let changed = self.conn.execute(
                "UPDATE events
                 SET
                    start_ms = ?1,
                    stop_ms = ?2,
                    author = ?3,
                    rating = ?4,
                    is_removed = ?5,
                    updated_at = (strftime('%s', 'now') * 1000)
                 WHERE uuid = ?6;",
                params![
                    event.start,
                    event.stop,
                    event.author.as_str(),
                    event.rating,
                    bool_to_int(event.is_removed),
                    uuid.as_str(),
                ],
            )?;
            if changed == 0 {
                return Err(RepoError::NotFound(EntityRef::Event(event.uuid)));
            }
            self.write_children(event, &uuid)
        })
    }

    fn get_event(&self, id: EventId) -> RepoResult<Event> {
        let mut stmt = self
            .conn
            .prepare(&format!("{EVENT_SELECT_SQL} WHERE uuid = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        match rows.next()? {
            Some(row) => self.load_event(row),
            None => Err(RepoError::NotFound(EntityRef::Event(id))),
        }
    }

    fn query_events(&self, query: &EventQuery) -> RepoResult<Vec<Event>> {
        let mut sql = format!("{EVENT_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if !query.include_removed {
            sql.push_str(" AND is_removed = 0");
        }

        if let Some(catalogue) = query.catalogue {
            sql.push_str(
                " AND uuid IN (SELECT event_uuid FROM catalogue_events WHERE catalogue_uuid = ?)",
            );
            bind_values.push(Value::Text(catalogue.to_string()));
        }

        if let Some((start, stop)) = query.overlapping {
            sql.push_str(" AND start_ms <= ? AND stop_ms >= ?");
            bind_values.push(Value::Integer(stop));
            bind_values.push(Value::Integer(start));
        }

        if let Some(author) = &query.author {
            sql.push_str(" AND author = ?");
            bind_values.push(Value::Text(author.clone()));
        }

        let Some(ids) = &query.ids else {
            sql.push_str(" ORDER BY start_ms ASC, stop_ms ASC, uuid ASC;");
            return self.collect_events(&sql, bind_values);
        };

        let mut events = Vec::new();
        for batch in ids.chunks(ID_BATCH_SIZE) {
            let placeholders = vec!["?"; batch.len()].join(", ");
            let batch_sql = format!("{sql} AND uuid IN ({placeholders});");
            let mut batch_values = bind_values.clone();
            batch_values.extend(batch.iter().map(|id| Value::Text(id.to_string())));
            events.extend(self.collect_events(&batch_sql, batch_values)?);
        }
        events.sort_by_key(|event| (event.start, event.stop, event.uuid));
        events.dedup_by_key(|event| event.uuid);
        Ok(events)
    }

    fn set_event_removed(&self, id: EventId, removed: bool) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE events
             SET
                is_removed = ?1,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE uuid = ?2;",
            params![bool_to_int(removed), id.to_string()],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(EntityRef::Event(id)));
        }

        Ok(())
    }

    fn delete_event(&self, id: EventId) -> RepoResult<usize> {
        let uuid = id.to_string();
        atomically(self.conn, || {
            let detached = self.conn.execute(
                "DELETE FROM catalogue_events WHERE event_uuid = ?1;",
                [uuid.as_str()],
            )?;
            let deleted = self
                .conn
                .execute("DELETE FROM events WHERE uuid = ?1;", [uuid.as_str()])?;
            if deleted == 0 {
                return Err(RepoError::NotFound(EntityRef::Event(id)));
            }
            Ok(detached)
        })
    }
}

fn parse_event_row(row: &Row<'_>) -> RepoResult<Event> {
    let uuid_text: String = row.get("uuid")?;
    let uuid = parse_uuid(&uuid_text, "events.uuid")?;

    let rating = match row.get::<_, Option<i64>>("rating")? {
        Some(value) => Some(u8::try_from(value).map_err(|_| {
            RepoError::InvalidData(format!("invalid rating `{value}` in events.rating"))
        })?),
        None => None,
    };

    let mut event = Event::with_id(
        uuid,
        row.get("start_ms")?,
        row.get("stop_ms")?,
        row.get::<_, String>("author")?,
    );
    event.rating = rating;
    event.is_removed = int_to_bool(row.get("is_removed")?, "events.is_removed")?;
    Ok(event)
}
