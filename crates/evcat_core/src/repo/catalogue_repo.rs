//! Catalogue repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist static and dynamic catalogues in one identifier namespace.
//! - Own static membership rows and predicate node records.
//!
//! # Invariants
//! - The stored variant never changes after creation.
//! - Static membership is a set ordered by insertion position.
//! - Predicate trees are validated before any node record is written and
//!   re-validated when loaded.

use crate::model::catalogue::{Catalogue, CatalogueId, CatalogueKind, CatalogueVariant};
use crate::model::event::EventId;
use crate::model::predicate::{NodeKind, Predicate, PredicateNode};
use crate::repo::error::{EntityRef, RepoError, RepoResult};
use crate::repo::records::{
    atomically, bool_to_int, int_to_bool, load_attributes, load_labels, parse_uuid,
    write_attributes, write_labels, CATALOGUE_ATTRIBUTES, CATALOGUE_TAGS,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

const CATALOGUE_SELECT_SQL: &str = "SELECT
    uuid,
    name,
    author,
    kind,
    is_removed
FROM catalogues";

/// Query options for listing catalogues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogueQuery {
    pub include_removed: bool,
    pub variant: Option<CatalogueVariant>,
}

/// Repository interface for catalogue records and static membership.
pub trait CatalogueRepository {
    fn create_catalogue(&self, catalogue: &Catalogue) -> RepoResult<CatalogueId>;
    /// Rewrites metadata and, for dynamic catalogues, the predicate.
    /// Static membership is left untouched.
    fn update_catalogue(&self, catalogue: &Catalogue) -> RepoResult<()>;
    fn get_catalogue(&self, id: CatalogueId) -> RepoResult<Catalogue>;
    /// Catalogues ordered by name, then uuid.
    fn list_catalogues(&self, query: &CatalogueQuery) -> RepoResult<Vec<Catalogue>>;
    fn set_catalogue_removed(&self, id: CatalogueId, removed: bool) -> RepoResult<()>;
    fn delete_catalogue(&self, id: CatalogueId) -> RepoResult<()>;
    /// Variant of a stored catalogue.
    fn catalogue_variant(&self, id: CatalogueId) -> RepoResult<CatalogueVariant>;
    /// Static members in insertion order, removed events included.
    fn member_ids(&self, id: CatalogueId) -> RepoResult<Vec<EventId>>;
    /// Adds events not already present; returns how many were added.
    fn add_members(&self, id: CatalogueId, events: &[EventId]) -> RepoResult<usize>;
    /// Removes events that are present; returns how many were removed.
    fn remove_members(&self, id: CatalogueId, events: &[EventId]) -> RepoResult<usize>;
    fn replace_predicate(&self, id: CatalogueId, predicate: &Predicate) -> RepoResult<()>;
    /// Static catalogues that list `event` as a member.
    fn static_catalogues_containing(&self, event: EventId) -> RepoResult<Vec<CatalogueId>>;
}

/// SQLite-backed catalogue repository.
pub struct SqliteCatalogueRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCatalogueRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Fails with `NotFound` or `WrongVariant` unless `id` is a stored
    /// catalogue of variant `expected`.
    pub fn require_variant(&self, id: CatalogueId, expected: CatalogueVariant) -> RepoResult<()> {
        if self.catalogue_variant(id)? != expected {
            return Err(RepoError::WrongVariant {
                catalogue: id,
                expected,
            });
        }
        Ok(())
    }

    fn write_children(&self, catalogue: &Catalogue, uuid: &str) -> RepoResult<()> {
        write_labels(self.conn, CATALOGUE_TAGS, uuid, &catalogue.tags)?;
        write_attributes(self.conn, CATALOGUE_ATTRIBUTES, uuid, &catalogue.attributes)?;
        if let CatalogueKind::Dynamic(predicate) = &catalogue.kind {
            write_predicate_nodes(self.conn, uuid, predicate)?;
        }
        Ok(())
    }

    fn load_catalogue(&self, row: &Row<'_>) -> RepoResult<Catalogue> {
        let uuid_text: String = row.get("uuid")?;
        let uuid = parse_uuid(&uuid_text, "catalogues.uuid")?;
        let kind_text: String = row.get("kind")?;
        let kind = match CatalogueVariant::parse(&kind_text) {
            Some(CatalogueVariant::Static) => CatalogueKind::Static,
            Some(CatalogueVariant::Dynamic) => {
                CatalogueKind::Dynamic(load_predicate(self.conn, &uuid_text)?)
            }
            None => {
                return Err(RepoError::InvalidData(format!(
                    "invalid catalogue kind `{kind_text}` in catalogues.kind"
                )));
            }
        };

        let mut catalogue = Catalogue::with_id(
            uuid,
            row.get::<_, String>("name")?,
            row.get::<_, String>("author")?,
            kind,
        );
        catalogue.is_removed = int_to_bool(row.get("is_removed")?, "catalogues.is_removed")?;
        catalogue.tags = load_labels(self.conn, CATALOGUE_TAGS, &uuid_text)?;
        catalogue.attributes = load_attributes(self.conn, CATALOGUE_ATTRIBUTES, &uuid_text)?;
        catalogue.validate().map_err(|err| {
            RepoError::InvalidData(format!("stored catalogue {uuid} is invalid: {err}"))
        })?;
        Ok(catalogue)
    }

    fn ensure_events_exist(&self, events: &[EventId]) -> RepoResult<()> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT 1 FROM events WHERE uuid = ?1;")?;
        for event in events {
            if !stmt.exists([event.to_string()])? {
                return Err(RepoError::NotFound(EntityRef::Event(*event)));
            }
        }
        Ok(())
    }
}

impl CatalogueRepository for SqliteCatalogueRepository<'_> {
    fn create_catalogue(&self, catalogue: &Catalogue) -> RepoResult<CatalogueId> {
        catalogue.validate()?;
        if let Some(predicate) = catalogue.predicate() {
            predicate.validate()?;
        }
        if lookup_variant(self.conn, catalogue.uuid)?.is_some() {
            return Err(RepoError::AlreadyExists(EntityRef::Catalogue(
                catalogue.uuid,
            )));
        }

        let uuid = catalogue.uuid.to_string();
        atomically(self.conn, || {
            self.conn.execute(
                "INSERT INTO catalogues (
                    uuid,
                    name,
                    author,
                    kind,
                    is_removed,
                    created_at,
                    updated_at
                ) VALUES (
                    ?1, ?2, ?3, ?4, ?5,
                    (strftime('%s', 'now') * 1000),
                    (strftime('%s', 'now') * 1000)
                );",
                params![
                    uuid.as_str(),
                    catalogue.name.as_str(),
                    catalogue.author.as_str(),
                    catalogue.variant().as_str(),
                    bool_to_int(catalogue.is_removed),
                ],
            )?;
            self.write_children(catalogue, &uuid)
        })?;

        Ok(catalogue.uuid)
    }

    fn update_catalogue(&self, catalogue: &Catalogue) -> RepoResult<()> {
        catalogue.validate()?;
        if let Some(predicate) = catalogue.predicate() {
            predicate.validate()?;
        }
        self.require_variant(catalogue.uuid, catalogue.variant())?;

        let uuid = catalogue.uuid.to_string();
        atomically(self.conn, || {
            self.conn.execute(
                "UPDATE catalogues
                 SET
                    name = ?1,
                    author = ?2,
                    is_removed = ?3,
                    updated_at = (strftime('%s', 'now') * 1000)
                 WHERE uuid = ?4;",
                params![
                    catalogue.name.as_str(),
                    catalogue.author.as_str(),
                    bool_to_int(catalogue.is_removed),
                    uuid.as_str(),
                ],
            )?;
            self.write_children(catalogue, &uuid)
        })
    }

    fn get_catalogue(&self, id: CatalogueId) -> RepoResult<Catalogue> {
        let mut stmt = self
            .conn
            .prepare(&format!("{CATALOGUE_SELECT_SQL} WHERE uuid = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        match rows.next()? {
            Some(row) => self.load_catalogue(row),
            None => Err(RepoError::NotFound(EntityRef::Catalogue(id))),
        }
    }

    fn list_catalogues(&self, query: &CatalogueQuery) -> RepoResult<Vec<Catalogue>> {
        let mut sql = format!("{CATALOGUE_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if !query.include_removed {
            sql.push_str(" AND is_removed = 0");
        }

        if let Some(variant) = query.variant {
            sql.push_str(" AND kind = ?");
            bind_values.push(Value::Text(variant.as_str().to_string()));
        }

        sql.push_str(" ORDER BY name ASC, uuid ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut catalogues = Vec::new();
        while let Some(row) = rows.next()? {
            catalogues.push(self.load_catalogue(row)?);
        }

        Ok(catalogues)
    }

    fn set_catalogue_removed(&self, id: CatalogueId, removed: bool) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE catalogues
             SET
                is_removed = ?1,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE uuid = ?2;",
            params![bool_to_int(removed), id.to_string()],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(EntityRef::Catalogue(id)));
        }

        Ok(())
    }

    fn delete_catalogue(&self, id: CatalogueId) -> RepoResult<()> {
        let uuid = id.to_string();
        atomically(self.conn, || {
            self.conn.execute(
                "DELETE FROM catalogue_events WHERE catalogue_uuid = ?1;",
                [uuid.as_str()],
            )?;
            self.conn.execute(
                "DELETE FROM predicate_nodes WHERE catalogue_uuid = ?1;",
                [uuid.as_str()],
            )?;
            let deleted = self
                .conn
                .execute("DELETE FROM catalogues WHERE uuid = ?1;", [uuid.as_str()])?;
            if deleted == 0 {
                return Err(RepoError::NotFound(EntityRef::Catalogue(id)));
            }
            Ok(())
        })
    }

    fn catalogue_variant(&self, id: CatalogueId) -> RepoResult<CatalogueVariant> {
        lookup_variant(self.conn, id)?.ok_or(RepoError::NotFound(EntityRef::Catalogue(id)))
    }

    fn member_ids(&self, id: CatalogueId) -> RepoResult<Vec<EventId>> {
        self.require_variant(id, CatalogueVariant::Static)?;

        let mut stmt = self.conn.prepare(
            "SELECT event_uuid
             FROM catalogue_events
             WHERE catalogue_uuid = ?1
             ORDER BY position ASC, event_uuid ASC;",
        )?;
        let raw = stmt
            .query_map([id.to_string()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        raw.iter()
            .map(|value| parse_uuid(value, "catalogue_events.event_uuid"))
            .collect()
    }

    fn add_members(&self, id: CatalogueId, events: &[EventId]) -> RepoResult<usize> {
        self.require_variant(id, CatalogueVariant::Static)?;
        self.ensure_events_exist(events)?;

        let uuid = id.to_string();
        atomically(self.conn, || {
            let mut position: i64 = self.conn.query_row(
                "SELECT COALESCE(MAX(position), -1) + 1
                 FROM catalogue_events
                 WHERE catalogue_uuid = ?1;",
                [uuid.as_str()],
                |row| row.get(0),
            )?;

            let mut stmt = self.conn.prepare_cached(
                "INSERT OR IGNORE INTO catalogue_events (catalogue_uuid, event_uuid, position)
                 VALUES (?1, ?2, ?3);",
            )?;
            let mut added = 0;
            for event in events {
                if stmt.execute(params![uuid.as_str(), event.to_string(), position])? > 0 {
                    added += 1;
                    position += 1;
                }
            }
            Ok(added)
        })
    }

    fn remove_members(&self, id: CatalogueId, events: &[EventId]) -> RepoResult<usize> {
        self.require_variant(id, CatalogueVariant::Static)?;

        let uuid = id.to_string();
        atomically(self.conn, || {
            let mut stmt = self.conn.prepare_cached(
                "DELETE FROM catalogue_events WHERE catalogue_uuid = ?1 AND event_uuid = ?2;",
            )?;
            let mut removed = 0;
            for event in events {
                removed += stmt.execute(params![uuid.as_str(), event.to_string()])?;
            }
            Ok(removed)
        })
    }

    fn replace_predicate(&self, id: CatalogueId, predicate: &Predicate) -> RepoResult<()> {
        predicate.validate()?;
        self.require_variant(id, CatalogueVariant::Dynamic)?;

        let uuid = id.to_string();
        atomically(self.conn, || {
            write_predicate_nodes(self.conn, &uuid, predicate)?;
            self.conn.execute(
                "UPDATE catalogues
                 SET updated_at = (strftime('%s', 'now') * 1000)
                 WHERE uuid = ?1;",
                [uuid.as_str()],
            )?;
            Ok(())
        })
    }

    fn static_catalogues_containing(&self, event: EventId) -> RepoResult<Vec<CatalogueId>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.uuid
             FROM catalogue_events ce
             JOIN catalogues c ON c.uuid = ce.catalogue_uuid
             WHERE ce.event_uuid = ?1
               AND c.is_removed = 0
             ORDER BY c.name ASC, c.uuid ASC;",
        )?;
        let raw = stmt
            .query_map([event.to_string()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        raw.iter()
            .map(|value| parse_uuid(value, "catalogues.uuid"))
            .collect()
    }
}

fn lookup_variant(conn: &Connection, id: CatalogueId) -> RepoResult<Option<CatalogueVariant>> {
    let kind = conn
        .query_row(
            "SELECT kind FROM catalogues WHERE uuid = ?1;",
            [id.to_string()],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    match kind {
        Some(text) => CatalogueVariant::parse(&text).map(Some).ok_or_else(|| {
            RepoError::InvalidData(format!("invalid catalogue kind `{text}` in catalogues.kind"))
        }),
        None => Ok(None),
    }
}

fn write_predicate_nodes(conn: &Connection, catalogue: &str, predicate: &Predicate) -> RepoResult<()> {
    let nodes = predicate.to_nodes()?;
    conn.execute(
        "DELETE FROM predicate_nodes WHERE catalogue_uuid = ?1;",
        [catalogue],
    )?;

    let mut stmt = conn.prepare_cached(
        "INSERT INTO predicate_nodes (
            catalogue_uuid,
            node_index,
            parent_index,
            position,
            kind,
            params
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
    )?;
    for node in &nodes {
        stmt.execute(params![
            catalogue,
            node.index,
            node.parent,
            node.position,
            node.kind.as_str(),
            node.params.to_string(),
        ])?;
    }
    Ok(())
}

fn load_predicate(conn: &Connection, catalogue: &str) -> RepoResult<Predicate> {
    let mut stmt = conn.prepare_cached(
        "SELECT node_index, parent_index, position, kind, params
         FROM predicate_nodes
         WHERE catalogue_uuid = ?1
         ORDER BY node_index ASC;",
    )?;
    let mut rows = stmt.query([catalogue])?;
    let mut nodes = Vec::new();
    while let Some(row) = rows.next()? {
        nodes.push(parse_node_row(row)?);
    }

    Predicate::from_nodes(&nodes).map_err(|err| {
        RepoError::InvalidData(format!(
            "stored predicate of catalogue {catalogue} is invalid: {err}"
        ))
    })
}

fn parse_node_row(row: &Row<'_>) -> RepoResult<PredicateNode> {
    let kind_text: String = row.get("kind")?;
    let kind = NodeKind::parse(&kind_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid node kind `{kind_text}` in predicate_nodes.kind"
        ))
    })?;
    let params_text: String = row.get("params")?;
    let params = serde_json::from_str(&params_text).map_err(|err| {
        RepoError::InvalidData(format!("invalid params in predicate_nodes.params: {err}"))
    })?;

    Ok(PredicateNode {
        index: row.get("node_index")?,
        parent: row.get("parent_index")?,
        position: row.get("position")?,
        kind,
        params,
    })
}
