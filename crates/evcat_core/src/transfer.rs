//! JSON export and import of catalogues with their events.
//!
//! # Responsibility
//! - Serialize catalogues (predicates as node records, static members as
//!   ids) together with every event they reference.
//! - Import such documents without clobbering existing records.
//!
//! # Invariants
//! - Import is all-or-nothing: it runs inside one session.
//! - A record identical to the stored one is skipped; a differing record
//!   with the same id rejects the whole import.

use crate::model::catalogue::{Catalogue, CatalogueId, CatalogueKind, CatalogueVariant};
use crate::model::event::{Event, EventId};
use crate::model::predicate::{Predicate, PredicateNode};
use crate::model::value::Attributes;
use crate::repo::catalogue_repo::{CatalogueRepository, SqliteCatalogueRepository};
use crate::repo::error::{RepoError, RepoResult};
use crate::repo::event_repo::{EventQuery, EventRepository, SqliteEventRepository};
use crate::service::membership;
use crate::service::session::Session;
use log::info;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Document layout version written by `export_document`.
pub const EXPORT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub format_version: u32,
    pub catalogues: Vec<CatalogueRecord>,
    pub events: Vec<Event>,
}

/// Flat catalogue record as it appears in an export document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogueRecord {
    pub uuid: CatalogueId,
    pub name: String,
    pub author: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub attributes: Attributes,
    pub variant: CatalogueVariant,
    /// Node records of a dynamic catalogue's predicate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<Vec<PredicateNode>>,
    /// Members of a static catalogue.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EventId>,
    #[serde(default)]
    pub is_removed: bool,
}

impl CatalogueRecord {
    fn from_catalogue(catalogue: &Catalogue, events: Vec<EventId>) -> RepoResult<Self> {
        let predicate = match catalogue.predicate() {
            Some(predicate) => Some(predicate.to_nodes()?),
            None => None,
        };
        Ok(Self {
            uuid: catalogue.uuid,
            name: catalogue.name.clone(),
            author: catalogue.author.clone(),
            tags: catalogue.tags.clone(),
            attributes: catalogue.attributes.clone(),
            variant: catalogue.variant(),
            predicate,
            events,
            is_removed: catalogue.is_removed,
        })
    }

    fn to_catalogue(&self) -> RepoResult<Catalogue> {
        let kind = match (self.variant, &self.predicate) {
            (CatalogueVariant::Static, None) => CatalogueKind::Static,
            (CatalogueVariant::Dynamic, Some(nodes)) if self.events.is_empty() => {
                CatalogueKind::Dynamic(Predicate::from_nodes(nodes)?)
            }
            (CatalogueVariant::Dynamic, Some(_)) => {
                return Err(RepoError::Import(format!(
                    "dynamic catalogue {} lists explicit events",
                    self.uuid
                )));
            }
            (CatalogueVariant::Dynamic, None) => {
                return Err(RepoError::Import(format!(
                    "dynamic catalogue {} has no predicate",
                    self.uuid
                )));
            }
            (CatalogueVariant::Static, Some(_)) => {
                return Err(RepoError::Import(format!(
                    "static catalogue {} carries a predicate",
                    self.uuid
                )));
            }
        };

        let mut catalogue = Catalogue::with_id(self.uuid, &self.name, &self.author, kind);
        catalogue.tags = self.tags.clone();
        catalogue.attributes = self.attributes.clone();
        catalogue.is_removed = self.is_removed;
        Ok(catalogue)
    }
}

/// Outcome counters of an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub events_created: usize,
    pub events_skipped: usize,
    pub catalogues_created: usize,
    pub catalogues_skipped: usize,
}

/// Collects `catalogues` and the events they reference.
///
/// Static catalogues export their member ids, soft-removed members
/// included. Dynamic catalogues export their predicate plus the events
/// currently matching it.
pub fn export_document(conn: &Connection, catalogues: &[CatalogueId]) -> RepoResult<ExportDocument> {
    let catalogue_repo = SqliteCatalogueRepository::new(conn);
    let event_repo = SqliteEventRepository::new(conn);

    let mut records = Vec::with_capacity(catalogues.len());
    let mut events: BTreeMap<EventId, Event> = BTreeMap::new();
    for id in catalogues {
        let catalogue = catalogue_repo.get_catalogue(*id)?;
        let members = match &catalogue.kind {
            CatalogueKind::Static => {
                let ids = catalogue_repo.member_ids(*id)?;
                let query = EventQuery::in_catalogue(*id).including_removed();
                for event in event_repo.query_events(&query)? {
                    events.insert(event.uuid, event);
                }
                ids
            }
            CatalogueKind::Dynamic(_) => {
                for event in membership::events_of(conn, *id, None)? {
                    events.insert(event.uuid, event);
                }
                Vec::new()
            }
        };
        records.push(CatalogueRecord::from_catalogue(&catalogue, members)?);
    }

    let mut events: Vec<Event> = events.into_values().collect();
    events.sort_by_key(|event| (event.start, event.stop, event.uuid));

    info!(
        "event=export module=transfer status=ok catalogues={} events={}",
        records.len(),
        events.len()
    );
    Ok(ExportDocument {
        format_version: EXPORT_FORMAT_VERSION,
        catalogues: records,
        events,
    })
}

/// Applies `document` through `session`.
///
/// Events are imported before catalogues so static members resolve.
pub fn import_document(
    session: &mut Session<'_>,
    document: &ExportDocument,
) -> RepoResult<ImportSummary> {
    if document.format_version != EXPORT_FORMAT_VERSION {
        return Err(RepoError::Import(format!(
            "unsupported format version {}",
            document.format_version
        )));
    }

    let mut summary = ImportSummary::default();

    for event in &document.events {
        match session.get_event(event.uuid) {
            Ok(existing) if existing == *event => summary.events_skipped += 1,
            Ok(_) => {
                return Err(RepoError::Import(format!(
                    "event {} differs from the stored record",
                    event.uuid
                )));
            }
            Err(RepoError::NotFound(_)) => {
                session.create_event(event)?;
                summary.events_created += 1;
            }
            Err(err) => return Err(err),
        }
    }

    for record in &document.catalogues {
        let catalogue = record.to_catalogue()?;
        match session.get_catalogue(record.uuid) {
            Ok(existing) => {
                if existing != catalogue || !same_members(session, record)? {
                    return Err(RepoError::Import(format!(
                        "catalogue {} differs from the stored record",
                        record.uuid
                    )));
                }
                summary.catalogues_skipped += 1;
            }
            Err(RepoError::NotFound(_)) => {
                session.create_catalogue(&catalogue)?;
                if !record.events.is_empty() {
                    session.add_events(record.uuid, &record.events)?;
                }
                summary.catalogues_created += 1;
            }
            Err(err) => return Err(err),
        }
    }

    info!(
        "event=import module=transfer status=ok events_created={} events_skipped={} catalogues_created={} catalogues_skipped={}",
        summary.events_created,
        summary.events_skipped,
        summary.catalogues_created,
        summary.catalogues_skipped
    );
    Ok(summary)
}

fn same_members(session: &Session<'_>, record: &CatalogueRecord) -> RepoResult<bool> {
    if record.variant == CatalogueVariant::Dynamic {
        return Ok(true);
    }
    let stored: BTreeSet<EventId> = session.member_ids(record.uuid)?.into_iter().collect();
    let incoming: BTreeSet<EventId> = record.events.iter().copied().collect();
    Ok(stored == incoming)
}

pub fn to_json(document: &ExportDocument) -> RepoResult<String> {
    serde_json::to_string_pretty(document)
        .map_err(|err| RepoError::InvalidData(format!("cannot serialize export document: {err}")))
}

pub fn from_json(json: &str) -> RepoResult<ExportDocument> {
    serde_json::from_str(json)
        .map_err(|err| RepoError::Import(format!("invalid export document: {err}")))
}
