//! Catalogue Façade.
//!
//! # Responsibility
//! - Own the store connection and the membership cache.
//! - Hand out units of work (`Session`) and serve snapshot reads.
//! - Offer single-operation conveniences that commit immediately.
//!
//! # Invariants
//! - Every snapshot read sees one committed store version; dynamic
//!   membership is cached against exactly that version.
//! - A failed `transact` closure commits nothing.

use crate::config::StoreConfig;
use crate::db::{open_db_in_memory_with_config, open_db_with_config};
use crate::eval::MembershipCache;
use crate::model::catalogue::{Catalogue, CatalogueId};
use crate::model::event::{Event, EventId};
use crate::model::predicate::Predicate;
use crate::repo::catalogue_repo::{CatalogueQuery, CatalogueRepository, SqliteCatalogueRepository};
use crate::repo::error::RepoResult;
use crate::repo::event_repo::{EventQuery, EventRepository, SqliteEventRepository};
use crate::repo::meta_repo::current_store_version;
use crate::service::membership::{self, CacheScope};
use crate::service::session::Session;
use crate::transfer::{self, ExportDocument, ImportSummary};
use log::warn;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;

/// Entry point for catalogue and event operations on one store.
pub struct CatalogueService {
    conn: Connection,
    cache: MembershipCache,
}

impl CatalogueService {
    /// Wraps an already migrated connection.
    pub fn new(conn: Connection, config: &StoreConfig) -> Self {
        Self {
            conn,
            cache: MembershipCache::new(config.membership_cache),
        }
    }

    pub fn open(path: impl AsRef<Path>, config: &StoreConfig) -> RepoResult<Self> {
        let conn = open_db_with_config(path, config)?;
        Ok(Self::new(conn, config))
    }

    pub fn open_in_memory() -> RepoResult<Self> {
        let config = StoreConfig::default();
        let conn = open_db_in_memory_with_config(&config)?;
        Ok(Self::new(conn, &config))
    }

    pub fn cache(&self) -> &MembershipCache {
        &self.cache
    }

    /// Latest committed store version.
    pub fn store_version(&self) -> RepoResult<u64> {
        current_store_version(&self.conn)
    }

    /// Starts a unit of work.
    ///
    /// # Errors
    /// - `Conflict(Busy)` when another writer holds the store past the
    ///   configured busy timeout.
    pub fn begin(&mut self) -> RepoResult<Session<'_>> {
        Session::begin(&self.conn, &self.cache, None)
    }

    /// Starts a unit of work that requires the store to still be at
    /// `expected_version`.
    ///
    /// # Errors
    /// - `Conflict(StaleVersion)` when another commit landed in between.
    pub fn begin_at(&mut self, expected_version: u64) -> RepoResult<Session<'_>> {
        Session::begin(&self.conn, &self.cache, Some(expected_version))
    }

    /// Runs `work` in a fresh session; saves on `Ok`, discards on `Err`.
    pub fn transact<T>(
        &mut self,
        work: impl FnOnce(&mut Session<'_>) -> RepoResult<T>,
    ) -> RepoResult<T> {
        let mut session = self.begin()?;
        match work(&mut session) {
            Ok(value) => {
                session.save()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = session.discard() {
                    warn!(
                        "event=session_discard module=service status=error error={rollback_err}"
                    );
                }
                Err(err)
            }
        }
    }

    fn snapshot<T>(&self, read: impl FnOnce(&Connection) -> RepoResult<T>) -> RepoResult<T> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Deferred)?;
        let value = read(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Current members of a catalogue.
    ///
    /// Dynamic membership is memoized per store version when the cache is
    /// enabled.
    pub fn events_of(&self, catalogue: CatalogueId) -> RepoResult<Vec<Event>> {
        self.snapshot(|conn| {
            let store_version = current_store_version(conn)?;
            let scope = CacheScope {
                cache: &self.cache,
                store_version,
            };
            membership::events_of(conn, catalogue, Some(scope))
        })
    }

    pub fn catalogues_of(&self, event: EventId) -> RepoResult<Vec<Catalogue>> {
        self.snapshot(|conn| membership::catalogues_of(conn, event))
    }

    /// Active events matching an ad-hoc predicate, without a catalogue.
    ///
    /// Results are not cached.
    pub fn events_matching(&self, predicate: &Predicate) -> RepoResult<Vec<Event>> {
        self.snapshot(|conn| membership::events_matching(conn, predicate))
    }

    pub fn get_event(&self, id: EventId) -> RepoResult<Event> {
        self.snapshot(|conn| SqliteEventRepository::new(conn).get_event(id))
    }

    pub fn query_events(&self, query: &EventQuery) -> RepoResult<Vec<Event>> {
        self.snapshot(|conn| SqliteEventRepository::new(conn).query_events(query))
    }

    pub fn get_catalogue(&self, id: CatalogueId) -> RepoResult<Catalogue> {
        self.snapshot(|conn| SqliteCatalogueRepository::new(conn).get_catalogue(id))
    }

    pub fn list_catalogues(&self, query: &CatalogueQuery) -> RepoResult<Vec<Catalogue>> {
        self.snapshot(|conn| SqliteCatalogueRepository::new(conn).list_catalogues(query))
    }

    pub fn create_event(&mut self, event: &Event) -> RepoResult<EventId> {
        self.transact(|session| session.create_event(event))
    }

    pub fn update_event(&mut self, event: &Event) -> RepoResult<()> {
        self.transact(|session| session.update_event(event))
    }

    pub fn remove_event(&mut self, id: EventId) -> RepoResult<()> {
        self.transact(|session| session.remove_event(id))
    }

    pub fn restore_event(&mut self, id: EventId) -> RepoResult<()> {
        self.transact(|session| session.restore_event(id))
    }

    pub fn delete_event(&mut self, id: EventId) -> RepoResult<usize> {
        self.transact(|session| session.delete_event(id))
    }

    pub fn create_catalogue(&mut self, catalogue: &Catalogue) -> RepoResult<CatalogueId> {
        self.transact(|session| session.create_catalogue(catalogue))
    }

    pub fn update_catalogue(&mut self, catalogue: &Catalogue) -> RepoResult<()> {
        self.transact(|session| session.update_catalogue(catalogue))
    }

    pub fn remove_catalogue(&mut self, id: CatalogueId) -> RepoResult<()> {
        self.transact(|session| session.remove_catalogue(id))
    }

    pub fn restore_catalogue(&mut self, id: CatalogueId) -> RepoResult<()> {
        self.transact(|session| session.restore_catalogue(id))
    }

    pub fn delete_catalogue(&mut self, id: CatalogueId) -> RepoResult<()> {
        self.transact(|session| session.delete_catalogue(id))
    }

    pub fn add_events(&mut self, catalogue: CatalogueId, events: &[EventId]) -> RepoResult<usize> {
        self.transact(|session| session.add_events(catalogue, events))
    }

    pub fn remove_events(
        &mut self,
        catalogue: CatalogueId,
        events: &[EventId],
    ) -> RepoResult<usize> {
        self.transact(|session| session.remove_events(catalogue, events))
    }

    pub fn set_predicate(&mut self, catalogue: CatalogueId, predicate: &Predicate) -> RepoResult<()> {
        self.transact(|session| session.set_predicate(catalogue, predicate))
    }

    /// Builds an export document for `catalogues` from one snapshot.
    pub fn export(&self, catalogues: &[CatalogueId]) -> RepoResult<ExportDocument> {
        self.snapshot(|conn| transfer::export_document(conn, catalogues))
    }

    pub fn export_json(&self, catalogues: &[CatalogueId]) -> RepoResult<String> {
        transfer::to_json(&self.export(catalogues)?)
    }

    /// Imports a document in one unit of work; nothing is written on error.
    pub fn import(&mut self, document: &ExportDocument) -> RepoResult<ImportSummary> {
        self.transact(|session| transfer::import_document(session, document))
    }

    pub fn import_json(&mut self, json: &str) -> RepoResult<ImportSummary> {
        let document = transfer::from_json(json)?;
        self.import(&document)
    }
}
