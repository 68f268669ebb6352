//! Explicit unit of work over the catalogue store.
//!
//! # Responsibility
//! - Group event and catalogue mutations into one all-or-nothing commit.
//! - Serve reads that observe the session's own uncommitted writes.
//!
//! # Invariants
//! - A session holds the store's single write lock from `begin` until
//!   `save` or `discard`.
//! - Each operation is atomic; a failed operation leaves earlier pending
//!   work intact and adds nothing.
//! - `save` advances the store version by one iff something is pending.
//! - Dropping a session without `save` rolls everything back.

use crate::eval::MembershipCache;
use crate::model::catalogue::{Catalogue, CatalogueId, CatalogueVariant};
use crate::model::event::{Event, EventId};
use crate::model::predicate::Predicate;
use crate::repo::catalogue_repo::{CatalogueQuery, CatalogueRepository, SqliteCatalogueRepository};
use crate::repo::error::{ConflictReason, RepoError, RepoResult};
use crate::repo::event_repo::{EventQuery, EventRepository, SqliteEventRepository};
use crate::repo::meta_repo::{bump_store_version, current_store_version};
use crate::service::membership;
use log::{debug, info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::time::Instant;

/// Open unit of work. Obtain one from `CatalogueService::begin`.
#[derive(Debug)]
pub struct Session<'s> {
    tx: Transaction<'s>,
    cache: &'s MembershipCache,
    base_version: u64,
    pending: usize,
    started_at: Instant,
}

impl<'s> Session<'s> {
    /// Takes the write lock and, when `expected_version` is given, checks
    /// that nobody committed since the caller last looked.
    pub(crate) fn begin(
        conn: &'s Connection,
        cache: &'s MembershipCache,
        expected_version: Option<u64>,
    ) -> RepoResult<Self> {
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate).map_err(
            |err| {
                let err = RepoError::from(err);
                warn!("event=session_begin module=service status=error error={err}");
                err
            },
        )?;
        let base_version = current_store_version(&tx)?;

        if let Some(expected) = expected_version {
            if expected != base_version {
                warn!(
                    "event=session_begin module=service status=error error_code=stale_version expected={expected} actual={base_version}"
                );
                return Err(RepoError::Conflict(ConflictReason::StaleVersion {
                    expected,
                    actual: base_version,
                }));
            }
        }

        debug!("event=session_begin module=service status=ok version={base_version}");
        Ok(Self {
            tx,
            cache,
            base_version,
            pending: 0,
            started_at: Instant::now(),
        })
    }

    /// Store version this session started from.
    pub fn base_version(&self) -> u64 {
        self.base_version
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.pending > 0
    }

    fn events(&self) -> SqliteEventRepository<'_> {
        SqliteEventRepository::new(&self.tx)
    }

    fn catalogues(&self) -> SqliteCatalogueRepository<'_> {
        SqliteCatalogueRepository::new(&self.tx)
    }

    fn track<T>(&mut self, result: RepoResult<T>) -> RepoResult<T> {
        if result.is_ok() {
            self.pending += 1;
        }
        result
    }

    pub fn create_event(&mut self, event: &Event) -> RepoResult<EventId> {
        let result = self.events().create_event(event);
        self.track(result)
    }

    pub fn update_event(&mut self, event: &Event) -> RepoResult<()> {
        let result = self.events().update_event(event);
        self.track(result)
    }

    pub fn get_event(&self, id: EventId) -> RepoResult<Event> {
        self.events().get_event(id)
    }

    pub fn query_events(&self, query: &EventQuery) -> RepoResult<Vec<Event>> {
        self.events().query_events(query)
    }

    /// Moves an event to the trash; it disappears from every catalogue.
    pub fn remove_event(&mut self, id: EventId) -> RepoResult<()> {
        let result = self.events().set_event_removed(id, true);
        self.track(result)
    }

    pub fn restore_event(&mut self, id: EventId) -> RepoResult<()> {
        let result = self.events().set_event_removed(id, false);
        self.track(result)
    }

    /// Deletes an event permanently, detaching it from every static
    /// catalogue. Returns the number of detached memberships.
    pub fn delete_event(&mut self, id: EventId) -> RepoResult<usize> {
        let result = self.events().delete_event(id);
        self.track(result)
    }

    pub fn create_catalogue(&mut self, catalogue: &Catalogue) -> RepoResult<CatalogueId> {
        let result = self.catalogues().create_catalogue(catalogue);
        self.track(result)
    }

    pub fn update_catalogue(&mut self, catalogue: &Catalogue) -> RepoResult<()> {
        let result = self.catalogues().update_catalogue(catalogue);
        self.track(result)
    }

    pub fn get_catalogue(&self, id: CatalogueId) -> RepoResult<Catalogue> {
        self.catalogues().get_catalogue(id)
    }

    pub fn list_catalogues(&self, query: &CatalogueQuery) -> RepoResult<Vec<Catalogue>> {
        self.catalogues().list_catalogues(query)
    }

    pub fn remove_catalogue(&mut self, id: CatalogueId) -> RepoResult<()> {
        let result = self.catalogues().set_catalogue_removed(id, true);
        self.track(result)
    }

    pub fn restore_catalogue(&mut self, id: CatalogueId) -> RepoResult<()> {
        let result = self.catalogues().set_catalogue_removed(id, false);
        self.track(result)
    }

    pub fn delete_catalogue(&mut self, id: CatalogueId) -> RepoResult<()> {
        let result = self.catalogues().delete_catalogue(id);
        self.track(result)
    }

    /// Adds events to a static catalogue. Already-present events are
    /// skipped; returns how many were added.
    ///
    /// # Errors
    /// - `WrongVariant` when `catalogue` is dynamic.
    /// - `NotFound` when the catalogue or any event is unknown.
    pub fn add_events(&mut self, catalogue: CatalogueId, events: &[EventId]) -> RepoResult<usize> {
        let added = self.catalogues().add_members(catalogue, events)?;
        if added > 0 {
            self.pending += 1;
        }
        Ok(added)
    }

    /// Removes events from a static catalogue. Absent events are skipped;
    /// returns how many were removed.
    pub fn remove_events(
        &mut self,
        catalogue: CatalogueId,
        events: &[EventId],
    ) -> RepoResult<usize> {
        let removed = self.catalogues().remove_members(catalogue, events)?;
        if removed > 0 {
            self.pending += 1;
        }
        Ok(removed)
    }

    /// Replaces the predicate of a dynamic catalogue wholesale.
    ///
    /// # Errors
    /// - `MalformedPredicate` before anything is written.
    /// - `WrongVariant` when `catalogue` is static.
    pub fn set_predicate(&mut self, catalogue: CatalogueId, predicate: &Predicate) -> RepoResult<()> {
        let result = self.catalogues().replace_predicate(catalogue, predicate);
        if result.is_ok() {
            self.cache.invalidate(catalogue);
        }
        self.track(result)
    }

    pub fn catalogue_variant(&self, catalogue: CatalogueId) -> RepoResult<CatalogueVariant> {
        self.catalogues().catalogue_variant(catalogue)
    }

    /// Static members in insertion order, soft-removed events included.
    pub fn member_ids(&self, catalogue: CatalogueId) -> RepoResult<Vec<EventId>> {
        self.catalogues().member_ids(catalogue)
    }

    /// Members as seen by this session, including its unsaved writes.
    pub fn events_of(&self, catalogue: CatalogueId) -> RepoResult<Vec<Event>> {
        membership::events_of(&self.tx, catalogue, None)
    }

    pub fn catalogues_of(&self, event: EventId) -> RepoResult<Vec<Catalogue>> {
        membership::catalogues_of(&self.tx, event)
    }

    /// Events matching `predicate` as seen by this session.
    pub fn events_matching(&self, predicate: &Predicate) -> RepoResult<Vec<Event>> {
        membership::events_matching(&self.tx, predicate)
    }

    /// Commits all pending work atomically and returns the resulting store
    /// version.
    ///
    /// # Errors
    /// - `Conflict(Busy)` when the commit cannot take the lock; nothing is
    ///   committed then.
    pub fn save(self) -> RepoResult<u64> {
        let version = if self.pending > 0 {
            bump_store_version(&self.tx)?
        } else {
            self.base_version
        };

        self.tx.commit().map_err(|err| {
            let err = RepoError::from(err);
            warn!("event=session_save module=service status=error error={err}");
            err
        })?;
        self.cache.prune_before(version);

        info!(
            "event=session_save module=service status=ok mutations={} version={} duration_ms={}",
            self.pending,
            version,
            self.started_at.elapsed().as_millis()
        );
        Ok(version)
    }

    /// Drops all pending work.
    pub fn discard(self) -> RepoResult<()> {
        let pending = self.pending;
        self.tx.rollback()?;
        debug!("event=session_discard module=service status=ok mutations={pending}");
        Ok(())
    }
}
