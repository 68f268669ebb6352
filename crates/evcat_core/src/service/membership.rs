//! Membership reads shared by sessions and snapshot queries.

use crate::eval::{compile, evaluate_membership, MembershipCache};
use crate::model::catalogue::{Catalogue, CatalogueId, CatalogueKind, CatalogueVariant};
use crate::model::event::{Event, EventId};
use crate::model::predicate::Predicate;
use crate::repo::catalogue_repo::{CatalogueQuery, CatalogueRepository, SqliteCatalogueRepository};
use crate::repo::error::RepoResult;
use crate::repo::event_repo::{EventQuery, EventRepository, SqliteEventRepository};
use rusqlite::Connection;

/// Cache handle valid for one store version.
pub(crate) struct CacheScope<'c> {
    pub cache: &'c MembershipCache,
    pub store_version: u64,
}

/// Active events of a catalogue.
///
/// Static members come back ordered by `start, stop, uuid`; dynamic members
/// in the same order, as evaluated against the current population.
pub(crate) fn events_of(
    conn: &Connection,
    id: CatalogueId,
    cache: Option<CacheScope<'_>>,
) -> RepoResult<Vec<Event>> {
    let catalogues = SqliteCatalogueRepository::new(conn);
    let events = SqliteEventRepository::new(conn);

    match catalogues.get_catalogue(id)?.kind {
        CatalogueKind::Static => events.query_events(&EventQuery::in_catalogue(id)),
        CatalogueKind::Dynamic(predicate) => {
            if let Some(scope) = &cache {
                if let Some(members) = scope.cache.get(id, scope.store_version, &predicate) {
                    return Ok(members);
                }
            }

            let compiled = compile(&predicate)?;
            let members = evaluate_membership(&events, &compiled)?;
            if let Some(scope) = cache {
                scope
                    .cache
                    .insert(id, scope.store_version, predicate, members.clone());
            }
            Ok(members)
        }
    }
}

/// Active events matching an ad-hoc predicate, ordered by `start, stop, uuid`.
///
/// # Errors
/// - `MalformedPredicate` when `predicate` fails validation; nothing is
///   scanned then.
pub(crate) fn events_matching(conn: &Connection, predicate: &Predicate) -> RepoResult<Vec<Event>> {
    let compiled = compile(predicate)?;
    evaluate_membership(&SqliteEventRepository::new(conn), &compiled)
}

/// Active catalogues whose membership currently includes `event`.
///
/// Static catalogues come first, then dynamic ones, each ordered by name.
/// A soft-removed event belongs to no catalogue.
pub(crate) fn catalogues_of(conn: &Connection, event: EventId) -> RepoResult<Vec<Catalogue>> {
    let catalogues = SqliteCatalogueRepository::new(conn);
    let stored = SqliteEventRepository::new(conn).get_event(event)?;
    if !stored.is_active() {
        return Ok(Vec::new());
    }

    let mut found = catalogues
        .static_catalogues_containing(event)?
        .into_iter()
        .map(|id| catalogues.get_catalogue(id))
        .collect::<RepoResult<Vec<_>>>()?;

    let dynamic = catalogues.list_catalogues(&CatalogueQuery {
        include_removed: false,
        variant: Some(CatalogueVariant::Dynamic),
    })?;
    for catalogue in dynamic {
        let matched = match catalogue.predicate() {
            Some(predicate) => compile(predicate)?.matches(&stored),
            None => false,
        };
        if matched {
            found.push(catalogue);
        }
    }

    Ok(found)
}
