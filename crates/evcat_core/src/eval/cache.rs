//! Dynamic-catalogue membership memoization.
//!
//! # Responsibility
//! - Remember the evaluated members of a dynamic catalogue for one store
//!   version.
//!
//! # Invariants
//! - A hit requires both the same store version and a structurally equal
//!   predicate; anything else is a miss.
//! - Entries for versions older than the newest inserted one are dropped.

use crate::model::catalogue::CatalogueId;
use crate::model::event::Event;
use crate::model::predicate::Predicate;
use log::trace;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug)]
struct CacheEntry {
    store_version: u64,
    predicate: Predicate,
    members: Vec<Event>,
}

/// Membership cache keyed by catalogue, validated by store version and
/// predicate.
#[derive(Debug)]
pub struct MembershipCache {
    enabled: bool,
    entries: Mutex<HashMap<CatalogueId, CacheEntry>>,
}

impl Default for MembershipCache {
    fn default() -> Self {
        Self::new(true)
    }
}

impl MembershipCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Cached members of `catalogue` evaluated at `store_version` with
    /// `predicate`.
    pub fn get(
        &self,
        catalogue: CatalogueId,
        store_version: u64,
        predicate: &Predicate,
    ) -> Option<Vec<Event>> {
        if !self.enabled {
            return None;
        }
        let entries = self.entries.lock();
        let entry = entries.get(&catalogue)?;
        if entry.store_version != store_version || &entry.predicate != predicate {
            return None;
        }
        trace!("event=membership_cache module=eval status=hit version={store_version}");
        Some(entry.members.clone())
    }

    pub fn insert(
        &self,
        catalogue: CatalogueId,
        store_version: u64,
        predicate: Predicate,
        members: Vec<Event>,
    ) {
        if !self.enabled {
            return;
        }
        let mut entries = self.entries.lock();
        if entries
            .values()
            .any(|entry| entry.store_version > store_version)
        {
            return;
        }
        entries.retain(|_, entry| entry.store_version == store_version);
        entries.insert(
            catalogue,
            CacheEntry {
                store_version,
                predicate,
                members,
            },
        );
    }

    pub fn invalidate(&self, catalogue: CatalogueId) {
        self.entries.lock().remove(&catalogue);
    }

    /// Drops every entry computed before `store_version`.
    pub fn prune_before(&self, store_version: u64) {
        self.entries.lock()
            .retain(|_, entry| entry.store_version >= store_version);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::MembershipCache;
    use crate::model::event::Event;
    use crate::model::predicate::Predicate;
    use uuid::Uuid;

    #[test]
    fn hit_requires_same_version_and_predicate() {
        let cache = MembershipCache::new(true);
        let id = Uuid::new_v4();
        let members = vec![Event::new(0, 1, "a")];
        cache.insert(id, 3, Predicate::tag_in(["x"]), members.clone());

        assert_eq!(cache.get(id, 3, &Predicate::tag_in(["x"])), Some(members));
        assert_eq!(cache.get(id, 4, &Predicate::tag_in(["x"])), None);
        assert_eq!(cache.get(id, 3, &Predicate::tag_in(["y"])), None);
    }

    #[test]
    fn newer_version_evicts_older_entries() {
        let cache = MembershipCache::new(true);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        cache.insert(first, 1, Predicate::And(Vec::new()), Vec::new());
        cache.insert(second, 2, Predicate::And(Vec::new()), Vec::new());

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(first, 1, &Predicate::And(Vec::new())), None);
    }

    #[test]
    fn older_version_never_replaces_newer_entries() {
        let cache = MembershipCache::new(true);
        let id = Uuid::new_v4();
        cache.insert(id, 5, Predicate::And(Vec::new()), Vec::new());
        cache.insert(id, 4, Predicate::And(Vec::new()), vec![Event::new(0, 1, "a")]);

        assert_eq!(cache.get(id, 5, &Predicate::And(Vec::new())), Some(Vec::new()));
    }

    #[test]
    fn disabled_cache_never_hits() {
        let cache = MembershipCache::new(false);
        let id = Uuid::new_v4();
        cache.insert(id, 1, Predicate::And(Vec::new()), Vec::new());
        assert!(cache.is_empty());
        assert_eq!(cache.get(id, 1, &Predicate::And(Vec::new())), None);
    }

    #[test]
    fn invalidate_and_prune_drop_entries() {
        let cache = MembershipCache::new(true);
        let id = Uuid::new_v4();
        cache.insert(id, 1, Predicate::And(Vec::new()), Vec::new());
        cache.invalidate(id);
        assert!(cache.is_empty());

        cache.insert(id, 1, Predicate::And(Vec::new()), Vec::new());
        cache.prune_before(2);
        assert!(cache.is_empty());
    }
}
