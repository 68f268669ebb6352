//! Store-version counter.
//!
//! # Invariants
//! - The version only grows; every committed unit of work with at least one
//!   mutation advances it by exactly one.

use crate::repo::error::{RepoError, RepoResult};
use rusqlite::Connection;

/// Reads the committed (or in-transaction) store version.
pub fn current_store_version(conn: &Connection) -> RepoResult<u64> {
    let raw: i64 = conn.query_row("SELECT version FROM store_meta WHERE id = 1;", [], |row| {
        row.get(0)
    })?;
    u64::try_from(raw).map_err(|_| {
        RepoError::InvalidData(format!("negative store version `{raw}` in store_meta.version"))
    })
}

/// Advances the store version and returns the new value.
pub fn bump_store_version(conn: &Connection) -> RepoResult<u64> {
    conn.execute("UPDATE store_meta SET version = version + 1 WHERE id = 1;", [])?;
    current_store_version(conn)
}
