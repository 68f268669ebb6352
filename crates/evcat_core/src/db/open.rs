//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Configure connection pragmas required by the catalogue store.
//! - Trigger schema migrations before returning a usable connection.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON`.
//! - File databases run in WAL mode so snapshot readers never block the
//!   single writer.
//! - Returned connections have migrations fully applied.

use super::migrations::apply_migrations;
use super::{DbError, DbResult};
use crate::config::StoreConfig;
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::Instant;

const WAL_MODE: &str = "wal";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenMode {
    File,
    Memory,
}

impl OpenMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Memory => "memory",
        }
    }
}

/// Opens a database file with default configuration.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    open_db_with_config(path, &StoreConfig::default())
}

/// Opens a database file and applies all pending migrations.
///
/// # Side effects
/// - Emits `db_open` logging events with duration and status.
pub fn open_db_with_config(path: impl AsRef<Path>, config: &StoreConfig) -> DbResult<Connection> {
    let path = path.as_ref();
    open_with(OpenMode::File, config, || Connection::open(path))
}

/// Opens an in-memory database with default configuration.
pub fn open_db_in_memory() -> DbResult<Connection> {
    open_db_in_memory_with_config(&StoreConfig::default())
}

/// Opens an in-memory database and applies all pending migrations.
pub fn open_db_in_memory_with_config(config: &StoreConfig) -> DbResult<Connection> {
    open_with(OpenMode::Memory, config, Connection::open_in_memory)
}

fn open_with(
    open_mode: OpenMode,
    config: &StoreConfig,
    connect: impl FnOnce() -> rusqlite::Result<Connection>,
) -> DbResult<Connection> {
    let started_at = Instant::now();
    let mode = open_mode.as_str();
    info!("event=db_open module=db status=start mode={mode}");

    let mut conn = connect().map_err(|err| {
        error!(
            "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_open_failed error={err}",
            started_at.elapsed().as_millis()
        );
        err
    })?;

    match bootstrap_connection(&mut conn, config, open_mode) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode={mode} duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_bootstrap_failed error={err}",
                started_at.elapsed().as_millis()
            );
            Err(err)
        }
    }
}

fn bootstrap_connection(
    conn: &mut Connection,
    config: &StoreConfig,
    open_mode: OpenMode,
) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(config.busy_timeout)?;
    if open_mode == OpenMode::File {
        enable_wal(conn)?;
    }
    apply_migrations(conn)?;
    Ok(())
}

fn enable_wal(conn: &Connection) -> DbResult<()> {
    let actual = conn.pragma_update_and_check(None, "journal_mode", WAL_MODE, |row| {
        row.get::<_, String>(0)
    })?;
    if !actual.eq_ignore_ascii_case(WAL_MODE) {
        return Err(DbError::JournalMode {
            requested: WAL_MODE.to_string(),
            actual,
        });
    }
    Ok(())
}
