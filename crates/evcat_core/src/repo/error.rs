//! Caller-facing error taxonomy for the catalogue store.
//!
//! # Responsibility
//! - Name every failure a store operation can surface.
//! - Map SQLite lock contention to `Conflict` instead of a transport error.
//!
//! # Invariants
//! - An operation that returns an error leaves the store unchanged.

use crate::db::DbError;
use crate::model::catalogue::{CatalogueId, CatalogueValidationError, CatalogueVariant};
use crate::model::event::{EventId, EventValidationError};
use crate::model::predicate::PredicateError;
use rusqlite::ErrorCode;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Identifier of a stored record, tagged with its entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Event(EventId),
    Catalogue(CatalogueId),
}

impl Display for EntityRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Event(id) => write!(f, "event {id}"),
            Self::Catalogue(id) => write!(f, "catalogue {id}"),
        }
    }
}

/// Why a unit of work could not be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// Another writer held the store lock past the configured busy timeout.
    Busy,
    /// The store moved past the version the caller based its edits on.
    StaleVersion { expected: u64, actual: u64 },
}

impl Display for ConflictReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Busy => write!(f, "store is locked by another writer"),
            Self::StaleVersion { expected, actual } => write!(
                f,
                "store version is {actual}, expected {expected}"
            ),
        }
    }
}

#[derive(Debug)]
pub enum RepoError {
    NotFound(EntityRef),
    AlreadyExists(EntityRef),
    /// Operation requires a catalogue of variant `expected`.
    WrongVariant {
        catalogue: CatalogueId,
        expected: CatalogueVariant,
    },
    Conflict(ConflictReason),
    MalformedPredicate(PredicateError),
    InvalidEvent(EventValidationError),
    InvalidCatalogue(CatalogueValidationError),
    Db(DbError),
    /// Persisted state that fails validation on read.
    InvalidData(String),
    Import(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(entity) => write!(f, "{entity} not found"),
            Self::AlreadyExists(entity) => write!(f, "{entity} already exists"),
            Self::WrongVariant {
                catalogue,
                expected,
            } => write!(f, "catalogue {catalogue} is not a {expected} catalogue"),
            Self::Conflict(reason) => write!(f, "conflict: {reason}"),
            Self::MalformedPredicate(err) => write!(f, "malformed predicate: {err}"),
            Self::InvalidEvent(err) => write!(f, "{err}"),
            Self::InvalidCatalogue(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Import(message) => write!(f, "import rejected: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::MalformedPredicate(err) => Some(err),
            Self::InvalidEvent(err) => Some(err),
            Self::InvalidCatalogue(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::NotFound(_)
            | Self::AlreadyExists(_)
            | Self::WrongVariant { .. }
            | Self::Conflict(_)
            | Self::InvalidData(_)
            | Self::Import(_) => None,
        }
    }
}

impl RepoError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<PredicateError> for RepoError {
    fn from(value: PredicateError) -> Self {
        Self::MalformedPredicate(value)
    }
}

impl From<EventValidationError> for RepoError {
    fn from(value: EventValidationError) -> Self {
        Self::InvalidEvent(value)
    }
}

impl From<CatalogueValidationError> for RepoError {
    fn from(value: CatalogueValidationError) -> Self {
        Self::InvalidCatalogue(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::Sqlite(err) => Self::from(err),
            other => Self::Db(other),
        }
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        match value.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
                Self::Conflict(ConflictReason::Busy)
            }
            _ => Self::Db(DbError::Sqlite(value)),
        }
    }
}
