//! Event catalogue store with predicate-driven dynamic catalogues.
//! This crate is the single source of truth for catalogue invariants.

pub mod config;
pub mod db;
pub mod eval;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod transfer;

pub use config::StoreConfig;
pub use eval::{compile, evaluate, CompiledPredicate, MembershipCache};
pub use logging::{default_log_level, init_logging, logging_status, LogLevel, LoggingError};
pub use model::catalogue::{Catalogue, CatalogueId, CatalogueKind, CatalogueVariant};
pub use model::event::{Event, EventId};
pub use model::predicate::{CompareOp, EventField, Predicate, PredicateError, Target};
pub use model::value::{AttrValue, Attributes};
pub use repo::catalogue_repo::CatalogueQuery;
pub use repo::error::{ConflictReason, EntityRef, RepoError, RepoResult};
pub use repo::event_repo::EventQuery;
pub use service::catalogue_service::CatalogueService;
pub use service::session::Session;
pub use transfer::{ExportDocument, ImportSummary};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
