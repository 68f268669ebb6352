//! Entity Store: repository contracts and SQLite implementations.
//!
//! # Responsibility
//! - Define data access contracts for events, catalogues and the
//!   store-version counter.
//! - Isolate SQLite query details from the façade and evaluation engine.
//!
//! # Invariants
//! - Repository writes validate records before persistence.
//! - Each repository mutation is atomic on its own; multi-operation units
//!   of work are owned by `service::Session`.
//! - Repository APIs return semantic errors (`NotFound`, `WrongVariant`) in
//!   addition to DB transport errors.

pub mod catalogue_repo;
pub mod error;
pub mod event_repo;
pub mod meta_repo;
mod records;
