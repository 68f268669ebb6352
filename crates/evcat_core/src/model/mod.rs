//! Domain model for events, catalogues and catalogue predicates.
//!
//! # Responsibility
//! - Define canonical record shapes used by storage, evaluation and the
//!   catalogue façade.
//! - Keep validation next to the data it protects.
//!
//! # Invariants
//! - Every record is identified by a stable UUID.
//! - Removal is a soft tombstone (`is_removed`) unless a caller deletes
//!   permanently through the store.

pub mod catalogue;
pub mod event;
pub mod predicate;
pub mod value;
