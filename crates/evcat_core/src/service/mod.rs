//! Catalogue Façade and unit-of-work orchestration.
//!
//! # Responsibility
//! - Coordinate static and dynamic catalogues behind one API.
//! - Delegate persistence to repositories and membership to the
//!   evaluation engine.
//!
//! # Invariants
//! - Façade APIs never bypass repository validation.
//! - All mutations go through a `Session`.

pub mod catalogue_service;
pub(crate) mod membership;
pub mod session;
