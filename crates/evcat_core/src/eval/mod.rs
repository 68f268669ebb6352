//! Evaluation Engine for dynamic catalogues.
//!
//! # Responsibility
//! - Compile predicate trees into an evaluable form.
//! - Compute dynamic-catalogue membership against the event store.
//! - Memoize membership per store version.
//!
//! # Invariants
//! - Evaluation is total over well-formed predicates: missing or mismatched
//!   values resolve a leaf to `false`, never to an error.
//! - Evaluation never writes to the store.

pub mod cache;
pub mod engine;

pub use cache::MembershipCache;
pub use engine::{compile, evaluate, evaluate_membership, CompiledPredicate};
