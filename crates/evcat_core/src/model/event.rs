//! Event domain model.
//!
//! # Responsibility
//! - Define the time-interval record grouped by catalogues.
//! - Validate record invariants before they reach storage.
//!
//! # Invariants
//! - `uuid` is stable and never reused for another event.
//! - `stop >= start`.
//! - Tags and products are non-blank and comma-free.
//! - `rating`, when set, is within `1..=10`.
//! - Free attribute keys are identifiers and never shadow a fixed field.

use crate::model::value::{is_valid_attribute_key, is_valid_label, AttrValue, Attributes};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier of an event.
pub type EventId = Uuid;

/// Field names owned by the event record itself.
///
/// Free attributes may not reuse these names.
pub const EVENT_FIXED_FIELDS: &[&str] = &[
    "uuid", "start", "stop", "author", "tags", "products", "rating",
];

const RATING_MIN: u8 = 1;
const RATING_MAX: u8 = 10;

/// Validation failures for event records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventValidationError {
    InvalidInterval { start: i64, stop: i64 },
    InvalidTag(String),
    InvalidProduct(String),
    RatingOutOfRange(u8),
    InvalidAttributeKey(String),
    ReservedAttributeKey(String),
    /// Float attribute that is NaN or infinite.
    NonFiniteAttribute(String),
}

impl Display for EventValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInterval { start, stop } => {
                write!(f, "event stop {stop} is earlier than start {start}")
            }
            Self::InvalidTag(tag) => write!(f, "invalid event tag `{tag}`"),
            Self::InvalidProduct(product) => write!(f, "invalid event product `{product}`"),
            Self::RatingOutOfRange(rating) => write!(
                f,
                "event rating {rating} is outside {RATING_MIN}..={RATING_MAX}"
            ),
            Self::InvalidAttributeKey(key) => write!(f, "invalid attribute key `{key}`"),
            Self::ReservedAttributeKey(key) => {
                write!(f, "attribute key `{key}` is reserved for a fixed field")
            }
            Self::NonFiniteAttribute(key) => {
                write!(f, "attribute `{key}` must be a finite number")
            }
        }
    }
}

impl Error for EventValidationError {}

/// Time-interval record with metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub uuid: EventId,
    /// Unix epoch milliseconds, inclusive.
    pub start: i64,
    /// Unix epoch milliseconds, inclusive. Never earlier than `start`.
    pub stop: i64,
    pub author: String,
    pub tags: BTreeSet<String>,
    pub products: BTreeSet<String>,
    pub rating: Option<u8>,
    pub attributes: Attributes,
    /// Soft-removal marker; removed events are hidden from catalogues.
    #[serde(default)]
    pub is_removed: bool,
}

impl Event {
    /// Creates an event with a generated stable ID.
    pub fn new(start: i64, stop: i64, author: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), start, stop, author)
    }

    /// Creates an event with a caller-provided stable ID.
    ///
    /// Used by import paths where identity already exists externally.
    pub fn with_id(uuid: EventId, start: i64, stop: i64, author: impl Into<String>) -> Self {
        Self {
            uuid,
            start,
            stop,
            author: author.into(),
            tags: BTreeSet::new(),
            products: BTreeSet::new(),
            rating: None,
            attributes: Attributes::new(),
            is_removed: false,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_products<I, S>(mut self, products: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.products.extend(products.into_iter().map(Into::into));
        self
    }

    pub fn with_rating(mut self, rating: u8) -> Self {
        self.rating = Some(rating);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Checks every record invariant.
    pub fn validate(&self) -> Result<(), EventValidationError> {
        if self.stop < self.start {
            return Err(EventValidationError::InvalidInterval {
                start: self.start,
                stop: self.stop,
            });
        }
        if let Some(tag) = self.tags.iter().find(|tag| !is_valid_label(tag)) {
            return Err(EventValidationError::InvalidTag(tag.clone()));
        }
        if let Some(product) = self.products.iter().find(|p| !is_valid_label(p)) {
            return Err(EventValidationError::InvalidProduct(product.clone()));
        }
        if let Some(rating) = self.rating {
            if !(RATING_MIN..=RATING_MAX).contains(&rating) {
                return Err(EventValidationError::RatingOutOfRange(rating));
            }
        }
        for (key, value) in &self.attributes {
            if !is_valid_attribute_key(key) {
                return Err(EventValidationError::InvalidAttributeKey(key.clone()));
            }
            if EVENT_FIXED_FIELDS.contains(&key.as_str()) {
                return Err(EventValidationError::ReservedAttributeKey(key.clone()));
            }
            if !value.is_storable() {
                return Err(EventValidationError::NonFiniteAttribute(key.clone()));
            }
        }
        Ok(())
    }

    /// Closed-interval overlap with `[start, stop]`.
    pub fn overlaps(&self, start: i64, stop: i64) -> bool {
        self.start <= stop && self.stop >= start
    }

    /// Marks this event as removed (trashed).
    pub fn soft_remove(&mut self) {
        self.is_removed = true;
    }

    pub fn restore(&mut self) {
        self.is_removed = false;
    }

    pub fn is_active(&self) -> bool {
        !self.is_removed
    }
}
