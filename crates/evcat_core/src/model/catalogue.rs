//! Catalogue domain model.
//!
//! # Responsibility
//! - Define named groupings of events in their static and dynamic variants.
//! - Validate catalogue record invariants.
//!
//! # Invariants
//! - A catalogue is exactly one variant, fixed at creation.
//! - A dynamic catalogue exclusively owns its predicate tree; cloning a
//!   catalogue deep-copies the tree.
//! - Static and dynamic catalogues share one identifier namespace.

use crate::model::predicate::Predicate;
use crate::model::value::{is_valid_attribute_key, is_valid_label, AttrValue, Attributes};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier of a catalogue.
pub type CatalogueId = Uuid;

/// Field names owned by the catalogue record itself.
pub const CATALOGUE_FIXED_FIELDS: &[&str] = &["uuid", "name", "author", "tags", "predicate"];

/// Catalogue variant without payload, used in errors and queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogueVariant {
    Static,
    Dynamic,
}

impl CatalogueVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Dynamic => "dynamic",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "static" => Some(Self::Static),
            "dynamic" => Some(Self::Dynamic),
            _ => None,
        }
    }
}

impl Display for CatalogueVariant {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Membership source of a catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variant", content = "predicate", rename_all = "snake_case")]
pub enum CatalogueKind {
    /// Membership is an explicit, persisted set of event ids.
    Static,
    /// Membership is computed from the predicate at query time.
    Dynamic(Predicate),
}

impl CatalogueKind {
    pub fn variant(&self) -> CatalogueVariant {
        match self {
            Self::Static => CatalogueVariant::Static,
            Self::Dynamic(_) => CatalogueVariant::Dynamic,
        }
    }
}

/// Validation failures for catalogue records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogueValidationError {
    EmptyName,
    InvalidTag(String),
    InvalidAttributeKey(String),
    ReservedAttributeKey(String),
    /// Float attribute that is NaN or infinite.
    NonFiniteAttribute(String),
}

impl Display for CatalogueValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyName => write!(f, "catalogue name cannot be empty"),
            Self::InvalidTag(tag) => write!(f, "invalid catalogue tag `{tag}`"),
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

impl Error for CatalogueValidationError {}

/// Named grouping of events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalogue {
    pub uuid: CatalogueId,
    /// Display name; not required to be unique.
    pub name: String,
    pub author: String,
    pub tags: BTreeSet<String>,
    pub attributes: Attributes,
    pub kind: CatalogueKind,
    #[serde(default)]
    pub is_removed: bool,
}

impl Catalogue {
    /// Creates a static catalogue with a generated stable ID.
    pub fn new_static(name: impl Into<String>, author: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), name, author, CatalogueKind::Static)
    }

    /// Creates a dynamic catalogue with a generated stable ID.
    pub fn new_dynamic(
        name: impl Into<String>,
        author: impl Into<String>,
        predicate: Predicate,
    ) -> Self {
        Self::with_id(
            Uuid::new_v4(),
            name,
            author,
            CatalogueKind::Dynamic(predicate),
        )
    }

    /// Creates a catalogue with a caller-provided stable ID.
    pub fn with_id(
        uuid: CatalogueId,
        name: impl Into<String>,
        author: impl Into<String>,
        kind: CatalogueKind,
    ) -> Self {
        Self {
            uuid,
            name: name.into(),
            author: author.into(),
            tags: BTreeSet::new(),
            attributes: Attributes::new(),
            kind,
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

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn variant(&self) -> CatalogueVariant {
        self.kind.variant()
    }

    pub fn is_dynamic(&self) -> bool {
        self.variant() == CatalogueVariant::Dynamic
    }

    pub fn predicate(&self) -> Option<&Predicate> {
        match &self.kind {
            CatalogueKind::Static => None,
            CatalogueKind::Dynamic(predicate) => Some(predicate),
        }
    }

    /// Checks record invariants. The predicate tree is validated separately
    /// so that its failures surface as malformed-predicate errors.
    pub fn validate(&self) -> Result<(), CatalogueValidationError> {
        if self.name.trim().is_empty() {
            return Err(CatalogueValidationError::EmptyName);
        }
        if let Some(tag) = self.tags.iter().find(|tag| !is_valid_label(tag)) {
            return Err(CatalogueValidationError::InvalidTag(tag.clone()));
        }
        for (key, value) in &self.attributes {
            if !is_valid_attribute_key(key) {
                return Err(CatalogueValidationError::InvalidAttributeKey(key.clone()));
            }
            if CATALOGUE_FIXED_FIELDS.contains(&key.as_str()) {
                return Err(CatalogueValidationError::ReservedAttributeKey(key.clone()));
            }
            if !value.is_storable() {
                return Err(CatalogueValidationError::NonFiniteAttribute(key.clone()));
            }
        }
        Ok(())
    }

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
