//! Typed attribute values shared by events, catalogues and predicates.
//!
//! # Responsibility
//! - Define the closed value union stored in attribute bags.
//! - Provide the comparison rules used by predicate evaluation.
//!
//! # Invariants
//! - Only these variants ever reach storage or evaluation; there is no
//!   opaque/untyped value.
//! - Attribute keys match `^[A-Za-z][A-Za-z_0-9]*$`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

static ATTRIBUTE_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z_0-9]*$").expect("valid attribute key regex"));

/// Attribute bag: free key/value pairs attached to an event or catalogue.
pub type Attributes = BTreeMap<String, AttrValue>;

/// Runtime value of one attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttrValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    /// Unix epoch milliseconds.
    Timestamp(i64),
}

impl AttrValue {
    /// Storage discriminator for this value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Timestamp(_) => "timestamp",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether the value survives storage and JSON unchanged.
    ///
    /// NaN and infinite floats do not.
    pub fn is_storable(&self) -> bool {
        match self {
            Self::Float(value) => value.is_finite(),
            _ => true,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Structural equality used by `=`/`!=` comparisons.
    ///
    /// Integers and floats compare numerically; any other pair of
    /// different variants is unequal.
    pub fn structural_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Integer(_) | Self::Float(_), Self::Integer(_) | Self::Float(_)) => {
                self.compare(other) == Some(Ordering::Equal)
            }
            (lhs, rhs) => lhs == rhs,
        }
    }

    /// Natural ordering between two values of compatible runtime type.
    ///
    /// Returns `None` for incompatible types, `Null` operands and NaN.
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Bool(lhs), Self::Bool(rhs)) => Some(lhs.cmp(rhs)),
            (Self::Integer(lhs), Self::Integer(rhs)) => Some(lhs.cmp(rhs)),
            (Self::Integer(lhs), Self::Float(rhs)) => (*lhs as f64).partial_cmp(rhs),
            (Self::Float(lhs), Self::Integer(rhs)) => lhs.partial_cmp(&(*rhs as f64)),
            (Self::Float(lhs), Self::Float(rhs)) => lhs.partial_cmp(rhs),
            (Self::Text(lhs), Self::Text(rhs)) => Some(lhs.cmp(rhs)),
            (Self::Timestamp(lhs), Self::Timestamp(rhs)) => Some(lhs.cmp(rhs)),
            _ => None,
        }
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for AttrValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Returns whether `key` is usable as a free attribute name.
pub fn is_valid_attribute_key(key: &str) -> bool {
    ATTRIBUTE_KEY_RE.is_match(key)
}

/// Returns whether `label` is usable as a tag or product name.
///
/// Labels must be non-blank and must not contain a comma.
pub fn is_valid_label(label: &str) -> bool {
    !label.trim().is_empty() && !label.contains(',')
}

#[cfg(test)]
mod tests {
    use super::{is_valid_attribute_key, is_valid_label, AttrValue};
    use std::cmp::Ordering;

    #[test]
    fn numbers_compare_across_integer_and_float() {
        assert!(AttrValue::Integer(1).structural_eq(&AttrValue::Float(1.0)));
        assert_eq!(
            AttrValue::Float(2.5).compare(&AttrValue::Integer(2)),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn incompatible_types_have_no_order_and_are_unequal() {
        let text = AttrValue::from("10");
        let number = AttrValue::Integer(10);
        assert_eq!(text.compare(&number), None);
        assert!(!text.structural_eq(&number));
        assert_eq!(
            AttrValue::Timestamp(5).compare(&AttrValue::Integer(5)),
            None
        );
    }

    #[test]
    fn null_is_equal_to_null_but_unordered() {
        assert!(AttrValue::Null.structural_eq(&AttrValue::Null));
        assert_eq!(AttrValue::Null.compare(&AttrValue::Null), None);
    }

    #[test]
    fn nan_never_equals_itself() {
        let nan = AttrValue::Float(f64::NAN);
        assert!(!nan.structural_eq(&nan));
    }

    #[test]
    fn only_finite_floats_are_storable() {
        assert!(AttrValue::Float(1.5).is_storable());
        assert!(AttrValue::Null.is_storable());
        assert!(!AttrValue::Float(f64::NAN).is_storable());
        assert!(!AttrValue::Float(f64::NEG_INFINITY).is_storable());
    }

    #[test]
    fn attribute_keys_follow_identifier_rules() {
        assert!(is_valid_attribute_key("rating_2"));
        assert!(!is_valid_attribute_key("2rating"));
        assert!(!is_valid_attribute_key("with space"));
        assert!(!is_valid_attribute_key(""));
    }

    #[test]
    fn labels_reject_blank_and_commas() {
        assert!(is_valid_label("storm"));
        assert!(!is_valid_label("  "));
        assert!(!is_valid_label("a,b"));
    }

    #[test]
    fn serializes_with_type_discriminator() {
        let json = serde_json::to_string(&AttrValue::Timestamp(42)).unwrap();
        assert_eq!(json, r#"{"type":"timestamp","value":42}"#);
        let null = serde_json::to_string(&AttrValue::Null).unwrap();
        assert_eq!(null, r#"{"type":"null"}"#);
    }
}
