//! Predicate compilation and evaluation.
//!
//! # Responsibility
//! - Turn a validated `Predicate` into a tree with pre-built regexes.
//! - Decide membership one event at a time with short-circuiting
//!   combinators.
//! - Derive a time window from the tree to narrow store scans.
//!
//! # Invariants
//! - `matches` has no side effects, so short-circuit order is unobservable.
//! - A scan window never excludes an event the predicate could match.

use crate::model::event::Event;
use crate::model::predicate::{CompareOp, EventField, Predicate, PredicateError, Target};
use crate::model::value::AttrValue;
use crate::repo::error::RepoResult;
use crate::repo::event_repo::{EventQuery, EventRepository};
use log::debug;
use regex::Regex;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::time::Instant;

/// Predicate ready for repeated evaluation.
#[derive(Debug, Clone)]
pub struct CompiledPredicate {
    root: Node,
}

#[derive(Debug, Clone)]
enum Node {
    TimeOverlap { start: i64, stop: i64 },
    Compare {
        target: Target,
        op: CompareOp,
        value: AttrValue,
    },
    TagIn(BTreeSet<String>),
    ProductIn(BTreeSet<String>),
    HasAttribute(String),
    Match { target: Target, regex: Regex },
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
}

/// Validates `predicate` and compiles it for evaluation.
pub fn compile(predicate: &Predicate) -> Result<CompiledPredicate, PredicateError> {
    predicate.validate()?;
    Ok(CompiledPredicate {
        root: compile_node(predicate)?,
    })
}

/// One-shot evaluation of `predicate` against a single event.
pub fn evaluate(predicate: &Predicate, event: &Event) -> Result<bool, PredicateError> {
    Ok(compile(predicate)?.matches(event))
}

fn compile_node(predicate: &Predicate) -> Result<Node, PredicateError> {
    let node = match predicate {
        Predicate::TimeOverlap { start, stop } => Node::TimeOverlap {
            start: *start,
            stop: *stop,
        },
        Predicate::Compare { target, op, value } => Node::Compare {
            target: target.clone(),
            op: *op,
            value: value.clone(),
        },
        Predicate::TagIn(tags) => Node::TagIn(tags.clone()),
        Predicate::ProductIn(products) => Node::ProductIn(products.clone()),
        Predicate::HasAttribute(name) => Node::HasAttribute(name.clone()),
        Predicate::Match { target, pattern } => Node::Match {
            target: target.clone(),
            regex: Regex::new(pattern).map_err(|err| PredicateError::InvalidPattern {
                pattern: pattern.clone(),
                message: err.to_string(),
            })?,
        },
        Predicate::And(children) => Node::And(compile_children(children)?),
        Predicate::Or(children) => Node::Or(compile_children(children)?),
        Predicate::Not(child) => Node::Not(Box::new(compile_node(child)?)),
    };
    Ok(node)
}

fn compile_children(children: &[Predicate]) -> Result<Vec<Node>, PredicateError> {
    children.iter().map(compile_node).collect()
}

impl CompiledPredicate {
    /// Returns whether `event` satisfies the predicate.
    pub fn matches(&self, event: &Event) -> bool {
        self.root.matches(event)
    }

    /// Closed window every matching event overlaps, when one can be derived.
    pub fn scan_window(&self) -> Option<(i64, i64)> {
        self.root.scan_window()
    }
}

impl Node {
    fn matches(&self, event: &Event) -> bool {
        match self {
            Self::TimeOverlap { start, stop } => event.overlaps(*start, *stop),
            Self::Compare { target, op, value } => resolve(event, target)
                .is_some_and(|actual| apply_operator(*op, &actual, value)),
            Self::TagIn(tags) => !event.tags.is_disjoint(tags),
            Self::ProductIn(products) => !event.products.is_disjoint(products),
            Self::HasAttribute(name) => event
                .attributes
                .get(name)
                .is_some_and(|value| !value.is_null()),
            Self::Match { target, regex } => resolve(event, target)
                .as_deref()
                .and_then(AttrValue::as_text)
                .is_some_and(|text| regex.is_match(text)),
            Self::And(children) => children.iter().all(|child| child.matches(event)),
            Self::Or(children) => children.iter().any(|child| child.matches(event)),
            Self::Not(child) => !child.matches(event),
        }
    }

    fn scan_window(&self) -> Option<(i64, i64)> {
        match self {
            Self::TimeOverlap { start, stop } => Some((*start, *stop)),
            // Any conjunct's window bounds the conjunction.
            Self::And(children) => children
                .iter()
                .filter_map(Node::scan_window)
                .min_by_key(|(start, stop)| stop.saturating_sub(*start)),
            Self::Or(children) if !children.is_empty() => {
                children.iter().try_fold(None, |hull, child| {
                    let (start, stop) = child.scan_window()?;
                    Some(Some(match hull {
                        None => (start, stop),
                        Some((lo, hi)) => (start.min(lo), stop.max(hi)),
                    }))
                })?
            }
            _ => None,
        }
    }
}

/// Resolves a leaf target on `event`; `None` when the value is absent.
fn resolve<'e>(event: &'e Event, target: &Target) -> Option<Cow<'e, AttrValue>> {
    match target {
        Target::Field(EventField::Uuid) => Some(Cow::Owned(AttrValue::Text(event.uuid.to_string()))),
        Target::Field(EventField::Start) => Some(Cow::Owned(AttrValue::Timestamp(event.start))),
        Target::Field(EventField::Stop) => Some(Cow::Owned(AttrValue::Timestamp(event.stop))),
        Target::Field(EventField::Author) => {
            Some(Cow::Owned(AttrValue::Text(event.author.clone())))
        }
        Target::Field(EventField::Rating) => event
            .rating
            .map(|rating| Cow::Owned(AttrValue::Integer(i64::from(rating)))),
        Target::Attribute(name) => event.attributes.get(name).map(Cow::Borrowed),
    }
}

fn apply_operator(op: CompareOp, actual: &AttrValue, expected: &AttrValue) -> bool {
    match op {
        CompareOp::Eq => actual.structural_eq(expected),
        CompareOp::Ne => !actual.structural_eq(expected),
        CompareOp::Lt => actual.compare(expected) == Some(Ordering::Less),
        CompareOp::Le => matches!(
            actual.compare(expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        CompareOp::Gt => actual.compare(expected) == Some(Ordering::Greater),
        CompareOp::Ge => matches!(
            actual.compare(expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
    }
}

/// Active events of `repo` that satisfy `predicate`, in scan order.
///
/// # Side effects
/// - Emits a `membership_eval` debug event with counts and duration.
pub fn evaluate_membership<R: EventRepository>(
    repo: &R,
    predicate: &CompiledPredicate,
) -> RepoResult<Vec<Event>> {
    let started_at = Instant::now();
    let query = EventQuery {
        overlapping: predicate.scan_window(),
        ..EventQuery::active()
    };

    let population = repo.query_events(&query)?;
    let scanned = population.len();
    let members: Vec<Event> = population
        .into_iter()
        .filter(|event| predicate.matches(event))
        .collect();

    debug!(
        "event=membership_eval module=eval status=ok windowed={} scanned={} matched={} duration_ms={}",
        query.overlapping.is_some(),
        scanned,
        members.len(),
        started_at.elapsed().as_millis()
    );
    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::{compile, evaluate};
    use crate::model::event::Event;
    use crate::model::predicate::{EventField, Predicate, Target};
    use crate::model::value::AttrValue;

    fn sample() -> Event {
        Event::new(10, 20, "alice")
            .with_tags(["x", "storm"])
            .with_products(["mms"])
            .with_rating(7)
            .with_attribute("quality", 3)
            .with_attribute("score", 2.5)
            .with_attribute("label", "storm42")
            .with_attribute("flag", true)
            .with_attribute("nothing", AttrValue::Null)
            .with_attribute("seen", AttrValue::Timestamp(15))
    }

    fn check(predicate: Predicate) -> bool {
        evaluate(&predicate, &sample()).unwrap()
    }

    fn cmp(target: Target, op: &str, value: impl Into<AttrValue>) -> Predicate {
        Predicate::compare(target, op, value).unwrap()
    }

    #[test]
    fn overlap_is_closed_interval() {
        assert!(check(Predicate::time_overlap(15, 25).unwrap()));
        assert!(!check(Predicate::time_overlap(21, 30).unwrap()));
        assert!(check(Predicate::time_overlap(0, 10).unwrap()));
        assert!(check(Predicate::time_overlap(20, 20).unwrap()));
    }

    #[test]
    fn empty_combinators_are_identities() {
        assert!(check(Predicate::And(Vec::new())));
        assert!(!check(Predicate::Or(Vec::new())));
    }

    #[test]
    fn double_negation_is_identity() {
        let leaves = [
            Predicate::tag_in(["x"]),
            Predicate::tag_in(["nope"]),
            cmp(Target::attribute("missing"), "==", 1),
            Predicate::And(Vec::new()),
        ];
        for leaf in leaves {
            let plain = check(leaf.clone());
            let twice = check(Predicate::negate(Predicate::negate(leaf)));
            assert_eq!(plain, twice);
        }
    }

    #[test]
    fn tag_and_product_sets_intersect() {
        assert!(check(Predicate::tag_in(["y", "x"])));
        assert!(!check(Predicate::tag_in(["y"])));
        assert!(!check(Predicate::tag_in(Vec::<String>::new())));
        assert!(check(Predicate::product_in(["mms"])));
        assert!(!check(Predicate::product_in(["ace"])));
    }

    #[test]
    fn numeric_attributes_compare_across_int_and_float() {
        assert!(check(cmp(Target::attribute("quality"), ">=", 3)));
        assert!(check(cmp(Target::attribute("quality"), "<", 3.5)));
        assert!(check(cmp(Target::attribute("score"), ">", 2)));
        assert!(check(cmp(Target::attribute("quality"), "==", 3.0)));
        assert!(!check(cmp(Target::attribute("quality"), "!=", 3)));
    }

    #[test]
    fn missing_attributes_are_false_for_every_operator() {
        for op in ["==", "!=", "<", "<=", ">", ">="] {
            assert!(!check(cmp(Target::attribute("missing"), op, 1)), "op {op}");
        }
    }

    #[test]
    fn incompatible_types_order_false_but_differ_structurally() {
        assert!(!check(cmp(Target::attribute("quality"), "<", "zzz")));
        assert!(!check(cmp(Target::attribute("quality"), "==", "3")));
        assert!(check(cmp(Target::attribute("quality"), "!=", "3")));
        assert!(!check(cmp(Target::attribute("seen"), ">", 1)));
    }

    #[test]
    fn fixed_fields_resolve() {
        assert!(check(cmp(Target::field(EventField::Author), "==", "alice")));
        assert!(check(cmp(Target::field(EventField::Author), "<", "bob")));
        assert!(check(cmp(
            Target::field(EventField::Start),
            ">=",
            AttrValue::Timestamp(10)
        )));
        assert!(check(cmp(Target::field(EventField::Rating), ">", 5)));
    }

    #[test]
    fn unset_rating_is_missing() {
        let unrated = Event::new(0, 1, "bob");
        let predicate = cmp(Target::field(EventField::Rating), "!=", 3);
        assert!(!evaluate(&predicate, &unrated).unwrap());
    }

    #[test]
    fn has_attribute_requires_non_null_value() {
        assert!(check(Predicate::has_attribute("flag").unwrap()));
        assert!(!check(Predicate::has_attribute("nothing").unwrap()));
        assert!(!check(Predicate::has_attribute("missing").unwrap()));
    }

    #[test]
    fn match_applies_to_text_only() {
        assert!(check(
            Predicate::matches(Target::attribute("label"), r"^storm\d+$").unwrap()
        ));
        assert!(!check(
            Predicate::matches(Target::attribute("quality"), "3").unwrap()
        ));
        assert!(check(
            Predicate::matches(Target::field(EventField::Author), "^ali").unwrap()
        ));
        assert!(!check(
            Predicate::matches(Target::attribute("missing"), ".*").unwrap()
        ));
    }

    #[test]
    fn invalid_tree_does_not_compile() {
        let tree = Predicate::all([Predicate::TimeOverlap { start: 5, stop: 1 }]);
        assert!(compile(&tree).is_err());
    }

    #[test]
    fn scan_window_narrows_conjunctions_and_hulls_disjunctions() {
        let and = compile(&Predicate::all([
            Predicate::time_overlap(0, 100).unwrap(),
            Predicate::time_overlap(40, 50).unwrap(),
            Predicate::tag_in(["x"]),
        ]))
        .unwrap();
        assert_eq!(and.scan_window(), Some((40, 50)));

        let or = compile(&Predicate::any([
            Predicate::time_overlap(0, 10).unwrap(),
            Predicate::time_overlap(90, 100).unwrap(),
        ]))
        .unwrap();
        assert_eq!(or.scan_window(), Some((0, 100)));

        let open = compile(&Predicate::any([
            Predicate::time_overlap(0, 10).unwrap(),
            Predicate::tag_in(["x"]),
        ]))
        .unwrap();
        assert_eq!(open.scan_window(), None);

        let negated = compile(&Predicate::negate(Predicate::time_overlap(0, 10).unwrap()))
            .unwrap();
        assert_eq!(negated.scan_window(), None);
    }
}
