//! Predicate model for dynamic catalogues.
//!
//! # Responsibility
//! - Define the filter expression tree stored on dynamic catalogues.
//! - Reject malformed trees at construction/validation time.
//! - Encode trees losslessly as flat node records and back.
//!
//! # Invariants
//! - A parent exclusively owns its children; trees are finite and acyclic.
//! - `And([])` is the conjunction identity (true) and `Or([])` the
//!   disjunction identity (false). Both are well-formed.
//! - Node records are emitted in pre-order; the root has index 0 and no
//!   parent, siblings carry contiguous positions starting at 0.
//! - A valid tree is at most `MAX_PREDICATE_DEPTH` levels deep and holds
//!   only finite float literals.

use crate::model::value::AttrValue;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Deepest tree accepted by `validate`, counting the root as level 1.
pub const MAX_PREDICATE_DEPTH: usize = 128;

/// Structural validation failures (`MalformedPredicate`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredicateError {
    /// `TimeOverlap` with `stop < start`.
    InvalidInterval { start: i64, stop: i64 },
    /// Comparison operator outside `= != < <= > >=`.
    UnknownOperator(String),
    /// `Match` pattern that is not a valid regular expression.
    InvalidPattern { pattern: String, message: String },
    /// Attribute reference with an empty name.
    EmptyAttributeName,
    /// Node records that do not describe exactly one tree.
    InvalidNodeTree(String),
    /// Leaf parameters could not be encoded.
    Encoding(String),
    /// `Compare` literal that is NaN or infinite.
    NonFiniteLiteral(String),
    /// Tree nested deeper than `limit` levels.
    TooDeep { depth: usize, limit: usize },
}

impl Display for PredicateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInterval { start, stop } => {
                write!(f, "time overlap stop {stop} is earlier than start {start}")
            }
            Self::UnknownOperator(op) => write!(f, "unknown comparison operator `{op}`"),
            Self::InvalidPattern { pattern, message } => {
                write!(f, "invalid match pattern `{pattern}`: {message}")
            }
            Self::EmptyAttributeName => write!(f, "attribute name cannot be empty"),
            Self::InvalidNodeTree(message) => write!(f, "invalid predicate node tree: {message}"),
            Self::Encoding(message) => write!(f, "cannot encode predicate: {message}"),
            Self::NonFiniteLiteral(value) => {
                write!(f, "comparison literal {value} is not a finite number")
            }
            Self::TooDeep { depth, limit } => {
                write!(f, "predicate depth {depth} exceeds the limit of {limit}")
            }
        }
    }
}

impl Error for PredicateError {}

/// Comparison operator for `Compare` leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

impl CompareOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

impl FromStr for CompareOp {
    type Err = PredicateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "=" | "==" => Ok(Self::Eq),
            "!=" | "≠" => Ok(Self::Ne),
            "<" => Ok(Self::Lt),
            "<=" | "≤" => Ok(Self::Le),
            ">" => Ok(Self::Gt),
            ">=" | "≥" => Ok(Self::Ge),
            other => Err(PredicateError::UnknownOperator(other.to_string())),
        }
    }
}

/// Fixed event fields addressable by `Compare` and `Match`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventField {
    Uuid,
    Start,
    Stop,
    Author,
    Rating,
}

impl EventField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uuid => "uuid",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Author => "author",
            Self::Rating => "rating",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "uuid" => Some(Self::Uuid),
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            "author" => Some(Self::Author),
            "rating" => Some(Self::Rating),
            _ => None,
        }
    }
}

/// Value source of a leaf: a fixed field or a free attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "name", rename_all = "snake_case")]
pub enum Target {
    Field(EventField),
    Attribute(String),
}

impl Target {
    pub fn field(field: EventField) -> Self {
        Self::Field(field)
    }

    pub fn attribute(name: impl Into<String>) -> Self {
        Self::Attribute(name.into())
    }

    fn validate(&self) -> Result<(), PredicateError> {
        match self {
            Self::Attribute(name) if name.trim().is_empty() => {
                Err(PredicateError::EmptyAttributeName)
            }
            _ => Ok(()),
        }
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Field(field) => write!(f, "{}", field.as_str()),
            Self::Attribute(name) => write!(f, "attr({name})"),
        }
    }
}

/// Filter expression over events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// Closed-interval overlap with `[start, stop]` (epoch milliseconds).
    TimeOverlap { start: i64, stop: i64 },
    Compare {
        target: Target,
        op: CompareOp,
        value: AttrValue,
    },
    /// True when the event tags intersect the set.
    TagIn(BTreeSet<String>),
    /// True when the event products intersect the set.
    ProductIn(BTreeSet<String>),
    /// True when the free attribute exists with a non-null value.
    HasAttribute(String),
    /// True when the target resolves to a string matched by `pattern`.
    Match { target: Target, pattern: String },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn time_overlap(start: i64, stop: i64) -> Result<Self, PredicateError> {
        let predicate = Self::TimeOverlap { start, stop };
        predicate.validate_node()?;
        Ok(predicate)
    }

    /// Builds a comparison leaf from an operator token such as `">="`.
    pub fn compare(
        target: Target,
        op: &str,
        value: impl Into<AttrValue>,
    ) -> Result<Self, PredicateError> {
        let predicate = Self::Compare {
            target,
            op: op.parse()?,
            value: value.into(),
        };
        predicate.validate_node()?;
        Ok(predicate)
    }

    pub fn tag_in<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::TagIn(tags.into_iter().map(Into::into).collect())
    }

    pub fn product_in<I, S>(products: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::ProductIn(products.into_iter().map(Into::into).collect())
    }

    pub fn has_attribute(name: impl Into<String>) -> Result<Self, PredicateError> {
        let predicate = Self::HasAttribute(name.into());
        predicate.validate_node()?;
        Ok(predicate)
    }

    pub fn matches(target: Target, pattern: impl Into<String>) -> Result<Self, PredicateError> {
        let predicate = Self::Match {
            target,
            pattern: pattern.into(),
        };
        predicate.validate_node()?;
        Ok(predicate)
    }

    pub fn all(children: impl IntoIterator<Item = Predicate>) -> Self {
        Self::And(children.into_iter().collect())
    }

    pub fn any(children: impl IntoIterator<Item = Predicate>) -> Self {
        Self::Or(children.into_iter().collect())
    }

    pub fn negate(child: Predicate) -> Self {
        Self::Not(Box::new(child))
    }

    /// Ordered children of a combinator; empty for leaves.
    pub fn children(&self) -> &[Predicate] {
        match self {
            Self::And(children) | Self::Or(children) => children.as_slice(),
            Self::Not(child) => std::slice::from_ref(child.as_ref()),
            _ => &[],
        }
    }

    pub fn node_kind(&self) -> NodeKind {
        match self {
            Self::TimeOverlap { .. } => NodeKind::TimeOverlap,
            Self::Compare { .. } => NodeKind::Compare,
            Self::TagIn(_) => NodeKind::TagIn,
            Self::ProductIn(_) => NodeKind::ProductIn,
            Self::HasAttribute(_) => NodeKind::HasAttribute,
            Self::Match { .. } => NodeKind::Match,
            Self::And(_) => NodeKind::And,
            Self::Or(_) => NodeKind::Or,
            Self::Not(_) => NodeKind::Not,
        }
    }

    /// Total node count of the tree.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut pending = vec![self];
        while let Some(node) = pending.pop() {
            count += 1;
            pending.extend(node.children());
        }
        count
    }

    /// Number of levels in the tree; a lone leaf has depth 1.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut pending = vec![(self, 1)];
        while let Some((node, level)) = pending.pop() {
            deepest = deepest.max(level);
            pending.extend(node.children().iter().map(|child| (child, level + 1)));
        }
        deepest
    }

    /// Validates the whole tree.
    ///
    /// Depth is checked first, without recursion, so every later walk over
    /// a valid tree is bounded.
    pub fn validate(&self) -> Result<(), PredicateError> {
        check_depth(self.depth())?;
        self.validate_subtree()
    }

    fn validate_subtree(&self) -> Result<(), PredicateError> {
        self.validate_node()?;
        self.children()
            .iter()
            .try_for_each(Predicate::validate_subtree)
    }

    fn validate_node(&self) -> Result<(), PredicateError> {
        match self {
            Self::TimeOverlap { start, stop } if stop < start => {
                Err(PredicateError::InvalidInterval {
                    start: *start,
                    stop: *stop,
                })
            }
            Self::Compare { target, value, .. } => {
                target.validate()?;
                match value {
                    AttrValue::Float(number) if !number.is_finite() => {
                        Err(PredicateError::NonFiniteLiteral(number.to_string()))
                    }
                    _ => Ok(()),
                }
            }
            Self::HasAttribute(name) if name.trim().is_empty() => {
                Err(PredicateError::EmptyAttributeName)
            }
            Self::Match { target, pattern } => {
                target.validate()?;
                Regex::new(pattern)
                    .map(|_| ())
                    .map_err(|err| PredicateError::InvalidPattern {
                        pattern: pattern.clone(),
                        message: err.to_string(),
                    })
            }
            _ => Ok(()),
        }
    }

    /// Flattens the tree into pre-order node records.
    pub fn to_nodes(&self) -> Result<Vec<PredicateNode>, PredicateError> {
        self.validate()?;
        let mut nodes = Vec::with_capacity(self.node_count());
        push_node(self, None, 0, &mut nodes)?;
        Ok(nodes)
    }

    /// Rebuilds a tree from node records and validates it.
    ///
    /// Records may arrive in any order; children are ordered by `position`.
    pub fn from_nodes(nodes: &[PredicateNode]) -> Result<Self, PredicateError> {
        let mut known = BTreeSet::new();
        for node in nodes {
            if !known.insert(node.index) {
                return Err(tree_error(format!("duplicate node index {}", node.index)));
            }
        }

        let mut roots = nodes.iter().filter(|node| node.parent.is_none());
        let root = roots
            .next()
            .ok_or_else(|| tree_error("missing root node".to_string()))?;
        if roots.next().is_some() {
            return Err(tree_error("more than one root node".to_string()));
        }

        let mut children: BTreeMap<u32, Vec<&PredicateNode>> = BTreeMap::new();
        for node in nodes {
            if let Some(parent) = node.parent {
                if !known.contains(&parent) {
                    return Err(tree_error(format!(
                        "node {} references unknown parent {parent}",
                        node.index
                    )));
                }
                children.entry(parent).or_default().push(node);
            }
        }
        for (parent, siblings) in children.iter_mut() {
            siblings.sort_by_key(|node| node.position);
            let contiguous = siblings
                .iter()
                .enumerate()
                .all(|(expected, node)| node.position as usize == expected);
            if !contiguous {
                return Err(tree_error(format!(
                    "children of node {parent} have non-contiguous positions"
                )));
            }
        }

        check_depth(record_depth(root, &children))?;

        let mut visited = 0usize;
        let predicate = build_node(root, &children, &mut visited)?;
        if visited != nodes.len() {
            return Err(tree_error(format!(
                "{} node(s) are not reachable from the root",
                nodes.len() - visited
            )));
        }

        predicate.validate()?;
        Ok(predicate)
    }
}

impl Display for Predicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TimeOverlap { start, stop } => write!(f, "overlaps({start}, {stop})"),
            Self::Compare { target, op, value } => {
                write!(f, "{target} {} ", op.as_str())?;
                write_literal(f, value)
            }
            Self::TagIn(tags) => write!(f, "tags in {{{}}}", join(tags)),
            Self::ProductIn(products) => write!(f, "products in {{{}}}", join(products)),
            Self::HasAttribute(name) => write!(f, "has(attr({name}))"),
            Self::Match { target, pattern } => write!(f, "{target} ~ /{pattern}/"),
            Self::And(children) => write_call(f, "all", children),
            Self::Or(children) => write_call(f, "any", children),
            Self::Not(child) => write!(f, "not({child})"),
        }
    }
}

/// Node kind stored with each node record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    TimeOverlap,
    Compare,
    TagIn,
    ProductIn,
    HasAttribute,
    Match,
    And,
    Or,
    Not,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TimeOverlap => "time_overlap",
            Self::Compare => "compare",
            Self::TagIn => "tag_in",
            Self::ProductIn => "product_in",
            Self::HasAttribute => "has_attribute",
            Self::Match => "match",
            Self::And => "and",
            Self::Or => "or",
            Self::Not => "not",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "time_overlap" => Some(Self::TimeOverlap),
            "compare" => Some(Self::Compare),
            "tag_in" => Some(Self::TagIn),
            "product_in" => Some(Self::ProductIn),
            "has_attribute" => Some(Self::HasAttribute),
            "match" => Some(Self::Match),
            "and" => Some(Self::And),
            "or" => Some(Self::Or),
            "not" => Some(Self::Not),
            _ => None,
        }
    }

    pub fn is_leaf(self) -> bool {
        !matches!(self, Self::And | Self::Or | Self::Not)
    }
}

/// One persisted predicate node.
///
/// Combinators carry `JsonValue::Null` params; leaves carry their
/// parameters as a JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredicateNode {
    pub index: u32,
    pub parent: Option<u32>,
    pub position: u32,
    pub kind: NodeKind,
    pub params: JsonValue,
}

#[derive(Serialize, Deserialize)]
struct IntervalParams {
    start: i64,
    stop: i64,
}

#[derive(Serialize, Deserialize)]
struct CompareParams {
    target: Target,
    op: CompareOp,
    value: AttrValue,
}

#[derive(Serialize, Deserialize)]
struct LabelParams {
    labels: BTreeSet<String>,
}

#[derive(Serialize, Deserialize)]
struct NameParams {
    name: String,
}

#[derive(Serialize, Deserialize)]
struct MatchParams {
    target: Target,
    pattern: String,
}

fn push_node(
    predicate: &Predicate,
    parent: Option<u32>,
    position: u32,
    nodes: &mut Vec<PredicateNode>,
) -> Result<(), PredicateError> {
    let index = u32::try_from(nodes.len())
        .map_err(|_| PredicateError::Encoding("predicate has too many nodes".to_string()))?;
    nodes.push(PredicateNode {
        index,
        parent,
        position,
        kind: predicate.node_kind(),
        params: encode_params(predicate)?,
    });

    for (child_position, child) in predicate.children().iter().enumerate() {
        let child_position = u32::try_from(child_position)
            .map_err(|_| PredicateError::Encoding("too many sibling nodes".to_string()))?;
        push_node(child, Some(index), child_position, nodes)?;
    }
    Ok(())
}

fn encode_params(predicate: &Predicate) -> Result<JsonValue, PredicateError> {
    let encoded = match predicate {
        Predicate::TimeOverlap { start, stop } => serde_json::to_value(IntervalParams {
            start: *start,
            stop: *stop,
        }),
        Predicate::Compare { target, op, value } => serde_json::to_value(CompareParams {
            target: target.clone(),
            op: *op,
            value: value.clone(),
        }),
        Predicate::TagIn(labels) | Predicate::ProductIn(labels) => {
            serde_json::to_value(LabelParams {
                labels: labels.clone(),
            })
        }
        Predicate::HasAttribute(name) => serde_json::to_value(NameParams { name: name.clone() }),
        Predicate::Match { target, pattern } => serde_json::to_value(MatchParams {
            target: target.clone(),
            pattern: pattern.clone(),
        }),
        Predicate::And(_) | Predicate::Or(_) | Predicate::Not(_) => return Ok(JsonValue::Null),
    };
    encoded.map_err(|err| PredicateError::Encoding(err.to_string()))
}

fn decode_leaf(node: &PredicateNode) -> Result<Predicate, PredicateError> {
    let params = node.params.clone();
    let decoded = match node.kind {
        NodeKind::TimeOverlap => serde_json::from_value::<IntervalParams>(params)
            .map(|p| Predicate::TimeOverlap {
                start: p.start,
                stop: p.stop,
            }),
        NodeKind::Compare => {
            serde_json::from_value::<CompareParams>(params).map(|p| Predicate::Compare {
                target: p.target,
                op: p.op,
                value: p.value,
            })
        }
        NodeKind::TagIn => {
            serde_json::from_value::<LabelParams>(params).map(|p| Predicate::TagIn(p.labels))
        }
        NodeKind::ProductIn => {
            serde_json::from_value::<LabelParams>(params).map(|p| Predicate::ProductIn(p.labels))
        }
        NodeKind::HasAttribute => {
            serde_json::from_value::<NameParams>(params).map(|p| Predicate::HasAttribute(p.name))
        }
        NodeKind::Match => serde_json::from_value::<MatchParams>(params).map(|p| {
            Predicate::Match {
                target: p.target,
                pattern: p.pattern,
            }
        }),
        NodeKind::And | NodeKind::Or | NodeKind::Not => {
            return Err(tree_error(format!("node {} is not a leaf", node.index)));
        }
    };
    decoded.map_err(|err| {
        tree_error(format!(
            "invalid {} params on node {}: {err}",
            node.kind.as_str(),
            node.index
        ))
    })
}

fn build_node(
    node: &PredicateNode,
    children: &BTreeMap<u32, Vec<&PredicateNode>>,
    visited: &mut usize,
) -> Result<Predicate, PredicateError> {
    *visited += 1;
    let kids: &[&PredicateNode] = children
        .get(&node.index)
        .map(Vec::as_slice)
        .unwrap_or_default();

    match node.kind {
        NodeKind::And => Ok(Predicate::And(
            kids.iter()
                .map(|kid| build_node(kid, children, visited))
                .collect::<Result<_, _>>()?,
        )),
        NodeKind::Or => Ok(Predicate::Or(
            kids.iter()
                .map(|kid| build_node(kid, children, visited))
                .collect::<Result<_, _>>()?,
        )),
        NodeKind::Not => match kids {
            [only] => Ok(Predicate::Not(Box::new(build_node(only, children, visited)?))),
            _ => Err(tree_error(format!(
                "not node {} must have exactly one child, found {}",
                node.index,
                kids.len()
            ))),
        },
        kind if kind.is_leaf() && !kids.is_empty() => Err(tree_error(format!(
            "leaf node {} cannot have children",
            node.index
        ))),
        _ => decode_leaf(node),
    }
}

fn check_depth(depth: usize) -> Result<(), PredicateError> {
    if depth > MAX_PREDICATE_DEPTH {
        return Err(PredicateError::TooDeep {
            depth,
            limit: MAX_PREDICATE_DEPTH,
        });
    }
    Ok(())
}

/// Depth of the record tree under `root`, walked without recursion.
///
/// Stops descending one level past the limit.
fn record_depth(root: &PredicateNode, children: &BTreeMap<u32, Vec<&PredicateNode>>) -> usize {
    let mut deepest = 0;
    let mut pending = vec![(root.index, 1)];
    while let Some((index, level)) = pending.pop() {
        deepest = deepest.max(level);
        if level > MAX_PREDICATE_DEPTH {
            continue;
        }
        if let Some(kids) = children.get(&index) {
            pending.extend(kids.iter().map(|kid| (kid.index, level + 1)));
        }
    }
    deepest
}

fn tree_error(message: String) -> PredicateError {
    PredicateError::InvalidNodeTree(message)
}

fn join(labels: &BTreeSet<String>) -> String {
    labels.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

fn write_call(f: &mut Formatter<'_>, name: &str, children: &[Predicate]) -> std::fmt::Result {
    write!(f, "{name}(")?;
    for (index, child) in children.iter().enumerate() {
        if index > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{child}")?;
    }
    write!(f, ")")
}

fn write_literal(f: &mut Formatter<'_>, value: &AttrValue) -> std::fmt::Result {
    match value {
        AttrValue::Null => write!(f, "null"),
        AttrValue::Bool(value) => write!(f, "{value}"),
        AttrValue::Integer(value) => write!(f, "{value}"),
        AttrValue::Float(value) => write!(f, "{value}"),
        AttrValue::Text(value) => write!(f, "{value:?}"),
        AttrValue::Timestamp(value) => write!(f, "ts({value})"),
    }
}
