//! Filter expressions over JSON records.
//!
//! A [`FilterExpression`] is an ordered chain of nodes, each holding a term
//! or a nested expression and the operator joining it to everything before
//! it. Evaluation is a strict left fold: `a.and(b).or(c)` reads as
//! `((a AND b) OR c)` with no precedence between `AND` and `OR`.
//!
//! ```
//! use rtdb_engine::{Comparator, FilterExpression, FilterTerm};
//! use serde_json::json;
//!
//! let adults_or_admins = FilterExpression::new(FilterTerm::new("age", Comparator::Ge, 18))
//!     .or(FilterTerm::new("role", Comparator::Eq, "admin"));
//! let matches = adults_or_admins.compile().unwrap();
//! assert!(matches(&json!({"age": 12, "role": "admin"})));
//! assert!(!matches(&json!({"age": 12, "role": "user"})));
//! ```

use crate::error::{Error, Result};
use crate::value::{compare_values, field_value, values_equal};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::OnceLock;

/// A compiled in-process filter.
pub type Predicate = Box<dyn Fn(&Value) -> bool + Send + Sync>;

/// Comparison applied by a [`FilterTerm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Comparator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    In,
    NotIn,
    Like,
    NotLike,
}

impl Comparator {
    pub fn is_pattern(self) -> bool {
        matches!(self, Comparator::Like | Comparator::NotLike)
    }
}

/// `field <comparator> value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterTerm {
    pub field: String,
    pub comparator: Comparator,
    pub value: Value,
    /// Compiled form of a LIKE pattern, built on first use. `value` keeps
    /// the source pattern.
    #[serde(skip)]
    pattern: OnceLock<Regex>,
}

impl PartialEq for FilterTerm {
    fn eq(&self, other: &Self) -> bool {
        self.field == other.field && self.comparator == other.comparator && self.value == other.value
    }
}

impl FilterTerm {
    pub fn new(field: impl Into<String>, comparator: Comparator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            comparator,
            value: value.into(),
            pattern: OnceLock::new(),
        }
    }

    /// Case-insensitive matcher for a LIKE/NOT_LIKE value, compiled once.
    pub fn pattern(&self) -> Result<&Regex> {
        if let Some(regex) = self.pattern.get() {
            return Ok(regex);
        }
        let source = self.value.as_str().ok_or_else(|| Error::InvalidPattern {
            pattern: self.value.to_string(),
            reason: "pattern must be a string".into(),
        })?;
        let regex = RegexBuilder::new(source)
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::InvalidPattern {
                pattern: source.to_string(),
                reason: e.to_string(),
            })?;
        Ok(self.pattern.get_or_init(move || regex))
    }

    /// Whether the pattern has been compiled yet.
    pub fn is_pattern_cached(&self) -> bool {
        self.pattern.get().is_some()
    }

    /// Compile to an in-process predicate.
    pub fn compile(&self) -> Result<Predicate> {
        let field = self.field.clone();
        let expected = self.value.clone();

        let predicate: Predicate = match self.comparator {
            Comparator::Eq => Box::new(move |r| equals(r, &field, &expected)),
            Comparator::Ne => Box::new(move |r| !equals(r, &field, &expected)),
            Comparator::Gt => ordering(field, expected, |o| o == Ordering::Greater),
            Comparator::Ge => ordering(field, expected, |o| o != Ordering::Less),
            Comparator::Lt => ordering(field, expected, |o| o == Ordering::Less),
            Comparator::Le => ordering(field, expected, |o| o != Ordering::Greater),
            Comparator::In => Box::new(move |r| member(r, &field, &expected)),
            Comparator::NotIn => Box::new(move |r| !member(r, &field, &expected)),
            Comparator::Like => {
                let regex = self.pattern()?.clone();
                Box::new(move |r| like(r, &field, &regex))
            }
            Comparator::NotLike => {
                let regex = self.pattern()?.clone();
                Box::new(move |r| !like(r, &field, &regex))
            }
        };
        Ok(predicate)
    }
}

fn ordering(field: String, expected: Value, accept: fn(Ordering) -> bool) -> Predicate {
    Box::new(move |r| {
        field_value(r, &field)
            .and_then(|actual| compare_values(actual, &expected))
            .is_some_and(accept)
    })
}

fn equals(record: &Value, field: &str, expected: &Value) -> bool {
    field_value(record, field).is_some_and(|actual| values_equal(actual, expected))
}

fn member(record: &Value, field: &str, set: &Value) -> bool {
    match (field_value(record, field), set) {
        (Some(actual), Value::Array(items)) => items.iter().any(|item| values_equal(item, actual)),
        _ => false,
    }
}

fn like(record: &Value, field: &str, regex: &Regex) -> bool {
    field_value(record, field)
        .and_then(Value::as_str)
        .is_some_and(|s| regex.is_match(s))
}

/// How a node joins the nodes before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Composition {
    And,
    Or,
}

/// A term or a nested expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Filter {
    Term(FilterTerm),
    Expression(FilterExpression),
}

impl Filter {
    pub fn compile(&self) -> Result<Predicate> {
        match self {
            Filter::Term(term) => term.compile(),
            Filter::Expression(expr) => expr.compile(),
        }
    }
}

impl From<FilterTerm> for Filter {
    fn from(term: FilterTerm) -> Self {
        Filter::Term(term)
    }
}

impl From<FilterExpression> for Filter {
    fn from(expr: FilterExpression) -> Self {
        Filter::Expression(expr)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterNode {
    /// Ignored on the first node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composition: Option<Composition>,
    pub filter: Filter,
}

/// An ordered, left-folded chain of filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterExpression {
    pub nodes: Vec<FilterNode>,
}

impl FilterExpression {
    /// Start a chain with one filter.
    pub fn new(filter: impl Into<Filter>) -> Self {
        Self {
            nodes: vec![FilterNode {
                composition: None,
                filter: filter.into(),
            }],
        }
    }

    pub fn and(self, filter: impl Into<Filter>) -> Self {
        self.push(Composition::And, filter.into())
    }

    pub fn or(self, filter: impl Into<Filter>) -> Self {
        self.push(Composition::Or, filter.into())
    }

    fn push(mut self, composition: Composition, filter: Filter) -> Self {
        self.nodes.push(FilterNode {
            composition: Some(composition),
            filter,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Compile the chain. An empty chain accepts every record.
    pub fn compile(&self) -> Result<Predicate> {
        let mut nodes = self.nodes.iter();
        let Some(first) = nodes.next() else {
            return Ok(Box::new(|_| true));
        };

        let mut acc = first.filter.compile()?;
        for node in nodes {
            let next = node.filter.compile()?;
            acc = match node.composition.unwrap_or(Composition::And) {
                Composition::And => Box::new(move |r| acc(r) && next(r)),
                Composition::Or => Box::new(move |r| acc(r) || next(r)),
            };
        }
        Ok(acc)
    }
}
