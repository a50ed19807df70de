//! Multi-key record sorting.
//!
//! Each node is applied as a complete sort pass over the whole slice,
//! never as a tie-break. Passes run from the last node to the first, so
//! the first node ends up most significant. This only yields a correct
//! multi-key order when the pass primitive is stable: an unstable pass is
//! free to undo the ordering left by the previous one.

use crate::value::{field_value, sort_order};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Sort by one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortNode {
    pub field: String,
    #[serde(default)]
    pub descending: bool,
}

impl SortNode {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }

    /// Compare two records by this node's field and direction.
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        let order = sort_order(field_value(a, &self.field), field_value(b, &self.field));
        if self.descending {
            order.reverse()
        } else {
            order
        }
    }
}

/// An ordered chain of sort nodes, most significant first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SortExpression {
    pub nodes: Vec<SortNode>,
}

impl SortExpression {
    pub fn new(node: SortNode) -> Self {
        Self { nodes: vec![node] }
    }

    /// Append a less significant sort.
    pub fn then_by(mut self, node: SortNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Sort `records` with the standard library's stable sort.
    pub fn sort(&self, records: &mut [Value]) {
        self.sort_with(records, |slice, cmp| slice.sort_by(cmp));
    }

    /// Sort `records` with a caller-supplied pass primitive, one full pass
    /// per node.
    pub fn sort_with<F>(&self, records: &mut [Value], mut pass: F)
    where
        F: FnMut(&mut [Value], &dyn Fn(&Value, &Value) -> Ordering),
    {
        for node in self.nodes.iter().rev() {
            pass(records, &|a, b| node.compare(a, b));
        }
    }
}

impl From<SortNode> for SortExpression {
    fn from(node: SortNode) -> Self {
        Self::new(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn people() -> Vec<Value> {
        vec![
            json!({"age": 2, "name": "b"}),
            json!({"age": 1, "name": "z"}),
            json!({"age": 1, "name": "a"}),
        ]
    }

    fn by_age_then_name() -> SortExpression {
        SortExpression::new(SortNode::asc("age")).then_by(SortNode::asc("name"))
    }

    /// A pass that orders correctly but reverses every run of ties.
    fn tie_reversing_pass(slice: &mut [Value], cmp: &dyn Fn(&Value, &Value) -> Ordering) {
        slice.sort_by(|a, b| cmp(a, b));
        let mut start = 0;
        while start < slice.len() {
            let mut end = start + 1;
            while end < slice.len() && cmp(&slice[start], &slice[end]) == Ordering::Equal {
                end += 1;
            }
            slice[start..end].reverse();
            start = end;
        }
    }

    #[test]
    fn stable_passes_give_first_field_major_order() {
        let mut records = people();
        by_age_then_name().sort(&mut records);
        assert_eq!(
            records,
            vec![
                json!({"age": 1, "name": "a"}),
                json!({"age": 1, "name": "z"}),
                json!({"age": 2, "name": "b"}),
            ]
        );
    }

    #[test]
    fn unstable_pass_breaks_multi_key_order() {
        let mut records = people();
        by_age_then_name().sort_with(&mut records, tie_reversing_pass);
        assert_eq!(
            records,
            vec![
                json!({"age": 1, "name": "z"}),
                json!({"age": 1, "name": "a"}),
                json!({"age": 2, "name": "b"}),
            ]
        );
    }

    #[test]
    fn descending_and_missing_fields() {
        let mut records = vec![json!({"n": 1}), json!({}), json!({"n": 3})];
        SortExpression::new(SortNode::desc("n")).sort(&mut records);
        assert_eq!(records, vec![json!({"n": 3}), json!({"n": 1}), json!({})]);
    }

    #[test]
    fn serializes_as_node_array() {
        let value = serde_json::to_value(by_age_then_name()).unwrap();
        assert_eq!(
            value,
            json!([{"field": "age", "descending": false}, {"field": "name", "descending": false}])
        );
        let parsed: SortExpression = serde_json::from_value(json!([{"field": "x"}])).unwrap();
        assert_eq!(parsed, SortExpression::new(SortNode::asc("x")));
    }
}
