//! Native query compilation for document stores.
//!
//! Filters compile to a Mongo-style query object (`{"age": {"$gte": 18}}`)
//! and sorts to a single-field sort directive. [`matches_document_query`]
//! evaluates such an object against a record, which is how backends
//! without a native query engine answer them.

use crate::error::{Error, Result};
use crate::filter::{Comparator, Composition, Filter, FilterExpression, FilterTerm};
use crate::sort::{SortExpression, SortNode};
use crate::value::{compare_values, field_value, values_equal};
use crate::{Key, KeyPath};
use regex::RegexBuilder;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;

/// Compile a filter to a native query object.
pub fn to_document_query(filter: &Filter) -> Value {
    match filter {
        Filter::Term(term) => term_query(term),
        Filter::Expression(expr) => expression_query(expr),
    }
}

fn term_query(term: &FilterTerm) -> Value {
    let value = term.value.clone();
    let condition = match term.comparator {
        Comparator::Eq if value.is_object() => json!({"$eq": value}),
        Comparator::Eq => value,
        Comparator::Ne => json!({"$ne": value}),
        Comparator::Gt => json!({"$gt": value}),
        Comparator::Ge => json!({"$gte": value}),
        Comparator::Lt => json!({"$lt": value}),
        Comparator::Le => json!({"$lte": value}),
        Comparator::In => json!({"$in": value}),
        Comparator::NotIn => json!({"$nin": value}),
        Comparator::Like => json!({"$regex": value, "$options": "i"}),
        Comparator::NotLike => json!({"$not": {"$regex": value, "$options": "i"}}),
    };
    let mut query = Map::new();
    query.insert(term.field.clone(), condition);
    Value::Object(query)
}

fn expression_query(expr: &FilterExpression) -> Value {
    let mut nodes = expr.nodes.iter();
    let Some(first) = nodes.next() else {
        return json!({});
    };

    let mut acc = to_document_query(&first.filter);
    for node in nodes {
        let op = match node.composition.unwrap_or(Composition::And) {
            Composition::And => "$and",
            Composition::Or => "$or",
        };
        let next = to_document_query(&node.filter);
        acc = match take_operands(acc, op) {
            Ok(mut operands) => {
                operands.push(next);
                single(op, Value::Array(operands))
            }
            Err(other) => single(op, json!([other, next])),
        };
    }
    acc
}

/// Reuse the operand list of `{op: [...]}` so runs of one operator stay flat.
fn take_operands(query: Value, op: &str) -> std::result::Result<Vec<Value>, Value> {
    match query {
        Value::Object(mut map) if map.len() == 1 && map.contains_key(op) => match map.remove(op) {
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Err(single(op, other)),
            None => Err(Value::Object(map)),
        },
        other => Err(other),
    }
}

fn single(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

/// Compile a sort to a native directive. Document backends sort by one
/// field only.
pub fn to_document_sort(sort: &SortExpression) -> Result<Value> {
    match sort.nodes.as_slice() {
        [] => Ok(json!({})),
        [node] => Ok(single(&node.field, json!(if node.descending { -1 } else { 1 }))),
        nodes => Err(Error::MultiFieldSort(nodes.len())),
    }
}

/// Native query selecting the record with `key`.
pub fn key_query(key_path: &KeyPath, key: &Key) -> Value {
    match (key_path, key) {
        (KeyPath::Compound(paths), Key::Compound(parts)) if paths.len() == parts.len() => {
            let map = paths
                .iter()
                .zip(parts)
                .map(|(path, part)| (path.clone(), part.to_value()))
                .collect::<Map<_, _>>();
            Value::Object(map)
        }
        (KeyPath::Single(path), key) => single(path, key.to_value()),
        // A mismatched compound key selects nothing.
        (KeyPath::Compound(_), _) => json!({"$in": []}),
    }
}

/// Evaluate a native query object against a record.
pub fn matches_document_query(record: &Value, query: &Value) -> bool {
    let Value::Object(clauses) = query else {
        return false;
    };
    clauses.iter().all(|(key, condition)| match key.as_str() {
        "$and" => operands(condition).all(|q| matches_document_query(record, q)),
        "$or" => operands(condition).any(|q| matches_document_query(record, q)),
        "$nor" => !operands(condition).any(|q| matches_document_query(record, q)),
        op if op.starts_with('$') => {
            tracing::debug!(operator = op, "Unsupported top-level query operator");
            false
        }
        field => matches_condition(field_value(record, field), condition),
    })
}

fn operands(condition: &Value) -> impl Iterator<Item = &Value> {
    condition.as_array().into_iter().flatten()
}

fn is_operator_object(condition: &Value) -> bool {
    condition
        .as_object()
        .is_some_and(|map| !map.is_empty() && map.keys().all(|k| k.starts_with('$')))
}

fn matches_condition(actual: Option<&Value>, condition: &Value) -> bool {
    if !is_operator_object(condition) {
        return actual.is_some_and(|a| values_equal(a, condition));
    }
    let Value::Object(ops) = condition else {
        return false;
    };
    ops.iter().all(|(op, operand)| match op.as_str() {
        "$eq" => actual.is_some_and(|a| values_equal(a, operand)),
        "$ne" => !actual.is_some_and(|a| values_equal(a, operand)),
        "$gt" => compare(actual, operand, |o| o == Ordering::Greater),
        "$gte" => compare(actual, operand, |o| o != Ordering::Less),
        "$lt" => compare(actual, operand, |o| o == Ordering::Less),
        "$lte" => compare(actual, operand, |o| o != Ordering::Greater),
        "$in" => actual.is_some_and(|a| operands(operand).any(|v| values_equal(v, a))),
        "$nin" => !actual.is_some_and(|a| operands(operand).any(|v| values_equal(v, a))),
        "$exists" => actual.is_some() == operand.as_bool().unwrap_or(true),
        "$regex" => matches_regex(actual, operand, ops.get("$options")),
        "$options" => true,
        "$not" => !matches_condition(actual, operand),
        other => {
            tracing::debug!(operator = other, "Unsupported query operator");
            false
        }
    })
}

fn compare(actual: Option<&Value>, operand: &Value, accept: fn(Ordering) -> bool) -> bool {
    actual
        .and_then(|a| compare_values(a, operand))
        .is_some_and(accept)
}

fn matches_regex(actual: Option<&Value>, pattern: &Value, options: Option<&Value>) -> bool {
    let (Some(text), Some(pattern)) = (actual.and_then(Value::as_str), pattern.as_str()) else {
        return false;
    };
    let insensitive = options
        .and_then(Value::as_str)
        .is_some_and(|o| o.contains('i'));
    match RegexBuilder::new(pattern).case_insensitive(insensitive).build() {
        Ok(regex) => regex.is_match(text),
        Err(e) => {
            tracing::warn!(pattern, error = %e, "Invalid $regex in query");
            false
        }
    }
}

/// Sort records by a native sort directive.
pub fn apply_document_sort(records: &mut [Value], sort: &Value) {
    let Value::Object(fields) = sort else {
        return;
    };
    let expr = SortExpression {
        nodes: fields
            .iter()
            .map(|(field, direction)| SortNode {
                field: field.clone(),
                descending: direction.as_i64().is_some_and(|d| d < 0),
            })
            .collect(),
    };
    expr.sort(records);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(field: &str, comparator: Comparator, value: Value) -> FilterTerm {
        FilterTerm::new(field, comparator, value)
    }

    #[test]
    fn terms_map_to_operators() {
        let cases = [
            (Comparator::Eq, json!({"age": 30})),
            (Comparator::Ne, json!({"age": {"$ne": 30}})),
            (Comparator::Gt, json!({"age": {"$gt": 30}})),
            (Comparator::Ge, json!({"age": {"$gte": 30}})),
            (Comparator::Lt, json!({"age": {"$lt": 30}})),
            (Comparator::Le, json!({"age": {"$lte": 30}})),
        ];
        for (comparator, expected) in cases {
            let query = to_document_query(&term("age", comparator, json!(30)).into());
            assert_eq!(query, expected, "{comparator:?}");
        }

        let query = to_document_query(&term("name", Comparator::NotLike, json!("^a")).into());
        assert_eq!(
            query,
            json!({"name": {"$not": {"$regex": "^a", "$options": "i"}}})
        );
    }

    #[test]
    fn like_pattern_survives_in_process_compilation() {
        let t = term("name", Comparator::Like, json!("^ad"));
        t.compile().unwrap();
        let query = to_document_query(&Filter::Term(t));
        assert_eq!(query, json!({"name": {"$regex": "^ad", "$options": "i"}}));
    }

    #[test]
    fn chains_compile_as_left_fold() {
        let expr = FilterExpression::new(term("a", Comparator::Eq, json!(1)))
            .and(term("b", Comparator::Eq, json!(2)))
            .and(term("c", Comparator::Eq, json!(3)))
            .or(term("d", Comparator::Eq, json!(4)));
        let query = to_document_query(&expr.into());
        assert_eq!(
            query,
            json!({"$or": [{"$and": [{"a": 1}, {"b": 2}, {"c": 3}]}, {"d": 4}]})
        );
    }

    #[test]
    fn single_field_sorts_only() {
        let sort = SortExpression::new(SortNode::desc("age"));
        assert_eq!(to_document_sort(&sort).unwrap(), json!({"age": -1}));
        assert_eq!(to_document_sort(&SortExpression::default()).unwrap(), json!({}));

        let sort = sort.then_by(SortNode::asc("name"));
        assert_eq!(to_document_sort(&sort), Err(Error::MultiFieldSort(2)));
    }

    #[test]
    fn native_queries_agree_with_predicates() {
        let records = [
            json!({"age": 30, "name": "Ada", "tag": "x"}),
            json!({"age": 17, "name": "bob", "tag": "y"}),
            json!({"age": "old", "name": 5}),
            json!({}),
        ];
        let filters: Vec<Filter> = vec![
            term("age", Comparator::Ge, json!(18)).into(),
            term("age", Comparator::Ne, json!(30)).into(),
            term("tag", Comparator::In, json!(["x", "z"])).into(),
            term("tag", Comparator::NotIn, json!(["x"])).into(),
            term("name", Comparator::Like, json!("^a")).into(),
            term("name", Comparator::NotLike, json!("^a")).into(),
            FilterExpression::new(term("age", Comparator::Lt, json!(18)))
                .or(term("name", Comparator::Eq, json!("Ada")))
                .and(term("tag", Comparator::Ne, json!("y")))
                .into(),
        ];

        for filter in &filters {
            let predicate = filter.compile().unwrap();
            let query = to_document_query(filter);
            for record in &records {
                assert_eq!(
                    predicate(record),
                    matches_document_query(record, &query),
                    "{query} on {record}"
                );
            }
        }
    }

    #[test]
    fn key_queries() {
        assert_eq!(key_query(&KeyPath::from("_id"), &Key::from("k1")), json!({"_id": "k1"}));
        let path = KeyPath::Compound(vec!["a".into(), "b".into()]);
        let key = Key::Compound(vec![Key::Int(1), Key::Int(2)]);
        let query = key_query(&path, &key);
        assert_eq!(query, json!({"a": 1, "b": 2}));
        assert!(matches_document_query(&json!({"a": 1, "b": 2, "c": 3}), &query));
        assert!(!matches_document_query(&json!({"a": 1}), &key_query(&path, &Key::Int(1))));
    }

    #[test]
    fn document_sort_applies_direction() {
        let mut records = vec![json!({"n": 1}), json!({"n": 3}), json!({"n": 2})];
        apply_document_sort(&mut records, &json!({"n": -1}));
        assert_eq!(records, vec![json!({"n": 3}), json!({"n": 2}), json!({"n": 1})]);
    }
}
