//! Record identity: keys, key paths and key ranges.
//!
//! Keys follow the ordering of embedded object stores: every number sorts
//! before every string, and every string before every compound key.

use crate::value::{field_value, set_field_value};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The identity of a record inside a collection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Int(i64),
    Text(String),
    Compound(Vec<Key>),
}

impl Key {
    /// Convert a JSON value into a key. Floats, booleans, null and objects
    /// are not valid keys.
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Number(n) => n.as_i64().map(Key::Int),
            Value::String(s) => Some(Key::Text(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Key::from_value)
                .collect::<Option<Vec<_>>>()
                .map(Key::Compound),
            _ => None,
        }
    }

    /// Convert this key back into its JSON form.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Int(n) => Value::from(*n),
            Key::Text(s) => Value::String(s.clone()),
            Key::Compound(parts) => Value::Array(parts.iter().map(Key::to_value).collect()),
        }
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Int(n)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Text(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Text(s)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(n) => write!(f, "{n}"),
            Key::Text(s) => write!(f, "{s}"),
            Key::Compound(parts) => {
                write!(f, "[")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{part}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Where a record's key lives: one field path, or several for a compound key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPath {
    Single(String),
    Compound(Vec<String>),
}

impl KeyPath {
    /// Extract the key of a record, if every path resolves to a valid key.
    pub fn extract(&self, record: &Value) -> Option<Key> {
        match self {
            KeyPath::Single(path) => field_value(record, path).and_then(Key::from_value),
            KeyPath::Compound(paths) => paths
                .iter()
                .map(|p| field_value(record, p).and_then(Key::from_value))
                .collect::<Option<Vec<_>>>()
                .map(Key::Compound),
        }
    }

    /// Write a generated key into the record. Only single paths accept
    /// generated keys.
    pub fn inject(&self, record: &mut Value, key: &Key) -> bool {
        match self {
            KeyPath::Single(path) => set_field_value(record, path, key.to_value()),
            KeyPath::Compound(_) => false,
        }
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPath::Single(path) => write!(f, "{path}"),
            KeyPath::Compound(paths) => write!(f, "[{}]", paths.join(",")),
        }
    }
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> Self {
        KeyPath::Single(path.to_string())
    }
}

impl From<String> for KeyPath {
    fn from(path: String) -> Self {
        KeyPath::Single(path)
    }
}

/// A contiguous range of keys, bounds optionally open.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<Key>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<Key>,
    #[serde(default)]
    pub lower_open: bool,
    #[serde(default)]
    pub upper_open: bool,
}

impl KeyRange {
    /// A range matching exactly one key.
    pub fn only(key: Key) -> Self {
        Self {
            lower: Some(key.clone()),
            upper: Some(key),
            lower_open: false,
            upper_open: false,
        }
    }

    /// Keys greater than (or equal to, when `open` is false) `key`.
    pub fn lower_bound(key: Key, open: bool) -> Self {
        Self {
            lower: Some(key),
            lower_open: open,
            ..Self::default()
        }
    }

    /// Keys lower than (or equal to, when `open` is false) `key`.
    pub fn upper_bound(key: Key, open: bool) -> Self {
        Self {
            upper: Some(key),
            upper_open: open,
            ..Self::default()
        }
    }

    /// Keys between `lower` and `upper`.
    pub fn bound(lower: Key, upper: Key, lower_open: bool, upper_open: bool) -> Self {
        Self {
            lower: Some(lower),
            upper: Some(upper),
            lower_open,
            upper_open,
        }
    }

    /// Check whether a key falls in the range.
    pub fn contains(&self, key: &Key) -> bool {
        let above = match &self.lower {
            Some(lower) if self.lower_open => key > lower,
            Some(lower) => key >= lower,
            None => true,
        };
        let below = match &self.upper {
            Some(upper) if self.upper_open => key < upper,
            Some(upper) => key <= upper,
            None => true,
        };
        above && below
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn key_ordering_follows_kind() {
        assert!(Key::Int(1_000) < Key::Text("0".into()));
        assert!(Key::Text("zzz".into()) < Key::Compound(vec![Key::Int(0)]));
        assert!(Key::Int(-5) < Key::Int(3));
    }

    #[test]
    fn key_from_json() {
        assert_eq!(Key::from_value(&json!(5)), Some(Key::Int(5)));
        assert_eq!(Key::from_value(&json!("a")), Some(Key::Text("a".into())));
        assert_eq!(
            Key::from_value(&json!([1, "b"])),
            Some(Key::Compound(vec![Key::Int(1), Key::Text("b".into())]))
        );
        assert_eq!(Key::from_value(&json!(1.5)), None);
        assert_eq!(Key::from_value(&json!({"a": 1})), None);
    }

    #[test]
    fn key_serializes_untagged() {
        let key = Key::Compound(vec![Key::Int(1), Key::Text("x".into())]);
        assert_eq!(serde_json::to_value(&key).unwrap(), json!([1, "x"]));
        let parsed: Key = serde_json::from_value(json!(42)).unwrap();
        assert_eq!(parsed, Key::Int(42));
    }

    #[test]
    fn key_path_extract_and_inject() {
        let record = json!({"id": 3, "org": {"slug": "acme"}});
        assert_eq!(KeyPath::from("id").extract(&record), Some(Key::Int(3)));
        assert_eq!(
            KeyPath::Compound(vec!["org.slug".into(), "id".into()]).extract(&record),
            Some(Key::Compound(vec![Key::Text("acme".into()), Key::Int(3)]))
        );
        assert_eq!(KeyPath::from("missing").extract(&record), None);

        let mut fresh = json!({"title": "new"});
        assert!(KeyPath::from("id").inject(&mut fresh, &Key::Int(9)));
        assert_eq!(fresh["id"], json!(9));
        assert!(!KeyPath::Compound(vec!["a".into()]).inject(&mut fresh, &Key::Int(1)));
    }

    #[test]
    fn range_bounds() {
        let range = KeyRange::bound(Key::Int(2), Key::Int(5), true, false);
        assert!(!range.contains(&Key::Int(2)));
        assert!(range.contains(&Key::Int(3)));
        assert!(range.contains(&Key::Int(5)));
        assert!(!range.contains(&Key::Int(6)));

        let only = KeyRange::only(Key::Text("a".into()));
        assert!(only.contains(&Key::Text("a".into())));
        assert!(!only.contains(&Key::Text("b".into())));

        assert!(KeyRange::default().contains(&Key::Int(i64::MIN)));
    }

    proptest! {
        #[test]
        fn only_range_contains_exactly_its_key(a in any::<i64>(), b in any::<i64>()) {
            let range = KeyRange::only(Key::Int(a));
            prop_assert_eq!(range.contains(&Key::Int(b)), a == b);
        }

        #[test]
        fn int_keys_round_trip_through_json(n in any::<i64>()) {
            let key = Key::Int(n);
            prop_assert_eq!(Key::from_value(&key.to_value()), Some(key));
        }
    }
}
