//! Topic descriptors and their canonical keys.
//!
//! A [`Topics`] value addresses a message: an unordered mapping such as
//! `{TO: "P", FROM: "UI", MSG_TYPE: "COMMAND"}`. Routing never compares
//! descriptors directly; it compares their canonical string form
//! ([`TopicKey`]), produced by [`encode`].
//!
//! # Encoding Rules
//!
//! Applied recursively:
//!
//! | Value | Rendering |
//! |-------|-----------|
//! | string | quoted, JSON-escaped literal |
//! | number | numeric literal (`1.0` renders as `1`) |
//! | bool / null | `true`, `false`, `null` |
//! | array | elements sorted by their string conversion, `[a,b]` |
//! | mapping | keys in code-point order, `{"k":v,...}` |
//!
//! Arrays are sorted before rendering, so `[2,1]` and `[1,2]` share a key.
//! Brokers in the field rely on that, so it is kept even though it drops
//! positional meaning.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::{Error, Result};

// ============================================================================
// Topics
// ============================================================================

/// A structured topic descriptor.
///
/// Thin wrapper over a JSON object. Key order is irrelevant for routing.
///
/// # Example
///
/// ```
/// use parlay_link::Topics;
///
/// let a = Topics::new().with("TO", "P").with("FROM", "UI");
/// let b = Topics::new().with("FROM", "UI").with("TO", "P");
/// assert_eq!(a.key(), b.key());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topics(Map<String, Value>);

impl Topics {
    /// Creates an empty descriptor.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Adds a key/value pair, returning the descriptor.
    #[inline]
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Inserts a key/value pair, returning the previous value.
    #[inline]
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Returns the value stored under `key`.
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns the string value stored under `key`.
    #[inline]
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Returns `true` if `key` is present.
    #[inline]
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Returns a copy of `self` with every pair of `other` written over it.
    #[must_use]
    pub fn merged(&self, other: &Topics) -> Topics {
        let mut merged = self.clone();
        for (key, value) in &other.0 {
            merged.0.insert(key.clone(), value.clone());
        }
        merged
    }

    /// Returns the number of keys.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no keys.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the underlying JSON object.
    #[inline]
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consumes the descriptor, returning the JSON object.
    #[inline]
    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Returns the canonical routing key for this descriptor.
    #[inline]
    #[must_use]
    pub fn key(&self) -> TopicKey {
        encode(self)
    }
}

impl From<Map<String, Value>> for Topics {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Topics {
    type Error = Error;

    /// Accepts only JSON objects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for any non-object value.
    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::invalid_argument(format!(
                "topics must be a mapping, got {}",
                json_kind(&other)
            ))),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Topics {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

// ============================================================================
// TopicKey
// ============================================================================

/// Canonical string form of a [`Topics`] descriptor.
///
/// Two descriptors with the same key/value content always produce the same
/// key, whatever order their keys were inserted in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicKey(String);

impl TopicKey {
    /// Returns the key as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Canonicalizes a topic descriptor into its routing key.
///
/// Total and side-effect free.
#[must_use]
pub fn encode(topics: &Topics) -> TopicKey {
    let mut out = String::with_capacity(topics.len() * 16);
    write_object(&mut out, topics.as_map());
    TopicKey(out)
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::String(s) => write_string(out, s),
        Value::Number(n) => out.push_str(&number_literal(n)),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Null => out.push_str("null"),
        Value::Array(items) => write_array(out, items),
        Value::Object(map) => write_object(out, map),
    }
}

fn write_object(out: &mut String, map: &Map<String, Value>) {
    // serde_json may be built with `preserve_order`, so never trust map order.
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_unstable_by(|a, b| a.0.cmp(b.0));

    out.push('{');
    for (index, (key, value)) in entries.into_iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        write_string(out, key);
        out.push(':');
        write_value(out, value);
    }
    out.push('}');
}

fn write_array(out: &mut String, items: &[Value]) {
    let mut sorted: Vec<(String, &Value)> =
        items.iter().map(|item| (sort_key(item), item)).collect();
    // Stable: elements with equal sort keys keep their original order.
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    out.push('[');
    for (index, (_, item)) in sorted.into_iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        write_value(out, item);
    }
    out.push(']');
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Renders a number the way the broker does: integral floats lose `.0`.
fn number_literal(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f == 0.0 => "0".to_string(),
        Some(f) if f.fract() == 0.0 && f.abs() < 1e21 => format!("{f:.0}"),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

/// String conversion used to order array elements.
fn sort_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => number_literal(n),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => sort_key(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "mapping",
    }
}

// ============================================================================
// Tests
// ============================================================================
