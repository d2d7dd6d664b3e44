//! Discovery fields of a protocol session.
//!
//! A few well-known keys are kept typed; everything else lives in an open
//! string-keyed map. Merging overwrites keys present in the update and never
//! removes keys it does not mention.

use serde_json::{Map, Value};

// ============================================================================
// Constants
// ============================================================================

/// Discovery key for the protocol name.
pub const NAME_KEY: &str = "NAME";

/// Discovery key for the protocol type.
pub const TYPE_KEY: &str = "TYPE";

/// Discovery key for the protocol version.
pub const VERSION_KEY: &str = "VERSION";

// ============================================================================
// Fields
// ============================================================================

/// Descriptor fields accumulated from discovery.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields {
    name: Option<String>,
    kind: Option<String>,
    version: Option<String>,
    extra: Map<String, Value>,
}

impl Fields {
    /// Creates an empty field set.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reported protocol name (`NAME`).
    #[inline]
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Reported protocol type (`TYPE`).
    #[inline]
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    /// Reported protocol version (`VERSION`).
    #[inline]
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Sets one field, overwriting any previous value.
    ///
    /// Well-known keys with scalar values are stored typed; any other shape
    /// is kept verbatim in the open map.
    pub fn set(&mut self, key: &str, value: Value) {
        let slot = match key {
            NAME_KEY => &mut self.name,
            TYPE_KEY => &mut self.kind,
            VERSION_KEY => &mut self.version,
            _ => {
                self.extra.insert(key.to_string(), value);
                return;
            }
        };

        match scalar_text(&value) {
            Some(text) => {
                *slot = Some(text);
                self.extra.remove(key);
            }
            None => {
                *slot = None;
                self.extra.insert(key.to_string(), value);
            }
        }
    }

    /// Merges every entry of `update` into the field set.
    pub fn merge(&mut self, update: &Map<String, Value>) {
        for (key, value) in update {
            self.set(key, value.clone());
        }
    }

    /// Returns the value of any field by its discovery key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        let typed = match key {
            NAME_KEY => &self.name,
            TYPE_KEY => &self.kind,
            VERSION_KEY => &self.version,
            _ => return self.extra.get(key).cloned(),
        };
        typed
            .clone()
            .map(Value::String)
            .or_else(|| self.extra.get(key).cloned())
    }

    /// Returns `true` if `key` has a value.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Discovery keys that currently have a value.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let typed = [
            (NAME_KEY, &self.name),
            (TYPE_KEY, &self.kind),
            (VERSION_KEY, &self.version),
        ];
        typed
            .into_iter()
            .filter(|(_, value)| value.is_some())
            .map(|(key, _)| key.to_string())
            .chain(self.extra.keys().cloned())
            .collect()
    }

    /// Number of fields with a value.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys().len()
    }

    /// Returns `true` if no field has a value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Renders every field back into a JSON object.
    #[must_use]
    pub fn to_map(&self) -> Map<String, Value> {
        self.keys()
            .into_iter()
            .filter_map(|key| self.get(&key).map(|value| (key, value)))
            .collect()
    }
}

/// Text form of a scalar, or `None` for null and containers.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

// ============================================================================
// Tests
// ============================================================================
