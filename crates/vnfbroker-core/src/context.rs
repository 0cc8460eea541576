//! Per-request rendering environment.

use serde::Serialize;
use serde_json::{Map, Value};

/// Key/value environment used to render dictionary templates for one request.
///
/// Values are JSON so that nested lookups such as `credentials.username` and
/// JSON-encoding filters work uniformly. A context is built per request and
/// dropped once the response has been produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    values: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Merges every top-level field of a JSON object into the context.
    /// Non-object values are ignored.
    pub fn merge_object(&mut self, object: &Value) {
        if let Value::Object(fields) = object {
            for (key, value) in fields {
                self.values.insert(key.clone(), value.clone());
            }
        }
    }

    /// Serializes `payload` and merges its top-level fields.
    pub fn merge_serialized<T: Serialize>(&mut self, payload: &T) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(payload)?;
        self.merge_object(&value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Resolves a dotted path (`credentials.username`) against the context.
    pub fn lookup<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.values.get(first.as_ref())?;
        for segment in rest {
            current = match current {
                Value::Object(fields) => fields.get(segment.as_ref())?,
                Value::Array(items) => items.get(segment.as_ref().parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }
}
