// Execution Context - the checkpoint attached to job and step executions

use crate::domain::error::{DomainError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tagged checkpoint value. `Object` holds an opaque serialized payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContextValue {
    String(String),
    Long(i64),
    Double(f64),
    Object(serde_json::Value),
}

impl ContextValue {
    /// Type tag as stored by durable repositories
    pub fn type_tag(&self) -> &'static str {
        match self {
            ContextValue::String(_) => "STRING",
            ContextValue::Long(_) => "LONG",
            ContextValue::Double(_) => "DOUBLE",
            ContextValue::Object(_) => "OBJECT",
        }
    }
}

/// Flat key -> value mapping persisted with its owning execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    entries: BTreeMap<String, ContextValue>,
    #[serde(skip)]
    dirty: bool,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, value: ContextValue) {
        let key = key.into();
        if self.entries.get(&key) != Some(&value) {
            self.entries.insert(key, value);
            self.dirty = true;
        }
    }

    pub fn put_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.put(key, ContextValue::String(value.into()));
    }

    pub fn put_long(&mut self, key: impl Into<String>, value: i64) {
        self.put(key, ContextValue::Long(value));
    }

    pub fn put_double(&mut self, key: impl Into<String>, value: f64) {
        self.put(key, ContextValue::Double(value));
    }

    /// Store any serializable value as an opaque object
    pub fn put_object<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> std::result::Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.put(key, ContextValue::Object(value));
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.entries.get(key)
    }

    pub fn get_string(&self, key: &str) -> Result<Option<&str>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(ContextValue::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(mismatch(key, "string")),
        }
    }

    pub fn get_long(&self, key: &str) -> Result<Option<i64>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(ContextValue::Long(v)) => Ok(Some(*v)),
            Some(_) => Err(mismatch(key, "long")),
        }
    }

    pub fn get_double(&self, key: &str) -> Result<Option<f64>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(ContextValue::Double(v)) => Ok(Some(*v)),
            Some(_) => Err(mismatch(key, "double")),
        }
    }

    pub fn get_object<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(ContextValue::Object(v)) => serde_json::from_value(v.clone())
                .map(Some)
                .map_err(|_| mismatch(key, "decodable object")),
            Some(_) => Err(mismatch(key, "object")),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<ContextValue> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ContextValue)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when modified since the last `clear_dirty`
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

// The dirty flag is bookkeeping, not content
impl PartialEq for ExecutionContext {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl FromIterator<(String, ContextValue)> for ExecutionContext {
    fn from_iter<I: IntoIterator<Item = (String, ContextValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
            dirty: false,
        }
    }
}

fn mismatch(key: &str, expected: &'static str) -> DomainError {
    DomainError::ContextTypeMismatch {
        key: key.to_string(),
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_marks_dirty_only_on_change() {
        let mut ctx = ExecutionContext::new();
        ctx.put_long("offset", 3);
        assert!(ctx.is_dirty());
        ctx.clear_dirty();
        ctx.put_long("offset", 3);
        assert!(!ctx.is_dirty());
        ctx.put_long("offset", 4);
        assert!(ctx.is_dirty());
    }

    #[test]
    fn test_typed_getters_reject_wrong_type() {
        let mut ctx = ExecutionContext::new();
        ctx.put_string("name", "a");
        assert_eq!(ctx.get_string("name").unwrap(), Some("a"));
        assert!(ctx.get_long("name").is_err());
        assert_eq!(ctx.get_long("missing").unwrap(), None);
    }

    #[test]
    fn test_object_values() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Cursor {
            resource: usize,
            offset: u64,
        }

        let mut ctx = ExecutionContext::new();
        ctx.put_object("cursor", &Cursor { resource: 3, offset: 117 })
            .unwrap();
        let cursor: Cursor = ctx.get_object("cursor").unwrap().unwrap();
        assert_eq!(cursor, Cursor { resource: 3, offset: 117 });
    }
}
