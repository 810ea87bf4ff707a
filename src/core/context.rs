//! Per-transaction step context.
//!
//! A scratch space shared by every step of one transaction. Expensive lookups
//! (inventory queries, tenant data, the target entity) are stored here once
//! and read back by later steps. Only the thread draining the owning
//! manager's work queue touches it, so it carries no lock.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Errors raised by context lookups
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("missing property {0}")]
    MissingProperty(String),

    #[error("property {key} has an unexpected shape: {source}")]
    WrongType {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Key/value store for one transaction
#[derive(Debug, Clone, Default)]
pub struct StepContext {
    properties: HashMap<String, Value>,
}

impl StepContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    /// Raw value for `key`
    pub fn get_property(&self, key: &str) -> Result<&Value, ContextError> {
        self.properties
            .get(key)
            .ok_or_else(|| ContextError::MissingProperty(key.to_string()))
    }

    /// Typed value for `key`
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, ContextError> {
        let value = self.get_property(key)?;
        serde_json::from_value(value.clone()).map_err(|source| ContextError::WrongType {
            key: key.to_string(),
            source,
        })
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: Value) {
        self.properties.insert(key.into(), value);
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_property_fails() {
        let ctx = StepContext::new();
        let err = ctx.get_property("AAI/targetEntity").unwrap_err();
        assert_eq!(err.to_string(), "missing property AAI/targetEntity");
    }

    #[test]
    fn test_typed_access() {
        let mut ctx = StepContext::new();
        ctx.set_property("data/vfCount", json!(3));
        ctx.set_property("AAI/targetEntity", json!("vnf-1"));

        assert_eq!(ctx.get_as::<i64>("data/vfCount").unwrap(), 3);
        assert_eq!(ctx.get_str("AAI/targetEntity"), Some("vnf-1"));
        assert!(matches!(
            ctx.get_as::<i64>("AAI/targetEntity"),
            Err(ContextError::WrongType { .. })
        ));
    }

    #[test]
    fn test_overwrite() {
        let mut ctx = StepContext::new();
        ctx.set_property("k", json!("v"));
        ctx.set_property("k", json!("w"));
        assert!(ctx.contains("k"));
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx.get_str("k"), Some("w"));
    }
}
