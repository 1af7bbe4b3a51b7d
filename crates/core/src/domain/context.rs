use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;

use crate::error::{CoreError, Result};

/// Shared state for one orchestration run.
///
/// Cloning is cheap and every clone sees the same store, so the context can be
/// handed to parallel phase tasks. Writes take the store's write lock; two
/// phases writing the same key concurrently race and the last write wins.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    target: String,
    store: Arc<RwLock<HashMap<String, Value>>>,
}

impl ExecutionContext {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            store: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Like [`new`](Self::new) but rejects a blank target.
    pub fn try_new(target: impl Into<String>) -> Result<Self> {
        let target = target.into();
        let trimmed = target.trim();
        if trimmed.is_empty() {
            return Err(CoreError::Validation("target must not be empty".to_string()));
        }
        Ok(Self::new(trimmed))
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Insert a value, returning the previous one under the same key.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.store
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Copy of the whole store, for reporting.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
