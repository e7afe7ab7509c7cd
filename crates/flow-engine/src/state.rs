//! Scoped key/value state store
//!
//! The store is the only resource mutable by more than one executor.
//! Every scope owns its own async mutex, so access within a single scope
//! is serialized (single writer at a time) even when the calls originate
//! from concurrently-running fan-out branches, while distinct scopes
//! never contend with each other.
//!
//! Reads of absent entries return `Value::Null` rather than erroring;
//! writes are last-write-wins.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::error::{FlowEngineError, Result};

type Scope = Arc<Mutex<HashMap<String, Value>>>;

/// Scoped key/value store with per-scope serialized access
///
/// Cloning is cheap and shares the underlying map, so a store can be
/// handed to every executor of a run (or kept across runs for state
/// scoped beyond a single execution).
#[derive(Clone, Default)]
pub struct StateStore {
    scopes: Arc<RwLock<HashMap<String, Scope>>>,
}

impl StateStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    async fn scope(&self, name: &str) -> Scope {
        {
            let scopes = self.scopes.read().await;
            if let Some(scope) = scopes.get(name) {
                return scope.clone();
            }
        }
        let mut scopes = self.scopes.write().await;
        scopes
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(HashMap::new())))
            .clone()
    }

    /// Read a value; absent keys read as `Value::Null`
    pub async fn read(&self, scope: &str, key: &str) -> Value {
        let scope = self.scope(scope).await;
        let entries = scope.lock().await;
        entries.get(key).cloned().unwrap_or(Value::Null)
    }

    /// Read and deserialize a value; `None` when the key is absent
    pub async fn read_as<T: DeserializeOwned>(&self, scope: &str, key: &str) -> Result<Option<T>> {
        match self.read(scope, key).await {
            Value::Null => Ok(None),
            value => Ok(Some(serde_json::from_value(value)?)),
        }
    }

    /// Write a value (last-write-wins)
    pub async fn write(&self, scope: &str, key: &str, value: Value) {
        let scope = self.scope(scope).await;
        scope.lock().await.insert(key.to_string(), value);
    }

    /// Serialize and write a value
    pub async fn write_as<T: Serialize>(&self, scope: &str, key: &str, value: &T) -> Result<()> {
        let value =
            serde_json::to_value(value).map_err(|e| FlowEngineError::State(e.to_string()))?;
        self.write(scope, key, value).await;
        Ok(())
    }

    /// Run `f` inside the scope's critical section
    ///
    /// Use this for read-modify-write sequences that must not interleave
    /// with other access to the same scope.
    pub async fn update<F, R>(&self, scope: &str, f: F) -> R
    where
        F: FnOnce(&mut HashMap<String, Value>) -> R,
    {
        let scope = self.scope(scope).await;
        let mut entries = scope.lock().await;
        f(&mut entries)
    }

    /// Remove every entry in a scope
    pub async fn clear_scope(&self, scope: &str) {
        let scope = self.scope(scope).await;
        scope.lock().await.clear();
    }

    /// Read-only snapshot of one scope for inspection and debugging
    ///
    /// The scope/key layout is not a stable contract; consumers depending
    /// on specific names are coupled to this implementation.
    pub async fn snapshot(&self, scope: &str) -> HashMap<String, Value> {
        let scope = self.scope(scope).await;
        let entries = scope.lock().await;
        entries.clone()
    }

    /// Names of every scope that has been touched
    pub async fn scope_names(&self) -> Vec<String> {
        let scopes = self.scopes.read().await;
        scopes.keys().cloned().collect()
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore").finish_non_exhaustive()
    }
}
