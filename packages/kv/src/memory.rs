use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::backend::{validate_key, KvBackend};
use crate::error::Result;
use crate::scope::ScopeKey;

/// Process-local backend. Values vanish with the process.
#[derive(Default)]
pub struct InMemoryKv {
    scopes: Mutex<BTreeMap<ScopeKey, BTreeMap<String, Value>>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys stored in a scope.
    pub async fn scope_len(&self, scope: &ScopeKey) -> usize {
        self.scopes.lock().await.get(scope).map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl KvBackend for InMemoryKv {
    async fn get(&self, scope: &ScopeKey, key: &str) -> Result<Option<Value>> {
        validate_key(key)?;
        let scopes = self.scopes.lock().await;
        Ok(scopes.get(scope).and_then(|values| values.get(key)).cloned())
    }

    async fn set(&self, scope: &ScopeKey, key: &str, value: Value) -> Result<()> {
        validate_key(key)?;
        self.scopes
            .lock()
            .await
            .entry(scope.clone())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, scope: &ScopeKey, key: &str) -> Result<bool> {
        validate_key(key)?;
        let mut scopes = self.scopes.lock().await;
        let Some(values) = scopes.get_mut(scope) else {
            return Ok(false);
        };
        let existed = values.remove(key).is_some();
        if values.is_empty() {
            scopes.remove(scope);
        }
        Ok(existed)
    }
}
