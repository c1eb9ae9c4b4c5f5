use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::scope::ScopeKey;

/// Longest key, in bytes, a backend accepts.
pub const MAX_KEY_LEN: usize = 512;

/// Storage for Block key/value pairs.
///
/// Every operation names the [`ScopeKey`] it acts in; backends keep scopes
/// fully separate. Values are arbitrary JSON.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Read a value. Absent keys are `Ok(None)`, not an error.
    async fn get(&self, scope: &ScopeKey, key: &str) -> Result<Option<Value>>;

    /// Write a value, replacing any previous one.
    async fn set(&self, scope: &ScopeKey, key: &str, value: Value) -> Result<()>;

    /// Remove a value. Returns whether the key existed.
    async fn delete(&self, scope: &ScopeKey, key: &str) -> Result<bool>;
}

pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(Error::InvalidKey {
            key: key.chars().take(64).collect(),
        });
    }
    Ok(())
}
