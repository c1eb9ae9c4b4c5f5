use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::backend::{validate_key, KvBackend};
use crate::error::{Error, Result};
use crate::scope::ScopeKey;

type ScopeValues = BTreeMap<String, Value>;

/// Backend storing one JSON object per scope under a root directory.
///
/// File names are the scope's [`encoded`](ScopeKey::encoded) form, so no
/// scope component can escape the root. Writes go through a temporary file
/// and a rename.
pub struct JsonFileKv {
    root: PathBuf,
    // Serializes read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl JsonFileKv {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let invalid = |message: String| Error::InvalidRoot {
            path: root.display().to_string(),
            message,
        };

        let attr = std::fs::metadata(&root).map_err(|err| invalid(err.to_string()))?;
        if !attr.is_dir() {
            return Err(invalid("root path must be a directory".into()));
        }
        if attr.permissions().readonly() {
            return Err(invalid("root directory must be writable".into()));
        }
        let root = root.canonicalize().map_err(|err| invalid(err.to_string()))?;

        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Create the root directory if needed, then open it.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding a scope's values.
    pub fn scope_file(&self, scope: &ScopeKey) -> PathBuf {
        self.root.join(format!("{}.json", scope.encoded()))
    }

    async fn read_scope(&self, scope: &ScopeKey) -> Result<ScopeValues> {
        match tokio::fs::read(self.scope_file(scope)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(ScopeValues::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn write_scope(&self, scope: &ScopeKey, values: &ScopeValues) -> Result<()> {
        let path = self.scope_file(scope);
        if values.is_empty() {
            return match tokio::fs::remove_file(&path).await {
                Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err.into()),
                _ => Ok(()),
            };
        }

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(values)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl KvBackend for JsonFileKv {
    async fn get(&self, scope: &ScopeKey, key: &str) -> Result<Option<Value>> {
        validate_key(key)?;
        let mut values = self.read_scope(scope).await?;
        Ok(values.remove(key))
    }

    async fn set(&self, scope: &ScopeKey, key: &str, value: Value) -> Result<()> {
        validate_key(key)?;
        let _guard = self.write_lock.lock().await;
        let mut values = self.read_scope(scope).await?;
        values.insert(key.to_string(), value);
        self.write_scope(scope, &values).await?;
        tracing::trace!(%scope, key, "stored value");
        Ok(())
    }

    async fn delete(&self, scope: &ScopeKey, key: &str) -> Result<bool> {
        validate_key(key)?;
        let _guard = self.write_lock.lock().await;
        let mut values = self.read_scope(scope).await?;
        if values.remove(key).is_none() {
            return Ok(false);
        }
        self.write_scope(scope, &values).await?;
        Ok(true)
    }
}
