//! Host configuration.
//!
//! Loaded from TOML with `${ENV_VAR}` expansion:
//!
//! ```toml
//! max_instances = 64
//!
//! [bundle]
//! freshness_secs = 300
//! allowed_imports = ["react", "react-dom", "@primer/react"]
//!
//! [timeouts]
//! data_secs = 10
//! storage_secs = 10
//! mutation_secs = 300
//!
//! [commit]
//! policy = "check-base"
//!
//! [store]
//! dir = "${HOME}/.local/share/blockframe/store"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use blockframe_bundle::{ImportGuard, DEFAULT_ALLOWED_IMPORTS, DEFAULT_API_BASE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mutation::CommitPolicy;
use crate::rpc::TimeoutPolicy;

/// Errors from config parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Configuration for a host session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Maximum number of attached execution contexts.
    pub max_instances: usize,

    /// Buffer size of the shared sandbox-to-host queue.
    pub channel_capacity: usize,

    pub bundle: BundleConfig,
    pub timeouts: TimeoutConfig,
    pub commit: CommitConfig,
    pub github: GithubConfig,
    pub store: StoreConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_instances: 1024,
            channel_capacity: 64,
            bundle: BundleConfig::default(),
            timeouts: TimeoutConfig::default(),
            commit: CommitConfig::default(),
            github: GithubConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleConfig {
    /// How long a resolved bundle is reused.
    pub freshness_secs: u64,
    /// Module names Block code may import.
    pub allowed_imports: Vec<String>,
    /// API base used to look up release artifacts.
    pub api_base: String,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            freshness_secs: 300,
            allowed_imports: DEFAULT_ALLOWED_IMPORTS
                .iter()
                .map(|name| name.to_string())
                .collect(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

/// Per-category request windows, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub data_secs: u64,
    pub storage_secs: u64,
    pub mutation_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        let policy = TimeoutPolicy::default();
        Self {
            data_secs: policy.data.as_secs(),
            storage_secs: policy.storage.as_secs(),
            mutation_secs: policy.mutation.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitConfig {
    pub policy: CommitPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    pub api_base: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory for the on-disk key/value backend. In-memory when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl HostConfig {
    /// Parse a config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: HostConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string, expanding `${ENV_VAR}` references.
    pub fn from_toml_with_env(toml_str: &str) -> Result<Self, ConfigError> {
        Self::from_toml(&expand_env_vars(toml_str))
    }

    /// Load config from a file path, expanding environment variables.
    pub fn from_file_with_env(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_with_env(&content)
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|err| ConfigError::Invalid(err.to_string()))
    }

    pub fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy {
            data: Duration::from_secs(self.timeouts.data_secs),
            storage: Duration::from_secs(self.timeouts.storage_secs),
            mutation: Duration::from_secs(self.timeouts.mutation_secs),
        }
    }

    pub fn bundle_freshness(&self) -> Duration {
        Duration::from_secs(self.bundle.freshness_secs)
    }

    pub fn import_guard(&self) -> ImportGuard {
        ImportGuard::new(self.bundle.allowed_imports.iter().cloned())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_instances == 0 {
            return Err(ConfigError::Invalid("max_instances must be > 0".into()));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid("channel_capacity must be > 0".into()));
        }
        for (name, secs) in [
            ("data_secs", self.timeouts.data_secs),
            ("storage_secs", self.timeouts.storage_secs),
            ("mutation_secs", self.timeouts.mutation_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::Invalid(format!("timeouts.{name} must be > 0")));
            }
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns using the process environment. Unknown
/// variables are left in place.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' || chars.peek() != Some(&'{') {
            result.push(ch);
            continue;
        }
        chars.next();
        let mut name = String::new();
        for c in chars.by_ref() {
            if c == '}' {
                break;
            }
            name.push(c);
        }
        match std::env::var(&name) {
            Ok(value) => result.push_str(&value),
            Err(_) => result.push_str(&format!("${{{name}}}")),
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = HostConfig::default();
        assert_eq!(config.max_instances, 1024);
        assert_eq!(config.commit.policy, CommitPolicy::LastWriteWins);
        assert_eq!(config.timeout_policy(), TimeoutPolicy::default());
        assert!(config.import_guard().is_allowed("react"));
    }

    #[test]
    fn parses_partial_toml() {
        let config = HostConfig::from_toml(
            r#"
            max_instances = 8

            [timeouts]
            data_secs = 3

            [commit]
            policy = "check-base"
            "#,
        )
        .unwrap();
        assert_eq!(config.max_instances, 8);
        assert_eq!(config.timeouts.data_secs, 3);
        assert_eq!(config.timeouts.mutation_secs, 300);
        assert_eq!(config.commit.policy, CommitPolicy::CheckBase);
        assert_eq!(config.timeout_policy().data, Duration::from_secs(3));
    }

    #[test]
    fn rejects_zero_timeouts() {
        let err = HostConfig::from_toml("[timeouts]\nstorage_secs = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("storage_secs")));
    }

    #[test]
    fn rejects_unknown_policy() {
        let err = HostConfig::from_toml("[commit]\npolicy = \"merge\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn expands_env_vars() {
        std::env::set_var("BLOCKFRAME_TEST_STORE_DIR", "/tmp/bf-store");
        let config =
            HostConfig::from_toml_with_env("[store]\ndir = \"${BLOCKFRAME_TEST_STORE_DIR}\"\n")
                .unwrap();
        assert_eq!(config.store.dir, Some(PathBuf::from("/tmp/bf-store")));
    }

    #[test]
    fn unknown_env_vars_are_left_alone() {
        assert_eq!(
            expand_env_vars("a ${BLOCKFRAME_SURELY_UNSET_VAR} b"),
            "a ${BLOCKFRAME_SURELY_UNSET_VAR} b"
        );
    }

    #[test]
    fn toml_round_trip() {
        let config = HostConfig::default();
        let rendered = config.to_toml().unwrap();
        assert_eq!(HostConfig::from_toml(&rendered).unwrap(), config);
    }

    #[test]
    fn from_file_reads_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "channel_capacity = 4\n").unwrap();
        assert_eq!(HostConfig::from_file(&path).unwrap().channel_capacity, 4);
    }
}
