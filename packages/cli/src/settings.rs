//! Where the CLI finds its configuration and store.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use blockframe_runtime::HostConfig;

use crate::error::{CliError, Result};

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("blockframe").join("config.toml"))
}

/// Load the explicit file if given, else the default file if it exists,
/// else the built-in defaults.
pub fn load(explicit: Option<&Path>) -> Result<HostConfig> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => default_config_path().filter(|path| path.exists()),
    };
    match path {
        Some(path) => {
            info!(path = %path.display(), "loading config");
            Ok(HostConfig::from_file_with_env(&path)?)
        }
        None => {
            debug!("no config file, using defaults");
            Ok(HostConfig::default())
        }
    }
}

/// Store directory: the flag, then the config, then the platform data dir.
pub fn store_dir(config: &HostConfig, flag: Option<&Path>) -> Result<PathBuf> {
    flag.map(Path::to_path_buf)
        .or_else(|| config.store.dir.clone())
        .or_else(|| dirs::data_dir().map(|dir| dir.join("blockframe").join("store")))
        .ok_or(CliError::NoStoreDir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_instances = 8\n[commit]\npolicy = \"check-base\"\n").unwrap();

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.max_instances, 8);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load(Some(&dir.path().join("absent.toml"))),
            Err(CliError::Config(_))
        ));
    }

    #[test]
    fn flag_wins_over_config() {
        let mut config = HostConfig::default();
        config.store.dir = Some(PathBuf::from("/from/config"));
        assert_eq!(
            store_dir(&config, Some(Path::new("/from/flag"))).unwrap(),
            PathBuf::from("/from/flag")
        );
        assert_eq!(
            store_dir(&config, None).unwrap(),
            PathBuf::from("/from/config")
        );
    }
}
