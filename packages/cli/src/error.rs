use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum CliError {
    #[error("config: {0}")]
    Config(#[from] blockframe_runtime::ConfigError),

    #[error("bundle: {0}")]
    Bundle(#[from] blockframe_bundle::Error),

    #[error("store: {0}")]
    Store(#[from] blockframe_kv::Error),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no value stored under {0}")]
    MissingKey(String),

    #[error("no store directory; pass --dir or set store.dir in the config")]
    NoStoreDir,
}

impl CliError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CliError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CliError>;
