use thiserror::Error;

/// Errors from key/value backends.
#[derive(Debug, Error)]
pub enum Error {
    /// Keys must be non-empty and at most [`MAX_KEY_LEN`](crate::MAX_KEY_LEN) bytes.
    #[error("invalid key: {key:?}")]
    InvalidKey { key: String },

    /// The backend's root directory is unusable.
    #[error("invalid store root {path}: {message}")]
    InvalidRoot { path: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for key/value operations.
pub type Result<T> = std::result::Result<T, Error>;
