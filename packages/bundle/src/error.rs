use blockframe_protocol::{ErrorKind, RemoteError};

/// Errors from resolving a Block bundle.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// No release artifact exists for the Block.
    #[error("bundle not found for {block}: {message}")]
    NotFound { block: String, message: String },

    /// The artifact exists but could not be downloaded or unpacked.
    #[error("bundle fetch failed for {block}: {message}")]
    FetchFailed { block: String, message: String },

    /// The source URL could not be built.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    pub fn not_found(block: impl Into<String>, message: impl Into<String>) -> Self {
        Error::NotFound {
            block: block.into(),
            message: message.into(),
        }
    }

    pub fn fetch_failed(block: impl Into<String>, message: impl Into<String>) -> Self {
        Error::FetchFailed {
            block: block.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::BundleNotFound,
            Error::FetchFailed { .. } | Error::Url(_) => ErrorKind::BundleFetchFailed,
        }
    }
}

impl From<&Error> for RemoteError {
    fn from(error: &Error) -> Self {
        RemoteError::from_error(error.kind(), error)
    }
}

/// Result type alias for bundle operations.
pub type Result<T> = std::result::Result<T, Error>;
