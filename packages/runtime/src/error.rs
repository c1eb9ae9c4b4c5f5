//! Error types for the Block host runtime.

use std::time::Duration;

use blockframe_protocol::{CorrelationId, ErrorKind, ExecutionHandle, RemoteError};
use thiserror::Error;

use crate::config::ConfigError;
use crate::provider::ProviderError;

/// Errors that can occur in the Block host runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// No release artifact exists for the Block.
    #[error("bundle not found: {0}")]
    BundleNotFound(String),

    /// The bundle could not be fetched or unpacked.
    #[error("bundle fetch failed: {0}")]
    BundleFetchFailed(String),

    /// No response arrived within the request's window.
    #[error("request {id} timed out after {after:?}")]
    RequestTimeout { id: CorrelationId, after: Duration },

    /// A message did not match any ready registry entry.
    #[error("unroutable {message} message from {handle}")]
    UnroutableMessage {
        handle: ExecutionHandle,
        message: &'static str,
    },

    /// The content changed underneath a pending edit.
    #[error("stale base revision: {0}")]
    StaleBaseRevision(String),

    /// The content provider rejected the credential.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The requested content does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A human declined the proposed change.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The Block instance was torn down.
    #[error("block instance disposed")]
    Disposed,

    /// The other end of a channel went away.
    #[error("channel closed")]
    ChannelClosed,

    /// The instance limit was reached.
    #[error("instance limit of {0} reached")]
    CapacityExceeded(usize),

    /// A request was malformed or arrived in the wrong state.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// An error reported by the other side of the boundary.
    #[error("{0}")]
    Remote(RemoteError),

    /// A content provider call failed.
    #[error("provider error: {0}")]
    Provider(String),

    /// A key/value backend operation failed.
    #[error("store error: {0}")]
    Store(#[from] blockframe_kv::Error),

    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// A protocol message could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] blockframe_protocol::Error),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// The wire-level kind for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RuntimeError::BundleNotFound(_) => ErrorKind::BundleNotFound,
            RuntimeError::BundleFetchFailed(_) => ErrorKind::BundleFetchFailed,
            RuntimeError::RequestTimeout { .. } => ErrorKind::RequestTimeout,
            RuntimeError::UnroutableMessage { .. } => ErrorKind::UnroutableMessage,
            RuntimeError::StaleBaseRevision(_) => ErrorKind::StaleBaseRevision,
            RuntimeError::Unauthorized(_) => ErrorKind::Unauthorized,
            RuntimeError::NotFound(_) => ErrorKind::NotFound,
            RuntimeError::Rejected(_) => ErrorKind::Rejected,
            RuntimeError::Disposed | RuntimeError::ChannelClosed => ErrorKind::Disposed,
            RuntimeError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            RuntimeError::Store(blockframe_kv::Error::InvalidKey { .. }) => {
                ErrorKind::InvalidRequest
            }
            RuntimeError::Remote(remote) => remote.kind,
            RuntimeError::CapacityExceeded(_)
            | RuntimeError::Provider(_)
            | RuntimeError::Store(_)
            | RuntimeError::Config(_)
            | RuntimeError::Protocol(_)
            | RuntimeError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Normalize to the `(kind, message)` pair sent across the boundary.
    pub fn to_remote(&self) -> RemoteError {
        match self {
            RuntimeError::Remote(remote) => remote.clone(),
            other => RemoteError::from_error(other.kind(), other),
        }
    }
}

impl From<RemoteError> for RuntimeError {
    fn from(error: RemoteError) -> Self {
        RuntimeError::Remote(error)
    }
}

impl From<blockframe_bundle::Error> for RuntimeError {
    fn from(error: blockframe_bundle::Error) -> Self {
        match error.kind() {
            ErrorKind::BundleNotFound => RuntimeError::BundleNotFound(error.to_string()),
            _ => RuntimeError::BundleFetchFailed(error.to_string()),
        }
    }
}

impl From<ProviderError> for RuntimeError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::Unauthorized(message) => RuntimeError::Unauthorized(message),
            ProviderError::NotFound(message) => RuntimeError::NotFound(message),
            ProviderError::StaleBaseRevision(message) => RuntimeError::StaleBaseRevision(message),
            ProviderError::InvalidRequest(message) => RuntimeError::InvalidRequest(message),
            ProviderError::Failed(message) => RuntimeError::Provider(message),
        }
    }
}

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
