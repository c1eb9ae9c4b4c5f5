//! Error types that can cross the isolation boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of a failure, carried next to the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// No release artifact exists for the requested Block.
    BundleNotFound,
    /// The bundle artifact could not be downloaded or unpacked.
    BundleFetchFailed,
    /// No response arrived within the request's timeout window.
    RequestTimeout,
    /// A message could not be attributed to a registered execution context.
    UnroutableMessage,
    /// A commit was attempted against an outdated base revision.
    StaleBaseRevision,
    /// The content provider rejected the host's credential.
    Unauthorized,
    /// The requested content does not exist.
    NotFound,
    /// A human declined the proposed change.
    Rejected,
    /// The execution context was torn down while the request was pending.
    Disposed,
    /// The request was malformed or not valid in the current state.
    InvalidRequest,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// Stable wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BundleNotFound => "bundle-not-found",
            ErrorKind::BundleFetchFailed => "bundle-fetch-failed",
            ErrorKind::RequestTimeout => "request-timeout",
            ErrorKind::UnroutableMessage => "unroutable-message",
            ErrorKind::StaleBaseRevision => "stale-base-revision",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Rejected => "rejected",
            ErrorKind::Disposed => "disposed",
            ErrorKind::InvalidRequest => "invalid-request",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error normalized for transport: a kind and a plain message.
///
/// Arbitrary error values are not guaranteed to survive serialization, so
/// anything that fails on one side of the boundary is coerced to this shape
/// before it is sent.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Coerce any error to its message text.
    pub fn from_error<E: std::error::Error + ?Sized>(kind: ErrorKind, error: &E) -> Self {
        Self::new(kind, error.to_string())
    }

    /// Rebuild an error from the loose wire fields. A missing kind is `Internal`.
    pub fn from_wire(kind: Option<ErrorKind>, message: impl Into<String>) -> Self {
        Self::new(kind.unwrap_or(ErrorKind::Internal), message)
    }
}

/// Errors raised while encoding or decoding protocol messages.
#[derive(Debug, Error)]
pub enum Error {
    /// The payload was not valid JSON for the expected message type.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_wire_names_match_serde() {
        for kind in [
            ErrorKind::BundleNotFound,
            ErrorKind::StaleBaseRevision,
            ErrorKind::RequestTimeout,
            ErrorKind::Internal,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, serde_json::Value::String(kind.as_str().to_string()));
        }
    }

    #[test]
    fn remote_error_displays_message_only() {
        let e = RemoteError::new(ErrorKind::Unauthorized, "bad credentials");
        assert_eq!(e.to_string(), "bad credentials");
    }

    #[test]
    fn from_error_keeps_text() {
        let io = std::io::Error::other("disk on fire");
        let e = RemoteError::from_error(ErrorKind::Internal, &io);
        assert_eq!(e.message, "disk on fire");
        assert_eq!(e.kind, ErrorKind::Internal);
    }

    #[test]
    fn from_wire_defaults_to_internal() {
        let e = RemoteError::from_wire(None, "boom");
        assert_eq!(e.kind, ErrorKind::Internal);
    }
}
