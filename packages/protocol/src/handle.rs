//! Identifiers assigned by the host, never by Block code.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque reference to one isolated execution context.
///
/// Handles are minted by the transport when a context is attached. Inbound
/// messages are stamped with the handle of the channel they arrived on, so a
/// Block cannot claim to be another Block by what it puts in a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionHandle(Uuid);

impl ExecutionHandle {
    /// Create a new random handle.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a handle from a UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ExecutionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token pairing an outbound request with its eventual response.
///
/// Serialized as a bare number in the `requestId` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(u64);

impl CorrelationId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
