//! # blockframe-protocol
//!
//! The wire vocabulary shared by a Block host and the sandboxed Blocks it runs.
//!
//! A Block never touches host memory. Everything it learns about the world
//! arrives as a [`HostMessage`], and everything it asks for leaves as a
//! [`SandboxMessage`]. Both are JSON objects tagged by a `type` field:
//!
//! ```text
//!   sandbox                                   host
//!      │ ── ready {block, context} ──────────▶ │
//!      │ ◀───────────── set-bundle {bundle} ── │
//!      │ ◀──────────────── set-props {props} ─ │
//!      │ ── store-get-request {requestId} ───▶ │
//!      │ ◀── store-get-response {requestId} ── │
//! ```
//!
//! Request/response pairs carry a `requestId` correlation field and either a
//! `response` or an `error` string. Errors never cross the boundary as
//! structured objects; they are flattened into a [`RemoteError`] of a known
//! [`ErrorKind`] plus its message text.
//!
//! ## Identities
//!
//! - [`BlockIdentity`] names *which* Block code runs (origin repository and
//!   Block id). Changing it means reloading the bundle.
//! - [`ContentContext`] names *what* the Block is looking at (owner, repo,
//!   path, revision). Changing it only re-sends props.
//! - [`ExecutionHandle`] names one isolated execution context, assigned by
//!   the transport and never taken from message payloads.

mod error;
mod handle;
mod identity;
mod message;

pub use error::{Error, ErrorKind, RemoteError, Result};
pub use handle::{CorrelationId, ExecutionHandle};
pub use identity::{BlockIdentity, BlockKind, ContentContext};
pub use message::{
    BlockProps, Bundle, BundleFile, DataQuery, EntryKind, HostMessage, Reply, RequestKind,
    SandboxMessage, TreeEntry,
};
