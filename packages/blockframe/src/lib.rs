//! Blockframe: run untrusted UI Blocks in isolated execution contexts.
//!
//! A host resolves each Block's published bundle, delivers it with the
//! content it renders, and brokers every request the Block makes: data
//! reads, scoped key/value state, and edits that a human confirms before
//! they are written.
//!
//! - [`protocol`]: the message vocabulary between host and sandbox
//! - [`bundle`]: fetching, unpacking and caching bundles
//! - [`kv`]: scoped key/value backends
//! - [`runtime`]: the host session, sandbox bridge and edit workflow
//! - [`github`]: a content provider over the GitHub REST API

pub use blockframe_bundle as bundle;
pub use blockframe_github as github;
pub use blockframe_kv as kv;
pub use blockframe_protocol as protocol;
pub use blockframe_runtime as runtime;

pub use blockframe_runtime::{BlockBridge, HostConfig, HostController, HostSession};
