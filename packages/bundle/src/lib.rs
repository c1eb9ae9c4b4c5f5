//! # blockframe-bundle
//!
//! Turns a [`BlockIdentity`](blockframe_protocol::BlockIdentity) into the code
//! and styles the sandbox loads.
//!
//! ```text
//!  BlockIdentity ──▶ BundleResolver ──(miss)──▶ BundleSource::fetch ──▶ .tar.gz
//!                         │                                                │
//!                         │◀──────── ImportGuard ◀──────── archive::unpack ┘
//!                         ▼
//!                   Arc<Bundle> (cached for the freshness window)
//! ```
//!
//! - [`BundleSource`] fetches the archive. [`ReleaseSource`] reads the
//!   `<block-id>.tar.gz` asset of the origin repository's latest release.
//! - [`archive`] unpacks the archive into an ordered file list.
//! - [`ImportGuard`] rewrites scripts so they can only import whitelisted
//!   host libraries.
//! - [`BundleResolver`] caches results per identity and de-duplicates
//!   concurrent fetches.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use blockframe_bundle::{BundleResolver, ReleaseSource};
//!
//! let source = ReleaseSource::github()?.with_token(token);
//! let resolver = BundleResolver::with_defaults(Arc::new(source));
//! let bundle = resolver.resolve(&identity).await?;
//! ```

pub mod archive;
mod error;
mod guard;
mod resolver;
mod source;

pub use error::{Error, Result};
pub use guard::{GuardedScript, ImportGuard, ImportRecord, DEFAULT_ALLOWED_IMPORTS};
pub use resolver::{BundleResolver, DEFAULT_FRESHNESS};
pub use source::{BundleSource, ReleaseSource, DEFAULT_API_BASE};
