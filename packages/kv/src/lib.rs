//! # blockframe-kv
//!
//! Key/value storage for Blocks, partitioned by [`ScopeKey`].
//!
//! A scope is derived from the Block identity plus the repository the Block
//! is viewing. The host derives it; Blocks only ever supply keys and values.
//!
//! - [`InMemoryKv`]: process-local, for tests and ephemeral sessions.
//! - [`JsonFileKv`]: one JSON file per scope under a root directory.

mod backend;
mod disk;
mod error;
mod memory;
mod scope;

pub use backend::{KvBackend, MAX_KEY_LEN};
pub use disk::JsonFileKv;
pub use error::{Error, Result};
pub use memory::InMemoryKv;
pub use scope::ScopeKey;
