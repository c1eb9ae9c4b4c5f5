//! # blockframe-cli
//!
//! Command-line tools around a Blockframe host.
//!
//! ## Usage
//!
//! ```bash
//! # Resolve a Block bundle and extract it
//! blockframe bundle githubnext/blocks-examples/chart --out ./chart
//!
//! # Inspect what a Block stored for a repository
//! blockframe store --block acme/blocks/notes --repo octo/hello get theme
//! blockframe store --block acme/blocks/notes --repo octo/hello set theme '"dark"'
//!
//! # Review a change the way a reviewer sees it
//! blockframe diff README.md README.proposed.md --color
//!
//! # Print the effective configuration
//! blockframe config
//! ```
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`.

pub mod args;
pub mod commands;
pub mod error;
pub mod settings;

pub use args::Args;
pub use commands::run;
pub use error::{CliError, Result};
