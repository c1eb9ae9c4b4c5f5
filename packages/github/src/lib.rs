//! # blockframe-github
//!
//! A [`ContentProvider`](blockframe_runtime::ContentProvider) over the GitHub
//! REST API.
//!
//! ```ignore
//! use std::sync::Arc;
//! use blockframe_github::GithubProvider;
//! use blockframe_runtime::{HostConfig, StaticToken};
//!
//! let config = HostConfig::default();
//! let provider = GithubProvider::from_config(
//!     &config.github,
//!     Arc::new(StaticToken::from_env("GITHUB_TOKEN")),
//! )?;
//! ```
//!
//! Status mapping: 401 and 403 are `Unauthorized`, 404 is `NotFound`, and a
//! 409 or 422 on a write is `StaleBaseRevision`.

pub mod client;
pub mod error;
pub mod provider;

mod types;

pub use client::{GithubClient, DEFAULT_API_BASE};
pub use error::{Error, Result};
pub use provider::GithubProvider;
