//! Collaborators the host consumes but does not implement.
//!
//! - [`ContentProvider`]: repository reads and writes.
//! - [`CredentialSource`]: bearer tokens for provider calls. Tokens never
//!   reach a sandbox.
//! - [`Reviewer`]: the human who confirms or rejects a proposed edit.

use async_trait::async_trait;
use blockframe_protocol::{ContentContext, DataQuery, TreeEntry};
use serde_json::Value;
use thiserror::Error;

use crate::error::RuntimeError;
use crate::mutation::Proposal;

/// Errors reported by a [`ContentProvider`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The credential was missing or rejected.
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    /// A write named a base that is no longer current.
    #[error("{0}")]
    StaleBaseRevision(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Failed(String),
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// A file body as stored at some revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub path: String,
    pub content: String,
    /// Blob identifier of this body; the base for a later write.
    pub sha: String,
}

/// A folder listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderContent {
    pub path: String,
    pub tree: Vec<TreeEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchInfo {
    pub name: String,
    pub sha: String,
    pub default: bool,
}

/// A single-file write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWrite {
    pub owner: String,
    pub repo: String,
    /// Line of history to write to.
    pub branch: String,
    pub path: String,
    pub content: String,
    pub message: String,
    pub base: WriteBase,
}

/// What a write expects to replace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteBase {
    /// Whatever is current at write time. The newer write wins.
    Latest,
    /// Exactly this blob; anything else is a stale base.
    Blob(String),
    /// Nothing; the file must not exist yet.
    Absent,
}

/// Result of a committed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub commit_sha: String,
    /// Blob identifier of the written body.
    pub content_sha: String,
}

/// A write to a new branch plus a pull request against `base`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestSpec {
    pub write: FileWrite,
    /// Line the pull request targets. The repository default when absent.
    pub base: Option<String>,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestInfo {
    pub number: u64,
    pub url: String,
    pub branch: String,
}

/// Version-control data provider.
///
/// Reads are keyed by a [`ContentContext`]. Implementations obtain
/// credentials from a [`CredentialSource`] per request.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    async fn get_file_content(&self, context: &ContentContext) -> ProviderResult<FileContent>;

    async fn get_folder_content(&self, context: &ContentContext) -> ProviderResult<FolderContent>;

    /// Read a metadata file. `Ok(None)` when it does not exist yet.
    async fn get_metadata(&self, context: &ContentContext) -> ProviderResult<Option<FileContent>>;

    async fn list_branches(&self, owner: &str, repo: &str) -> ProviderResult<Vec<BranchInfo>>;

    async fn update_file_contents(&self, write: &FileWrite) -> ProviderResult<CommitInfo>;

    async fn create_branch_and_pr(&self, spec: &PullRequestSpec)
        -> ProviderResult<PullRequestInfo>;

    /// Broker an arbitrary read on behalf of a Block.
    async fn fetch_data(&self, query: &DataQuery) -> ProviderResult<Value>;
}

/// Supplies the bearer credential for provider calls.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// The token to send, or `None` for anonymous access.
    async fn bearer_token(&self) -> ProviderResult<Option<String>>;
}

/// A fixed token.
#[derive(Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }

    /// Read the token from an environment variable, anonymous if unset.
    pub fn from_env(var: &str) -> Self {
        Self(std::env::var(var).ok().filter(|token| !token.is_empty()))
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shown = if self.0.is_some() { "<redacted>" } else { "<none>" };
        f.debug_tuple("StaticToken").field(&shown).finish()
    }
}

#[async_trait]
impl CredentialSource for StaticToken {
    async fn bearer_token(&self) -> ProviderResult<Option<String>> {
        Ok(self.0.clone())
    }
}

/// A human's answer to a [`Proposal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Write the change. `message` overrides the default commit message.
    Accept { message: Option<String> },
    Reject,
}

/// Presents proposed edits to a human.
#[async_trait]
pub trait Reviewer: Send + Sync {
    async fn review(&self, proposal: &Proposal) -> Decision;

    /// Surface a failed write. The edit is kept for a retry.
    async fn report_failure(&self, proposal: &Proposal, error: &RuntimeError);
}
