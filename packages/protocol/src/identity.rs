//! Block identity and content context.

use serde::{Deserialize, Serialize};

/// Whether a Block renders a single file or a folder tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    File,
    Folder,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::File => "file",
            BlockKind::Folder => "folder",
        }
    }
}

/// Which Block code is running: the repository that publishes it and the
/// Block id inside that repository's releases.
///
/// Immutable for the lifetime of an instance. Any change to any field means
/// the bundle must be reloaded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockIdentity {
    /// Owner of the repository publishing the Block.
    pub owner: String,
    /// Repository publishing the Block.
    pub repo: String,
    /// Block id within the repository's releases.
    pub id: String,
    pub kind: BlockKind,
}

impl BlockIdentity {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        id: impl Into<String>,
        kind: BlockKind,
    ) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            id: id.into(),
            kind,
        }
    }

    /// Repository-relative path of the metadata file this Block keeps for
    /// `path`.
    ///
    /// Layout: `.github/blocks/<kind>/<owner>__<repo>__<id>/<path>.json`.
    /// A folder Block viewing the repository root uses `index.json`.
    pub fn metadata_path(&self, path: &str) -> String {
        let trimmed = path.trim_matches('/');
        let leaf = if trimmed.is_empty() { "index" } else { trimmed };
        format!(
            ".github/blocks/{}/{}__{}__{}/{}.json",
            self.kind.as_str(),
            self.owner,
            self.repo,
            self.id,
            leaf
        )
    }
}

impl std::fmt::Display for BlockIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}:{} ({})",
            self.owner,
            self.repo,
            self.id,
            self.kind.as_str()
        )
    }
}

/// What a Block is currently viewing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentContext {
    pub owner: String,
    pub repo: String,
    /// Repository-relative path; empty for the root folder.
    pub path: String,
    /// Branch, tag or commit the content is read from.
    pub revision: String,
}

impl ContentContext {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        path: impl Into<String>,
        revision: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            path: path.into(),
            revision: revision.into(),
        }
    }

    /// The same repository and revision, pointed at another path.
    pub fn with_path(&self, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..self.clone()
        }
    }

    /// Whether both contexts read from the same repository.
    pub fn same_repository(&self, other: &ContentContext) -> bool {
        self.owner == other.owner && self.repo == other.repo
    }
}

impl std::fmt::Display for ContentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}@{}:{}",
            self.owner, self.repo, self.revision, self.path
        )
    }
}
