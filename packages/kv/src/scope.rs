//! Storage scopes.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::json;

use blockframe_protocol::{BlockIdentity, ContentContext};

/// The partition a Block's stored values live in.
///
/// Derived from the Block identity and the repository the Block is viewing.
/// Two scopes are equal only if every component is equal, so one Block can
/// never read values written by another Block, or by itself while viewing a
/// different repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeKey {
    block: BlockIdentity,
    owner: String,
    repo: String,
}

impl ScopeKey {
    pub fn new(block: &BlockIdentity, owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            block: block.clone(),
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    /// Scope for a Block viewing the repository of `context`.
    pub fn for_context(block: &BlockIdentity, context: &ContentContext) -> Self {
        Self::new(block, &context.owner, &context.repo)
    }

    pub fn block(&self) -> &BlockIdentity {
        &self.block
    }

    /// Target repository as `(owner, repo)`.
    pub fn repository(&self) -> (&str, &str) {
        (&self.owner, &self.repo)
    }

    /// Unambiguous string form: a JSON array of every component.
    pub fn canonical(&self) -> String {
        json!([
            self.block.kind.as_str(),
            self.block.owner,
            self.block.repo,
            self.block.id,
            self.owner,
            self.repo,
        ])
        .to_string()
    }

    /// Filesystem- and URL-safe encoding of [`canonical`](Self::canonical).
    pub fn encoded(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.canonical())
    }
}

impl std::fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}/{}", self.block, self.owner, self.repo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockframe_protocol::BlockKind;

    fn block(id: &str) -> BlockIdentity {
        BlockIdentity::new("acme", "blocks", id, BlockKind::File)
    }

    #[test]
    fn same_inputs_same_scope() {
        let ctx = ContentContext::new("o", "r", "a.md", "main");
        let other_path = ctx.with_path("b.md");
        assert_eq!(
            ScopeKey::for_context(&block("x"), &ctx),
            ScopeKey::for_context(&block("x"), &other_path)
        );
    }

    #[test]
    fn blocks_and_repositories_are_separated() {
        let a = ScopeKey::new(&block("x"), "o", "r");
        assert_ne!(a, ScopeKey::new(&block("y"), "o", "r"));
        assert_ne!(a, ScopeKey::new(&block("x"), "o", "other"));
        assert_ne!(a.encoded(), ScopeKey::new(&block("y"), "o", "r").encoded());
    }

    #[test]
    fn canonical_form_is_unambiguous() {
        // Naive joining would make these collide.
        let a = ScopeKey::new(&block("x"), "o__r", "s");
        let b = ScopeKey::new(&block("x"), "o", "r__s");
        assert_ne!(a.canonical(), b.canonical());
    }

    #[test]
    fn encoded_is_path_safe() {
        let scope = ScopeKey::new(&block("../../etc"), "o/o", "r?r");
        let encoded = scope.encoded();
        assert!(encoded
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
