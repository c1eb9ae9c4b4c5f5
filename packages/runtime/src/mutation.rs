//! The content mutation workflow.
//!
//! Per edited path:
//!
//! ```text
//!   Clean ──propose──▶ ProposedLocally ──begin_confirmation──▶ AwaitingConfirmation
//!     ▲                     │  ▲                                   │        │
//!     │   propose(original) │  └──────── commit_succeeded ◀──┐      │ discard │
//!     ├─────────────────────┘          (superseded meanwhile)  │      ▼        │
//!     │                                                     Committing ◀─────┘
//!     └───────────── commit_succeeded ◀───────────────────────┘  │  begin_commit
//!                                        commit_failed ──▶ AwaitingConfirmation
//! ```
//!
//! A [`MutationWorkflow`] holds the pending edits of one Block instance.
//! While an edit is pending, [`MutationWorkflow::current_body`] returns the
//! proposed body instead of the fetched one, so the Block never observes a
//! stale revert of its own change.

use std::collections::BTreeMap;

use blockframe_protocol::{BlockIdentity, ContentContext};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::diff::Diff;
use crate::error::{Result, RuntimeError};
use crate::provider::{CommitInfo, FileWrite, PullRequestInfo, PullRequestSpec, WriteBase};

/// Identifies an edited body: a path at a revision of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EditKey {
    pub owner: String,
    pub repo: String,
    pub revision: String,
    pub path: String,
}

impl EditKey {
    /// The file a context is viewing.
    pub fn for_context(context: &ContentContext) -> Self {
        Self {
            owner: context.owner.clone(),
            repo: context.repo.clone(),
            revision: context.revision.clone(),
            path: context.path.clone(),
        }
    }

    /// The metadata file `block` keeps for the viewed path.
    pub fn for_metadata(block: &BlockIdentity, context: &ContentContext) -> Self {
        Self {
            path: block.metadata_path(&context.path),
            ..Self::for_context(context)
        }
    }
}

impl std::fmt::Display for EditKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}@{}:{}",
            self.owner, self.repo, self.revision, self.path
        )
    }
}

/// What is being edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    File,
    Metadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditState {
    /// No pending edit.
    Clean,
    ProposedLocally,
    AwaitingConfirmation,
    Committing,
    /// Rejected by a human and cleared.
    Discarded,
}

/// How the base of a write is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommitPolicy {
    /// Write over whatever is current at commit time.
    #[default]
    LastWriteWins,
    /// Write only over the body the edit was proposed against.
    CheckBase,
}

/// Where an accepted edit is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitTarget {
    /// The line of history being viewed.
    CurrentLine,
    /// A new branch plus a pull request against the default line.
    NewBranch { branch: String },
}

/// An uncommitted body for one [`EditKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEdit {
    pub key: EditKey,
    pub kind: EditKind,
    /// Last known committed body.
    pub original: String,
    pub proposed: String,
    /// Blob the edit was proposed against. `None` when the file did not exist.
    pub base_revision: Option<String>,
    pub state: EditState,
    pub proposed_at: DateTime<Utc>,
}

/// A pending edit as presented for confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub key: EditKey,
    pub kind: EditKind,
    pub original: String,
    pub proposed: String,
    pub diff: Diff,
    pub base_revision: Option<String>,
}

impl Proposal {
    /// Unified rendering of the diff.
    pub fn unified(&self, context: usize) -> String {
        self.diff.unified(
            &format!("a/{}", self.key.path),
            &format!("b/{}", self.key.path),
            context,
        )
    }
}

/// A write ready to hand to the content provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    pub key: EditKey,
    pub kind: EditKind,
    pub body: String,
    pub target: CommitTarget,
    pub base: WriteBase,
    pub message: String,
}

impl CommitRequest {
    fn file_write(&self, branch: &str) -> FileWrite {
        FileWrite {
            owner: self.key.owner.clone(),
            repo: self.key.repo.clone(),
            branch: branch.to_string(),
            path: self.key.path.clone(),
            content: self.body.clone(),
            message: self.message.clone(),
            base: self.base.clone(),
        }
    }

    /// The direct write for [`CommitTarget::CurrentLine`].
    pub fn current_line_write(&self) -> FileWrite {
        self.file_write(&self.key.revision)
    }

    /// The branch write plus pull request for [`CommitTarget::NewBranch`],
    /// targeting `base` or the repository default when `None`.
    pub fn pull_request(&self, branch: &str, base: Option<String>) -> PullRequestSpec {
        PullRequestSpec {
            write: self.file_write(branch),
            base,
            title: self.message.clone(),
            body: format!("Proposed change to `{}`.", self.key.path),
        }
    }
}

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(CommitInfo),
    PullRequest(PullRequestInfo),
}

/// Result of [`MutationWorkflow::propose_edit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposeOutcome {
    /// The body equals the original. Any pending edit was cleared.
    Cleared { had_edit: bool },
    /// A pending edit now holds the body.
    Proposed { superseded: bool },
}

/// Pending edits of one Block instance.
#[derive(Debug, Default)]
pub struct MutationWorkflow {
    policy: CommitPolicy,
    edits: BTreeMap<EditKey, PendingEdit>,
}

impl MutationWorkflow {
    pub fn new(policy: CommitPolicy) -> Self {
        Self {
            policy,
            edits: BTreeMap::new(),
        }
    }

    pub fn policy(&self) -> CommitPolicy {
        self.policy
    }

    /// Record a proposed body.
    ///
    /// Proposing the original body clears the edit. While a commit is in
    /// flight the edit is only superseded, so the outcome of that commit can
    /// still be reconciled.
    pub fn propose_edit(
        &mut self,
        key: EditKey,
        kind: EditKind,
        original: &str,
        proposed: &str,
        base_revision: Option<String>,
    ) -> ProposeOutcome {
        if let Some(edit) = self.edits.get_mut(&key) {
            if edit.state == EditState::Committing {
                edit.proposed = proposed.to_string();
                edit.proposed_at = Utc::now();
                return ProposeOutcome::Proposed { superseded: true };
            }
            if proposed == edit.original {
                self.edits.remove(&key);
                return ProposeOutcome::Cleared { had_edit: true };
            }
            edit.proposed = proposed.to_string();
            edit.state = EditState::ProposedLocally;
            edit.proposed_at = Utc::now();
            return ProposeOutcome::Proposed { superseded: true };
        }

        if proposed == original {
            return ProposeOutcome::Cleared { had_edit: false };
        }
        self.edits.insert(
            key.clone(),
            PendingEdit {
                key,
                kind,
                original: original.to_string(),
                proposed: proposed.to_string(),
                base_revision,
                state: EditState::ProposedLocally,
                proposed_at: Utc::now(),
            },
        );
        ProposeOutcome::Proposed { superseded: false }
    }

    /// Surface a pending edit to a human.
    pub fn begin_confirmation(&mut self, key: &EditKey) -> Result<Proposal> {
        let edit = self
            .edits
            .get_mut(key)
            .ok_or_else(|| RuntimeError::NotFound(format!("no pending edit for {key}")))?;
        if edit.state == EditState::Committing {
            return Err(RuntimeError::InvalidRequest(format!(
                "commit already in progress for {key}"
            )));
        }
        edit.state = EditState::AwaitingConfirmation;
        Ok(Proposal {
            key: edit.key.clone(),
            kind: edit.kind,
            original: edit.original.clone(),
            proposed: edit.proposed.clone(),
            diff: Diff::lines(&edit.original, &edit.proposed),
            base_revision: edit.base_revision.clone(),
        })
    }

    /// Start writing a confirmed edit.
    pub fn begin_commit(
        &mut self,
        key: &EditKey,
        target: CommitTarget,
        message: Option<String>,
    ) -> Result<CommitRequest> {
        let policy = self.policy;
        let edit = self
            .edits
            .get_mut(key)
            .ok_or_else(|| RuntimeError::NotFound(format!("no pending edit for {key}")))?;
        if edit.state != EditState::AwaitingConfirmation {
            return Err(RuntimeError::InvalidRequest(format!(
                "edit for {key} is not awaiting confirmation"
            )));
        }

        let base = match (policy, &edit.base_revision) {
            (CommitPolicy::LastWriteWins, _) => WriteBase::Latest,
            (CommitPolicy::CheckBase, Some(sha)) => WriteBase::Blob(sha.clone()),
            (CommitPolicy::CheckBase, None) => WriteBase::Absent,
        };
        edit.state = EditState::Committing;

        Ok(CommitRequest {
            key: key.clone(),
            kind: edit.kind,
            body: edit.proposed.clone(),
            target,
            base,
            message: message.unwrap_or_else(|| format!("Update {}", key.path)),
        })
    }

    /// Reconcile a successful write of `committed`.
    ///
    /// Returns whether the edit was cleared. An edit superseded during the
    /// commit stays pending against the newly committed body.
    pub fn commit_succeeded(
        &mut self,
        key: &EditKey,
        committed: &str,
        new_base: Option<String>,
    ) -> bool {
        let Some(edit) = self.edits.get_mut(key) else {
            return true;
        };
        if edit.proposed == committed {
            self.edits.remove(key);
            return true;
        }
        edit.original = committed.to_string();
        edit.base_revision = new_base;
        edit.state = EditState::ProposedLocally;
        false
    }

    /// Reconcile a write that went to a pull request instead of the viewed
    /// line. The viewed line is unchanged, so `original` stays put.
    pub fn proposal_submitted(&mut self, key: &EditKey, submitted: &str) -> bool {
        let Some(edit) = self.edits.get_mut(key) else {
            return true;
        };
        if edit.proposed == submitted {
            self.edits.remove(key);
            return true;
        }
        edit.state = EditState::ProposedLocally;
        false
    }

    /// Return a failed commit to confirmation. The edit is kept unchanged.
    pub fn commit_failed(&mut self, key: &EditKey) -> Option<&PendingEdit> {
        let edit = self.edits.get_mut(key)?;
        edit.state = EditState::AwaitingConfirmation;
        Some(edit)
    }

    /// Drop a pending edit without writing it.
    pub fn discard(&mut self, key: &EditKey) -> Option<PendingEdit> {
        let mut edit = self.edits.remove(key)?;
        edit.state = EditState::Discarded;
        Some(edit)
    }

    /// Drop every pending edit. Returns how many there were.
    pub fn discard_all(&mut self) -> usize {
        let count = self.edits.len();
        self.edits.clear();
        count
    }

    /// The body a Block should see for `key`.
    pub fn current_body<'a>(&'a self, key: &EditKey, fetched: &'a str) -> &'a str {
        self.edits
            .get(key)
            .map_or(fetched, |edit| edit.proposed.as_str())
    }

    pub fn pending(&self, key: &EditKey) -> Option<&PendingEdit> {
        self.edits.get(key)
    }

    pub fn state(&self, key: &EditKey) -> EditState {
        self.edits.get(key).map_or(EditState::Clean, |edit| edit.state)
    }

    pub fn edits(&self) -> impl Iterator<Item = &PendingEdit> {
        self.edits.values()
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }
}
