//! # Blockframe Runtime
//!
//! Runs untrusted Blocks in isolated execution contexts and brokers
//! everything they need from the outside world.
//!
//! ## Core Concepts
//!
//! ### Blocks
//!
//! A **Block** is a small UI module that renders one file or folder of a
//! repository. Its code comes from a published bundle and runs in a sandbox
//! with no network access and no credentials. Everything it needs goes
//! through the host over a message channel:
//!
//! - content reads, brokered by a [`ContentProvider`](provider::ContentProvider)
//! - small key/value state, scoped per Block and repository
//! - proposed edits, which a human confirms before they are written
//!
//! ### Host and sandbox
//!
//! ```text
//! ┌──────────────────────── HostSession ─────────────────────────┐
//! │  Registry ── BlockInstance { identity, context, lifecycle } │
//! │     │             └─ MutationWorkflow (pending edits)         │
//! │     ├─ BundleResolver ── ContentProvider ── Reviewer ── Kv   │
//! └─────┼────────────────────────────────────────────────────────┘
//!       │ Port (HostMessage)          ▲ Envelope (SandboxMessage)
//!       ▼                             │
//! ┌──────────── BlockBridge ───────────┴─┐
//! │  Correlator: id ─▶ PendingRequest    │   one per sandbox
//! └──────────────────────────────────────┘
//! ```
//!
//! The [`HostSession`](host::HostSession) is a single dispatch loop; all host
//! state is owned by it. The [`BlockBridge`](bridge::BlockBridge) is the
//! sandbox-side client: every request carries a correlation id and resolves
//! when the response with that id arrives, or fails when its category's
//! timeout passes.
//!
//! ### Lifecycle
//!
//! A context attaches, announces itself with `ready`, receives its bundle,
//! then its props. A later `ready` with the same identity only changes what
//! it is viewing; a different identity reloads the bundle. See
//! [`registry`] for the state machine.
//!
//! ### Edits
//!
//! Proposed bodies are held per path as pending edits. While one is pending
//! the Block sees the proposed body, never a stale revert. A human confirms
//! or rejects the diff; a failed write keeps the edit for a retry. See
//! [`mutation`].
//!
//! ## Example
//!
//! ```ignore
//! use blockframe_runtime::{BlockBridge, Collaborators, HostConfig, HostSession};
//!
//! let config = HostConfig::default();
//! let (session, controller) = HostSession::new(&config, collaborators);
//! session.spawn();
//!
//! let endpoint = controller.attach().await?;
//! let (bridge, mut events) = BlockBridge::connect(endpoint, config.timeout_policy());
//! bridge.ready(identity, context).await?;
//!
//! while let Some(event) = events.recv().await {
//!     // SetBundle, then SetProps
//! }
//! bridge.store_set("theme", "dark".into()).await?;
//! ```

pub mod bridge;
pub mod config;
pub mod diff;
pub mod error;
pub mod host;
pub mod mutation;
pub mod provider;
pub mod registry;
pub mod rpc;
pub mod transport;

pub use bridge::{BlockBridge, OutboundRequest, SandboxEvent};
pub use config::{ConfigError, HostConfig};
pub use diff::{Diff, DiffLine};
pub use error::{Result, RuntimeError};
pub use host::{Collaborators, HostController, HostEvent, HostSession, InstanceInfo};
pub use mutation::{
    CommitOutcome, CommitPolicy, CommitTarget, EditKey, EditKind, EditState, MutationWorkflow,
    PendingEdit, Proposal,
};
pub use provider::{
    BranchInfo, CommitInfo, ContentProvider, CredentialSource, Decision, FileContent,
    FileWrite, FolderContent, ProviderError, ProviderResult, PullRequestInfo, PullRequestSpec,
    Reviewer, StaticToken, WriteBase,
};
pub use registry::{Lifecycle, Registry, Snapshot};
pub use rpc::{Correlator, RequestCategory, TimeoutPolicy};
pub use transport::{connect, ChannelPort, Envelope, Port, SandboxEndpoint, SandboxSender};
