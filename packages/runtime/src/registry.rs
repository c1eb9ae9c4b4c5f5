//! The execution host registry.
//!
//! Tracks every attached execution context, what it was last told about,
//! and where it is in its lifecycle:
//!
//! ```text
//!   Uninitialized ──ready──▶ BundleRequested ──bundle + props──▶ PropsSent
//!                                  ▲                              │   ▲
//!                                  └──── ready (new identity) ────┘   │
//!                                        ready / retarget (context) ──┘
//!   any ──dispose──▶ Disposed
//! ```
//!
//! Inbound messages are routed by the transport-level sender handle only.

use std::collections::HashMap;
use std::future::Future;

use blockframe_protocol::{
    BlockIdentity, BlockKind, BlockProps, ContentContext, ExecutionHandle, HostMessage,
    SandboxMessage, TreeEntry,
};
use serde_json::Value;
use tokio::task::JoinSet;

use crate::error::{Result, RuntimeError};
use crate::mutation::{CommitPolicy, CommitRequest, EditKey, EditKind, MutationWorkflow};
use crate::provider::{CommitInfo, FileContent};
use crate::transport::Port;

/// Where an instance is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Attached, no `ready` yet.
    Uninitialized,
    /// The bundle for the current identity is being resolved or delivered.
    BundleRequested,
    /// Bundle and props delivered; requests are serviced.
    PropsSent,
    /// Torn down.
    Disposed,
}

/// Last content fetched for an instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// The context this snapshot was loaded for.
    pub context: Option<ContentContext>,
    /// The viewed file. `None` for folder Blocks or files that do not exist.
    pub file: Option<FileContent>,
    /// The viewed folder's listing, for folder Blocks.
    pub tree: Option<Vec<TreeEntry>>,
    /// The raw metadata file, when it exists.
    pub metadata: Option<FileContent>,
    /// Parsed metadata; `Null` when absent or unparseable.
    pub metadata_value: Value,
}

impl Snapshot {
    /// Committed metadata body, as the baseline for metadata edits.
    pub fn metadata_body(&self) -> &str {
        self.metadata.as_ref().map_or("", |file| file.content.as_str())
    }
}

/// What the host must do after a lifecycle change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Identity is new or changed: resolve and deliver its bundle.
    Load { identity: BlockIdentity },
    /// Only the context changed: reload and push props.
    Refresh { generation: u64 },
    /// The bundle is still on its way; props follow once it arrives.
    Deferred,
}

/// One attached execution context.
pub struct BlockInstance {
    handle: ExecutionHandle,
    identity: Option<BlockIdentity>,
    context: Option<ContentContext>,
    lifecycle: Lifecycle,
    generation: u64,
    bundle_delivered: bool,
    pub(crate) snapshot: Snapshot,
    pub(crate) edits: MutationWorkflow,
    port: Box<dyn Port>,
    tasks: JoinSet<()>,
}

impl BlockInstance {
    fn new(handle: ExecutionHandle, port: Box<dyn Port>, policy: CommitPolicy) -> Self {
        Self {
            handle,
            identity: None,
            context: None,
            lifecycle: Lifecycle::Uninitialized,
            generation: 0,
            bundle_delivered: false,
            snapshot: Snapshot::default(),
            edits: MutationWorkflow::new(policy),
            port,
            tasks: JoinSet::new(),
        }
    }

    pub fn handle(&self) -> ExecutionHandle {
        self.handle
    }

    pub fn identity(&self) -> Option<&BlockIdentity> {
        self.identity.as_ref()
    }

    pub fn context(&self) -> Option<&ContentContext> {
        self.context.as_ref()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Bumped on every identity or context change. Async loads started under
    /// an older generation are stale.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn edits(&self) -> &MutationWorkflow {
        &self.edits
    }

    /// Identity and context, once `ready` has been received.
    pub fn target(&self) -> Result<(&BlockIdentity, &ContentContext)> {
        match (&self.identity, &self.context) {
            (Some(identity), Some(context)) => Ok((identity, context)),
            _ => Err(RuntimeError::InvalidRequest(format!(
                "instance {} is not ready",
                self.handle
            ))),
        }
    }

    /// The snapshot, provided it was loaded for the current context.
    pub fn loaded_snapshot(&self) -> Result<&Snapshot> {
        let (_, context) = self.target()?;
        if self.snapshot.context.as_ref() != Some(context) {
            return Err(RuntimeError::InvalidRequest(format!(
                "content for {context} is still loading"
            )));
        }
        Ok(&self.snapshot)
    }

    /// Fold a committed write into the snapshot if it is for the viewed file
    /// or its metadata.
    pub(crate) fn record_commit(&mut self, request: &CommitRequest, info: &CommitInfo) {
        let (is_file, is_metadata) = match self.target() {
            Ok((identity, context)) if self.snapshot.context.as_ref() == Some(context) => (
                request.kind == EditKind::File && request.key == EditKey::for_context(context),
                request.kind == EditKind::Metadata
                    && request.key == EditKey::for_metadata(identity, context),
            ),
            _ => return,
        };
        let written = FileContent {
            path: request.key.path.clone(),
            content: request.body.clone(),
            sha: info.content_sha.clone(),
        };
        if is_file {
            self.snapshot.file = Some(written);
        } else if is_metadata {
            self.snapshot.metadata_value =
                serde_json::from_str(&written.content).unwrap_or(Value::Null);
            self.snapshot.metadata = Some(written);
        }
    }

    pub fn send(&self, message: HostMessage) -> Result<()> {
        self.port.send(message)
    }

    /// Run work on behalf of this instance. Aborted when it is disposed.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        while self.tasks.try_join_next().is_some() {}
        self.tasks.spawn(task);
    }

    /// Number of tasks still running.
    pub fn running_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Props for the current snapshot, with pending edits applied.
    pub fn props(&self) -> Option<BlockProps> {
        let (identity, context) = self.target().ok()?;
        let file_key = EditKey::for_context(context);
        let meta_key = EditKey::for_metadata(identity, context);

        let file_edit = self.edits.pending(&file_key);
        let content = match identity.kind {
            BlockKind::Folder => None,
            BlockKind::File => {
                // A file that does not exist yet still shows a proposed body.
                let fetched = self.snapshot.file.as_ref().map(|f| f.content.as_str());
                (fetched.is_some() || file_edit.is_some()).then(|| {
                    self.edits
                        .current_body(&file_key, fetched.unwrap_or_default())
                        .to_string()
                })
            }
        };

        let meta_edit = self.edits.pending(&meta_key);
        let metadata = meta_edit
            .and_then(|edit| serde_json::from_str(&edit.proposed).ok())
            .unwrap_or_else(|| self.snapshot.metadata_value.clone());

        Some(BlockProps {
            context: context.clone(),
            content,
            tree: self.snapshot.tree.clone(),
            metadata,
            has_pending_edit: file_edit.is_some() || meta_edit.is_some(),
        })
    }

    fn retarget(&mut self, context: ContentContext) -> Transition {
        self.context = Some(context);
        self.generation += 1;
        if self.bundle_delivered {
            Transition::Refresh {
                generation: self.generation,
            }
        } else {
            Transition::Deferred
        }
    }
}

impl std::fmt::Debug for BlockInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockInstance")
            .field("handle", &self.handle)
            .field("identity", &self.identity)
            .field("context", &self.context)
            .field("lifecycle", &self.lifecycle)
            .field("generation", &self.generation)
            .field("pending_edits", &self.edits.len())
            .finish()
    }
}

/// Every attached execution context, keyed by handle.
pub struct Registry {
    max_instances: usize,
    policy: CommitPolicy,
    instances: HashMap<ExecutionHandle, BlockInstance>,
}

impl Registry {
    pub fn new(max_instances: usize, policy: CommitPolicy) -> Self {
        Self {
            max_instances,
            policy,
            instances: HashMap::new(),
        }
    }

    /// Register a context. It stays `Uninitialized` until its first `ready`.
    pub fn attach(&mut self, port: Box<dyn Port>) -> Result<ExecutionHandle> {
        if self.instances.len() >= self.max_instances {
            return Err(RuntimeError::CapacityExceeded(self.max_instances));
        }
        let handle = port.handle();
        if self.instances.contains_key(&handle) {
            return Err(RuntimeError::InvalidRequest(format!(
                "{handle} is already attached"
            )));
        }
        self.instances
            .insert(handle, BlockInstance::new(handle, port, self.policy));
        tracing::debug!(%handle, "context attached");
        Ok(handle)
    }

    /// The instance an inbound message belongs to.
    ///
    /// Unknown handles, and anything but `ready` from a context that has not
    /// sent `ready` yet, are unroutable.
    pub fn route(
        &mut self,
        source: ExecutionHandle,
        message: &SandboxMessage,
    ) -> Result<&mut BlockInstance> {
        let unroutable = || RuntimeError::UnroutableMessage {
            handle: source,
            message: message.name(),
        };
        let instance = self.instances.get_mut(&source).ok_or_else(unroutable)?;
        let is_ready = matches!(message, SandboxMessage::Ready { .. });
        if !is_ready && instance.lifecycle == Lifecycle::Uninitialized {
            return Err(unroutable());
        }
        Ok(instance)
    }

    /// Apply a `ready` signal.
    pub fn on_ready(
        &mut self,
        handle: ExecutionHandle,
        identity: BlockIdentity,
        context: ContentContext,
    ) -> Result<Transition> {
        let instance = self.require(handle)?;

        if instance.identity.as_ref() == Some(&identity) {
            tracing::debug!(%handle, block = %identity, "ready with same identity");
            return Ok(instance.retarget(context));
        }

        if instance.identity.is_some() {
            let dropped = instance.edits.discard_all();
            tracing::info!(%handle, block = %identity, dropped, "identity changed, reloading");
        }
        instance.identity = Some(identity.clone());
        instance.context = Some(context);
        instance.lifecycle = Lifecycle::BundleRequested;
        instance.bundle_delivered = false;
        instance.snapshot = Snapshot::default();
        instance.generation += 1;
        Ok(Transition::Load { identity })
    }

    /// Point a ready instance at a new context without reloading its bundle.
    pub fn retarget(
        &mut self,
        handle: ExecutionHandle,
        context: ContentContext,
    ) -> Result<Transition> {
        let instance = self.require(handle)?;
        if instance.lifecycle == Lifecycle::Uninitialized {
            return Err(RuntimeError::InvalidRequest(format!(
                "instance {handle} is not ready"
            )));
        }
        Ok(instance.retarget(context))
    }

    /// Record a delivered bundle. Returns the generation to load props for,
    /// or `None` if the bundle no longer matches the instance.
    pub fn bundle_delivered(
        &mut self,
        handle: ExecutionHandle,
        identity: &BlockIdentity,
    ) -> Option<u64> {
        let instance = self.instances.get_mut(&handle)?;
        if instance.lifecycle != Lifecycle::BundleRequested
            || instance.identity.as_ref() != Some(identity)
        {
            return None;
        }
        instance.bundle_delivered = true;
        Some(instance.generation)
    }

    /// Install loaded props. Returns `false` if they are stale.
    pub fn props_loaded(
        &mut self,
        handle: ExecutionHandle,
        generation: u64,
        snapshot: Snapshot,
    ) -> bool {
        let Some(instance) = self.instances.get_mut(&handle) else {
            return false;
        };
        if instance.generation != generation || !instance.bundle_delivered {
            return false;
        }
        instance.snapshot = snapshot;
        instance.lifecycle = Lifecycle::PropsSent;
        true
    }

    /// Remove an instance. Dropping it closes its port and aborts its tasks.
    pub fn dispose(&mut self, handle: ExecutionHandle) -> Option<BlockInstance> {
        let mut instance = self.instances.remove(&handle)?;
        instance.lifecycle = Lifecycle::Disposed;
        instance.tasks.abort_all();
        let dropped = instance.edits.discard_all();
        tracing::info!(%handle, dropped_edits = dropped, "instance disposed");
        Some(instance)
    }

    pub fn get(&self, handle: ExecutionHandle) -> Option<&BlockInstance> {
        self.instances.get(&handle)
    }

    pub fn get_mut(&mut self, handle: ExecutionHandle) -> Option<&mut BlockInstance> {
        self.instances.get_mut(&handle)
    }

    pub fn handles(&self) -> impl Iterator<Item = ExecutionHandle> + '_ {
        self.instances.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    fn require(&mut self, handle: ExecutionHandle) -> Result<&mut BlockInstance> {
        self.instances
            .get_mut(&handle)
            .ok_or_else(|| RuntimeError::NotFound(format!("no instance {handle}")))
    }
}
