//! The host session: one dispatch loop per host.
//!
//! ```text
//!   sandbox ──Envelope──▶ ┐
//!   HostController ─────▶ ├─ select! ─▶ Registry + MutationWorkflow ─▶ Port ─▶ sandbox
//!   spawned work ───────▶ ┘                   │
//!                                             └─▶ HostEvent (broadcast)
//! ```
//!
//! Registry, workflow and snapshot state are only touched by the loop.
//! Collaborator calls run as tasks owned by the instance they serve and
//! report back as completions, so disposing an instance aborts its work and
//! a late result for it is dropped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use blockframe_bundle::BundleResolver;
use blockframe_kv::{KvBackend, ScopeKey};
use blockframe_protocol::{
    BlockIdentity, BlockKind, BlockProps, Bundle, ContentContext, CorrelationId, ExecutionHandle,
    HostMessage, RemoteError, Reply, RequestKind, SandboxMessage,
};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::HostConfig;
use crate::error::{Result, RuntimeError};
use crate::mutation::{
    CommitOutcome, CommitRequest, CommitTarget, EditKey, EditKind, PendingEdit, ProposeOutcome,
    Proposal,
};
use crate::provider::{ContentProvider, Decision, ProviderError, Reviewer};
use crate::registry::{BlockInstance, Lifecycle, Registry, Snapshot, Transition};
use crate::rpc::{RequestCategory, TimeoutPolicy};
use crate::transport::{connect, Envelope, Port, SandboxEndpoint};

const EVENT_CAPACITY: usize = 256;

/// Services a host session calls out to.
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Arc<BundleResolver>,
    pub provider: Arc<dyn ContentProvider>,
    pub reviewer: Arc<dyn Reviewer>,
    pub kv: Arc<dyn KvBackend>,
}

/// Something observable happened to an instance.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// Bundle and props are in place; the Block is live.
    PropsSent { handle: ExecutionHandle },
    LoadFailed {
        handle: ExecutionHandle,
        error: RemoteError,
    },
    Navigated {
        handle: ExecutionHandle,
        context: ContentContext,
    },
    /// A Block proposed a body. `pending` is false when it matched the
    /// committed body and cleared the edit.
    EditProposed {
        handle: ExecutionHandle,
        key: EditKey,
        pending: bool,
    },
    Committed {
        handle: ExecutionHandle,
        key: EditKey,
        outcome: CommitOutcome,
    },
    /// A write failed. The edit is kept.
    CommitFailed {
        handle: ExecutionHandle,
        key: EditKey,
        error: RemoteError,
    },
    Discarded {
        handle: ExecutionHandle,
        key: EditKey,
    },
    Disposed { handle: ExecutionHandle },
}

/// Point-in-time view of one instance.
#[derive(Debug, Clone)]
pub struct InstanceInfo {
    pub handle: ExecutionHandle,
    pub identity: Option<BlockIdentity>,
    pub context: Option<ContentContext>,
    pub lifecycle: Lifecycle,
    pub generation: u64,
    pub props: Option<BlockProps>,
    pub edits: Vec<PendingEdit>,
    pub running_tasks: usize,
}

impl InstanceInfo {
    fn of(instance: &BlockInstance) -> Self {
        Self {
            handle: instance.handle(),
            identity: instance.identity().cloned(),
            context: instance.context().cloned(),
            lifecycle: instance.lifecycle(),
            generation: instance.generation(),
            props: instance.props(),
            edits: instance.edits().edits().cloned().collect(),
            running_tasks: instance.running_tasks(),
        }
    }
}

enum Command {
    Attach {
        port: Box<dyn Port>,
        reply: oneshot::Sender<Result<ExecutionHandle>>,
    },
    SetContext {
        handle: ExecutionHandle,
        context: ContentContext,
        reply: oneshot::Sender<Result<()>>,
    },
    Commit {
        handle: ExecutionHandle,
        key: Option<EditKey>,
        target: CommitTarget,
        reply: oneshot::Sender<Result<CommitOutcome>>,
    },
    Discard {
        handle: ExecutionHandle,
        key: Option<EditKey>,
        reply: oneshot::Sender<Result<bool>>,
    },
    Dispose {
        handle: ExecutionHandle,
        reply: oneshot::Sender<bool>,
    },
    Inspect {
        handle: ExecutionHandle,
        reply: oneshot::Sender<Option<InstanceInfo>>,
    },
    Shutdown,
}

/// Who is waiting on a commit.
enum Origin {
    Command(CommandReply),
    /// An `update-metadata` request. Review and write share one deadline,
    /// which falls before the Block's own window closes.
    Request {
        id: CorrelationId,
        deadline: Instant,
    },
}

impl Origin {
    fn request(id: CorrelationId, window: Duration) -> Self {
        Origin::Request {
            id,
            deadline: Instant::now() + settle_window(window),
        }
    }

    /// Time the next step may take. Commands get a fresh window per step.
    fn budget(&self, window: Duration) -> Duration {
        match self {
            Origin::Command(_) => window,
            Origin::Request { deadline, .. } => deadline.saturating_duration_since(Instant::now()),
        }
    }
}

/// Reply channel of a controller command. Dropped unanswered, as when the
/// task holding it is aborted by a dispose, it answers `Disposed`.
struct CommandReply(Option<oneshot::Sender<Result<CommitOutcome>>>);

impl CommandReply {
    fn new(reply: oneshot::Sender<Result<CommitOutcome>>) -> Self {
        Self(Some(reply))
    }

    fn send(mut self, result: Result<CommitOutcome>) {
        if let Some(reply) = self.0.take() {
            let _ = reply.send(result);
        }
    }
}

impl Drop for CommandReply {
    fn drop(&mut self) {
        if let Some(reply) = self.0.take() {
            let _ = reply.send(Err(RuntimeError::Disposed));
        }
    }
}

const REPLY_MARGIN: Duration = Duration::from_secs(5);

/// The part of a Block's mutation window the host may spend, leaving room
/// for the answer to arrive.
fn settle_window(window: Duration) -> Duration {
    window.saturating_sub((window / 20).min(REPLY_MARGIN))
}

enum Completion {
    BundleLoaded {
        handle: ExecutionHandle,
        identity: BlockIdentity,
        result: Result<Arc<Bundle>>,
    },
    PropsLoaded {
        handle: ExecutionHandle,
        generation: u64,
        result: Result<Snapshot>,
    },
    Respond {
        handle: ExecutionHandle,
        kind: RequestKind,
        reply: Reply,
    },
    Reviewed {
        handle: ExecutionHandle,
        proposal: Proposal,
        target: CommitTarget,
        origin: Origin,
        /// `None` when no decision arrived in time.
        decision: Option<Decision>,
    },
    Written {
        handle: ExecutionHandle,
        request: CommitRequest,
        proposal: Proposal,
        origin: Origin,
        result: Result<CommitOutcome>,
    },
}

enum MetadataProposal {
    /// Equal to the committed metadata; nothing to write.
    Unchanged(Value),
    Review(Proposal),
}

/// Owns every Block instance of one host. Drive it with [`HostSession::run`]
/// and talk to it through a [`HostController`].
pub struct HostSession {
    registry: Registry,
    collaborators: Collaborators,
    timeouts: TimeoutPolicy,
    commands: mpsc::UnboundedReceiver<Command>,
    inbound: mpsc::Receiver<Envelope>,
    completions: mpsc::UnboundedReceiver<Completion>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    events: broadcast::Sender<HostEvent>,
}

impl HostSession {
    pub fn new(config: &HostConfig, collaborators: Collaborators) -> (Self, HostController) {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::channel(config.channel_capacity);
        let (completion_tx, completions) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let session = Self {
            registry: Registry::new(config.max_instances, config.commit.policy),
            collaborators,
            timeouts: config.timeout_policy(),
            commands,
            inbound,
            completions,
            completion_tx,
            events: events.clone(),
        };
        let controller = HostController {
            commands: command_tx,
            inbound: inbound_tx,
            events,
        };
        (session, controller)
    }

    /// Run the loop on a new task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Dispatch until shut down or every controller is dropped.
    pub async fn run(mut self) {
        tracing::info!("host session started");
        loop {
            tokio::select! {
                Some(completion) = self.completions.recv() => self.on_completion(completion),
                Some(envelope) = self.inbound.recv() => self.on_envelope(envelope),
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
            }
        }

        let handles: Vec<ExecutionHandle> = self.registry.handles().collect();
        for handle in handles {
            self.dispose(handle);
        }
        tracing::info!("host session stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Attach { port, reply } => {
                let _ = reply.send(self.registry.attach(port));
            }
            Command::SetContext {
                handle,
                context,
                reply,
            } => {
                let _ = reply.send(self.retarget(handle, context));
            }
            Command::Commit {
                handle,
                key,
                target,
                reply,
            } => self.commit(handle, key, target, reply),
            Command::Discard { handle, key, reply } => {
                let _ = reply.send(self.discard(handle, key));
            }
            Command::Dispose { handle, reply } => {
                let _ = reply.send(self.dispose(handle));
            }
            Command::Inspect { handle, reply } => {
                let _ = reply.send(self.registry.get(handle).map(InstanceInfo::of));
            }
            Command::Shutdown => {}
        }
    }

    fn on_envelope(&mut self, envelope: Envelope) {
        let Envelope { source, message } = envelope;
        if let Err(err) = self.registry.route(source, &message) {
            tracing::warn!(handle = %source, message = message.name(), "{err}");
            return;
        }
        tracing::trace!(handle = %source, message = message.name(), "inbound");

        match message {
            SandboxMessage::Ready { block, context } => self.on_ready(source, block, context),
            SandboxMessage::NavigateToPath { path } => {
                let context = self
                    .registry
                    .get(source)
                    .and_then(BlockInstance::context)
                    .map(|context| context.with_path(path));
                if let Some(context) = context {
                    if let Err(err) = self.retarget(source, context) {
                        tracing::warn!(handle = %source, "navigation failed: {err}");
                    }
                }
            }
            SandboxMessage::UpdateFile {
                request_id,
                content,
            } => {
                let result = self.propose_file(source, content).map(|()| Value::Null);
                self.reply(source, RequestKind::UpdateFile, request_id, result);
            }
            SandboxMessage::UpdateMetadata {
                request_id,
                metadata,
            } => match self.propose_metadata(source, metadata) {
                Ok(MetadataProposal::Unchanged(value)) => {
                    self.reply(source, RequestKind::UpdateMetadata, request_id, Ok(value))
                }
                Ok(MetadataProposal::Review(proposal)) => {
                    let origin = Origin::request(request_id, self.timeouts.mutation);
                    self.start_review(source, proposal, CommitTarget::CurrentLine, origin)
                }
                Err(err) => self.reply(source, RequestKind::UpdateMetadata, request_id, Err(err)),
            },
            SandboxMessage::GithubDataRequest { request_id, query } => {
                let provider = Arc::clone(&self.collaborators.provider);
                self.spawn_request(source, request_id, RequestKind::GithubData, async move {
                    Ok::<_, RuntimeError>(provider.fetch_data(&query).await?)
                });
            }
            SandboxMessage::StoreGetRequest { request_id, key } => {
                let kv = Arc::clone(&self.collaborators.kv);
                self.spawn_scoped(source, request_id, RequestKind::StoreGet, move |scope| {
                    async move { Ok::<_, RuntimeError>(kv.get(&scope, &key).await?.unwrap_or(Value::Null)) }
                });
            }
            SandboxMessage::StoreSetRequest {
                request_id,
                key,
                value,
            } => {
                let kv = Arc::clone(&self.collaborators.kv);
                self.spawn_scoped(source, request_id, RequestKind::StoreSet, move |scope| {
                    async move {
                        kv.set(&scope, &key, value).await?;
                        Ok::<_, RuntimeError>(Value::Null)
                    }
                });
            }
            SandboxMessage::StoreDeleteRequest { request_id, key } => {
                let kv = Arc::clone(&self.collaborators.kv);
                self.spawn_scoped(source, request_id, RequestKind::StoreDelete, move |scope| {
                    async move { Ok::<_, RuntimeError>(Value::Bool(kv.delete(&scope, &key).await?)) }
                });
            }
        }
    }

    fn on_completion(&mut self, completion: Completion) {
        match completion {
            Completion::BundleLoaded {
                handle,
                identity,
                result,
            } => self.on_bundle_loaded(handle, identity, result),
            Completion::PropsLoaded {
                handle,
                generation,
                result,
            } => self.on_props_loaded(handle, generation, result),
            Completion::Respond {
                handle,
                kind,
                reply,
            } => self.deliver(handle, kind.respond(reply)),
            Completion::Reviewed {
                handle,
                proposal,
                target,
                origin,
                decision,
            } => self.on_reviewed(handle, proposal, target, origin, decision),
            Completion::Written {
                handle,
                request,
                proposal,
                origin,
                result,
            } => self.on_written(handle, request, proposal, origin, result),
        }
    }

    // Lifecycle.

    fn on_ready(&mut self, handle: ExecutionHandle, identity: BlockIdentity, context: ContentContext) {
        match self.registry.on_ready(handle, identity, context.clone()) {
            Ok(transition) => {
                if !matches!(transition, Transition::Load { .. }) {
                    self.emit(HostEvent::Navigated { handle, context });
                }
                self.apply(handle, transition);
            }
            Err(err) => tracing::warn!(%handle, "ready failed: {err}"),
        }
    }

    fn retarget(&mut self, handle: ExecutionHandle, context: ContentContext) -> Result<()> {
        let transition = self.registry.retarget(handle, context.clone())?;
        tracing::debug!(%handle, %context, "retargeted");
        self.emit(HostEvent::Navigated { handle, context });
        self.apply(handle, transition);
        Ok(())
    }

    fn apply(&mut self, handle: ExecutionHandle, transition: Transition) {
        match transition {
            Transition::Load { identity } => self.load_bundle(handle, identity),
            Transition::Refresh { generation } => self.load_props(handle, generation),
            Transition::Deferred => {}
        }
    }

    fn load_bundle(&mut self, handle: ExecutionHandle, identity: BlockIdentity) {
        tracing::debug!(%handle, block = %identity, "resolving bundle");
        let resolver = Arc::clone(&self.collaborators.resolver);
        let completions = self.completion_tx.clone();
        let Some(instance) = self.registry.get_mut(handle) else {
            return;
        };
        instance.spawn(async move {
            let result = resolver
                .resolve(&identity)
                .await
                .map_err(RuntimeError::from);
            let _ = completions.send(Completion::BundleLoaded {
                handle,
                identity,
                result,
            });
        });
    }

    fn on_bundle_loaded(
        &mut self,
        handle: ExecutionHandle,
        identity: BlockIdentity,
        result: Result<Arc<Bundle>>,
    ) {
        let current = self
            .registry
            .get(handle)
            .and_then(BlockInstance::identity)
            == Some(&identity);
        if !current {
            tracing::debug!(%handle, block = %identity, "dropping bundle for superseded identity");
            return;
        }

        let bundle = match result {
            Ok(bundle) => bundle,
            Err(err) => {
                tracing::warn!(%handle, block = %identity, "bundle load failed: {err}");
                self.emit(HostEvent::LoadFailed {
                    handle,
                    error: err.to_remote(),
                });
                return;
            }
        };
        let Some(generation) = self.registry.bundle_delivered(handle, &identity) else {
            return;
        };
        tracing::info!(%handle, block = %identity, files = bundle.files.len(), "bundle delivered");
        self.deliver(
            handle,
            HostMessage::SetBundle {
                bundle: bundle.as_ref().clone(),
            },
        );
        self.load_props(handle, generation);
    }

    fn load_props(&mut self, handle: ExecutionHandle, generation: u64) {
        let provider = Arc::clone(&self.collaborators.provider);
        let completions = self.completion_tx.clone();
        let window = self.timeouts.data;
        let Some(instance) = self.registry.get_mut(handle) else {
            return;
        };
        let Ok((identity, context)) = instance.target() else {
            return;
        };
        let (identity, context) = (identity.clone(), context.clone());

        instance.spawn(async move {
            let load = load_snapshot(provider.as_ref(), &identity, &context);
            let result = match tokio::time::timeout(window, load).await {
                Ok(result) => result,
                Err(_) => Err(RuntimeError::Provider(format!(
                    "loading {context} timed out after {window:?}"
                ))),
            };
            let _ = completions.send(Completion::PropsLoaded {
                handle,
                generation,
                result,
            });
        });
    }

    fn on_props_loaded(&mut self, handle: ExecutionHandle, generation: u64, result: Result<Snapshot>) {
        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(err) => {
                let current = self
                    .registry
                    .get(handle)
                    .is_some_and(|instance| instance.generation() == generation);
                if current {
                    tracing::warn!(%handle, "loading props failed: {err}");
                    self.emit(HostEvent::LoadFailed {
                        handle,
                        error: err.to_remote(),
                    });
                }
                return;
            }
        };
        if !self.registry.props_loaded(handle, generation, snapshot) {
            tracing::debug!(%handle, generation, "dropping stale props");
            return;
        }
        self.push_props(handle);
        self.emit(HostEvent::PropsSent { handle });
    }

    fn dispose(&mut self, handle: ExecutionHandle) -> bool {
        if self.registry.dispose(handle).is_none() {
            return false;
        }
        self.emit(HostEvent::Disposed { handle });
        true
    }

    // Requests.

    fn spawn_request<F>(
        &mut self,
        handle: ExecutionHandle,
        id: CorrelationId,
        kind: RequestKind,
        work: F,
    ) where
        F: Future<Output = Result<Value>> + Send + 'static,
    {
        let window = self.timeouts.for_category(RequestCategory::of(kind));
        let completions = self.completion_tx.clone();
        let Some(instance) = self.registry.get_mut(handle) else {
            return;
        };
        instance.spawn(async move {
            let result = match tokio::time::timeout(window, work).await {
                Ok(result) => result,
                Err(_) => Err(RuntimeError::RequestTimeout { id, after: window }),
            };
            let reply = Reply::from_result(id, result.map_err(|err| err.to_remote()));
            let _ = completions.send(Completion::Respond {
                handle,
                kind,
                reply,
            });
        });
    }

    /// Run a store operation in the requesting Block's scope.
    fn spawn_scoped<F, Fut>(
        &mut self,
        handle: ExecutionHandle,
        id: CorrelationId,
        kind: RequestKind,
        op: F,
    ) where
        F: FnOnce(ScopeKey) -> Fut,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let scope = self
            .registry
            .get(handle)
            .ok_or(RuntimeError::Disposed)
            .and_then(|instance| {
                let (identity, context) = instance.target()?;
                Ok(ScopeKey::for_context(identity, context))
            });
        match scope {
            Ok(scope) => self.spawn_request(handle, id, kind, op(scope)),
            Err(err) => self.reply(handle, kind, id, Err(err)),
        }
    }

    fn reply(
        &self,
        handle: ExecutionHandle,
        kind: RequestKind,
        id: CorrelationId,
        result: Result<Value>,
    ) {
        let reply = Reply::from_result(id, result.map_err(|err| err.to_remote()));
        self.deliver(handle, kind.respond(reply));
    }

    fn deliver(&self, handle: ExecutionHandle, message: HostMessage) {
        let Some(instance) = self.registry.get(handle) else {
            tracing::debug!(%handle, message = message.name(), "dropping message for disposed instance");
            return;
        };
        if let Err(err) = instance.send(message) {
            tracing::warn!(%handle, "failed to deliver message: {err}");
        }
    }

    fn push_props(&self, handle: ExecutionHandle) {
        let props = self
            .registry
            .get(handle)
            .filter(|instance| instance.lifecycle() == Lifecycle::PropsSent)
            .and_then(BlockInstance::props);
        if let Some(props) = props {
            self.deliver(handle, HostMessage::SetProps { props });
        }
    }

    fn emit(&self, event: HostEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    // Mutations.

    fn ready_instance(&mut self, handle: ExecutionHandle) -> Result<&mut BlockInstance> {
        let instance = self
            .registry
            .get_mut(handle)
            .ok_or(RuntimeError::Disposed)?;
        if instance.lifecycle() != Lifecycle::PropsSent {
            return Err(RuntimeError::InvalidRequest(format!(
                "instance {handle} has not received props yet"
            )));
        }
        Ok(instance)
    }

    fn propose_file(&mut self, handle: ExecutionHandle, content: String) -> Result<()> {
        let instance = self.ready_instance(handle)?;
        let (identity, context) = instance.target()?;
        if identity.kind != BlockKind::File {
            return Err(RuntimeError::InvalidRequest(
                "folder Blocks cannot update file content".into(),
            ));
        }
        let key = EditKey::for_context(context);
        let (original, base) = match &instance.loaded_snapshot()?.file {
            Some(file) => (file.content.clone(), Some(file.sha.clone())),
            None => (String::new(), None),
        };

        let outcome =
            instance
                .edits
                .propose_edit(key.clone(), EditKind::File, &original, &content, base);
        tracing::debug!(%handle, path = %key.path, ?outcome, "file edit proposed");

        self.push_props(handle);
        self.emit(HostEvent::EditProposed {
            handle,
            key,
            pending: matches!(outcome, ProposeOutcome::Proposed { .. }),
        });
        Ok(())
    }

    fn propose_metadata(
        &mut self,
        handle: ExecutionHandle,
        metadata: Value,
    ) -> Result<MetadataProposal> {
        let instance = self.ready_instance(handle)?;
        let (identity, context) = instance.target()?;
        let key = EditKey::for_metadata(identity, context);
        let snapshot = instance.loaded_snapshot()?;
        let original = snapshot.metadata_body().to_string();
        let base = snapshot.metadata.as_ref().map(|file| file.sha.clone());
        let body = if snapshot.metadata.is_some() && metadata == snapshot.metadata_value {
            original.clone()
        } else {
            serde_json::to_string_pretty(&metadata)
                .map_err(|err| RuntimeError::InvalidRequest(err.to_string()))?
        };

        let outcome =
            instance
                .edits
                .propose_edit(key.clone(), EditKind::Metadata, &original, &body, base);
        let pending = matches!(outcome, ProposeOutcome::Proposed { .. });
        let proposal = pending.then(|| instance.edits.begin_confirmation(&key));
        tracing::debug!(%handle, path = %key.path, ?outcome, "metadata edit proposed");

        self.push_props(handle);
        self.emit(HostEvent::EditProposed {
            handle,
            key,
            pending,
        });
        match proposal {
            None => Ok(MetadataProposal::Unchanged(metadata)),
            Some(proposal) => proposal.map(MetadataProposal::Review),
        }
    }

    fn commit(
        &mut self,
        handle: ExecutionHandle,
        key: Option<EditKey>,
        target: CommitTarget,
        reply: oneshot::Sender<Result<CommitOutcome>>,
    ) {
        let proposal = self
            .registry
            .get_mut(handle)
            .ok_or_else(|| RuntimeError::NotFound(format!("no instance {handle}")))
            .and_then(|instance| {
                let key = match key {
                    Some(key) => key,
                    None => EditKey::for_context(instance.target()?.1),
                };
                instance.edits.begin_confirmation(&key)
            });
        match proposal {
            Ok(proposal) => {
                let origin = Origin::Command(CommandReply::new(reply));
                self.start_review(handle, proposal, target, origin)
            }
            Err(err) => {
                let _ = reply.send(Err(err));
            }
        }
    }

    fn discard(&mut self, handle: ExecutionHandle, key: Option<EditKey>) -> Result<bool> {
        let instance = self
            .registry
            .get_mut(handle)
            .ok_or_else(|| RuntimeError::NotFound(format!("no instance {handle}")))?;
        let key = match key {
            Some(key) => key,
            None => EditKey::for_context(instance.target()?.1),
        };
        if instance.edits.discard(&key).is_none() {
            return Ok(false);
        }
        tracing::info!(%handle, path = %key.path, "edit discarded");
        self.push_props(handle);
        self.emit(HostEvent::Discarded { handle, key });
        Ok(true)
    }

    fn start_review(
        &mut self,
        handle: ExecutionHandle,
        proposal: Proposal,
        target: CommitTarget,
        origin: Origin,
    ) {
        let reviewer = Arc::clone(&self.collaborators.reviewer);
        let completions = self.completion_tx.clone();
        let window = origin.budget(self.timeouts.mutation);
        let Some(instance) = self.registry.get_mut(handle) else {
            return;
        };
        instance.spawn(async move {
            let decision = tokio::time::timeout(window, reviewer.review(&proposal))
                .await
                .ok();
            let _ = completions.send(Completion::Reviewed {
                handle,
                proposal,
                target,
                origin,
                decision,
            });
        });
    }

    fn on_reviewed(
        &mut self,
        handle: ExecutionHandle,
        proposal: Proposal,
        target: CommitTarget,
        origin: Origin,
        decision: Option<Decision>,
    ) {
        let key = proposal.key.clone();
        let message = match decision {
            Some(Decision::Accept { message }) => message,
            Some(Decision::Reject) => {
                let discarded = self
                    .registry
                    .get_mut(handle)
                    .and_then(|instance| instance.edits.discard(&key))
                    .is_some();
                tracing::info!(%handle, path = %key.path, "edit rejected");
                if discarded {
                    self.push_props(handle);
                    self.emit(HostEvent::Discarded {
                        handle,
                        key: key.clone(),
                    });
                }
                let err = RuntimeError::Rejected(format!("change to {} was declined", key.path));
                self.settle(handle, origin, Err(err));
                return;
            }
            None => {
                let after = self.timeouts.mutation;
                let err = match origin {
                    Origin::Request { id, .. } => RuntimeError::RequestTimeout { id, after },
                    Origin::Command(_) => RuntimeError::Rejected(format!(
                        "no decision on {} within {after:?}",
                        key.path
                    )),
                };
                self.settle(handle, origin, Err(err));
                return;
            }
        };

        let provider = Arc::clone(&self.collaborators.provider);
        let completions = self.completion_tx.clone();
        let window = origin.budget(self.timeouts.mutation);
        let Some(instance) = self.registry.get_mut(handle) else {
            return;
        };
        let request = match instance.edits.begin_commit(&key, target, message) {
            Ok(request) => request,
            Err(err) => {
                self.settle(handle, origin, Err(err));
                return;
            }
        };
        tracing::info!(%handle, path = %key.path, base = ?request.base, "committing edit");

        instance.spawn(async move {
            let attempt = write(provider.as_ref(), &request);
            let result = match tokio::time::timeout(window, attempt).await {
                Ok(result) => result,
                Err(_) => Err(RuntimeError::Provider(format!(
                    "write of {} timed out after {window:?}",
                    request.key.path
                ))),
            };
            let _ = completions.send(Completion::Written {
                handle,
                request,
                proposal,
                origin,
                result,
            });
        });
    }

    fn on_written(
        &mut self,
        handle: ExecutionHandle,
        request: CommitRequest,
        proposal: Proposal,
        origin: Origin,
        result: Result<CommitOutcome>,
    ) {
        let reviewer = Arc::clone(&self.collaborators.reviewer);
        let Some(instance) = self.registry.get_mut(handle) else {
            return;
        };
        let key = request.key.clone();

        match result {
            Ok(outcome) => {
                let cleared = match &outcome {
                    CommitOutcome::Committed(info) => {
                        instance.record_commit(&request, info);
                        instance.edits.commit_succeeded(
                            &key,
                            &request.body,
                            Some(info.content_sha.clone()),
                        )
                    }
                    CommitOutcome::PullRequest(_) => {
                        instance.edits.proposal_submitted(&key, &request.body)
                    }
                };
                tracing::info!(%handle, path = %key.path, cleared, "edit committed");

                let value = match request.kind {
                    EditKind::Metadata => serde_json::from_str(&request.body).unwrap_or(Value::Null),
                    EditKind::File => Value::Null,
                };
                self.push_props(handle);
                self.emit(HostEvent::Committed {
                    handle,
                    key,
                    outcome: outcome.clone(),
                });
                self.settle(handle, origin, Ok((outcome, value)));
            }
            Err(err) => {
                instance.edits.commit_failed(&key);
                tracing::warn!(%handle, path = %key.path, kind = %err.kind(), "commit failed: {err}");
                let remote = err.to_remote();
                instance.spawn(async move {
                    reviewer.report_failure(&proposal, &err).await;
                });
                self.emit(HostEvent::CommitFailed {
                    handle,
                    key,
                    error: remote.clone(),
                });
                self.settle(handle, origin, Err(RuntimeError::Remote(remote)));
            }
        }
    }

    /// Tell whoever started a commit how it ended.
    fn settle(
        &self,
        handle: ExecutionHandle,
        origin: Origin,
        result: Result<(CommitOutcome, Value)>,
    ) {
        match origin {
            Origin::Command(reply) => reply.send(result.map(|(outcome, _)| outcome)),
            Origin::Request { id, .. } => self.reply(
                handle,
                RequestKind::UpdateMetadata,
                id,
                result.map(|(_, value)| value),
            ),
        }
    }
}

/// Fetch everything props are built from.
async fn load_snapshot(
    provider: &dyn ContentProvider,
    identity: &BlockIdentity,
    context: &ContentContext,
) -> Result<Snapshot> {
    let mut snapshot = Snapshot {
        context: Some(context.clone()),
        ..Snapshot::default()
    };

    match identity.kind {
        BlockKind::File => match provider.get_file_content(context).await {
            Ok(file) => snapshot.file = Some(file),
            Err(ProviderError::NotFound(_)) => {}
            Err(err) => return Err(err.into()),
        },
        BlockKind::Folder => {
            snapshot.tree = Some(provider.get_folder_content(context).await?.tree);
        }
    }

    let metadata_context = context.with_path(identity.metadata_path(&context.path));
    if let Some(file) = provider.get_metadata(&metadata_context).await? {
        snapshot.metadata_value = serde_json::from_str(&file.content).unwrap_or_else(|err| {
            tracing::warn!(path = %file.path, "ignoring unparseable metadata: {err}");
            Value::Null
        });
        snapshot.metadata = Some(file);
    }
    Ok(snapshot)
}

async fn write(provider: &dyn ContentProvider, request: &CommitRequest) -> Result<CommitOutcome> {
    match &request.target {
        CommitTarget::CurrentLine => {
            let info = provider
                .update_file_contents(&request.current_line_write())
                .await?;
            Ok(CommitOutcome::Committed(info))
        }
        CommitTarget::NewBranch { branch } => {
            let default = provider
                .list_branches(&request.key.owner, &request.key.repo)
                .await?
                .into_iter()
                .find(|candidate| candidate.default)
                .map(|candidate| candidate.name);
            let info = provider
                .create_branch_and_pr(&request.pull_request(branch, default))
                .await?;
            Ok(CommitOutcome::PullRequest(info))
        }
    }
}

/// Handle for driving a [`HostSession`] from outside its loop.
#[derive(Clone)]
pub struct HostController {
    commands: mpsc::UnboundedSender<Command>,
    inbound: mpsc::Sender<Envelope>,
    events: broadcast::Sender<HostEvent>,
}

impl HostController {
    /// Attach a new in-process execution context.
    pub async fn attach(&self) -> Result<SandboxEndpoint> {
        let (port, endpoint) = connect(ExecutionHandle::new(), self.inbound.clone());
        self.attach_port(Box::new(port)).await?;
        Ok(endpoint)
    }

    /// Attach a context over a custom transport. Its inbound messages go to
    /// [`HostController::inbound_sender`].
    pub async fn attach_port(&self, port: Box<dyn Port>) -> Result<ExecutionHandle> {
        self.call(|reply| Command::Attach { port, reply }).await?
    }

    /// Point an instance at new content without reloading its bundle.
    pub async fn set_context(&self, handle: ExecutionHandle, context: ContentContext) -> Result<()> {
        self.call(|reply| Command::SetContext {
            handle,
            context,
            reply,
        })
        .await?
    }

    /// Confirm and write a pending edit. `None` commits the viewed file.
    pub async fn commit(
        &self,
        handle: ExecutionHandle,
        key: Option<EditKey>,
        target: CommitTarget,
    ) -> Result<CommitOutcome> {
        self.call(|reply| Command::Commit {
            handle,
            key,
            target,
            reply,
        })
        .await?
    }

    /// Drop a pending edit. Returns whether there was one.
    pub async fn discard(&self, handle: ExecutionHandle, key: Option<EditKey>) -> Result<bool> {
        self.call(|reply| Command::Discard { handle, key, reply })
            .await?
    }

    pub async fn dispose(&self, handle: ExecutionHandle) -> Result<bool> {
        self.call(|reply| Command::Dispose { handle, reply }).await
    }

    pub async fn inspect(&self, handle: ExecutionHandle) -> Result<Option<InstanceInfo>> {
        self.call(|reply| Command::Inspect { handle, reply }).await
    }

    /// Stop the loop. Every instance is disposed.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    pub fn inbound_sender(&self) -> mpsc::Sender<Envelope> {
        self.inbound.clone()
    }

    async fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }
}
