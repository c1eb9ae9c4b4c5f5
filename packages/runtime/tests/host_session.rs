use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use collection_literals::btree;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};

use blockframe_bundle::{archive, BundleResolver, BundleSource};
use blockframe_kv::{InMemoryKv, KvBackend, ScopeKey};
use blockframe_protocol::{
    BlockIdentity, BlockKind, BlockProps, ContentContext, CorrelationId, DataQuery, EntryKind,
    ErrorKind, ExecutionHandle, HostMessage, SandboxMessage, TreeEntry,
};
use blockframe_runtime::{
    BlockBridge, BranchInfo, Collaborators, CommitInfo, CommitOutcome, CommitTarget,
    ContentProvider, Decision, Envelope, FileContent, FileWrite, FolderContent, HostConfig,
    HostController, HostEvent, HostSession, Lifecycle, Proposal, ProviderError, ProviderResult,
    PullRequestInfo, PullRequestSpec, Reviewer, RuntimeError, SandboxEvent, TimeoutPolicy,
    WriteBase,
};

// Fakes.

struct CountingSource {
    fetches: AtomicUsize,
    delay: Duration,
}

impl CountingSource {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            fetches: AtomicUsize::new(0),
            delay,
        })
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BundleSource for CountingSource {
    async fn fetch(&self, identity: &BlockIdentity) -> blockframe_bundle::Result<Bytes> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let files = vec![blockframe_protocol::BundleFile::new(
            "index.js",
            format!("import React from 'react';\nexport const id = '{}';\n", identity.id),
        )];
        Ok(Bytes::from(archive::pack(&files)?))
    }
}

#[derive(Default)]
struct ProviderState {
    files: HashMap<String, FileContent>,
    writes: Vec<FileWrite>,
    pull_requests: Vec<PullRequestSpec>,
    next_sha: u64,
    write_delay: Duration,
}

#[derive(Default)]
struct FakeProvider {
    state: Mutex<ProviderState>,
}

impl FakeProvider {
    fn put(&self, path: &str, content: &str) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_sha += 1;
        let sha = format!("blob-{}", state.next_sha);
        state.files.insert(
            path.to_string(),
            FileContent {
                path: path.to_string(),
                content: content.to_string(),
                sha: sha.clone(),
            },
        );
        sha
    }

    fn file(&self, path: &str) -> Option<FileContent> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    fn writes(&self) -> Vec<FileWrite> {
        self.state.lock().unwrap().writes.clone()
    }

    fn pull_requests(&self) -> Vec<PullRequestSpec> {
        self.state.lock().unwrap().pull_requests.clone()
    }

    fn set_write_delay(&self, delay: Duration) {
        self.state.lock().unwrap().write_delay = delay;
    }
}

#[async_trait]
impl ContentProvider for FakeProvider {
    async fn get_file_content(&self, context: &ContentContext) -> ProviderResult<FileContent> {
        self.file(&context.path)
            .ok_or_else(|| ProviderError::NotFound(context.path.clone()))
    }

    async fn get_folder_content(&self, context: &ContentContext) -> ProviderResult<FolderContent> {
        let prefix = format!("{}/", context.path);
        let state = self.state.lock().unwrap();
        let mut tree: Vec<TreeEntry> = state
            .files
            .values()
            .filter(|file| file.path.starts_with(&prefix))
            .map(|file| TreeEntry {
                path: file.path.clone(),
                kind: EntryKind::File,
                sha: file.sha.clone(),
                size: Some(file.content.len() as u64),
            })
            .collect();
        tree.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(FolderContent {
            path: context.path.clone(),
            tree,
        })
    }

    async fn get_metadata(&self, context: &ContentContext) -> ProviderResult<Option<FileContent>> {
        Ok(self.file(&context.path))
    }

    async fn list_branches(&self, _owner: &str, _repo: &str) -> ProviderResult<Vec<BranchInfo>> {
        Ok(vec![
            BranchInfo {
                name: "dev".into(),
                sha: "c1".into(),
                default: false,
            },
            BranchInfo {
                name: "main".into(),
                sha: "c0".into(),
                default: true,
            },
        ])
    }

    async fn update_file_contents(&self, write: &FileWrite) -> ProviderResult<CommitInfo> {
        let delay = self.state.lock().unwrap().write_delay;
        tokio::time::sleep(delay).await;
        let current = self.file(&write.path).map(|file| file.sha);
        let stale = match (&write.base, &current) {
            (WriteBase::Latest, _) => false,
            (WriteBase::Blob(expected), Some(sha)) => expected != sha,
            (WriteBase::Blob(_), None) => true,
            (WriteBase::Absent, current) => current.is_some(),
        };
        if stale {
            return Err(ProviderError::StaleBaseRevision(format!(
                "{} does not match",
                write.path
            )));
        }
        let sha = self.put(&write.path, &write.content);
        self.state.lock().unwrap().writes.push(write.clone());
        Ok(CommitInfo {
            commit_sha: format!("commit-for-{sha}"),
            content_sha: sha,
        })
    }

    async fn create_branch_and_pr(&self, spec: &PullRequestSpec) -> ProviderResult<PullRequestInfo> {
        self.state.lock().unwrap().pull_requests.push(spec.clone());
        Ok(PullRequestInfo {
            number: 7,
            url: "https://example.test/pull/7".into(),
            branch: spec.write.branch.clone(),
        })
    }

    async fn fetch_data(&self, query: &DataQuery) -> ProviderResult<Value> {
        if query.path == "/slow" {
            std::future::pending::<()>().await;
        }
        Ok(json!({ "path": query.path, "params": query.params }))
    }
}

/// Answers every proposal with a fixed decision, or never when `None`.
struct FakeReviewer {
    decision: Mutex<Option<Decision>>,
    delay: Mutex<Duration>,
    seen: Mutex<Vec<Proposal>>,
    failures: Mutex<Vec<ErrorKind>>,
}

impl FakeReviewer {
    fn new(decision: Option<Decision>) -> Arc<Self> {
        Arc::new(Self {
            decision: Mutex::new(decision),
            delay: Mutex::new(Duration::ZERO),
            seen: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
        })
    }

    fn accepting() -> Arc<Self> {
        Self::new(Some(Decision::Accept { message: None }))
    }

    fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    fn seen(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    fn failures(&self) -> Vec<ErrorKind> {
        self.failures.lock().unwrap().clone()
    }
}

#[async_trait]
impl Reviewer for FakeReviewer {
    async fn review(&self, proposal: &Proposal) -> Decision {
        self.seen.lock().unwrap().push(proposal.clone());
        let decision = self.decision.lock().unwrap().clone();
        let delay = *self.delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        match decision {
            Some(decision) => decision,
            None => std::future::pending().await,
        }
    }

    async fn report_failure(&self, _proposal: &Proposal, error: &RuntimeError) {
        self.failures.lock().unwrap().push(error.kind());
    }
}

/// Holds every `get` until the test releases it.
#[derive(Default)]
struct GatedKv {
    inner: InMemoryKv,
    waiting: Mutex<Vec<oneshot::Sender<()>>>,
}

impl GatedKv {
    fn waiting(&self) -> usize {
        self.waiting.lock().unwrap().len()
    }

    /// Release held reads, newest first.
    fn release_newest(&self) {
        if let Some(gate) = self.waiting.lock().unwrap().pop() {
            let _ = gate.send(());
        }
    }
}

#[async_trait]
impl KvBackend for GatedKv {
    async fn get(&self, scope: &ScopeKey, key: &str) -> blockframe_kv::Result<Option<Value>> {
        let (tx, rx) = oneshot::channel();
        self.waiting.lock().unwrap().push(tx);
        let _ = rx.await;
        self.inner.get(scope, key).await
    }

    async fn set(&self, scope: &ScopeKey, key: &str, value: Value) -> blockframe_kv::Result<()> {
        self.inner.set(scope, key, value).await
    }

    async fn delete(&self, scope: &ScopeKey, key: &str) -> blockframe_kv::Result<bool> {
        self.inner.delete(scope, key).await
    }
}

// Harness.

struct Fixture {
    controller: HostController,
    source: Arc<CountingSource>,
    provider: Arc<FakeProvider>,
    reviewer: Arc<FakeReviewer>,
}

fn fixture(config: HostConfig, reviewer: Arc<FakeReviewer>, delay: Duration) -> Fixture {
    fixture_with(config, reviewer, delay, Arc::new(InMemoryKv::new()))
}

fn fixture_with(
    config: HostConfig,
    reviewer: Arc<FakeReviewer>,
    delay: Duration,
    kv: Arc<dyn KvBackend>,
) -> Fixture {
    let source = CountingSource::new(delay);
    let provider = Arc::new(FakeProvider::default());
    provider.put("README.md", "hello\n");
    provider.put("docs/guide.md", "# Guide\n");
    provider.put("docs/faq.md", "# FAQ\n");

    let collaborators = Collaborators {
        resolver: Arc::new(BundleResolver::with_defaults(source.clone())),
        provider: provider.clone(),
        reviewer: reviewer.clone(),
        kv,
    };
    let (session, controller) = HostSession::new(&config, collaborators);
    session.spawn();
    Fixture {
        controller,
        source,
        provider,
        reviewer,
    }
}

fn default_fixture() -> Fixture {
    fixture(HostConfig::default(), FakeReviewer::accepting(), Duration::ZERO)
}

fn notes() -> BlockIdentity {
    BlockIdentity::new("acme", "blocks", "notes", BlockKind::File)
}

fn readme() -> ContentContext {
    ContentContext::new("octo", "hello", "README.md", "main")
}

struct Client {
    handle: ExecutionHandle,
    bridge: BlockBridge,
    events: mpsc::UnboundedReceiver<SandboxEvent>,
}

impl Client {
    async fn next_event(&mut self) -> SandboxEvent {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("no event from host")
            .expect("event channel closed")
    }

    async fn next_props(&mut self) -> BlockProps {
        match self.next_event().await {
            SandboxEvent::Props(props) => props,
            other => panic!("expected props, got {other:?}"),
        }
    }
}

/// Attach, announce, and wait for bundle and props.
async fn launch(
    controller: &HostController,
    block: BlockIdentity,
    context: ContentContext,
) -> (Client, BlockProps) {
    let endpoint = controller.attach().await.unwrap();
    let handle = endpoint.handle();
    let (bridge, events) = BlockBridge::connect(endpoint, TimeoutPolicy::default());
    bridge.ready(block.clone(), context).await.unwrap();

    let mut client = Client {
        handle,
        bridge,
        events,
    };
    match client.next_event().await {
        SandboxEvent::Bundle(bundle) => assert_eq!(bundle.block_id, block.id),
        other => panic!("expected bundle, got {other:?}"),
    }
    let props = client.next_props().await;
    (client, props)
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never held");
}

// Lifecycle.

#[tokio::test]
async fn ready_delivers_bundle_then_props() {
    let fx = default_fixture();
    let (client, props) = launch(&fx.controller, notes(), readme()).await;

    assert_eq!(props.content.as_deref(), Some("hello\n"));
    assert_eq!(props.metadata, Value::Null);
    assert!(!props.has_pending_edit);

    let info = fx.controller.inspect(client.handle).await.unwrap().unwrap();
    assert_eq!(info.lifecycle, Lifecycle::PropsSent);
    assert_eq!(info.identity, Some(notes()));
}

#[tokio::test]
async fn concurrent_ready_fetches_bundle_once() {
    let fx = fixture(
        HostConfig::default(),
        FakeReviewer::accepting(),
        Duration::from_millis(50),
    );

    let mut launches = Vec::new();
    for _ in 0..6 {
        let controller = fx.controller.clone();
        launches.push(tokio::spawn(async move {
            launch(&controller, notes(), readme()).await
        }));
    }
    for launched in launches {
        let (_client, props) = launched.await.unwrap();
        assert_eq!(props.content.as_deref(), Some("hello\n"));
    }
    assert_eq!(fx.source.fetches(), 1);
}

#[tokio::test]
async fn context_change_refreshes_props_without_reload() {
    let fx = default_fixture();
    let (mut client, _) = launch(&fx.controller, notes(), readme()).await;

    client
        .bridge
        .ready(notes(), readme().with_path("docs/guide.md"))
        .await
        .unwrap();
    let props = client.next_props().await;
    assert_eq!(props.context.path, "docs/guide.md");
    assert_eq!(props.content.as_deref(), Some("# Guide\n"));
    assert_eq!(fx.source.fetches(), 1);
}

#[tokio::test]
async fn identity_change_reloads_bundle() {
    let fx = default_fixture();
    let (mut client, _) = launch(&fx.controller, notes(), readme()).await;

    let chart = BlockIdentity::new("acme", "blocks", "chart", BlockKind::File);
    client.bridge.ready(chart, readme()).await.unwrap();
    match client.next_event().await {
        SandboxEvent::Bundle(bundle) => assert_eq!(bundle.block_id, "chart"),
        other => panic!("expected bundle, got {other:?}"),
    }
    client.next_props().await;
    assert_eq!(fx.source.fetches(), 2);
}

#[tokio::test]
async fn navigation_and_host_retarget_keep_the_bundle() {
    let fx = default_fixture();
    let mut events = fx.controller.subscribe();
    let (mut client, _) = launch(&fx.controller, notes(), readme()).await;

    client.bridge.navigate("docs/faq.md").await.unwrap();
    let props = client.next_props().await;
    assert_eq!(props.context, readme().with_path("docs/faq.md"));

    fx.controller
        .set_context(client.handle, readme())
        .await
        .unwrap();
    let props = client.next_props().await;
    assert_eq!(props.content.as_deref(), Some("hello\n"));

    let mut navigated = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, HostEvent::Navigated { .. }) {
            navigated += 1;
        }
    }
    assert_eq!(navigated, 2);
}

#[tokio::test]
async fn folder_blocks_receive_a_tree() {
    let fx = default_fixture();
    let tree_block = BlockIdentity::new("acme", "blocks", "tree", BlockKind::Folder);
    let (client, props) = launch(&fx.controller, tree_block, readme().with_path("docs")).await;

    let paths: Vec<_> = props
        .tree
        .unwrap()
        .into_iter()
        .map(|entry| entry.path)
        .collect();
    assert_eq!(paths, vec!["docs/faq.md", "docs/guide.md"]);
    assert!(props.content.is_none());

    let err = client.bridge.update_file("nope").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}

#[tokio::test]
async fn messages_before_ready_are_dropped() {
    let fx = default_fixture();
    let mut endpoint = fx.controller.attach().await.unwrap();
    endpoint
        .send(SandboxMessage::StoreGetRequest {
            request_id: CorrelationId::new(1),
            key: "k".into(),
        })
        .await
        .unwrap();
    endpoint
        .send(SandboxMessage::Ready {
            block: notes(),
            context: readme(),
        })
        .await
        .unwrap();

    assert!(matches!(
        endpoint.recv().await,
        Some(HostMessage::SetBundle { .. })
    ));
    assert!(matches!(
        endpoint.recv().await,
        Some(HostMessage::SetProps { .. })
    ));
}

#[tokio::test]
async fn unknown_senders_are_ignored() {
    let fx = default_fixture();
    let stranger = ExecutionHandle::new();
    fx.controller
        .inbound_sender()
        .send(Envelope {
            source: stranger,
            message: SandboxMessage::Ready {
                block: notes(),
                context: readme(),
            },
        })
        .await
        .unwrap();

    assert!(fx.controller.inspect(stranger).await.unwrap().is_none());
    let (_client, props) = launch(&fx.controller, notes(), readme()).await;
    assert_eq!(props.content.as_deref(), Some("hello\n"));
}

#[tokio::test]
async fn dispose_rejects_pending_requests() {
    let fx = fixture(HostConfig::default(), FakeReviewer::new(None), Duration::ZERO);
    let (client, _) = launch(&fx.controller, notes(), readme()).await;

    let bridge = client.bridge.clone();
    let call = tokio::spawn(async move { bridge.update_metadata(json!({"pinned": true})).await });
    let reviewer = fx.reviewer.clone();
    eventually(|| reviewer.seen() == 1).await;

    assert!(fx.controller.dispose(client.handle).await.unwrap());
    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, RuntimeError::Disposed));
    assert!(fx.controller.inspect(client.handle).await.unwrap().is_none());
}

#[tokio::test]
async fn dispose_answers_a_commit_under_review() {
    let fx = fixture(HostConfig::default(), FakeReviewer::new(None), Duration::ZERO);
    let (mut client, _) = launch(&fx.controller, notes(), readme()).await;
    client.bridge.update_file("hello world\n").await.unwrap();
    client.next_props().await;

    let controller = fx.controller.clone();
    let handle = client.handle;
    let commit =
        tokio::spawn(async move { controller.commit(handle, None, CommitTarget::CurrentLine).await });
    let reviewer = fx.reviewer.clone();
    eventually(|| reviewer.seen() == 1).await;

    assert!(fx.controller.dispose(client.handle).await.unwrap());
    let err = commit.await.unwrap().unwrap_err();
    assert!(matches!(err, RuntimeError::Disposed));
    assert!(fx.provider.writes().is_empty());
}

// Brokered requests.

#[tokio::test]
async fn data_requests_are_brokered() {
    let fx = default_fixture();
    let (client, _) = launch(&fx.controller, notes(), readme()).await;
    let query = DataQuery {
        path: "/repos/octo/hello/commits".into(),
        params: btree! {
            "per_page".into() => json!(5),
            "sha".into() => json!("main"),
        },
    };
    let value = client.bridge.github_data(query).await.unwrap();
    assert_eq!(
        value,
        json!({
            "path": "/repos/octo/hello/commits",
            "params": {"per_page": 5, "sha": "main"},
        })
    );
}

#[tokio::test(start_paused = true)]
async fn unanswered_data_request_times_out() {
    let fx = default_fixture();
    let (client, _) = launch(&fx.controller, notes(), readme()).await;

    let err = client
        .bridge
        .github_data(DataQuery::new("/slow"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RequestTimeout);
    assert_eq!(client.bridge.pending_requests().await.unwrap(), 0);
}

#[tokio::test]
async fn store_is_scoped_per_block_and_repository() {
    let fx = default_fixture();
    let (notes_a, _) = launch(&fx.controller, notes(), readme()).await;
    let (notes_b, _) = launch(&fx.controller, notes(), readme().with_path("docs/faq.md")).await;
    let chart = BlockIdentity::new("acme", "blocks", "chart", BlockKind::File);
    let (chart_client, _) = launch(&fx.controller, chart, readme()).await;
    let elsewhere = ContentContext::new("octo", "other", "README.md", "main");
    let (notes_elsewhere, _) = launch(&fx.controller, notes(), elsewhere).await;

    notes_a
        .bridge
        .store_set("theme", json!("dark"))
        .await
        .unwrap();

    assert_eq!(
        notes_b.bridge.store_get("theme").await.unwrap(),
        Some(json!("dark"))
    );
    assert_eq!(chart_client.bridge.store_get("theme").await.unwrap(), None);
    assert_eq!(notes_elsewhere.bridge.store_get("theme").await.unwrap(), None);

    assert!(notes_b.bridge.store_delete("theme").await.unwrap());
    assert!(!notes_a.bridge.store_delete("theme").await.unwrap());
    assert_eq!(notes_a.bridge.store_get("theme").await.unwrap(), None);
}

#[tokio::test]
async fn overlapping_store_reads_resolve_their_own_requests() {
    let kv = Arc::new(GatedKv::default());
    let fx = fixture_with(
        HostConfig::default(),
        FakeReviewer::accepting(),
        Duration::ZERO,
        kv.clone(),
    );
    fx.provider.put("data.csv", "a,b\n1,2\n");
    let chart = BlockIdentity::new("acme", "blocks", "chart", BlockKind::File);
    let (a, _) = launch(&fx.controller, notes(), readme()).await;
    let (b, _) = launch(&fx.controller, chart, readme().with_path("data.csv")).await;

    a.bridge.store_set("theme", json!("dark")).await.unwrap();
    b.bridge.store_set("theme", json!("light")).await.unwrap();

    // Both bridges number requests the same way, so these reads share an id.
    let bridge = a.bridge.clone();
    let read_a = tokio::spawn(async move { bridge.store_get("theme").await });
    let waiting = kv.clone();
    eventually(|| waiting.waiting() == 1).await;
    let bridge = b.bridge.clone();
    let read_b = tokio::spawn(async move { bridge.store_get("theme").await });
    let waiting = kv.clone();
    eventually(|| waiting.waiting() == 2).await;
    assert_eq!(a.bridge.pending_requests().await.unwrap(), 1);
    assert_eq!(b.bridge.pending_requests().await.unwrap(), 1);

    kv.release_newest();
    assert_eq!(read_b.await.unwrap().unwrap(), Some(json!("light")));
    assert_eq!(a.bridge.pending_requests().await.unwrap(), 1);

    kv.release_newest();
    assert_eq!(read_a.await.unwrap().unwrap(), Some(json!("dark")));
}

#[tokio::test]
async fn request_bursts_are_all_answered() {
    let fx = default_fixture();
    let (client, _) = launch(&fx.controller, notes(), readme()).await;
    client.bridge.store_set("theme", json!("dark")).await.unwrap();

    let mut reads = Vec::new();
    for _ in 0..300 {
        let bridge = client.bridge.clone();
        reads.push(tokio::spawn(async move { bridge.store_get("theme").await }));
    }
    // Well inside the storage window; a lost reply would only surface as a timeout.
    tokio::time::timeout(Duration::from_secs(5), async {
        for read in reads {
            assert_eq!(read.await.unwrap().unwrap(), Some(json!("dark")));
        }
    })
    .await
    .expect("every read answered");
    assert_eq!(client.bridge.pending_requests().await.unwrap(), 0);
}

// Edits.

#[tokio::test]
async fn proposed_body_is_read_back() {
    let fx = default_fixture();
    let (mut client, _) = launch(&fx.controller, notes(), readme()).await;

    client.bridge.update_file("hello world\n").await.unwrap();
    let props = client.next_props().await;
    assert_eq!(props.content.as_deref(), Some("hello world\n"));
    assert!(props.has_pending_edit);

    let info = fx.controller.inspect(client.handle).await.unwrap().unwrap();
    assert_eq!(info.edits.len(), 1);
    assert_eq!(info.edits[0].original, "hello\n");
    assert!(fx.provider.writes().is_empty());
}

#[tokio::test]
async fn proposing_the_original_clears_the_edit() {
    let fx = default_fixture();
    let (mut client, _) = launch(&fx.controller, notes(), readme()).await;

    client.bridge.update_file("changed\n").await.unwrap();
    client.next_props().await;
    client.bridge.update_file("hello\n").await.unwrap();
    let props = client.next_props().await;

    assert_eq!(props.content.as_deref(), Some("hello\n"));
    assert!(!props.has_pending_edit);
    let info = fx.controller.inspect(client.handle).await.unwrap().unwrap();
    assert!(info.edits.is_empty());
}

#[tokio::test]
async fn commit_writes_and_clears() {
    let fx = default_fixture();
    let (mut client, _) = launch(&fx.controller, notes(), readme()).await;
    client.bridge.update_file("hello world\n").await.unwrap();
    client.next_props().await;

    // Someone else wrote in between; the default policy writes over it.
    fx.provider.put("README.md", "concurrent\n");

    let outcome = fx
        .controller
        .commit(client.handle, None, CommitTarget::CurrentLine)
        .await
        .unwrap();
    assert!(matches!(outcome, CommitOutcome::Committed(_)));

    let writes = fx.provider.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].base, WriteBase::Latest);
    assert_eq!(writes[0].branch, "main");
    assert_eq!(writes[0].message, "Update README.md");
    assert_eq!(fx.provider.file("README.md").unwrap().content, "hello world\n");

    let props = client.next_props().await;
    assert_eq!(props.content.as_deref(), Some("hello world\n"));
    assert!(!props.has_pending_edit);
    assert_eq!(fx.reviewer.seen(), 1);
}

#[tokio::test]
async fn edit_lifecycle_is_observable() {
    let fx = default_fixture();
    let mut events = fx.controller.subscribe();
    let (mut client, _) = launch(&fx.controller, notes(), readme()).await;
    client.bridge.update_file("hello world\n").await.unwrap();
    client.next_props().await;
    fx.controller
        .commit(client.handle, None, CommitTarget::CurrentLine)
        .await
        .unwrap();
    assert!(fx.controller.dispose(client.handle).await.unwrap());

    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event")
            .unwrap();
        match event {
            HostEvent::EditProposed { key, pending, .. } => {
                assert_eq!(key.path, "README.md");
                assert!(pending);
                seen.push("proposed");
            }
            HostEvent::Committed { outcome, .. } => {
                assert!(matches!(outcome, CommitOutcome::Committed(_)));
                seen.push("committed");
            }
            HostEvent::Disposed { handle } => {
                assert_eq!(handle, client.handle);
                seen.push("disposed");
                break;
            }
            _ => {}
        }
    }
    assert_eq!(seen, ["proposed", "committed", "disposed"]);
}

#[tokio::test]
async fn stale_base_keeps_the_edit() {
    let config = HostConfig::from_toml("[commit]\npolicy = \"check-base\"\n").unwrap();
    let fx = fixture(config, FakeReviewer::accepting(), Duration::ZERO);
    let mut events = fx.controller.subscribe();
    let (mut client, _) = launch(&fx.controller, notes(), readme()).await;
    client.bridge.update_file("hello world\n").await.unwrap();
    client.next_props().await;

    fx.provider.put("README.md", "concurrent\n");

    let err = fx
        .controller
        .commit(client.handle, None, CommitTarget::CurrentLine)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StaleBaseRevision);

    let info = fx.controller.inspect(client.handle).await.unwrap().unwrap();
    assert_eq!(info.edits.len(), 1);
    assert_eq!(info.edits[0].proposed, "hello world\n");
    assert_eq!(info.edits[0].original, "hello\n");
    assert_eq!(fx.provider.file("README.md").unwrap().content, "concurrent\n");

    let reviewer = fx.reviewer.clone();
    eventually(|| reviewer.failures() == vec![ErrorKind::StaleBaseRevision]).await;

    let mut failed = false;
    while let Ok(event) = events.try_recv() {
        failed |= matches!(event, HostEvent::CommitFailed { .. });
    }
    assert!(failed);
}

#[tokio::test]
async fn commit_to_new_branch_opens_pull_request() {
    let fx = default_fixture();
    let (mut client, _) = launch(&fx.controller, notes(), readme()).await;
    client.bridge.update_file("hello world\n").await.unwrap();
    client.next_props().await;

    let outcome = fx
        .controller
        .commit(
            client.handle,
            None,
            CommitTarget::NewBranch {
                branch: "readme-edit".into(),
            },
        )
        .await
        .unwrap();
    let CommitOutcome::PullRequest(pr) = outcome else {
        panic!("expected a pull request");
    };
    assert_eq!(pr.branch, "readme-edit");

    let specs = fx.provider.pull_requests();
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].base.as_deref(), Some("main"));
    assert_eq!(specs[0].write.branch, "readme-edit");

    let info = fx.controller.inspect(client.handle).await.unwrap().unwrap();
    assert!(info.edits.is_empty());
    assert_eq!(fx.provider.file("README.md").unwrap().content, "hello\n");
}

#[tokio::test]
async fn discard_drops_the_edit() {
    let fx = default_fixture();
    let (mut client, _) = launch(&fx.controller, notes(), readme()).await;
    client.bridge.update_file("draft\n").await.unwrap();
    client.next_props().await;

    assert!(fx.controller.discard(client.handle, None).await.unwrap());
    let props = client.next_props().await;
    assert_eq!(props.content.as_deref(), Some("hello\n"));
    assert!(!fx.controller.discard(client.handle, None).await.unwrap());
}

#[tokio::test]
async fn metadata_update_is_confirmed_and_written() {
    let fx = default_fixture();
    let (mut client, _) = launch(&fx.controller, notes(), readme()).await;

    let value = client
        .bridge
        .update_metadata(json!({"pinned": true}))
        .await
        .unwrap();
    assert_eq!(value, json!({"pinned": true}));

    let path = ".github/blocks/file/acme__blocks__notes/README.md.json";
    let written = fx.provider.file(path).unwrap();
    assert_eq!(
        serde_json::from_str::<Value>(&written.content).unwrap(),
        json!({"pinned": true})
    );

    // One push for the proposal, one for the commit.
    client.next_props().await;
    let props = client.next_props().await;
    assert_eq!(props.metadata, json!({"pinned": true}));
    assert!(!props.has_pending_edit);
}

#[tokio::test(start_paused = true)]
async fn late_metadata_write_is_cut_before_the_block_gives_up() {
    let reviewer = FakeReviewer::accepting();
    reviewer.set_delay(Duration::from_secs(290));
    let fx = fixture(HostConfig::default(), reviewer, Duration::ZERO);
    fx.provider.set_write_delay(Duration::from_secs(15));
    let (client, _) = launch(&fx.controller, notes(), readme()).await;

    let started = tokio::time::Instant::now();
    let err = client
        .bridge
        .update_metadata(json!({"pinned": true}))
        .await
        .unwrap_err();
    assert_ne!(err.kind(), ErrorKind::RequestTimeout);
    assert!(started.elapsed() < Duration::from_secs(300));

    // The abandoned write never lands, and the edit is kept for a retry.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(fx.provider.writes().is_empty());
    let info = fx.controller.inspect(client.handle).await.unwrap().unwrap();
    assert_eq!(info.edits.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn late_metadata_acceptance_still_commits() {
    let reviewer = FakeReviewer::accepting();
    reviewer.set_delay(Duration::from_secs(280));
    let fx = fixture(HostConfig::default(), reviewer, Duration::ZERO);
    fx.provider.set_write_delay(Duration::from_secs(5));
    let (client, _) = launch(&fx.controller, notes(), readme()).await;

    let value = client
        .bridge
        .update_metadata(json!({"pinned": true}))
        .await
        .unwrap();
    assert_eq!(value, json!({"pinned": true}));
    assert_eq!(fx.provider.writes().len(), 1);
}

#[tokio::test]
async fn unchanged_metadata_skips_review() {
    let fx = default_fixture();
    fx.provider.put(
        ".github/blocks/file/acme__blocks__notes/README.md.json",
        "{\"pinned\": true}",
    );
    let (client, props) = launch(&fx.controller, notes(), readme()).await;
    assert_eq!(props.metadata, json!({"pinned": true}));

    let value = client
        .bridge
        .update_metadata(json!({"pinned": true}))
        .await
        .unwrap();
    assert_eq!(value, json!({"pinned": true}));
    assert_eq!(fx.reviewer.seen(), 0);
    assert!(fx.provider.writes().is_empty());
}

#[tokio::test]
async fn rejected_metadata_is_discarded() {
    let fx = fixture(
        HostConfig::default(),
        FakeReviewer::new(Some(Decision::Reject)),
        Duration::ZERO,
    );
    let (client, _) = launch(&fx.controller, notes(), readme()).await;

    let err = client
        .bridge
        .update_metadata(json!({"pinned": true}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Rejected);
    assert!(fx.provider.writes().is_empty());

    let info = fx.controller.inspect(client.handle).await.unwrap().unwrap();
    assert!(info.edits.is_empty());
}
