//! The sandbox side of the protocol.
//!
//! A [`BlockBridge`] is what Block code talks to. Requests go through a
//! driver task that owns the [`Correlator`]: it tags each request with a
//! fresh id, matches responses by id, and rejects whatever is still pending
//! when its deadline passes or the host closes the channel.

use blockframe_protocol::{
    BlockIdentity, BlockProps, Bundle, ContentContext, CorrelationId, DataQuery, HostMessage,
    RequestKind, SandboxMessage,
};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::error::{Result, RuntimeError};
use crate::rpc::{Correlator, ReplySender, TimeoutPolicy};
use crate::transport::{SandboxEndpoint, SandboxSender};

/// Pushed by the host outside of any request.
#[derive(Debug, Clone, PartialEq)]
pub enum SandboxEvent {
    Bundle(Bundle),
    Props(BlockProps),
}

/// A request expecting a tagged response.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundRequest {
    GithubData(DataQuery),
    StoreGet { key: String },
    StoreSet { key: String, value: Value },
    StoreDelete { key: String },
    UpdateMetadata(Value),
    UpdateFile(String),
}

impl OutboundRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            OutboundRequest::GithubData(_) => RequestKind::GithubData,
            OutboundRequest::StoreGet { .. } => RequestKind::StoreGet,
            OutboundRequest::StoreSet { .. } => RequestKind::StoreSet,
            OutboundRequest::StoreDelete { .. } => RequestKind::StoreDelete,
            OutboundRequest::UpdateMetadata(_) => RequestKind::UpdateMetadata,
            OutboundRequest::UpdateFile(_) => RequestKind::UpdateFile,
        }
    }

    fn into_message(self, request_id: CorrelationId) -> SandboxMessage {
        match self {
            OutboundRequest::GithubData(query) => {
                SandboxMessage::GithubDataRequest { request_id, query }
            }
            OutboundRequest::StoreGet { key } => SandboxMessage::StoreGetRequest { request_id, key },
            OutboundRequest::StoreSet { key, value } => SandboxMessage::StoreSetRequest {
                request_id,
                key,
                value,
            },
            OutboundRequest::StoreDelete { key } => {
                SandboxMessage::StoreDeleteRequest { request_id, key }
            }
            OutboundRequest::UpdateMetadata(metadata) => SandboxMessage::UpdateMetadata {
                request_id,
                metadata,
            },
            OutboundRequest::UpdateFile(content) => SandboxMessage::UpdateFile {
                request_id,
                content,
            },
        }
    }
}

enum BridgeCommand {
    Request {
        request: OutboundRequest,
        reply: ReplySender,
    },
    Pending {
        reply: oneshot::Sender<usize>,
    },
}

/// Block-side client. Cheap to clone; every clone shares one driver.
#[derive(Debug, Clone)]
pub struct BlockBridge {
    sender: SandboxSender,
    commands: mpsc::UnboundedSender<BridgeCommand>,
}

impl std::fmt::Debug for BridgeCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeCommand::Request { request, .. } => {
                f.debug_tuple("Request").field(&request.kind()).finish()
            }
            BridgeCommand::Pending { .. } => f.write_str("Pending"),
        }
    }
}

impl BlockBridge {
    /// Start a driver for `endpoint`. Bundles and props pushed by the host
    /// arrive on the returned receiver.
    pub fn connect(
        endpoint: SandboxEndpoint,
        policy: TimeoutPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<SandboxEvent>) {
        let (sender, inbound) = endpoint.split();
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();

        let driver = BridgeDriver {
            sender: sender.clone(),
            inbound,
            commands,
            events: event_tx,
            correlator: Correlator::new(policy),
        };
        tokio::spawn(driver.run());

        let bridge = Self {
            sender,
            commands: command_tx,
        };
        (bridge, events)
    }

    /// Announce what this Block is and what it is viewing.
    pub async fn ready(&self, block: BlockIdentity, context: ContentContext) -> Result<()> {
        self.sender
            .send(SandboxMessage::Ready { block, context })
            .await
    }

    /// Ask the host to view another path.
    pub async fn navigate(&self, path: impl Into<String>) -> Result<()> {
        self.sender
            .send(SandboxMessage::NavigateToPath { path: path.into() })
            .await
    }

    /// Send a request and wait for its response.
    pub async fn request(&self, request: OutboundRequest) -> Result<Value> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(BridgeCommand::Request { request, reply })
            .map_err(|_| RuntimeError::Disposed)?;
        rx.await.map_err(|_| RuntimeError::Disposed)?
    }

    pub async fn github_data(&self, query: DataQuery) -> Result<Value> {
        self.request(OutboundRequest::GithubData(query)).await
    }

    /// `None` when the key is not set.
    pub async fn store_get(&self, key: impl Into<String>) -> Result<Option<Value>> {
        let value = self
            .request(OutboundRequest::StoreGet { key: key.into() })
            .await?;
        Ok((!value.is_null()).then_some(value))
    }

    pub async fn store_set(&self, key: impl Into<String>, value: Value) -> Result<()> {
        self.request(OutboundRequest::StoreSet {
            key: key.into(),
            value,
        })
        .await?;
        Ok(())
    }

    /// Returns whether the key existed.
    pub async fn store_delete(&self, key: impl Into<String>) -> Result<bool> {
        let existed = self
            .request(OutboundRequest::StoreDelete { key: key.into() })
            .await?;
        Ok(existed.as_bool().unwrap_or(false))
    }

    /// Propose metadata and wait for it to be confirmed and written.
    pub async fn update_metadata(&self, metadata: Value) -> Result<Value> {
        self.request(OutboundRequest::UpdateMetadata(metadata))
            .await
    }

    /// Propose a new body for the viewed file. Resolves once recorded.
    pub async fn update_file(&self, content: impl Into<String>) -> Result<()> {
        self.request(OutboundRequest::UpdateFile(content.into()))
            .await?;
        Ok(())
    }

    /// Requests still waiting for a response.
    pub async fn pending_requests(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(BridgeCommand::Pending { reply })
            .map_err(|_| RuntimeError::Disposed)?;
        rx.await.map_err(|_| RuntimeError::Disposed)
    }
}

struct BridgeDriver {
    sender: SandboxSender,
    inbound: mpsc::UnboundedReceiver<HostMessage>,
    commands: mpsc::UnboundedReceiver<BridgeCommand>,
    events: mpsc::UnboundedSender<SandboxEvent>,
    correlator: Correlator,
}

impl BridgeDriver {
    async fn run(mut self) {
        loop {
            let deadline = self.correlator.next_deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
                message = self.inbound.recv() => match message {
                    Some(message) => self.on_message(message),
                    None => {
                        let rejected = self.correlator.reject_all(|| RuntimeError::Disposed);
                        tracing::debug!(handle = %self.sender.handle(), rejected, "host closed the channel");
                        break;
                    }
                },
                _ = sleep_until(deadline) => {
                    self.correlator.expire(Instant::now());
                }
            }
        }
    }

    async fn on_command(&mut self, command: BridgeCommand) {
        match command {
            BridgeCommand::Request { request, reply } => {
                let id = self.correlator.register(request.kind(), reply);
                if let Err(err) = self.sender.send(request.into_message(id)).await {
                    self.correlator.reject(id, err);
                }
            }
            BridgeCommand::Pending { reply } => {
                let _ = reply.send(self.correlator.len());
            }
        }
    }

    fn on_message(&mut self, message: HostMessage) {
        let kind = message.response_kind();
        match message {
            HostMessage::SetBundle { bundle } => {
                let _ = self.events.send(SandboxEvent::Bundle(bundle));
            }
            HostMessage::SetProps { props } => {
                let _ = self.events.send(SandboxEvent::Props(props));
            }
            response => {
                if let (Some(kind), Some(reply)) = (kind, response.into_reply()) {
                    self.correlator.resolve(kind, reply);
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
