//! Channels between the host and isolated execution contexts.
//!
//! Each execution context gets a pair of tokio channels:
//!
//! - host to sandbox: a [`Port`] held by the registry, one per context;
//! - sandbox to host: a [`SandboxSender`] feeding the session's shared
//!   inbound queue.
//!
//! The inbound queue is bounded, so a Block that floods the host waits on
//! its own sends. The host-to-sandbox side is unbounded: every correlated
//! response answers a request the Block already got through, and the
//! session loop must never drop one or wait on a slow sandbox.
//!
//! The transport stamps every inbound message with the sender's
//! [`ExecutionHandle`] as an [`Envelope`]. Sandboxed code never chooses its
//! own handle, so routing by `source` cannot be spoofed by payload content.

use blockframe_protocol::{ExecutionHandle, HostMessage, SandboxMessage};
use tokio::sync::mpsc;

use crate::error::{Result, RuntimeError};

/// An inbound message and the context it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub source: ExecutionHandle,
    pub message: SandboxMessage,
}

/// Host-side sending half to one execution context.
///
/// Dropping the port closes the context's inbound channel.
pub trait Port: Send + Sync {
    fn handle(&self) -> ExecutionHandle;

    /// Queue a message without waiting. Fails only when the context is gone.
    fn send(&self, message: HostMessage) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// A [`Port`] over an unbounded tokio channel.
#[derive(Debug)]
pub struct ChannelPort {
    handle: ExecutionHandle,
    tx: mpsc::UnboundedSender<HostMessage>,
}

impl Port for ChannelPort {
    fn handle(&self) -> ExecutionHandle {
        self.handle
    }

    fn send(&self, message: HostMessage) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| RuntimeError::ChannelClosed)
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Sandbox-side sending half. Stamps every message with its handle.
#[derive(Debug, Clone)]
pub struct SandboxSender {
    handle: ExecutionHandle,
    tx: mpsc::Sender<Envelope>,
}

impl SandboxSender {
    pub fn handle(&self) -> ExecutionHandle {
        self.handle
    }

    pub async fn send(&self, message: SandboxMessage) -> Result<()> {
        self.tx
            .send(Envelope {
                source: self.handle,
                message,
            })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Send a raw wire message. Malformed input never reaches the host.
    pub async fn send_json(&self, raw: &str) -> Result<()> {
        let message = SandboxMessage::from_json(raw)?;
        self.send(message).await
    }
}

/// The sandbox side of one connection.
#[derive(Debug)]
pub struct SandboxEndpoint {
    sender: SandboxSender,
    inbound: mpsc::UnboundedReceiver<HostMessage>,
}

impl SandboxEndpoint {
    pub fn handle(&self) -> ExecutionHandle {
        self.sender.handle
    }

    pub fn sender(&self) -> &SandboxSender {
        &self.sender
    }

    pub async fn send(&self, message: SandboxMessage) -> Result<()> {
        self.sender.send(message).await
    }

    /// Next message from the host. `None` once the host closed the port.
    pub async fn recv(&mut self) -> Option<HostMessage> {
        self.inbound.recv().await
    }

    pub fn split(self) -> (SandboxSender, mpsc::UnboundedReceiver<HostMessage>) {
        (self.sender, self.inbound)
    }
}

/// Wire up a new execution context.
///
/// `inbound` is the host session's shared queue.
pub fn connect(
    handle: ExecutionHandle,
    inbound: mpsc::Sender<Envelope>,
) -> (ChannelPort, SandboxEndpoint) {
    let (tx, rx) = mpsc::unbounded_channel();
    let port = ChannelPort { handle, tx };
    let endpoint = SandboxEndpoint {
        sender: SandboxSender {
            handle,
            tx: inbound,
        },
        inbound: rx,
    };
    (port, endpoint)
}
