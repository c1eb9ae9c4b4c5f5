//! Messages crossing the isolation boundary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorKind, RemoteError, Result};
use crate::handle::CorrelationId;
use crate::identity::{BlockIdentity, ContentContext};

/// One file of an unpacked Block bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleFile {
    pub name: String,
    pub content: String,
}

impl BundleFile {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    pub fn is_script(&self) -> bool {
        self.name.ends_with(".js") || self.name.ends_with(".mjs")
    }

    pub fn is_style(&self) -> bool {
        self.name.ends_with(".css")
    }
}

/// The code and styles of a Block, as an ordered list of files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub block_id: String,
    pub files: Vec<BundleFile>,
}

impl Bundle {
    pub fn new(block_id: impl Into<String>, files: Vec<BundleFile>) -> Self {
        Self {
            block_id: block_id.into(),
            files,
        }
    }

    /// Look up a file by name.
    pub fn file(&self, name: &str) -> Option<&BundleFile> {
        self.files.iter().find(|f| f.name == name)
    }

    pub fn scripts(&self) -> impl Iterator<Item = &BundleFile> {
        self.files.iter().filter(|f| f.is_script())
    }

    pub fn styles(&self) -> impl Iterator<Item = &BundleFile> {
        self.files.iter().filter(|f| f.is_style())
    }
}

/// Entry kind inside a folder listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
}

/// One entry of a folder listing delivered to folder Blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    pub kind: EntryKind,
    pub sha: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Everything a Block renders from.
///
/// File Blocks receive `content`; folder Blocks receive `tree`. When the
/// Block has an uncommitted edit for the viewed path, `content` is that
/// pending body and `has_pending_edit` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockProps {
    pub context: ContentContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree: Option<Vec<TreeEntry>>,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub has_pending_edit: bool,
}

/// A brokered data request: a provider API path plus query parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQuery {
    pub path: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Value>,
}

impl DataQuery {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

/// The body of every `*-response` message.
///
/// Exactly one of `response` or `error` is meaningful; when `error` is set
/// the request failed regardless of `response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub request_id: CorrelationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl Reply {
    pub fn ok(request_id: CorrelationId, response: Value) -> Self {
        Self {
            request_id,
            response: Some(response),
            error: None,
            error_kind: None,
        }
    }

    pub fn err(request_id: CorrelationId, error: RemoteError) -> Self {
        Self {
            request_id,
            response: None,
            error: Some(error.message),
            error_kind: Some(error.kind),
        }
    }

    pub fn from_result(
        request_id: CorrelationId,
        result: std::result::Result<Value, RemoteError>,
    ) -> Self {
        match result {
            Ok(value) => Self::ok(request_id, value),
            Err(error) => Self::err(request_id, error),
        }
    }

    pub fn into_result(self) -> std::result::Result<Value, RemoteError> {
        match self.error {
            Some(message) => Err(RemoteError::from_wire(self.error_kind, message)),
            None => Ok(self.response.unwrap_or(Value::Null)),
        }
    }
}

/// The request/response pairs of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    GithubData,
    StoreGet,
    StoreSet,
    StoreDelete,
    UpdateMetadata,
    UpdateFile,
}

impl RequestKind {
    /// Wrap a reply in the response message matching this request kind.
    pub fn respond(self, reply: Reply) -> HostMessage {
        match self {
            RequestKind::GithubData => HostMessage::GithubDataResponse(reply),
            RequestKind::StoreGet => HostMessage::StoreGetResponse(reply),
            RequestKind::StoreSet => HostMessage::StoreSetResponse(reply),
            RequestKind::StoreDelete => HostMessage::StoreDeleteResponse(reply),
            RequestKind::UpdateMetadata => HostMessage::UpdateMetadataResponse(reply),
            RequestKind::UpdateFile => HostMessage::UpdateFileResponse(reply),
        }
    }
}

/// Messages sent from a sandboxed Block to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum SandboxMessage {
    /// Sent on startup, and again whenever the Block is re-pointed.
    Ready {
        block: BlockIdentity,
        context: ContentContext,
    },
    /// Propose a new metadata document for the viewed path.
    UpdateMetadata {
        request_id: CorrelationId,
        metadata: Value,
    },
    /// Propose a new body for the viewed file.
    UpdateFile {
        request_id: CorrelationId,
        content: String,
    },
    /// Ask the host to view another path in the same repository and revision.
    NavigateToPath { path: String },
    /// Ask the host to perform a credentialed data request.
    GithubDataRequest {
        request_id: CorrelationId,
        query: DataQuery,
    },
    StoreGetRequest {
        request_id: CorrelationId,
        key: String,
    },
    StoreSetRequest {
        request_id: CorrelationId,
        key: String,
        value: Value,
    },
    StoreDeleteRequest {
        request_id: CorrelationId,
        key: String,
    },
}

impl SandboxMessage {
    /// The `type` tag of the message.
    pub fn name(&self) -> &'static str {
        match self {
            SandboxMessage::Ready { .. } => "ready",
            SandboxMessage::UpdateMetadata { .. } => "update-metadata",
            SandboxMessage::UpdateFile { .. } => "update-file",
            SandboxMessage::NavigateToPath { .. } => "navigate-to-path",
            SandboxMessage::GithubDataRequest { .. } => "github-data-request",
            SandboxMessage::StoreGetRequest { .. } => "store-get-request",
            SandboxMessage::StoreSetRequest { .. } => "store-set-request",
            SandboxMessage::StoreDeleteRequest { .. } => "store-delete-request",
        }
    }

    /// Correlation id and request kind, for messages that expect a response.
    pub fn request(&self) -> Option<(CorrelationId, RequestKind)> {
        match self {
            SandboxMessage::Ready { .. } | SandboxMessage::NavigateToPath { .. } => None,
            SandboxMessage::UpdateMetadata { request_id, .. } => {
                Some((*request_id, RequestKind::UpdateMetadata))
            }
            SandboxMessage::UpdateFile { request_id, .. } => {
                Some((*request_id, RequestKind::UpdateFile))
            }
            SandboxMessage::GithubDataRequest { request_id, .. } => {
                Some((*request_id, RequestKind::GithubData))
            }
            SandboxMessage::StoreGetRequest { request_id, .. } => {
                Some((*request_id, RequestKind::StoreGet))
            }
            SandboxMessage::StoreSetRequest { request_id, .. } => {
                Some((*request_id, RequestKind::StoreSet))
            }
            SandboxMessage::StoreDeleteRequest { request_id, .. } => {
                Some((*request_id, RequestKind::StoreDelete))
            }
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages sent from the host into a sandboxed Block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HostMessage {
    SetBundle { bundle: Bundle },
    SetProps { props: BlockProps },
    GithubDataResponse(Reply),
    StoreGetResponse(Reply),
    StoreSetResponse(Reply),
    StoreDeleteResponse(Reply),
    UpdateMetadataResponse(Reply),
    UpdateFileResponse(Reply),
}

impl HostMessage {
    /// The `type` tag of the message.
    pub fn name(&self) -> &'static str {
        match self {
            HostMessage::SetBundle { .. } => "set-bundle",
            HostMessage::SetProps { .. } => "set-props",
            HostMessage::GithubDataResponse(_) => "github-data-response",
            HostMessage::StoreGetResponse(_) => "store-get-response",
            HostMessage::StoreSetResponse(_) => "store-set-response",
            HostMessage::StoreDeleteResponse(_) => "store-delete-response",
            HostMessage::UpdateMetadataResponse(_) => "update-metadata-response",
            HostMessage::UpdateFileResponse(_) => "update-file-response",
        }
    }

    /// The request kind a response message answers.
    pub fn response_kind(&self) -> Option<RequestKind> {
        match self {
            HostMessage::SetBundle { .. } | HostMessage::SetProps { .. } => None,
            HostMessage::GithubDataResponse(_) => Some(RequestKind::GithubData),
            HostMessage::StoreGetResponse(_) => Some(RequestKind::StoreGet),
            HostMessage::StoreSetResponse(_) => Some(RequestKind::StoreSet),
            HostMessage::StoreDeleteResponse(_) => Some(RequestKind::StoreDelete),
            HostMessage::UpdateMetadataResponse(_) => Some(RequestKind::UpdateMetadata),
            HostMessage::UpdateFileResponse(_) => Some(RequestKind::UpdateFile),
        }
    }

    /// The correlated reply, for response messages.
    pub fn into_reply(self) -> Option<Reply> {
        match self {
            HostMessage::SetBundle { .. } | HostMessage::SetProps { .. } => None,
            HostMessage::GithubDataResponse(reply)
            | HostMessage::StoreGetResponse(reply)
            | HostMessage::StoreSetResponse(reply)
            | HostMessage::StoreDeleteResponse(reply)
            | HostMessage::UpdateMetadataResponse(reply)
            | HostMessage::UpdateFileResponse(reply) => Some(reply),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
