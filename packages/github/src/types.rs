//! REST payloads, limited to the fields the provider reads or sends.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use blockframe_protocol::{EntryKind, TreeEntry};

use crate::error::{Error, Result};

/// `GET /repos/{owner}/{repo}/contents/{path}` answers with an object for a
/// file and an array for a directory.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum Contents {
    Listing(Vec<ContentsEntry>),
    Single(ContentsEntry),
}

#[derive(Debug, Deserialize)]
pub(crate) struct ContentsEntry {
    pub path: String,
    pub sha: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub encoding: Option<String>,
}

impl ContentsEntry {
    /// The decoded body of a file entry.
    pub fn decoded(&self) -> Result<String> {
        let raw = self
            .content
            .as_deref()
            .ok_or_else(|| Error::Unexpected(format!("{} has no inline content", self.path)))?;
        match self.encoding.as_deref() {
            Some("base64") | None => {
                // The API wraps base64 bodies at 60 columns.
                let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
                Ok(String::from_utf8(STANDARD.decode(compact)?)?)
            }
            Some(other) => Err(Error::Unexpected(format!(
                "{} uses unsupported encoding {}",
                self.path, other
            ))),
        }
    }

    pub fn tree_entry(self) -> TreeEntry {
        TreeEntry {
            kind: if self.kind == "dir" {
                EntryKind::Dir
            } else {
                EntryKind::File
            },
            path: self.path,
            sha: self.sha,
            size: self.size,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct Branch {
    pub name: String,
    pub commit: ShaRef,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ShaRef {
    pub sha: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Repository {
    pub default_branch: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GitRef {
    pub object: ShaRef,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateRef<'a> {
    #[serde(rename = "ref")]
    pub reference: String,
    pub sha: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct PutContents<'a> {
    pub message: &'a str,
    pub content: String,
    pub branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
}

impl<'a> PutContents<'a> {
    pub fn new(message: &'a str, body: &str, branch: &'a str, sha: Option<String>) -> Self {
        Self {
            message,
            content: STANDARD.encode(body.as_bytes()),
            branch,
            sha,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct PutContentsResponse {
    pub content: ShaRef,
    pub commit: ShaRef,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreatePull<'a> {
    pub title: &'a str,
    pub head: &'a str,
    pub base: &'a str,
    pub body: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Pull {
    pub number: u64,
    pub html_url: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiMessage {
    pub message: String,
}
