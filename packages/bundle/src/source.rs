//! Where bundle archives come from.

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use http::StatusCode;
use serde::Deserialize;
use url::Url;

use blockframe_protocol::BlockIdentity;

use crate::error::{Error, Result};

/// Fetches the packaged archive (gzip-compressed tar) for a Block.
///
/// Implementations can hit a real release host or serve fixtures in tests.
#[async_trait]
pub trait BundleSource: Send + Sync {
    async fn fetch(&self, identity: &BlockIdentity) -> Result<Bytes>;
}

/// Default GitHub REST API root.
pub const DEFAULT_API_BASE: &str = "https://api.github.com/";

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    assets: Vec<Asset>,
}

#[derive(Debug, Deserialize)]
struct Asset {
    name: String,
    browser_download_url: String,
}

/// Reads bundles from the latest GitHub release of the Block's repository.
///
/// The release must carry an asset named `<block-id>.tar.gz`.
pub struct ReleaseSource {
    client: reqwest::Client,
    api_base: Url,
    token: Option<String>,
}

impl ReleaseSource {
    /// Create a source against the given API root.
    pub fn new(api_base: &str) -> Result<Self> {
        let mut api_base = Url::parse(api_base)?;
        if !api_base.path().ends_with('/') {
            let path = format!("{}/", api_base.path());
            api_base.set_path(&path);
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_base,
            token: None,
        })
    }

    /// Create a source against api.github.com.
    pub fn github() -> Result<Self> {
        Self::new(DEFAULT_API_BASE)
    }

    /// Authenticate requests with a bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Use a preconfigured HTTP client.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn asset_name(block_id: &str) -> String {
        format!("{}.tar.gz", block_id)
    }

    fn request(&self, url: &str, accept: &'static str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .get(url)
            .header(ACCEPT, accept)
            .header(USER_AGENT, concat!("blockframe/", env!("CARGO_PKG_VERSION")));
        match &self.token {
            Some(token) => builder.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => builder,
        }
    }
}

#[async_trait]
impl BundleSource for ReleaseSource {
    async fn fetch(&self, identity: &BlockIdentity) -> Result<Bytes> {
        let block = identity.to_string();
        let url = self.api_base.join(&format!(
            "repos/{}/{}/releases/latest",
            identity.owner, identity.repo
        ))?;

        let response = self
            .request(url.as_str(), "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| Error::fetch_failed(&block, e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                return Err(Error::not_found(&block, "repository has no releases"));
            }
            status if !status.is_success() => {
                return Err(Error::fetch_failed(
                    &block,
                    format!("release lookup returned {}", status),
                ));
            }
            _ => {}
        }

        let release: Release = response
            .json()
            .await
            .map_err(|e| Error::fetch_failed(&block, format!("release body: {}", e)))?;

        let wanted = Self::asset_name(&identity.id);
        let asset = release
            .assets
            .into_iter()
            .find(|a| a.name == wanted)
            .ok_or_else(|| {
                Error::not_found(
                    &block,
                    format!("release {} has no asset {}", release.tag_name, wanted),
                )
            })?;

        tracing::debug!(block = %block, release = %release.tag_name, "downloading bundle asset");

        let response = self
            .request(&asset.browser_download_url, "application/octet-stream")
            .send()
            .await
            .map_err(|e| Error::fetch_failed(&block, e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::fetch_failed(
                &block,
                format!("asset download returned {}", response.status()),
            ));
        }

        response
            .bytes()
            .await
            .map_err(|e| Error::fetch_failed(&block, format!("asset body: {}", e)))
    }
}
