//! Authenticated JSON requests against the REST API.

use std::sync::Arc;

use http::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use http::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use url::Url;

use blockframe_runtime::CredentialSource;

use crate::error::{Error, Result};
use crate::types::ApiMessage;

pub const DEFAULT_API_BASE: &str = "https://api.github.com/";

const MEDIA_TYPE: &str = "application/vnd.github+json";

pub struct GithubClient {
    http: reqwest::Client,
    api_base: Url,
    credentials: Arc<dyn CredentialSource>,
}

impl GithubClient {
    pub fn new(api_base: &str, credentials: Arc<dyn CredentialSource>) -> Result<Self> {
        let mut api_base = Url::parse(api_base)?;
        if !api_base.path().ends_with('/') {
            let path = format!("{}/", api_base.path());
            api_base.set_path(&path);
        }
        Ok(Self {
            http: reqwest::Client::new(),
            api_base,
            credentials,
        })
    }

    /// Use a preconfigured HTTP client.
    pub fn with_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    /// Build an endpoint URL from path pieces. Each piece may contain `/`;
    /// every component is percent-encoded on its own.
    pub fn endpoint(&self, pieces: &[&str]) -> Result<Url> {
        let mut url = self.api_base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| Error::Unexpected(format!("{} cannot be a base", self.api_base)))?;
            segments.pop_if_empty();
            for piece in pieces {
                segments.extend(piece.split('/').filter(|s| !s.is_empty()));
            }
        }
        Ok(url)
    }

    /// Resolve a raw API path such as `/repos/o/r/commits?per_page=5`
    /// against the base. Anything that could name another host or climb out
    /// of the base path is refused, since requests carry the bearer token.
    pub fn resolve(&self, raw: &str) -> Result<Url> {
        let outside = || Error::OutsideApi(raw.to_string());
        if raw.starts_with("//") || raw.contains('#') || raw.contains('\\') {
            return Err(outside());
        }
        if Url::parse(raw).is_ok() {
            return Err(outside());
        }
        let (path, query) = match raw.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (raw, None),
        };
        let pieces: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if pieces.iter().any(|piece| *piece == "." || *piece == "..") {
            return Err(outside());
        }

        let mut url = self.endpoint(&pieces)?;
        url.set_query(query.filter(|q| !q.is_empty()));
        if url.origin() != self.api_base.origin()
            || !url.path().starts_with(self.api_base.path().trim_end_matches('/'))
        {
            return Err(outside());
        }
        Ok(url)
    }

    async fn request(&self, method: Method, url: Url) -> Result<reqwest::RequestBuilder> {
        debug!(%method, %url, "github request");
        let builder = self
            .http
            .request(method, url)
            .header(ACCEPT, MEDIA_TYPE)
            .header(USER_AGENT, concat!("blockframe/", env!("CARGO_PKG_VERSION")));
        let token = self
            .credentials
            .bearer_token()
            .await
            .map_err(|err| Error::Credentials(err.to_string()))?;
        Ok(match token {
            Some(token) => builder.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => builder,
        })
    }

    pub async fn get<T: DeserializeOwned>(&self, url: Url, query: &[(String, String)]) -> Result<T> {
        let response = self.request(Method::GET, url).await?.query(query).send().await?;
        decode(response).await
    }

    pub async fn send<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: &B,
    ) -> Result<T> {
        let response = self.request(method, url).await?.json(body).send().await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        let message = serde_json::from_str::<ApiMessage>(&text)
            .map(|body| body.message)
            .unwrap_or_else(|_| status.canonical_reason().unwrap_or("unknown").to_string());
        return Err(Error::Status { status, message });
    }
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockframe_runtime::StaticToken;

    fn client(base: &str) -> GithubClient {
        GithubClient::new(base, Arc::new(StaticToken::anonymous())).unwrap()
    }

    #[test]
    fn endpoint_encodes_each_component() {
        let client = client("https://ghe.example.com/api/v3");
        let url = client
            .endpoint(&["repos", "octo", "hello", "contents", "docs/my notes.md"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://ghe.example.com/api/v3/repos/octo/hello/contents/docs/my%20notes.md"
        );
    }

    #[test]
    fn endpoint_skips_empty_paths() {
        let client = client(DEFAULT_API_BASE);
        let url = client.endpoint(&["repos", "o", "r", "contents", ""]).unwrap();
        assert_eq!(url.as_str(), "https://api.github.com/repos/o/r/contents");
    }

    #[test]
    fn resolve_raw_paths() {
        let client = client("https://ghe.example.com/api/v3/");
        assert_eq!(
            client.resolve("/repos/o/r/commits").unwrap().as_str(),
            "https://ghe.example.com/api/v3/repos/o/r/commits"
        );
        assert_eq!(
            client.resolve("repos/o/r/commits?per_page=5").unwrap().as_str(),
            "https://ghe.example.com/api/v3/repos/o/r/commits?per_page=5"
        );
    }

    #[test]
    fn resolve_stays_under_the_base() {
        let client = client("https://ghe.example.com/api/v3/");
        for raw in [
            "https://evil.example/steal",
            "http://127.0.0.1:9000/steal",
            "//evil.example/steal",
            "evil.example:80/steal",
            "/repos/../../steal",
            "/repos/./o",
            "/repos/o#frag",
            "/\\evil.example/steal",
            "mailto:someone@example.com",
        ] {
            let err = client.resolve(raw).unwrap_err();
            assert!(matches!(err, Error::OutsideApi(_)), "{raw}: {err}");
        }
    }
}
