use std::sync::Arc;

use async_trait::async_trait;
use http::Method;
use serde_json::Value;
use tracing::{debug, info};

use blockframe_protocol::{ContentContext, DataQuery};
use blockframe_runtime::config::GithubConfig;
use blockframe_runtime::{
    BranchInfo, CommitInfo, ContentProvider, CredentialSource, FileContent, FileWrite,
    FolderContent, ProviderError, ProviderResult, PullRequestInfo, PullRequestSpec, WriteBase,
};

use crate::client::GithubClient;
use crate::error::{Error, Result};
use crate::types::{
    Branch, Contents, ContentsEntry, CreatePull, CreateRef, GitRef, Pull, PutContents,
    PutContentsResponse, Repository,
};

/// [`ContentProvider`] backed by the GitHub REST API.
///
/// Writes go through the contents API, one commit per file. A
/// [`WriteBase::Latest`] write looks up the current blob first so the newer
/// write wins; a [`WriteBase::Blob`] write lets the API reject a stale base.
pub struct GithubProvider {
    client: GithubClient,
}

impl GithubProvider {
    pub fn new(client: GithubClient) -> Self {
        Self { client }
    }

    pub fn from_config(
        config: &GithubConfig,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self> {
        Ok(Self::new(GithubClient::new(&config.api_base, credentials)?))
    }

    pub fn client(&self) -> &GithubClient {
        &self.client
    }

    async fn contents(&self, owner: &str, repo: &str, path: &str, revision: &str) -> Result<Contents> {
        let url = self
            .client
            .endpoint(&["repos", owner, repo, "contents", path])?;
        let query = [("ref".to_string(), revision.to_string())];
        self.client.get(url, &query).await
    }

    async fn file(&self, context: &ContentContext) -> Result<FileContent> {
        match self
            .contents(&context.owner, &context.repo, &context.path, &context.revision)
            .await?
        {
            Contents::Single(entry) if entry.kind == "file" => Ok(FileContent {
                content: entry.decoded()?,
                path: entry.path,
                sha: entry.sha,
            }),
            Contents::Single(entry) => Err(Error::Unexpected(format!(
                "{} is a {}, not a file",
                entry.path, entry.kind
            ))),
            Contents::Listing(_) => Err(Error::Unexpected(format!(
                "{} is a directory, not a file",
                context.path
            ))),
        }
    }

    /// Blob currently at `path` on `branch`, `None` when absent.
    async fn current_sha(&self, owner: &str, repo: &str, path: &str, branch: &str) -> Result<Option<String>> {
        match self.contents(owner, repo, path, branch).await {
            Ok(Contents::Single(entry)) => Ok(Some(entry.sha)),
            Ok(Contents::Listing(_)) => Err(Error::Unexpected(format!("{} is a directory", path))),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn default_branch(&self, owner: &str, repo: &str) -> Result<String> {
        let url = self.client.endpoint(&["repos", owner, repo])?;
        let repository: Repository = self.client.get(url, &[]).await?;
        Ok(repository.default_branch)
    }

    async fn put_file(&self, write: &FileWrite) -> ProviderResult<CommitInfo> {
        let sha = match &write.base {
            WriteBase::Latest => self
                .current_sha(&write.owner, &write.repo, &write.path, &write.branch)
                .await?,
            WriteBase::Blob(sha) => Some(sha.clone()),
            WriteBase::Absent => None,
        };
        let url = self
            .client
            .endpoint(&["repos", &write.owner, &write.repo, "contents", &write.path])?;
        let body = PutContents::new(&write.message, &write.content, &write.branch, sha);
        let response: PutContentsResponse = self
            .client
            .send(Method::PUT, url, &body)
            .await
            .map_err(Error::for_write)?;
        info!(
            path = %write.path,
            branch = %write.branch,
            commit = %response.commit.sha,
            "wrote file"
        );
        Ok(CommitInfo {
            commit_sha: response.commit.sha,
            content_sha: response.content.sha,
        })
    }
}

#[async_trait]
impl ContentProvider for GithubProvider {
    async fn get_file_content(&self, context: &ContentContext) -> ProviderResult<FileContent> {
        Ok(self.file(context).await?)
    }

    async fn get_folder_content(&self, context: &ContentContext) -> ProviderResult<FolderContent> {
        let contents = self
            .contents(&context.owner, &context.repo, &context.path, &context.revision)
            .await?;
        match contents {
            Contents::Listing(entries) => Ok(FolderContent {
                path: context.path.clone(),
                tree: entries.into_iter().map(ContentsEntry::tree_entry).collect(),
            }),
            Contents::Single(entry) => Err(ProviderError::InvalidRequest(format!(
                "{} is a {}, not a directory",
                entry.path, entry.kind
            ))),
        }
    }

    async fn get_metadata(&self, context: &ContentContext) -> ProviderResult<Option<FileContent>> {
        match self.file(context).await {
            Ok(file) => Ok(Some(file)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn list_branches(&self, owner: &str, repo: &str) -> ProviderResult<Vec<BranchInfo>> {
        let default = self.default_branch(owner, repo).await?;
        let url = self.client.endpoint(&["repos", owner, repo, "branches"])?;
        let query = [("per_page".to_string(), "100".to_string())];
        let branches: Vec<Branch> = self.client.get(url, &query).await?;
        Ok(branches
            .into_iter()
            .map(|branch| BranchInfo {
                default: branch.name == default,
                name: branch.name,
                sha: branch.commit.sha,
            })
            .collect())
    }

    async fn update_file_contents(&self, write: &FileWrite) -> ProviderResult<CommitInfo> {
        self.put_file(write).await
    }

    async fn create_branch_and_pr(&self, spec: &PullRequestSpec) -> ProviderResult<PullRequestInfo> {
        let write = &spec.write;
        let base = match &spec.base {
            Some(base) => base.clone(),
            None => self.default_branch(&write.owner, &write.repo).await?,
        };

        let url = self
            .client
            .endpoint(&["repos", &write.owner, &write.repo, "git", "ref", "heads", &base])?;
        let head: GitRef = self.client.get(url, &[]).await?;

        let url = self
            .client
            .endpoint(&["repos", &write.owner, &write.repo, "git", "refs"])?;
        let create = CreateRef {
            reference: format!("refs/heads/{}", write.branch),
            sha: &head.object.sha,
        };
        let _: Value = self
            .client
            .send(Method::POST, url, &create)
            .await
            .map_err(|err| match err.status() {
                Some(http::StatusCode::UNPROCESSABLE_ENTITY) => ProviderError::InvalidRequest(
                    format!("branch {} already exists: {}", write.branch, err),
                ),
                _ => err.into(),
            })?;
        debug!(branch = %write.branch, base = %base, "created branch");

        self.put_file(write).await?;

        let url = self
            .client
            .endpoint(&["repos", &write.owner, &write.repo, "pulls"])?;
        let pull = CreatePull {
            title: &spec.title,
            head: &write.branch,
            base: &base,
            body: &spec.body,
        };
        let pull: Pull = self.client.send(Method::POST, url, &pull).await?;
        info!(number = pull.number, branch = %write.branch, "opened pull request");
        Ok(PullRequestInfo {
            number: pull.number,
            url: pull.html_url,
            branch: write.branch.clone(),
        })
    }

    async fn fetch_data(&self, query: &DataQuery) -> ProviderResult<Value> {
        let url = self.client.resolve(&query.path)?;
        let params: Vec<(String, String)> = query
            .params
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (name.clone(), value)
            })
            .collect();
        Ok(self.client.get(url, &params).await?)
    }
}
