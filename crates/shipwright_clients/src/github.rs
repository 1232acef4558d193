//! GitHub repository as a target tree, over the REST contents API.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shipwright_ops::{line_count, FileEntry, OpsResult, TreeAccess};
use tracing::{debug, info};

use crate::error::{ClientError, ClientResult};
use crate::settings::GitHubSettings;

/// One file as returned by the contents API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub content: String,
    pub sha: String,
}

/// Tree access over one repository branch.
///
/// Every write and delete is a commit on the configured branch.
pub struct GitHubTree {
    api_url: String,
    repo: String,
    branch: String,
    token: String,
    client: reqwest::Client,
}

impl GitHubTree {
    pub fn new(settings: &GitHubSettings) -> ClientResult<Self> {
        let token = settings
            .token
            .expose()
            .ok_or_else(|| ClientError::MissingConfig(vec![crate::settings::GITHUB_TOKEN.to_string()]))?
            .to_string();
        let client = reqwest::Client::builder()
            .user_agent(concat!("shipwright/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            repo: settings.repo.clone(),
            branch: settings.branch.clone(),
            token,
            client,
        })
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    fn contents_url(&self, path: &str) -> String {
        format!("{}/repos/{}/contents/{}", self.api_url, self.repo, path)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("Authorization", format!("token {}", self.token))
            .header("Accept", "application/vnd.github.v3+json")
    }

    async fn check(response: reqwest::Response, what: &str) -> ClientResult<reqwest::Response> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                service: "GitHub",
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Fetch a file with its blob sha.
    pub async fn fetch(&self, path: &str) -> ClientResult<RemoteFile> {
        let response = self
            .request(Method::GET, &self.contents_url(path))
            .query(&[("ref", self.branch.as_str())])
            .send()
            .await?;
        let response = Self::check(response, path).await?;
        let body: ContentsResponse = response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(format!("contents of {}: {}", path, e)))?;
        if body.kind != "file" {
            return Err(ClientError::InvalidResponse(format!("{} is a {}", path, body.kind)));
        }
        // Files over 1 MB come back without inline content.
        if body.encoding.as_deref() == Some("none") {
            return Err(ClientError::Unreadable(path.to_string()));
        }
        let content = match decode_content(body.content.as_deref().unwrap_or_default()) {
            Err(ClientError::Unreadable(_)) => return Err(ClientError::Unreadable(path.to_string())),
            other => other?,
        };
        Ok(RemoteFile {
            content,
            sha: body.sha,
        })
    }

    async fn sha_of(&self, path: &str) -> ClientResult<Option<String>> {
        match self.fetch(path).await {
            Ok(file) => Ok(Some(file.sha)),
            Err(ClientError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Create or update `path` in one commit.
    pub async fn put(&self, path: &str, content: &str, message: &str) -> ClientResult<()> {
        let sha = self.sha_of(path).await?;
        let body = PutRequest {
            message,
            content: STANDARD.encode(content.as_bytes()),
            branch: &self.branch,
            sha: sha.as_deref(),
        };
        let response = self
            .request(Method::PUT, &self.contents_url(path))
            .json(&body)
            .send()
            .await?;
        Self::check(response, path).await?;
        info!("{} ({})", message, self.repo);
        Ok(())
    }

    /// Delete `path` in one commit.
    pub async fn remove(&self, path: &str, message: &str) -> ClientResult<()> {
        let file = self.fetch(path).await?;
        let body = DeleteRequest {
            message,
            sha: &file.sha,
            branch: &self.branch,
        };
        let response = self
            .request(Method::DELETE, &self.contents_url(path))
            .json(&body)
            .send()
            .await?;
        Self::check(response, path).await?;
        info!("{} ({})", message, self.repo);
        Ok(())
    }

    /// Every blob path on the branch, sorted.
    pub async fn blob_paths(&self) -> ClientResult<Vec<String>> {
        let url = format!(
            "{}/repos/{}/git/trees/{}",
            self.api_url, self.repo, self.branch
        );
        let response = self
            .request(Method::GET, &url)
            .query(&[("recursive", "1")])
            .send()
            .await?;

        // An empty repository has no branch tree yet.
        if matches!(response.status(), StatusCode::NOT_FOUND | StatusCode::CONFLICT) {
            debug!("Repository {} has no tree on {}", self.repo, self.branch);
            return Ok(Vec::new());
        }
        let response = Self::check(response, &url).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(format!("tree listing: {}", e)))?;
        parse_tree_listing(&body)
    }
}

#[async_trait]
impl TreeAccess for GitHubTree {
    fn target_id(&self) -> String {
        format!("github:{}@{}", self.repo, self.branch)
    }

    async fn read_file(&self, path: &str) -> OpsResult<String> {
        Ok(self.fetch(path).await?.content)
    }

    async fn write_file(&self, path: &str, content: &str, message: &str) -> OpsResult<()> {
        Ok(self.put(path, content, message).await?)
    }

    async fn delete_file(&self, path: &str, message: &str) -> OpsResult<()> {
        Ok(self.remove(path, message).await?)
    }

    async fn list_files(&self) -> OpsResult<Vec<FileEntry>> {
        let mut entries = Vec::new();
        for path in self.blob_paths().await? {
            let content = match self.fetch(&path).await {
                Ok(file) => file.content,
                // Binary files are not part of the prompt context.
                Err(ClientError::Unreadable(_)) => {
                    debug!("Skipping {}: not text", path);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            entries.push(FileEntry {
                line_count: line_count(&content),
                path,
            });
        }
        Ok(entries)
    }
}

/// Decode contents-API base64, which arrives wrapped at 60 columns.
pub fn decode_content(encoded: &str) -> ClientResult<String> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| ClientError::InvalidResponse(format!("invalid base64 content: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|_| ClientError::Unreadable("file content is not UTF-8".to_string()))
}

/// Blob paths from a `git/trees?recursive=1` response.
pub fn parse_tree_listing(body: &Value) -> ClientResult<Vec<String>> {
    let tree = body
        .get("tree")
        .and_then(Value::as_array)
        .ok_or_else(|| ClientError::InvalidResponse("tree listing without 'tree'".to_string()))?;
    if body.get("truncated").and_then(Value::as_bool) == Some(true) {
        tracing::warn!("Repository tree listing was truncated by GitHub");
    }
    let mut paths: Vec<String> = tree
        .iter()
        .filter(|entry| entry.get("type").and_then(Value::as_str) == Some("blob"))
        .filter_map(|entry| entry.get("path").and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    paths.sort();
    Ok(paths)
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    #[serde(rename = "type")]
    kind: String,
    sha: String,
    content: Option<String>,
    encoding: Option<String>,
}

#[derive(Debug, Serialize)]
struct PutRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct DeleteRequest<'a> {
    message: &'a str,
    sha: &'a str,
    branch: &'a str,
}
