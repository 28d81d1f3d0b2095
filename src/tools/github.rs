//! GitHub-backed tools.
//!
//! Thin REST calls registered as tools by the server binary. The relay
//! never interprets their results.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::registry::{RegistryError, ToolBuilder, ToolRegistry};
use crate::protocol::ToolError;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Upper bound on a single upstream request, connect through body.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw";

/// Client for the GitHub REST API.
pub struct GitHubClient {
    http_client: Client,
    api_url: String,
    token: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullRef {
    owner: String,
    repo: String,
    pull_number: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileRef {
    owner: String,
    repo: String,
    path: String,
    #[serde(default, rename = "ref")]
    git_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewComment {
    owner: String,
    repo: String,
    pull_number: u64,
    body: String,
}

fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params)
        .map_err(|e| ToolError::InvalidRequest(format!("invalid params: {}", e)).into())
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        Self::with_timeout(api_url, token, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        api_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token,
            timeout,
        })
    }

    fn request(&self, builder: RequestBuilder, accept: &str) -> RequestBuilder {
        let builder = builder
            .header("User-Agent", concat!("tool-relay/", env!("CARGO_PKG_VERSION")))
            .header("Accept", accept);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response> {
        match builder.send().await {
            Ok(response) => Ok(response.error_for_status()?),
            Err(e) if e.is_timeout() => {
                Err(ToolError::Timeout(self.timeout.as_millis() as u64).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.api_url, path);
        let response = self
            .send(self.request(self.http_client.get(&url), JSON_MEDIA_TYPE))
            .await?;

        Ok(response.json().await?)
    }

    pub async fn get_pull_request(&self, params: Value) -> Result<Value> {
        let pr: PullRef = parse_params(params)?;
        self.get_json(&format!(
            "/repos/{}/{}/pulls/{}",
            pr.owner, pr.repo, pr.pull_number
        ))
        .await
    }

    pub async fn get_pr_comments(&self, params: Value) -> Result<Value> {
        let pr: PullRef = parse_params(params)?;
        let comments = self
            .get_json(&format!(
                "/repos/{}/{}/pulls/{}/comments",
                pr.owner, pr.repo, pr.pull_number
            ))
            .await?;
        Ok(json!({ "comments": comments }))
    }

    pub async fn get_pr_files(&self, params: Value) -> Result<Value> {
        let pr: PullRef = parse_params(params)?;
        let files = self
            .get_json(&format!(
                "/repos/{}/{}/pulls/{}/files",
                pr.owner, pr.repo, pr.pull_number
            ))
            .await?;
        Ok(json!({ "files": files }))
    }

    pub async fn get_file_content(&self, params: Value) -> Result<Value> {
        let file: FileRef = parse_params(params)?;
        let url = format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_url, file.owner, file.repo, file.path
        );
        let mut builder = self.request(self.http_client.get(&url), RAW_MEDIA_TYPE);
        if let Some(git_ref) = &file.git_ref {
            builder = builder.query(&[("ref", git_ref)]);
        }

        let content = self.send(builder).await?.text().await?;
        Ok(json!({ "path": file.path, "content": content }))
    }

    pub async fn post_pr_comment(&self, params: Value) -> Result<Value> {
        let comment: NewComment = parse_params(params)?;
        let url = format!(
            "{}/repos/{}/{}/issues/{}/comments",
            self.api_url, comment.owner, comment.repo, comment.pull_number
        );
        let response = self
            .send(
                self.request(self.http_client.post(&url), JSON_MEDIA_TYPE)
                    .json(&json!({ "body": comment.body })),
            )
            .await?;

        Ok(response.json().await?)
    }
}

fn pull_ref_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "owner": {"type": "string"},
            "repo": {"type": "string"},
            "pullNumber": {"type": "integer"}
        },
        "required": ["owner", "repo", "pullNumber"]
    })
}

/// Registers the GitHub tools on `registry`.
pub fn register_github_tools(
    registry: &mut ToolRegistry,
    client: Arc<GitHubClient>,
) -> Result<(), RegistryError> {
    let c = client.clone();
    registry.register(
        ToolBuilder::new("get_pull_request")
            .description("Fetch pull request metadata")
            .input_schema(pull_ref_schema())
            .output_schema(json!({"type": "object"}))
            .build(move |params| {
                let c = c.clone();
                async move { c.get_pull_request(params).await }
            }),
    )?;

    let c = client.clone();
    registry.register(
        ToolBuilder::new("get_pr_comments")
            .description("List review comments on a pull request")
            .input_schema(pull_ref_schema())
            .output_schema(json!({
                "type": "object",
                "properties": {"comments": {"type": "array"}}
            }))
            .build(move |params| {
                let c = c.clone();
                async move { c.get_pr_comments(params).await }
            }),
    )?;

    let c = client.clone();
    registry.register(
        ToolBuilder::new("get_pr_files")
            .description("List files changed by a pull request")
            .input_schema(pull_ref_schema())
            .output_schema(json!({
                "type": "object",
                "properties": {"files": {"type": "array"}}
            }))
            .build(move |params| {
                let c = c.clone();
                async move { c.get_pr_files(params).await }
            }),
    )?;

    let c = client.clone();
    registry.register(
        ToolBuilder::new("get_file_content")
            .description("Read a file from a repository")
            .input_schema(json!({
                "type": "object",
                "properties": {
                    "owner": {"type": "string"},
                    "repo": {"type": "string"},
                    "path": {"type": "string"},
                    "ref": {"type": "string"}
                },
                "required": ["owner", "repo", "path"]
            }))
            .output_schema(json!({
                "type": "object",
                "properties": {"path": {"type": "string"}, "content": {"type": "string"}}
            }))
            .build(move |params| {
                let c = c.clone();
                async move { c.get_file_content(params).await }
            }),
    )?;

    let c = client;
    registry.register(
        ToolBuilder::new("post_pr_comment")
            .description("Post a comment on a pull request")
            .input_schema(json!({
                "type": "object",
                "properties": {
                    "owner": {"type": "string"},
                    "repo": {"type": "string"},
                    "pullNumber": {"type": "integer"},
                    "body": {"type": "string"}
                },
                "required": ["owner", "repo", "pullNumber", "body"]
            }))
            .output_schema(json!({"type": "object"}))
            .no_cache()
            .build(move |params| {
                let c = c.clone();
                async move { c.post_pr_comment(params).await }
            }),
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::routing::get;
    use axum::{Json, Router};

    async fn spawn_fake_github() -> String {
        let app = Router::new()
            .route(
                "/repos/{owner}/{repo}/pulls/{number}/comments",
                get(|Path((owner, repo, number)): Path<(String, String, u64)>| async move {
                    Json(json!([{"id": 1, "body": format!("{}/{}#{}", owner, repo, number)}]))
                }),
            )
            .route(
                "/repos/{owner}/{repo}/pulls/{number}",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Json(json!({"number": 1}))
                }),
            )
            .route(
                "/repos/{owner}/{repo}/contents/{*path}",
                get(|Path((_, _, path)): Path<(String, String, String)>| async move {
                    format!("contents of {}", path)
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_get_pr_comments_wraps_array() {
        let client = GitHubClient::new(spawn_fake_github().await, None).unwrap();

        let result = client
            .get_pr_comments(json!({"owner": "a", "repo": "b", "pullNumber": 1}))
            .await
            .unwrap();

        assert_eq!(result["comments"][0]["body"], "a/b#1");
    }

    #[tokio::test]
    async fn test_get_file_content_returns_raw_text() {
        let client = GitHubClient::new(spawn_fake_github().await, Some("t".to_string())).unwrap();

        let result = client
            .get_file_content(json!({"owner": "a", "repo": "b", "path": "src/lib.rs"}))
            .await
            .unwrap();

        assert_eq!(result["content"], "contents of src/lib.rs");
    }

    #[tokio::test]
    async fn test_missing_params_are_invalid_requests() {
        let client = GitHubClient::new("http://127.0.0.1:9", None).unwrap();

        let err = client.get_pr_files(json!({"owner": "a"})).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ToolError>(),
            Some(ToolError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_hung_upstream_times_out() {
        let client = GitHubClient::with_timeout(
            spawn_fake_github().await,
            None,
            Duration::from_millis(200),
        )
        .unwrap();

        let started = std::time::Instant::now();
        let err = client
            .get_pull_request(json!({"owner": "a", "repo": "b", "pullNumber": 1}))
            .await
            .unwrap_err();

        assert_eq!(err.downcast_ref::<ToolError>(), Some(&ToolError::Timeout(200)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_registers_five_tools() {
        let mut registry = ToolRegistry::new();
        register_github_tools(&mut registry, Arc::new(GitHubClient::new(DEFAULT_API_URL, None).unwrap()))
            .unwrap();

        assert_eq!(registry.tool_count(), 5);
        let post = registry.list().into_iter().find(|t| t.name == "post_pr_comment").unwrap();
        assert!(!post.cacheable);
    }
}
