use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Method, RequestBuilder};
use serde_json::Value;

use crate::config::Config;
use crate::error::{PipelineError, Result};

/// Read access to the commit history of a repository.
#[async_trait]
pub trait CommitSource: Send + Sync {
    /// Fetch the raw "list commits" payload.
    async fn list_commits(&self, url: &str) -> Result<Vec<Value>>;

    /// Fetch the raw single-commit payload that carries the `files` array.
    async fn commit_detail(&self, url: &str) -> Result<Value>;
}

/// Commits endpoint for an `owner/name` repository slug.
pub fn commits_url(api_url: &str, repo: &str) -> String {
    format!("{}/repos/{}/commits", api_url, repo.trim().trim_matches('/'))
}

/// Splits `owner/name`, rejecting anything else.
pub fn parse_repo_slug(repo: &str) -> Option<(&str, &str)> {
    let (owner, name) = repo.trim().trim_matches('/').split_once('/')?;
    let valid = |part: &str| !part.is_empty() && !part.contains('/') && !part.contains(char::is_whitespace);
    (valid(owner) && valid(name)).then_some((owner, name))
}

pub struct GitHubClient {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

impl GitHubClient {
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        if config.github_token.is_none() {
            tracing::warn!("GITHUB_API_KEY not set, using unauthenticated GitHub requests");
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(config.http_timeout)
            .build()?;

        Ok(Self {
            client,
            api_url: config.github_api_url.trim_end_matches('/').to_string(),
            token: config.github_token.clone(),
        })
    }

    /// True for urls under the configured API root. Only those get the token.
    fn is_api_url(&self, url: &str) -> bool {
        url.strip_prefix(&self.api_url)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'))
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) if self.is_api_url(url) => builder.bearer_auth(token),
            Some(_) => {
                tracing::debug!("Not sending GitHub token to {}", url);
                builder
            }
            None => builder,
        }
    }

    /// Remaining core quota, as reported by `/rate_limit`.
    pub async fn rate_limit(&self) -> Result<Option<u64>> {
        let url = format!("{}/rate_limit", self.api_url);
        let body = self.get_json(&url).await?;
        Ok(body["resources"]["core"]["remaining"]
            .as_u64()
            .or_else(|| body["rate"]["remaining"].as_u64()))
    }

    /// Name and description of a repository, via the GraphQL API.
    pub async fn repository_info(&self, owner: &str, name: &str) -> Result<(String, Option<String>)> {
        let url = format!("{}/graphql", self.api_url);
        let request = serde_json::json!({
            "query": "query($owner: String!, $name: String!) { repository(owner: $owner, name: $name) { name description } }",
            "variables": { "owner": owner, "name": name },
        });

        let response = self.request(Method::POST, &url).json(&request).send().await?;
        let body = checked_json(response, &url).await?;

        if let Some(errors) = body.get("errors").filter(|e| !e.is_null()) {
            return Err(PipelineError::Payload {
                url,
                reason: errors.to_string(),
            });
        }

        let repository = &body["data"]["repository"];
        let repo_name = repository["name"]
            .as_str()
            .ok_or_else(|| PipelineError::Payload {
                url: url.clone(),
                reason: "missing repository name".to_string(),
            })?
            .to_string();
        let description = repository["description"].as_str().map(str::to_string);

        Ok((repo_name, description))
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let response = self.request(Method::GET, url).send().await?;
        checked_json(response, url).await
    }
}

async fn checked_json(response: reqwest::Response, url: &str) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        return Err(PipelineError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    let text = response.text().await?;
    Ok(serde_json::from_str(&text)?)
}

#[async_trait]
impl CommitSource for GitHubClient {
    async fn list_commits(&self, url: &str) -> Result<Vec<Value>> {
        match self.get_json(url).await? {
            Value::Array(commits) => Ok(commits),
            other => Err(PipelineError::Payload {
                url: url.to_string(),
                reason: format!("expected a JSON array, got {}", json_kind(&other)),
            }),
        }
    }

    async fn commit_detail(&self, url: &str) -> Result<Value> {
        match self.get_json(url).await? {
            detail @ Value::Object(_) => Ok(detail),
            other => Err(PipelineError::Payload {
                url: url.to_string(),
                reason: format!("expected a JSON object, got {}", json_kind(&other)),
            }),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
