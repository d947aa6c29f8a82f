use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::models::{CommitRecord, SENTINEL};

/// Merge-by-id upsert of a commit with its author, files and affected functions.
pub const UPSERT_COMMIT: &str = r#"
MERGE (c:Commit {id: $commit.id})
SET c.message = $commit.message,
    c.date = $commit.date,
    c.url = $commit.url,
    c.summary = $summary.Summary,
    c.importance = $summary.Importance
FOREACH (author IN CASE WHEN $commit.author IS NULL THEN [] ELSE [$commit.author] END |
    MERGE (a:Author {email: author.email})
    SET a.name = author.name
    MERGE (c)-[:COMMITTED_BY]->(a))
FOREACH (file IN $commit.files |
    MERGE (f:File {filename: file.filename})
    SET f.raw_url = file.raw_url
    MERGE (c)-[r:AFFECTS_FILE]->(f)
    SET r.patch = file.patch)
FOREACH (name IN $summary.Functions |
    MERGE (fn:Function {name: name})
    MERGE (c)-[:AFFECTS_FUNCTION]->(fn))
"#;

#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn upsert_commit(&self, commit: &CommitRecord) -> Result<()>;
}

/// The `commit` parameter of [`UPSERT_COMMIT`].
///
/// The upstream author mapping is untyped, so name and email are pulled out
/// here. An author without an email is sent as null and not merged.
pub fn commit_param(commit: &CommitRecord) -> Value {
    let author_field = |key: &str| {
        commit
            .author
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(SENTINEL)
            .to_string()
    };

    let email = author_field("email");
    let author = if email == SENTINEL {
        Value::Null
    } else {
        json!({
            "name": author_field("name"),
            "email": email,
        })
    };

    json!({
        "id": commit.id,
        "message": commit.message,
        "date": commit.date,
        "url": commit.url,
        "author": author,
        "files": commit.files,
    })
}

/// The `summary` parameter of [`UPSERT_COMMIT`]; empty when no summary is attached.
pub fn summary_param(commit: &CommitRecord) -> Value {
    match &commit.summary {
        Some(summary) => summary.to_graph_param(),
        None => json!({
            "Summary": SENTINEL,
            "Importance": Value::Null,
            "Files": [],
            "Functions": [],
        }),
    }
}

/// Neo4j over its HTTP transactional endpoint.
pub struct Neo4jHttpStore {
    client: reqwest::Client,
    endpoint: String,
    user: String,
    password: Option<String>,
}

impl Neo4jHttpStore {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/db/{}/tx/commit", config.neo4j_url, config.neo4j_database),
            user: config.neo4j_user.clone(),
            password: config.neo4j_password.clone(),
        })
    }
}

#[async_trait]
impl GraphStore for Neo4jHttpStore {
    async fn upsert_commit(&self, commit: &CommitRecord) -> Result<()> {
        let request = json!({
            "statements": [
                {
                    "statement": UPSERT_COMMIT,
                    "parameters": {
                        "commit": commit_param(commit),
                        "summary": summary_param(commit),
                    }
                }
            ]
        });

        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.user, self.password.as_ref())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PipelineError::Status {
                status: response.status().as_u16(),
                url: self.endpoint.clone(),
            });
        }

        let body: Value = response.json().await?;
        match body["errors"].as_array() {
            Some(errors) if !errors.is_empty() => {
                let messages: Vec<String> = errors
                    .iter()
                    .map(|e| {
                        format!(
                            "{}: {}",
                            e["code"].as_str().unwrap_or("unknown"),
                            e["message"].as_str().unwrap_or("")
                        )
                    })
                    .collect();
                Err(PipelineError::Graph(messages.join("; ")))
            }
            _ => Ok(()),
        }
    }
}
