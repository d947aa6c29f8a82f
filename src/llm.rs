//! Commit summarization through a local Ollama chat endpoint.

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::models::CommitRecord;

/// Produces a free-text analysis of a commit. The text should be JSON but
/// callers must not rely on it.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, commit: &CommitRecord) -> Result<String>;

    fn model_name(&self) -> &str;
}

pub fn build_prompt(commit: &CommitRecord) -> Result<String> {
    let commit_json = serde_json::to_string(commit)?;
    Ok(format!(
        "Here is the commit data: {commit_json}\n\
         Analyze this commit from a GitHub repository. Summarize the main changes in a paragraph, \
         including the patch details. Identify the functions and files that were modified. \
         Assess the importance of this commit to the overall codebase on a scale from 1 to 5, \
         with 5 being the most crucial. Format the analysis in a compact JSON format without any new lines \
         or unnecessary spaces. Include keys 'Files', 'Functions', 'Summary', 'Importance'. \
         For each file, list the filename, its raw URL, and include the patch content. \
         Specify which functions were affected in each file. The JSON output should be compact \
         and readable in a single line if possible."
    ))
}

pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.llm_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.ollama_url.clone(),
            model: config.ollama_model.clone(),
        })
    }
}

#[async_trait]
impl Summarizer for OllamaClient {
    async fn summarize(&self, commit: &CommitRecord) -> Result<String> {
        let request = serde_json::json!({
            "model": self.model,
            "format": "json",
            "stream": false,
            "messages": [
                {
                    "role": "user",
                    "content": build_prompt(commit)?
                }
            ]
        });

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(PipelineError::Llm(format!("{}: {}", status, error_text)));
        }

        let response_data: serde_json::Value = response.json().await?;

        let content = response_data["message"]["content"]
            .as_str()
            .ok_or_else(|| PipelineError::Llm("Missing message content".to_string()))?
            .to_string();

        Ok(content)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileChange, SENTINEL};
    use mockito::Matcher;
    use serde_json::json;

    fn commit() -> CommitRecord {
        CommitRecord {
            id: "abc123".into(),
            message: "Fix flaky retry".into(),
            author: json!({"name": "Ada", "email": "ada@example.com"}),
            date: "2024-05-01T12:00:00Z".into(),
            url: "https://api.github.com/repos/o/r/commits/abc123".into(),
            files: vec![FileChange {
                filename: "src/retry.py".into(),
                patch: "@@ -1 +1 @@\n-x\n+y".into(),
                raw_url: SENTINEL.into(),
            }],
            summary: None,
        }
    }

    fn client_for(server: &mockito::Server) -> OllamaClient {
        let config = Config {
            ollama_url: server.url(),
            ollama_model: "llama3".into(),
            ..Config::default()
        };
        OllamaClient::new(&config).unwrap()
    }

    #[test]
    fn test_prompt_embeds_record_and_keys() {
        let prompt = build_prompt(&commit()).unwrap();
        assert!(prompt.contains(r#""id":"abc123""#));
        assert!(prompt.contains("src/retry.py"));
        assert!(prompt.contains("'Files', 'Functions', 'Summary', 'Importance'"));
    }

    #[tokio::test]
    async fn test_summarize_returns_message_content() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat")
            .match_body(Matcher::PartialJson(json!({
                "model": "llama3",
                "format": "json",
                "stream": false
            })))
            .with_status(200)
            .with_body(r#"{"model": "llama3", "message": {"role": "assistant", "content": "{\"Summary\": \"ok\"}"}, "done": true}"#)
            .create_async()
            .await;

        let text = client_for(&server).summarize(&commit()).await.unwrap();

        assert_eq!(text, r#"{"Summary": "ok"}"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_summarize_surfaces_server_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/chat")
            .with_status(500)
            .with_body("model not loaded")
            .create_async()
            .await;

        let err = client_for(&server).summarize(&commit()).await.unwrap_err();

        assert!(matches!(err, PipelineError::Llm(ref msg) if msg.contains("model not loaded")));
    }

    #[tokio::test]
    async fn test_summarize_missing_content() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_body(r#"{"done": true}"#)
            .create_async()
            .await;

        let err = client_for(&server).summarize(&commit()).await.unwrap_err();

        assert!(matches!(err, PipelineError::Llm(_)));
    }
}
