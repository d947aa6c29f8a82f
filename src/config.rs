use anyhow::{Context, Result};
use std::time::Duration;

/// Service configuration, read from the environment (after `.env` is loaded).
#[derive(Debug, Clone)]
pub struct Config {
    pub github_token: Option<String>,
    pub github_api_url: String,
    pub ollama_url: String,
    pub ollama_model: String,
    pub neo4j_url: String,
    pub neo4j_database: String,
    pub neo4j_user: String,
    pub neo4j_password: Option<String>,
    pub http_timeout: Duration,
    pub llm_timeout: Duration,
    pub fetch_concurrency: usize,
    pub bind_address: String,
    /// How long a finished run's report stays available.
    pub run_retention: Duration,
    pub max_finished_runs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            github_token: None,
            github_api_url: "https://api.github.com".into(),
            ollama_url: "http://localhost:11434".into(),
            ollama_model: "llama3".into(),
            neo4j_url: "http://localhost:7474".into(),
            neo4j_database: "neo4j".into(),
            neo4j_user: "neo4j".into(),
            neo4j_password: None,
            http_timeout: Duration::from_secs(30),
            llm_timeout: Duration::from_secs(300),
            fetch_concurrency: 8,
            bind_address: "0.0.0.0:8080".into(),
            run_retention: Duration::from_secs(3600),
            max_finished_runs: 1000,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let secs = |key: &str, default: Duration| -> Result<Duration> {
            match get(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .with_context(|| format!("{} must be a whole number of seconds, got {:?}", key, raw)),
                None => Ok(default),
            }
        };

        let fetch_concurrency = match get("FETCH_CONCURRENCY") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .with_context(|| format!("FETCH_CONCURRENCY must be a positive integer, got {:?}", raw))?,
            None => defaults.fetch_concurrency,
        };

        let max_finished_runs = match get("MAX_FINISHED_RUNS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("MAX_FINISHED_RUNS must be a whole number, got {:?}", raw))?,
            None => defaults.max_finished_runs,
        };

        Ok(Self {
            github_token: get("GITHUB_API_KEY"),
            github_api_url: get("GITHUB_API_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.github_api_url),
            ollama_url: get("OLLAMA_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.ollama_url),
            ollama_model: get("OLLAMA_MODEL").unwrap_or(defaults.ollama_model),
            neo4j_url: get("NEO4J_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.neo4j_url),
            neo4j_database: get("NEO4J_DATABASE").unwrap_or(defaults.neo4j_database),
            neo4j_user: get("NEO4J_USER").unwrap_or(defaults.neo4j_user),
            neo4j_password: get("NEO4J_PASSWORD"),
            http_timeout: secs("HTTP_TIMEOUT_SECS", defaults.http_timeout)?,
            llm_timeout: secs("LLM_TIMEOUT_SECS", defaults.llm_timeout)?,
            fetch_concurrency,
            bind_address: get("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            run_retention: secs("RUN_RETENTION_SECS", defaults.run_retention)?,
            max_finished_runs,
        })
    }
}
