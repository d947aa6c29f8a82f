use thiserror::Error;

/// Errors raised by the external collaborators (GitHub, Ollama, Neo4j).
///
/// None of these escape a run: the pipeline downgrades each one to a
/// `StageFailure` for the commit it belongs to.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected payload from {url}: {reason}")]
    Payload { url: String, reason: String },

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Graph store error: {0}")]
    Graph(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
