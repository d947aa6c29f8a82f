use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Placeholder stored when an upstream key is missing. Consumers treat it as "unknown".
pub const SENTINEL: &str = "NONE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub id: String,
    pub message: String,
    /// Copied as-is from `commit.author`, never type-checked.
    pub author: Value,
    pub date: String,
    pub url: String,
    pub files: Vec<FileChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Summary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChange {
    pub filename: String,
    pub patch: String, // absent for binary and rename-only files
    pub raw_url: String,
}

/// LLM analysis attached to a commit after normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Summary {
    Structured(Map<String, Value>),
    Raw(String),
}

impl Summary {
    /// Flattens the summary into the `summary` parameter of the graph upsert.
    ///
    /// Graph properties cannot hold nested maps, so `Functions` entries are
    /// reduced to names and `Files` to filenames.
    pub fn to_graph_param(&self) -> Value {
        match self {
            Summary::Raw(text) => serde_json::json!({
                "Summary": text,
                "Importance": Value::Null,
                "Files": [],
                "Functions": [],
            }),
            Summary::Structured(map) => {
                let text = match map.get("Summary") {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => SENTINEL.to_string(),
                    Some(other) => other.to_string(),
                };
                let importance = map
                    .get("Importance")
                    .and_then(|v| match v {
                        Value::Number(n) => n.as_i64(),
                        Value::String(s) => s.trim().parse().ok(),
                        _ => None,
                    })
                    .map(Value::from)
                    .unwrap_or(Value::Null);
                serde_json::json!({
                    "Summary": text,
                    "Importance": importance,
                    "Files": names_of(map.get("Files"), &["filename", "file", "name"]),
                    "Functions": names_of(map.get("Functions"), &["name", "function"]),
                })
            }
        }
    }
}

fn names_of(value: Option<&Value>, keys: &[&str]) -> Vec<String> {
    let mut names = Vec::new();
    collect_names(value, keys, &mut names);
    names
}

fn collect_names(value: Option<&Value>, keys: &[&str], out: &mut Vec<String>) {
    match value {
        Some(Value::String(s)) => out.push(s.clone()),
        Some(Value::Array(items)) => {
            for item in items {
                collect_names(Some(item), keys, out);
            }
        }
        Some(Value::Object(map)) => {
            if let Some(name) = keys.iter().find_map(|k| map.get(*k).and_then(Value::as_str)) {
                out.push(name.to_string());
            } else if let Some(Value::Array(_)) = map.get("Functions") {
                // Functions grouped per file: {"filename": .., "Functions": [..]}
                collect_names(map.get("Functions"), keys, out);
            }
        }
        _ => {}
    }
}

/// Pipeline stage at which a single commit (or the whole run) failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    CommitList,
    FileDiff,
    Summarize,
    Persist,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageFailure {
    /// Position in the raw commit list, when the failure happened before normalization finished.
    pub index: Option<usize>,
    pub url: String,
    pub stage: Stage,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    pub commits_url: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub listed: usize,
    pub normalized: usize,
    pub summarized: usize,
    pub persisted: usize,
    pub failures: Vec<StageFailure>,
}

impl RunReport {
    pub fn new(run_id: Uuid, commits_url: &str) -> Self {
        Self {
            run_id,
            commits_url: commits_url.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            listed: 0,
            normalized: 0,
            summarized: 0,
            persisted: 0,
            failures: Vec::new(),
        }
    }

    pub fn failures_at(&self, stage: Stage) -> usize {
        self.failures.iter().filter(|f| f.stage == stage).count()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum RunStatus {
    Processing { run_id: Uuid },
    Completed { report: RunReport },
    Failed { run_id: Uuid, error: String },
}
