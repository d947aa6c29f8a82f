use futures::stream::{self, StreamExt};
use serde_json::Value;

use crate::github::CommitSource;
use crate::models::{CommitRecord, FileChange, Stage, StageFailure, SENTINEL};

/// Normalized commits plus the commits that were dropped along the way.
#[derive(Debug, Default)]
pub struct NormalizeReport {
    pub records: Vec<CommitRecord>,
    pub skipped: Vec<StageFailure>,
}

/// Turn raw "list commits" entries into `CommitRecord`s.
///
/// One detail fetch per commit runs concurrently (at most `concurrency` in
/// flight). Records come back in input order. A commit whose detail fetch
/// fails is left out and reported in `skipped`.
pub async fn normalize(
    source: &dyn CommitSource,
    raw_commits: Vec<Value>,
    concurrency: usize,
) -> NormalizeReport {
    let outcomes: Vec<Result<CommitRecord, StageFailure>> = stream::iter(raw_commits.into_iter().enumerate())
        .map(|(index, raw)| normalize_one(source, index, extract_commit(&raw)))
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut report = NormalizeReport::default();
    for outcome in outcomes {
        match outcome {
            Ok(record) => report.records.push(record),
            Err(failure) => report.skipped.push(failure),
        }
    }
    report
}

async fn normalize_one(
    source: &dyn CommitSource,
    index: usize,
    mut record: CommitRecord,
) -> Result<CommitRecord, StageFailure> {
    if record.url == SENTINEL {
        tracing::warn!("Commit #{} ({}) has no url, keeping it without files", index, record.id);
        return Ok(record);
    }

    tracing::debug!("Getting file changes from {}", record.url);
    match source.commit_detail(&record.url).await {
        Ok(detail) => {
            record.files = extract_files(&detail);
            Ok(record)
        }
        Err(e) => {
            tracing::warn!("Skipping commit #{} ({}): file-diff fetch failed: {}", index, record.url, e);
            Err(StageFailure {
                index: Some(index),
                url: record.url,
                stage: Stage::FileDiff,
                reason: e.to_string(),
            })
        }
    }
}

/// Pull the commit-level fields out of one raw commit. `files` is left empty.
pub fn extract_commit(raw: &Value) -> CommitRecord {
    let commit = raw.get("commit");
    let author = commit.and_then(|c| c.get("author")).filter(|a| !a.is_null());

    CommitRecord {
        id: text_or_sentinel(raw.get("sha")),
        message: text_or_sentinel(commit.and_then(|c| c.get("message"))),
        author: author
            .cloned()
            .unwrap_or_else(|| Value::String(SENTINEL.to_string())),
        date: text_or_sentinel(author.and_then(|a| a.get("date"))),
        url: text_or_sentinel(raw.get("url")),
        files: Vec::new(),
        summary: None,
    }
}

/// Pull the `files` array out of a single-commit payload, in upstream order.
pub fn extract_files(detail: &Value) -> Vec<FileChange> {
    detail
        .get("files")
        .and_then(Value::as_array)
        .map(|files| {
            files
                .iter()
                .map(|file| FileChange {
                    filename: text_or_sentinel(file.get("filename")),
                    patch: text_or_sentinel(file.get("patch")),
                    raw_url: text_or_sentinel(file.get("raw_url")),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn text_or_sentinel(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        None | Some(Value::Null) => SENTINEL.to_string(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PipelineError, Result};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Serves canned detail payloads; unknown urls answer 404.
    struct FakeSource {
        details: HashMap<String, Value>,
        delays: HashMap<String, u64>,
    }

    impl FakeSource {
        fn new(details: &[(&str, Value)]) -> Self {
            Self {
                details: details
                    .iter()
                    .map(|(url, v)| (url.to_string(), v.clone()))
                    .collect(),
                delays: HashMap::new(),
            }
        }

        fn with_delay(mut self, url: &str, millis: u64) -> Self {
            self.delays.insert(url.to_string(), millis);
            self
        }
    }

    #[async_trait]
    impl CommitSource for FakeSource {
        async fn list_commits(&self, _url: &str) -> Result<Vec<Value>> {
            Ok(Vec::new())
        }

        async fn commit_detail(&self, url: &str) -> Result<Value> {
            if let Some(ms) = self.delays.get(url) {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
            self.details.get(url).cloned().ok_or(PipelineError::Status {
                status: 404,
                url: url.to_string(),
            })
        }
    }

    fn raw(sha: &str) -> Value {
        json!({
            "sha": sha,
            "url": format!("https://api.github.com/repos/o/r/commits/{}", sha),
            "commit": {
                "message": format!("commit {}", sha),
                "author": {"name": "Ada", "email": "ada@example.com", "date": "2024-05-01T12:00:00Z"},
            },
        })
    }

    fn url(sha: &str) -> String {
        format!("https://api.github.com/repos/o/r/commits/{}", sha)
    }

    #[test]
    fn test_extract_full_commit() {
        let record = extract_commit(&raw("abc"));
        assert_eq!(record.id, "abc");
        assert_eq!(record.message, "commit abc");
        assert_eq!(record.author["email"], "ada@example.com");
        assert_eq!(record.date, "2024-05-01T12:00:00Z");
        assert_eq!(record.url, url("abc"));
        assert!(record.files.is_empty());
    }

    #[test]
    fn test_missing_fields_get_sentinel() {
        let record = extract_commit(&json!({
            "url": url("x"),
            "commit": {"author": {"name": "Ada"}},
        }));
        assert_eq!(record.id, SENTINEL);
        assert_eq!(record.message, SENTINEL);
        assert_eq!(record.date, SENTINEL);
        assert_eq!(record.author, json!({"name": "Ada"}));
        assert_eq!(record.url, url("x"));

        let record = extract_commit(&json!({"sha": "y", "commit": {"message": "m"}}));
        assert_eq!(record.message, "m");
        assert_eq!(record.author, json!(SENTINEL));
        assert_eq!(record.date, SENTINEL);
        assert_eq!(record.url, SENTINEL);
    }

    #[test]
    fn test_missing_commit_object() {
        let record = extract_commit(&json!({"sha": "z", "url": url("z")}));
        assert_eq!(record.message, SENTINEL);
        assert_eq!(record.author, json!(SENTINEL));
        assert_eq!(record.date, SENTINEL);
        assert_eq!(record.id, "z");
    }

    #[test]
    fn test_extract_files_keeps_order_and_defaults() {
        let files = extract_files(&json!({
            "files": [
                {"filename": "b.rs", "patch": "@@ -1 +1 @@", "raw_url": "https://raw/b.rs"},
                {"filename": "logo.png", "raw_url": "https://raw/logo.png"},
                {"filename": "b.rs", "patch": "@@ -2 +2 @@"},
                {},
            ]
        }));
        let names: Vec<_> = files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, vec!["b.rs", "logo.png", "b.rs", SENTINEL]);
        assert_eq!(files[1].patch, SENTINEL);
        assert_eq!(files[2].raw_url, SENTINEL);
    }

    #[test]
    fn test_extract_files_without_files_key() {
        assert!(extract_files(&json!({"sha": "abc"})).is_empty());
        assert!(extract_files(&json!({"files": null})).is_empty());
    }

    #[tokio::test]
    async fn test_failed_fetch_drops_commit_in_order() {
        let source = FakeSource::new(&[
            (url("one").as_str(), json!({"files": [{"filename": "a.py"}]})),
            (url("three").as_str(), json!({"files": [{"filename": "c.py"}]})),
        ]);
        let commits = vec![raw("one"), raw("two"), raw("three")];

        let report = normalize(&source, commits.clone(), 4).await;

        let ids: Vec<_> = report.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["one", "three"]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].index, Some(1));
        assert_eq!(report.skipped[0].stage, Stage::FileDiff);
        assert_eq!(report.skipped[0].url, url("two"));
        assert!(report.skipped[0].reason.contains("404"));
    }

    #[tokio::test]
    async fn test_empty_files_keeps_commit() {
        let source = FakeSource::new(&[(url("one").as_str(), json!({"sha": "one"}))]);
        let report = normalize(&source, vec![raw("one")], 1).await;

        assert_eq!(report.records.len(), 1);
        assert!(report.records[0].files.is_empty());
        assert!(report.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_commit_without_url_is_kept() {
        let source = FakeSource::new(&[]);
        let report = normalize(&source, vec![json!({"sha": "nourl"})], 1).await;

        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].url, SENTINEL);
        assert!(report.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_order_completion_keeps_input_order() {
        let details: Vec<(String, Value)> = (0..6)
            .map(|i| (url(&format!("c{}", i)), json!({"files": [{"filename": format!("f{}", i)}]})))
            .collect();
        let pairs: Vec<(&str, Value)> = details.iter().map(|(u, v)| (u.as_str(), v.clone())).collect();
        let source = FakeSource::new(&pairs)
            .with_delay(&url("c0"), 60)
            .with_delay(&url("c1"), 40)
            .with_delay(&url("c2"), 20);
        let commits: Vec<Value> = (0..6).map(|i| raw(&format!("c{}", i))).collect();

        let report = normalize(&source, commits.clone(), 6).await;

        let ids: Vec<_> = report.records.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec!["c0", "c1", "c2", "c3", "c4", "c5"]);
        assert_eq!(report.records[0].files[0].filename, "f0");
    }

    #[tokio::test]
    async fn test_count_equals_inputs_minus_failures() {
        let source = FakeSource::new(&[(url("ok").as_str(), json!({"files": []}))]);
        let commits = vec![raw("ok"), raw("bad1"), raw("ok"), raw("bad2")];

        let report = normalize(&source, commits.clone(), 2).await;

        assert_eq!(report.records.len(), commits.len() - report.skipped.len());
        assert_eq!(report.skipped.len(), 2);
    }

    #[tokio::test]
    async fn test_normalize_runs_on_a_spawned_task() {
        let source = std::sync::Arc::new(FakeSource::new(&[(url("one").as_str(), json!({"files": []}))]));
        let commits = vec![raw("one"), raw("two")];

        let handle = tokio::spawn({
            let source = source.clone();
            async move { normalize(source.as_ref(), commits, 2).await }
        });
        let report = handle.await.unwrap();

        assert_eq!(report.records.len(), 1);
        assert_eq!(report.skipped.len(), 1);
    }
}
