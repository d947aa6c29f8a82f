use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::coerce::parse_summary;
use crate::github::CommitSource;
use crate::graph::GraphStore;
use crate::llm::Summarizer;
use crate::models::{RunReport, Stage, StageFailure, SENTINEL};
use crate::normalize::normalize;

/// One end-to-end pass: list, normalize, summarize, persist.
///
/// Every failure is downgraded to a `StageFailure` in the returned report;
/// a single commit never aborts the batch.
pub struct Pipeline {
    source: Arc<dyn CommitSource>,
    summarizer: Arc<dyn Summarizer>,
    graph: Arc<dyn GraphStore>,
    concurrency: usize,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn CommitSource>,
        summarizer: Arc<dyn Summarizer>,
        graph: Arc<dyn GraphStore>,
        concurrency: usize,
    ) -> Self {
        Self {
            source,
            summarizer,
            graph,
            concurrency,
        }
    }

    pub async fn run(&self, run_id: Uuid, commits_url: &str, max_commits: Option<usize>) -> RunReport {
        let mut report = RunReport::new(run_id, commits_url);

        let mut raw_commits = match self.source.list_commits(commits_url).await {
            Ok(commits) => commits,
            Err(e) => {
                tracing::error!("Could not list commits from {}: {}", commits_url, e);
                report.failures.push(StageFailure {
                    index: None,
                    url: commits_url.to_string(),
                    stage: Stage::CommitList,
                    reason: e.to_string(),
                });
                report.finished_at = Some(Utc::now());
                return report;
            }
        };
        tracing::info!("Received {} commits from {}", raw_commits.len(), commits_url);

        if let Some(limit) = max_commits {
            raw_commits.truncate(limit);
        }
        report.listed = raw_commits.len();

        let normalized = normalize(self.source.as_ref(), raw_commits, self.concurrency).await;
        report.normalized = normalized.records.len();
        report.failures.extend(normalized.skipped);
        tracing::info!(
            "Normalized {}/{} commits",
            report.normalized,
            report.listed
        );

        for (idx, mut commit) in normalized.records.into_iter().enumerate() {
            tracing::info!(
                "Summarizing commit {} ({}/{}) with {}",
                commit.id,
                idx + 1,
                report.normalized,
                self.summarizer.model_name()
            );
            match self.summarizer.summarize(&commit).await {
                Ok(text) => {
                    commit.summary = Some(parse_summary(&text));
                    report.summarized += 1;
                }
                Err(e) => {
                    tracing::warn!("Summary failed for commit {}: {}", commit.url, e);
                    report.failures.push(StageFailure {
                        index: None,
                        url: commit.url.clone(),
                        stage: Stage::Summarize,
                        reason: e.to_string(),
                    });
                }
            }

            // Commits without a sha would all merge into one "NONE" node.
            if commit.id == SENTINEL {
                tracing::warn!("Not storing commit {} in graph: it has no id", commit.url);
                report.failures.push(StageFailure {
                    index: None,
                    url: commit.url.clone(),
                    stage: Stage::Persist,
                    reason: "commit has no id".to_string(),
                });
                continue;
            }

            match self.graph.upsert_commit(&commit).await {
                Ok(()) => report.persisted += 1,
                Err(e) => {
                    tracing::error!("Failed to store commit {} in graph: {}", commit.url, e);
                    report.failures.push(StageFailure {
                        index: None,
                        url: commit.url.clone(),
                        stage: Stage::Persist,
                        reason: e.to_string(),
                    });
                }
            }
        }

        report.finished_at = Some(Utc::now());
        tracing::info!(
            "Run {} finished: {} listed, {} normalized, {} summarized, {} persisted ({} diff skips, {} summary failures, {} persist failures)",
            run_id,
            report.listed,
            report.normalized,
            report.summarized,
            report.persisted,
            report.failures_at(Stage::FileDiff),
            report.failures_at(Stage::Summarize),
            report.failures_at(Stage::Persist)
        );
        report
    }
}
