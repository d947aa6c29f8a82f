use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

mod coerce;
mod config;
mod error;
mod github;
mod graph;
mod llm;
mod models;
mod normalize;
mod pipeline;
mod runs;

use config::Config;
use github::GitHubClient;
use graph::Neo4jHttpStore;
use llm::OllamaClient;
use models::RunStatus;
use pipeline::Pipeline;
use runs::RunRegistry;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: Arc<Pipeline>,
    /// Used for the best-effort rate-limit and repository lookups.
    pub github: Option<Arc<GitHubClient>>,
    pub runs: Arc<RunRegistry>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let github = Arc::new(GitHubClient::new(&config)?);
    let summarizer = Arc::new(OllamaClient::new(&config)?);
    let graph = Arc::new(Neo4jHttpStore::new(&config)?);
    tracing::info!(
        "Using Ollama at {} (model {}), Neo4j at {}",
        config.ollama_url,
        config.ollama_model,
        config.neo4j_url
    );

    let pipeline = Pipeline::new(github.clone(), summarizer, graph, config.fetch_concurrency);

    let addr = config.bind_address.clone();
    let runs = RunRegistry::new(config.run_retention, config.max_finished_runs);
    let state = AppState {
        config: Arc::new(config),
        pipeline: Arc::new(pipeline),
        github: Some(github),
        runs: Arc::new(runs),
    };

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Commit graph service listening on {}", addr);

    axum::serve(listener, app(state)).await?;

    Ok(())
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/analyze", post(analyze_repository))
        .route("/runs/:id", get(run_status))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    /// `owner/name` slug, resolved against the configured GitHub API.
    pub repo: Option<String>,
    /// Full commits endpoint; wins over `repo` when both are set.
    pub commits_url: Option<String>,
    pub max_commits: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub run_id: Uuid,
    pub status: String,
    pub message: String,
}

async fn analyze_repository(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, (StatusCode, String)> {
    let slug = request
        .repo
        .as_deref()
        .map(|repo| {
            github::parse_repo_slug(repo)
                .map(|(owner, name)| (owner.to_string(), name.to_string()))
                .ok_or_else(|| {
                    (
                        StatusCode::BAD_REQUEST,
                        format!("repo must look like owner/name, got {:?}", repo),
                    )
                })
        })
        .transpose()?;

    let commits_url = match (&request.commits_url, &slug) {
        (Some(url), _) if !url.trim().is_empty() => url.trim().to_string(),
        (_, Some((owner, name))) => {
            github::commits_url(&state.config.github_api_url, &format!("{}/{}", owner, name))
        }
        _ => {
            return Err((
                StatusCode::BAD_REQUEST,
                "either repo or commitsUrl is required".to_string(),
            ))
        }
    };

    let run_id = Uuid::new_v4();
    state.runs.start(run_id).await;
    tracing::info!(
        "Starting run {} for {} ({} runs in progress)",
        run_id,
        commits_url,
        state.runs.active_count().await
    );

    let runs = state.runs.clone();
    let worker_state = state.clone();
    let max_commits = request.max_commits;
    tokio::spawn(async move {
        let worker = tokio::spawn(async move {
            process_analysis(worker_state, run_id, commits_url, slug, max_commits).await
        });
        let status = match worker.await {
            Ok(report) => RunStatus::Completed { report },
            Err(e) => {
                tracing::error!("Run {} failed: {}", run_id, e);
                RunStatus::Failed {
                    run_id,
                    error: e.to_string(),
                }
            }
        };
        runs.finish(run_id, status).await;
    });

    Ok(Json(AnalyzeResponse {
        run_id,
        status: "PROCESSING".to_string(),
        message: "Analysis started in background".to_string(),
    }))
}

async fn process_analysis(
    state: AppState,
    run_id: Uuid,
    commits_url: String,
    slug: Option<(String, String)>,
    max_commits: Option<usize>,
) -> models::RunReport {
    if let Some(github) = &state.github {
        match github.rate_limit().await {
            Ok(Some(remaining)) => tracing::info!("GitHub rate limit: {} requests remaining", remaining),
            Ok(None) => tracing::debug!("GitHub rate limit response had no core quota"),
            Err(e) => tracing::warn!("Could not read GitHub rate limit: {}", e),
        }

        if let Some((owner, name)) = &slug {
            match github.repository_info(owner, name).await {
                Ok((repo_name, description)) => tracing::info!(
                    "Repository {}: {}",
                    repo_name,
                    description.as_deref().unwrap_or("(no description)")
                ),
                Err(e) => tracing::debug!("Repository lookup for {}/{} failed: {}", owner, name, e),
            }
        }
    }

    state.pipeline.run(run_id, &commits_url, max_commits).await
}

async fn run_status(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RunStatus>, (StatusCode, String)> {
    state
        .runs
        .get(&run_id)
        .await
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("unknown run {}", run_id)))
}
