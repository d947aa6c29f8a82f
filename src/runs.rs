use moka::future::Cache;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::RunStatus;

/// Status of analysis runs, as served by `GET /runs/:id`.
///
/// Runs in progress are kept until they finish. Finished runs expire after
/// `retention`, and at most `capacity` of them are kept.
pub struct RunRegistry {
    active: RwLock<HashMap<Uuid, RunStatus>>,
    finished: Cache<Uuid, RunStatus>,
}

impl RunRegistry {
    pub fn new(retention: Duration, capacity: u64) -> Self {
        let finished = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(retention)
            .build();

        Self {
            active: RwLock::new(HashMap::new()),
            finished,
        }
    }

    pub async fn start(&self, run_id: Uuid) {
        self.active
            .write()
            .await
            .insert(run_id, RunStatus::Processing { run_id });
    }

    pub async fn finish(&self, run_id: Uuid, status: RunStatus) {
        // Insert before removing so a poll never sees the run missing.
        self.finished.insert(run_id, status).await;
        self.active.write().await.remove(&run_id);
    }

    pub async fn get(&self, run_id: &Uuid) -> Option<RunStatus> {
        if let Some(status) = self.active.read().await.get(run_id).cloned() {
            return Some(status);
        }
        self.finished.get(run_id).await
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }
}
