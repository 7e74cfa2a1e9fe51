use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::engine::domain::Run;
use crate::engine::error::StoreError;
use crate::engine::persistence::RunStore;

type Key = (String, String);

/// In-memory run storage for tests and local development.
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    runs: RwLock<HashMap<Key, Run>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(run_id: &str, agent_id: &str) -> Key {
        (agent_id.to_string(), run_id.to_string())
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn create(&self, run: &Run) -> Result<Run, StoreError> {
        let mut runs = self.runs.write().await;
        let key = Self::key(&run.run_id, &run.agent_id);
        if runs.contains_key(&key) {
            return Err(StoreError::AlreadyExists(run.run_id.clone()));
        }
        runs.insert(key, run.clone());
        Ok(run.clone())
    }

    async fn get(&self, run_id: &str, agent_id: &str) -> Result<Option<Run>, StoreError> {
        let runs = self.runs.read().await;
        Ok(runs.get(&Self::key(run_id, agent_id)).cloned())
    }

    async fn update(&self, run: &Run) -> Result<Run, StoreError> {
        let mut runs = self.runs.write().await;
        let slot = runs
            .get_mut(&Self::key(&run.run_id, &run.agent_id))
            .ok_or_else(|| StoreError::NotFound {
                agent_id: run.agent_id.clone(),
                run_id: run.run_id.clone(),
            })?;

        let mut saved = run.clone();
        saved.last_updated = Utc::now();
        *slot = saved.clone();
        Ok(saved)
    }

    async fn list(&self, agent_id: &str) -> Result<Vec<Run>, StoreError> {
        let runs = self.runs.read().await;
        let mut out: Vec<Run> = runs
            .iter()
            .filter(|((agent, _), _)| agent == agent_id)
            .map(|(_, run)| run.clone())
            .collect();
        out.sort_by_key(|r| r.started_at);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::domain::{InputValues, RunRequest, RunStatus};

    fn run(agent: &str) -> Run {
        Run::new(&RunRequest::start(agent, InputValues::new()))
    }

    #[tokio::test]
    async fn test_create_get_update() {
        let store = MemoryRunStore::new();
        let mut r = run("underwriter");
        store.create(&r).await.unwrap();

        assert!(matches!(
            store.create(&r).await,
            Err(StoreError::AlreadyExists(_))
        ));

        r.status = RunStatus::Running;
        let saved = store.update(&r).await.unwrap();
        assert!(saved.last_updated >= r.last_updated);

        let loaded = store.get(&r.run_id, "underwriter").await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Running);
    }

    #[tokio::test]
    async fn test_partitioned_by_agent() {
        let store = MemoryRunStore::new();
        let r = run("underwriter");
        store.create(&r).await.unwrap();

        assert!(store.get(&r.run_id, "appraiser").await.unwrap().is_none());
        assert_eq!(store.list("underwriter").await.unwrap().len(), 1);
        assert!(store.list("appraiser").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = MemoryRunStore::new();
        let err = store.update(&run("underwriter")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }
}
