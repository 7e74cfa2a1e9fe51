use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncWriteExt;

use crate::engine::domain::Run;
use crate::engine::error::StoreError;
use crate::engine::persistence::{RunStore, validate_id};

/// One JSON document per run, laid out as `<base>/<agent_id>/<run_id>.json`.
#[derive(Debug, Clone)]
pub struct FileRunStore {
    base_path: PathBuf,
}

impl FileRunStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn agent_dir(&self, agent_id: &str) -> Result<PathBuf, StoreError> {
        validate_id(agent_id)?;
        Ok(self.base_path.join(agent_id))
    }

    fn run_path(&self, run_id: &str, agent_id: &str) -> Result<PathBuf, StoreError> {
        validate_id(run_id)?;
        Ok(self.agent_dir(agent_id)?.join(format!("{run_id}.json")))
    }

    async fn load(path: &Path) -> Result<Option<Run>, StoreError> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write through a temp file and rename so readers never see a torn document.
    async fn save(&self, run: &Run) -> Result<(), StoreError> {
        let dir = self.agent_dir(&run.agent_id)?;
        tokio::fs::create_dir_all(&dir).await?;
        let path = self.run_path(&run.run_id, &run.agent_id)?;
        let content = serde_json::to_string_pretty(run)?;

        let tmp_path = dir.join(format!(
            ".{}.{}.tmp",
            run.run_id,
            uuid::Uuid::new_v4().simple()
        ));

        let write_result = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(content.as_bytes()).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp_path, &path).await
        }
        .await;

        if let Err(e) = write_result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl RunStore for FileRunStore {
    async fn create(&self, run: &Run) -> Result<Run, StoreError> {
        let path = self.run_path(&run.run_id, &run.agent_id)?;
        if tokio::fs::try_exists(&path).await? {
            return Err(StoreError::AlreadyExists(run.run_id.clone()));
        }
        self.save(run).await?;
        Ok(run.clone())
    }

    async fn get(&self, run_id: &str, agent_id: &str) -> Result<Option<Run>, StoreError> {
        let path = self.run_path(run_id, agent_id)?;
        Self::load(&path).await
    }

    async fn update(&self, run: &Run) -> Result<Run, StoreError> {
        let path = self.run_path(&run.run_id, &run.agent_id)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(StoreError::NotFound {
                agent_id: run.agent_id.clone(),
                run_id: run.run_id.clone(),
            });
        }
        let mut saved = run.clone();
        saved.last_updated = Utc::now();
        self.save(&saved).await?;
        Ok(saved)
    }

    async fn list(&self, agent_id: &str) -> Result<Vec<Run>, StoreError> {
        let dir = self.agent_dir(agent_id)?;
        if !tokio::fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(run) = Self::load(&path).await? {
                    runs.push(run);
                }
            }
        }
        runs.sort_by_key(|r| r.started_at);
        Ok(runs)
    }
}
