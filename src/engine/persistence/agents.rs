use std::collections::HashMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tokio::fs;
use tracing::{error, info, warn};

use super::AgentProvider;
use crate::engine::domain::AgentDefinition;
use crate::engine::error::StoreError;

/// In-memory agent definitions, optionally loaded from a directory of YAML files.
#[derive(Debug, Default)]
pub struct AgentCatalog {
    agents: RwLock<HashMap<String, AgentDefinition>>,
}

impl AgentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agents(agents: impl IntoIterator<Item = AgentDefinition>) -> Self {
        let catalog = Self::new();
        for agent in agents {
            catalog.insert(agent);
        }
        catalog
    }

    pub fn insert(&self, agent: AgentDefinition) {
        self.agents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(agent.id.clone(), agent);
    }

    pub fn list(&self) -> Vec<AgentDefinition> {
        let mut agents: Vec<_> = self
            .agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    fn lookup(&self, agent_id: &str) -> Option<AgentDefinition> {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(agent_id)
            .cloned()
    }

    /// Loads every `*.yaml` / `*.yml` file in `path`. Files that fail to parse
    /// are logged and skipped. Returns the number of definitions loaded.
    pub async fn load_from_dir(&self, path: impl AsRef<Path>) -> anyhow::Result<usize> {
        let path = path.as_ref();
        if !fs::try_exists(path).await? {
            warn!(path = %path.display(), "Agents directory not found");
            return Ok(0);
        }

        let mut loaded = 0;
        let mut entries = fs::read_dir(path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file = entry.path();
            let is_yaml = file
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| matches!(e, "yaml" | "yml"));
            if !is_yaml {
                continue;
            }

            let content = fs::read_to_string(&file).await?;
            match serde_yaml::from_str::<AgentDefinition>(&content) {
                Ok(agent) => {
                    info!(agent_id = %agent.id, file = %file.display(), "Loaded agent definition");
                    self.insert(agent);
                    loaded += 1;
                }
                Err(e) => {
                    error!(file = %file.display(), error = %e, "Failed to parse agent definition");
                }
            }
        }
        Ok(loaded)
    }
}

#[async_trait]
impl AgentProvider for AgentCatalog {
    async fn get(&self, agent_id: &str) -> Result<Option<AgentDefinition>, StoreError> {
        Ok(self.lookup(agent_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_from_dir_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("appraisal.yaml"),
            "id: appraisal-review\nprompt_template: Review {{property_address}}\nturn_budget: 3\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.yml"), "id: [unterminated").unwrap();
        std::fs::write(dir.path().join("README.md"), "# agents").unwrap();

        let catalog = AgentCatalog::new();
        let loaded = catalog.load_from_dir(dir.path()).await.unwrap();

        assert_eq!(loaded, 1);
        let agent = catalog.get("appraisal-review").await.unwrap().unwrap();
        assert_eq!(agent.turn_budget, 3);
    }

    #[tokio::test]
    async fn test_missing_dir_is_empty() {
        let catalog = AgentCatalog::new();
        let loaded = catalog.load_from_dir("/nonexistent/agents").await.unwrap();
        assert_eq!(loaded, 0);
        assert!(catalog.get("anything").await.unwrap().is_none());
    }
}
