//! Durable storage of runs and lookup of agent definitions.
//!
//! The engine treats both as external collaborators: it only relies on the
//! traits below. Documents are overwritten whole on every update and the last
//! write wins; there is no concurrency token.

use crate::engine::domain::{AgentDefinition, Run};
use crate::engine::error::StoreError;
use async_trait::async_trait;

pub mod agents;
pub mod providers;

pub use agents::AgentCatalog;
pub use providers::{file::FileRunStore, memory::MemoryRunStore};

#[async_trait]
pub trait RunStore: Send + Sync + std::fmt::Debug {
    /// Persist a new run. Fails with [`StoreError::AlreadyExists`] on a duplicate id.
    async fn create(&self, run: &Run) -> Result<Run, StoreError>;

    /// Fetch a run by id within its agent's partition.
    async fn get(&self, run_id: &str, agent_id: &str) -> Result<Option<Run>, StoreError>;

    /// Overwrite an existing run, stamping `last_updated`.
    async fn update(&self, run: &Run) -> Result<Run, StoreError>;

    /// All runs recorded for an agent, oldest first.
    async fn list(&self, agent_id: &str) -> Result<Vec<Run>, StoreError>;
}

#[async_trait]
pub trait AgentProvider: Send + Sync + std::fmt::Debug {
    async fn get(&self, agent_id: &str) -> Result<Option<AgentDefinition>, StoreError>;
}

/// Reject ids that cannot double as file names.
pub(crate) fn validate_id(id: &str) -> Result<(), StoreError> {
    if id.is_empty() {
        return Err(StoreError::InvalidId("id cannot be empty".to_string()));
    }
    if id.contains('/') || id.contains('\\') || id.contains("..") || id.chars().any(char::is_control)
    {
        return Err(StoreError::InvalidId(format!(
            "id contains invalid characters: {id:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id() {
        assert!(validate_id("7f1c9a2e-run").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("../etc").is_err());
        assert!(validate_id("a/b").is_err());
        assert!(validate_id("a\0b").is_err());
    }
}
