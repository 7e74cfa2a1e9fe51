//! Mortgage agent run engine
//!
//! Executes configurable LLM "agents" as multi-turn conversations. Runs are
//! submitted to a queue, executed concurrently by background workers,
//! persisted after every turn, and can be cancelled, paused and resumed
//! while in flight.
//!
//! # Modules
//!
//! - [`engine`]: run domain, persistence, runtime and event sinks
//! - [`llm`]: inference backend trait and implementations
//! - [`config`]: layered configuration (defaults, file, env, CLI)
//! - [`telemetry`]: tracing subscriber setup

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::assigning_clones)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::default_trait_access)]
#![allow(clippy::unused_async)]

pub mod config;
pub mod engine;
pub mod llm;
pub mod telemetry;

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, PersistenceProvider};
use crate::engine::persistence::{
    AgentCatalog, AgentProvider, FileRunStore, MemoryRunStore, RunStore,
};
use crate::engine::runtime::{ConversationExecutor, RunManager};
use crate::engine::sink::EventSink;
use crate::llm::InferenceBackend;

/// Everything a front end needs to drive the engine.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Run Manager
    pub run_manager: Arc<RunManager>,
    /// Agent definitions
    pub agents: Arc<AgentCatalog>,
    /// Run persistence
    pub store: Arc<dyn RunStore>,
    /// Global Configuration
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Load agents, open the configured store and start the run manager.
    pub async fn build(
        config: AppConfig,
        backend: Arc<dyn InferenceBackend>,
        sink: Arc<dyn EventSink>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self> {
        let agents = Arc::new(AgentCatalog::new());
        let loaded = agents
            .load_from_dir(&config.agents.dir)
            .await
            .with_context(|| format!("loading agents from {}", config.agents.dir.display()))?;
        tracing::info!(name: "agents.loaded", count = loaded, dir = %config.agents.dir.display(), "Agent definitions loaded");

        let store = open_store(&config);

        let executor = ConversationExecutor::new(
            Arc::clone(&agents) as Arc<dyn AgentProvider>,
            Arc::clone(&store),
            backend,
            sink,
        )
        .with_settings(config.executor_settings());

        let run_manager = Arc::new(RunManager::start(
            executor,
            config.manager_options(),
            shutdown,
        ));

        Ok(Self {
            run_manager,
            agents,
            store,
            config: Arc::new(config),
        })
    }
}

/// The run store selected by `persistence.provider`.
pub fn open_store(config: &AppConfig) -> Arc<dyn RunStore> {
    match config.persistence.provider {
        PersistenceProvider::Memory => Arc::new(MemoryRunStore::new()),
        PersistenceProvider::File => {
            tracing::info!(data_dir = %config.persistence.data_dir.display(), "Using file run store");
            Arc::new(FileRunStore::new(&config.persistence.data_dir))
        }
    }
}
