use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::engine::domain::InputValues;
use crate::engine::runtime::{ExecutorSettings, InferencePolicy, RunManagerOptions};
use crate::llm::LlmSettings;

/// Prefix for environment overrides, e.g. `MORTGAGE_AGENTS_RUNTIME__LOG_BATCH_SIZE=10`.
pub const ENV_PREFIX: &str = "MORTGAGE_AGENTS";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Directory containing agent definitions (YAML)
    #[arg(long, env = "AGENTS_DIR", global = true)]
    pub agents_dir: Option<PathBuf>,

    /// Directory for persisted runs; implies the file store
    #[arg(long, env = "DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Maximum number of runs executing at once
    #[arg(long, env = "MAX_CONCURRENT_RUNS", global = true)]
    pub max_concurrent_runs: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List available agent definitions
    Agents,

    /// Submit a run and follow it until it stops
    Run {
        /// Agent to execute
        #[arg(long)]
        agent: String,

        /// Input value as `name=value`; repeatable
        #[arg(long = "input", value_parser = parse_input)]
        inputs: Vec<(String, String)>,

        /// Use the scripted backend instead of a live model
        #[arg(long)]
        offline: bool,

        /// Log events through tracing instead of printing turns
        #[arg(long)]
        quiet: bool,
    },

    /// Print a persisted run as JSON, or list the agent's runs
    Show {
        /// Agent the run belongs to
        #[arg(long)]
        agent: String,

        run_id: Option<String>,
    },
}

impl Command {
    /// Inputs of a `run` command collected into a map; later duplicates win.
    pub fn input_values(&self) -> InputValues {
        match self {
            Self::Run { inputs, .. } => inputs.iter().cloned().collect(),
            _ => InputValues::new(),
        }
    }
}

fn parse_input(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("input name is empty in '{raw}'"));
    }
    Ok((name.to_string(), value.to_string()))
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub runtime: RuntimeConfig,
    pub inference: InferenceConfig,
    pub persistence: PersistenceConfig,
    pub agents: AgentsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    pub log_batch_size: usize,
    pub continuation_prompt: String,
    #[serde(default)]
    pub max_concurrent_runs: Option<usize>,
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InferenceConfig {
    /// Zero disables the deadline.
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceProvider {
    Memory,
    File,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PersistenceConfig {
    pub provider: PersistenceProvider,
    pub data_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentsConfig {
    pub dir: PathBuf,
}

impl AppConfig {
    /// Parse `args` as a command line and load the configuration it points at.
    pub fn load_from_args<I, T>(args: I) -> Result<(Cli, Self), config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;
        let config = Self::from_cli(&cli)?;
        Ok((cli, config))
    }

    /// Priority: CLI flag (or its env var) > prefixed env > config file > defaults.
    pub fn from_cli(cli: &Cli) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder();

        // 1. Defaults
        builder = builder
            .set_default("runtime.log_batch_size", 5)?
            .set_default(
                "runtime.continuation_prompt",
                crate::engine::runtime::executor::DEFAULT_CONTINUATION_PROMPT,
            )?
            .set_default("runtime.shutdown_grace_secs", 10)?
            .set_default("inference.timeout_secs", 120)?
            .set_default("inference.max_retries", 2)?
            .set_default("inference.initial_backoff_ms", 500)?
            .set_default("inference.max_backoff_ms", 10_000)?
            .set_default("persistence.provider", "memory")?
            .set_default("persistence.data_dir", "data/runs")?
            .set_default("agents.dir", "agents")?;

        // 2. Config file: explicit path must exist, ./config.yaml is optional
        builder = match &cli.config {
            Some(path) => builder.add_source(File::from(path.as_path()).required(true)),
            None => builder.add_source(File::with_name("config").required(false)),
        };

        // 3. Prefixed environment, e.g. MORTGAGE_AGENTS_INFERENCE__MAX_RETRIES=5
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // 4. CLI overrides
        if let Some(dir) = &cli.agents_dir {
            builder = builder.set_override("agents.dir", dir.to_string_lossy().as_ref())?;
        }
        if let Some(dir) = &cli.data_dir {
            builder = builder
                .set_override("persistence.data_dir", dir.to_string_lossy().as_ref())?
                .set_override("persistence.provider", "file")?;
        }
        if let Some(max) = cli.max_concurrent_runs {
            let max = u64::try_from(max)
                .map_err(|e| config::ConfigError::Message(e.to_string()))?;
            builder = builder.set_override("runtime.max_concurrent_runs", max)?;
        }

        let cfg = builder.build()?;
        cfg.try_deserialize()
    }

    pub fn inference_policy(&self) -> InferencePolicy {
        let inference = &self.inference;
        InferencePolicy {
            timeout: (inference.timeout_secs > 0).then(|| Duration::from_secs(inference.timeout_secs)),
            max_retries: inference.max_retries,
            initial_backoff: Duration::from_millis(inference.initial_backoff_ms),
            max_backoff: Duration::from_millis(inference.max_backoff_ms),
        }
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            log_batch_size: self.runtime.log_batch_size.max(1),
            continuation_prompt: self.runtime.continuation_prompt.clone(),
            inference: self.inference_policy(),
        }
    }

    pub fn manager_options(&self) -> RunManagerOptions {
        RunManagerOptions {
            max_concurrent_runs: self.runtime.max_concurrent_runs,
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.runtime.shutdown_grace_secs)
    }
}

pub fn load_llm_settings() -> Result<LlmSettings, String> {
    let base_url = std::env::var("LLM_BASE_URL")
        .map_err(|_| "Missing required env var: LLM_BASE_URL".to_string())?;
    if base_url.trim().is_empty() {
        return Err("LLM_BASE_URL cannot be empty".to_string());
    }

    let model = std::env::var("LLM_MODEL")
        .map_err(|_| "Missing required env var: LLM_MODEL".to_string())?;
    if model.trim().is_empty() {
        return Err("LLM_MODEL cannot be empty".to_string());
    }

    let api_key = std::env::var("LLM_API_KEY")
        .ok()
        .filter(|s| !s.trim().is_empty());

    let temperature = match std::env::var("LLM_TEMPERATURE") {
        Ok(raw) if !raw.trim().is_empty() => Some(
            raw.trim()
                .parse::<f32>()
                .map_err(|e| format!("LLM_TEMPERATURE is not a number: {e}"))?,
        ),
        _ => None,
    };

    Ok(LlmSettings {
        base_url,
        api_key,
        model,
        temperature,
    })
}
