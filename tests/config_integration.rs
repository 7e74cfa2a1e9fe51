use mortgage_agents::config::{AppConfig, PersistenceProvider};
use serial_test::serial;
use std::env;
use std::fs;
use std::io::Write;
use std::time::Duration;

const ARGS: [&str; 2] = ["mortgage-agents", "agents"];

// Helper to clear environment variables that might interfere with tests
fn clear_env_vars() {
    unsafe {
        env::remove_var("CONFIG_FILE");
        env::remove_var("AGENTS_DIR");
        env::remove_var("DATA_DIR");
        env::remove_var("MAX_CONCURRENT_RUNS");
        env::remove_var("MORTGAGE_AGENTS_INFERENCE__MAX_RETRIES");
        env::remove_var("MORTGAGE_AGENTS_RUNTIME__LOG_BATCH_SIZE");
        env::remove_var("MORTGAGE_AGENTS_PERSISTENCE__PROVIDER");
    }
}

fn yaml_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("Failed to create temp config");
    file.write_all(content.as_bytes())
        .expect("Failed to write temp config");
    file
}

#[test]
#[serial]
fn test_default_config() {
    clear_env_vars();

    let (_, config) = AppConfig::load_from_args(ARGS).expect("defaults should load");
    assert_eq!(config.runtime.log_batch_size, 5);
    assert_eq!(
        config.runtime.continuation_prompt,
        "Continue working towards the goal."
    );
    assert_eq!(config.runtime.max_concurrent_runs, None);
    assert_eq!(config.persistence.provider, PersistenceProvider::Memory);
    assert_eq!(config.agents.dir, std::path::PathBuf::from("agents"));
    assert_eq!(
        config.inference_policy().timeout,
        Some(Duration::from_secs(120))
    );
}

#[test]
#[serial]
fn test_env_override() {
    clear_env_vars();
    unsafe {
        env::set_var("MORTGAGE_AGENTS_INFERENCE__MAX_RETRIES", "7");
        env::set_var("MORTGAGE_AGENTS_PERSISTENCE__PROVIDER", "file");
    }

    let (_, config) = AppConfig::load_from_args(ARGS).expect("Failed to load config");
    assert_eq!(config.inference.max_retries, 7);
    assert_eq!(config.persistence.provider, PersistenceProvider::File);

    clear_env_vars();
}

#[test]
#[serial]
fn test_file_load() {
    clear_env_vars();

    let file = yaml_file(
        r#"
runtime:
  log_batch_size: 20
  max_concurrent_runs: 3
inference:
  timeout_secs: 0
    "#,
    );

    // Tell AppConfig to use this file via Env Var (mocking CLI arg indirectly)
    unsafe {
        env::set_var("CONFIG_FILE", file.path());
    }

    let (_, config) = AppConfig::load_from_args(ARGS).expect("Failed to load config from file");
    assert_eq!(config.runtime.log_batch_size, 20);
    assert_eq!(config.runtime.max_concurrent_runs, Some(3));
    assert_eq!(config.inference_policy().timeout, None);
    // Untouched keys keep their defaults.
    assert_eq!(config.inference.max_retries, 2);

    clear_env_vars();
}

#[test]
#[serial]
fn test_env_beats_file_and_cli_beats_env() {
    clear_env_vars();

    let file = yaml_file(
        r#"
runtime:
  log_batch_size: 20
persistence:
  provider: memory
    "#,
    );
    unsafe {
        env::set_var("MORTGAGE_AGENTS_RUNTIME__LOG_BATCH_SIZE", "9");
        env::set_var("MAX_CONCURRENT_RUNS", "2");
    }

    let path = file.path().to_string_lossy().to_string();
    let (_, config) = AppConfig::load_from_args([
        "mortgage-agents",
        "--config",
        path.as_str(),
        "--data-dir",
        "/tmp/mortgage-runs",
        "agents",
    ])
    .expect("Failed to load config");

    assert_eq!(config.runtime.log_batch_size, 9);
    assert_eq!(config.runtime.max_concurrent_runs, Some(2));
    assert_eq!(config.persistence.provider, PersistenceProvider::File);
    assert_eq!(
        config.persistence.data_dir,
        std::path::PathBuf::from("/tmp/mortgage-runs")
    );

    clear_env_vars();
}

#[test]
#[serial]
fn test_missing_explicit_file_is_an_error() {
    clear_env_vars();

    let result = AppConfig::load_from_args([
        "mortgage-agents",
        "--config",
        "/definitely/not/here.yaml",
        "agents",
    ]);
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_cwd_config_fallback() {
    clear_env_vars();

    // Create ./config.yaml
    let config_content = r#"
agents:
  dir: custom-agents
    "#;
    let cwd_path = "config.yaml";
    fs::write(cwd_path, config_content).expect("Failed to write ./config.yaml");

    let loaded = AppConfig::load_from_args(ARGS);

    // Clean up before asserting so a failure does not leave the file behind.
    fs::remove_file(cwd_path).unwrap();

    let (_, config) = loaded.expect("Failed to load config");
    assert_eq!(config.agents.dir, std::path::PathBuf::from("custom-agents"));
}
