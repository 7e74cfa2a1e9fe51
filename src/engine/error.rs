use std::time::Duration;

use thiserror::Error;

/// Errors raised by persistence providers.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("run not found: {agent_id}/{run_id}")]
    NotFound { agent_id: String, run_id: String },

    #[error("run already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by event sinks. Never fatal to a run.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("event sink closed")]
    Closed,

    #[error("event sink error: {0}")]
    Other(String),
}

/// Errors surfaced by the run engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("run queue is closed")]
    QueueClosed,

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("required input '{0}' is missing or blank")]
    MissingInput(String),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("run {run_id} is already active")]
    AlreadyActive { run_id: String },

    #[error("persistence error: {0}")]
    Store(#[from] StoreError),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("inference timed out after {0:?}")]
    InferenceTimeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_input_names_the_input() {
        let err = EngineError::MissingInput("loan_amount".into());
        assert!(err.to_string().contains("loan_amount"));
    }

    #[test]
    fn test_store_error_converts() {
        let err: EngineError = StoreError::AlreadyExists("r1".into()).into();
        assert!(matches!(err, EngineError::Store(StoreError::AlreadyExists(_))));
    }
}
