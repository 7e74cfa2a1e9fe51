use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::runs::{ConversationTurn, LogEntry, RunOutcome, RunStatus};

/// Something observers of a run may want to see.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum RunEvent {
    Log(LogEntry),
    Turn(ConversationTurn),
    Status {
        status: RunStatus,
        #[serde(default)]
        outcome: Option<RunOutcome>,
    },
}

/// A [`RunEvent`] addressed to one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub run_id: String,
    pub agent_id: String,
    pub at: DateTime<Utc>,
    pub event: RunEvent,
}

impl EventEnvelope {
    pub fn new(run_id: impl Into<String>, agent_id: impl Into<String>, event: RunEvent) -> Self {
        Self {
            run_id: run_id.into(),
            agent_id: agent_id.into(),
            at: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::domain::runs::LogLevel;

    #[test]
    fn test_serialize_events() {
        let evt = EventEnvelope::new(
            "run_123",
            "underwriter",
            RunEvent::Log(LogEntry {
                timestamp: Utc::now(),
                level: LogLevel::Info,
                turn: 0,
                message: "Run started".into(),
            }),
        );

        let json = serde_json::to_string(&evt).unwrap();
        assert!(json.contains(r#""type":"Log""#));
        assert!(json.contains("run_123"));

        let status = RunEvent::Status {
            status: RunStatus::Completed,
            outcome: Some(RunOutcome::Cancelled),
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains(r#""kind":"cancelled""#));
    }
}
