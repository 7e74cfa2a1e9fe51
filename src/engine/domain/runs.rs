use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm::{Message, MessageRole};

/// Input values supplied with a run, keyed by input name.
pub type InputValues = BTreeMap<String, String>;

pub const RESULT_GOAL_ACHIEVED: &str = "Goal achieved";
pub const RESULT_MAX_TURNS: &str = "Max turns reached";
pub const RESULT_CANCELLED: &str = "Cancelled";

/// One execution of an agent against a specific input set.
///
/// A run is mutated only by the worker executing it. Once that worker exits
/// the persisted document is the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Run {
    pub run_id: String,
    pub agent_id: String,
    #[serde(default)]
    pub inputs: InputValues,
    pub status: RunStatus,
    pub turn_count: u32,
    pub turn_budget: u32,
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub goal_achieved: bool,
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub outcome: Option<RunOutcome>,
    /// Set while an inference call is being retried.
    #[serde(default)]
    pub retry: Option<RetryState>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

impl RunStatus {
    /// `completed` and `failed` admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why a run stopped.
///
/// `status` alone reports cancelled runs as `completed`; the outcome keeps
/// the distinction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    GoalAchieved,
    TurnBudgetExhausted,
    Cancelled,
    Failed { error: String },
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        match self {
            Self::Failed { .. } => RunStatus::Failed,
            _ => RunStatus::Completed,
        }
    }

    pub fn result_text(&self) -> Option<&'static str> {
        match self {
            Self::GoalAchieved => Some(RESULT_GOAL_ACHIEVED),
            Self::TurnBudgetExhausted => Some(RESULT_MAX_TURNS),
            Self::Cancelled => Some(RESULT_CANCELLED),
            Self::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryState {
    /// Retry number, starting at 1.
    pub attempt: u32,
    pub max_attempts: u32,
    pub last_error: String,
    pub since: DateTime<Utc>,
}

/// A single message in a run's conversation. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub turn_number: u32,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRecord>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    #[serde(default)]
    pub output: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    /// Turn count at the time the entry was written.
    pub turn: u32,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl Run {
    /// A fresh `pending` run for `request`.
    pub fn new(request: &RunRequest) -> Self {
        let now = Utc::now();
        Self {
            run_id: request.run_id.clone(),
            agent_id: request.agent_id.clone(),
            inputs: request.inputs.clone(),
            status: RunStatus::Pending,
            turn_count: 0,
            turn_budget: 0,
            goal: None,
            goal_achieved: false,
            history: Vec::new(),
            logs: Vec::new(),
            result: None,
            error: None,
            outcome: None,
            retry: None,
            started_at: now,
            paused_at: None,
            completed_at: None,
            last_updated: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn mark_running(&mut self) {
        if !self.is_terminal() {
            self.status = RunStatus::Running;
            self.paused_at = None;
        }
    }

    pub fn mark_paused(&mut self) {
        if !self.is_terminal() {
            self.status = RunStatus::Paused;
            self.paused_at = Some(Utc::now());
        }
    }

    /// Move to the terminal state described by `outcome`.
    ///
    /// Returns `false` and leaves the run untouched if it already finished.
    pub fn finish(&mut self, outcome: RunOutcome) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = outcome.status();
        self.result = outcome.result_text().map(str::to_string);
        if let RunOutcome::Failed { error } = &outcome {
            self.error = Some(error.clone());
        }
        self.outcome = Some(outcome);
        self.retry = None;
        self.completed_at = Some(Utc::now());
        true
    }

    /// Append a turn numbered with the current turn count.
    pub fn push_turn(&mut self, role: MessageRole, content: impl Into<String>) -> ConversationTurn {
        let turn = ConversationTurn {
            turn_number: self.turn_count,
            role,
            content: content.into(),
            timestamp: Utc::now(),
            tool_calls: None,
        };
        self.history.push(turn.clone());
        turn
    }

    pub fn push_log(&mut self, level: LogLevel, message: impl Into<String>) -> LogEntry {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            turn: self.turn_count,
            message: message.into(),
        };
        self.logs.push(entry.clone());
        entry
    }

    /// The conversation in the shape the inference backend expects.
    pub fn messages(&self) -> Vec<Message> {
        self.history
            .iter()
            .map(|t| Message::new(t.role, t.content.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Start,
    /// Continue a paused run from its persisted state.
    Resume,
}

/// A queued request to execute a run. Consumed exactly once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRequest {
    pub run_id: String,
    pub agent_id: String,
    #[serde(default)]
    pub inputs: InputValues,
    pub kind: RequestKind,
    pub submitted_at: DateTime<Utc>,
}

impl RunRequest {
    /// A new run with a freshly generated id.
    pub fn start(agent_id: impl Into<String>, inputs: InputValues) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            inputs,
            kind: RequestKind::Start,
            submitted_at: Utc::now(),
        }
    }

    pub fn resume(run_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            agent_id: agent_id.into(),
            inputs: InputValues::new(),
            kind: RequestKind::Resume,
            submitted_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> Run {
        Run::new(&RunRequest::start("underwriter", InputValues::new()))
    }

    #[test]
    fn test_finish_is_final() {
        let mut run = run();
        run.mark_running();
        assert!(run.finish(RunOutcome::TurnBudgetExhausted));
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.result.as_deref(), Some(RESULT_MAX_TURNS));

        assert!(!run.finish(RunOutcome::Failed {
            error: "late".into()
        }));
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.error.is_none());

        run.mark_running();
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[test]
    fn test_cancelled_reports_completed_status() {
        let mut run = run();
        run.finish(RunOutcome::Cancelled);
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.outcome, Some(RunOutcome::Cancelled));
        assert_eq!(run.result.as_deref(), Some(RESULT_CANCELLED));
    }

    #[test]
    fn test_failed_records_error() {
        let mut run = run();
        run.finish(RunOutcome::Failed {
            error: "backend down".into(),
        });
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("backend down"));
        assert!(run.result.is_none());
    }

    #[test]
    fn test_turns_numbered_by_turn_count() {
        let mut run = run();
        run.push_turn(MessageRole::System, "prompt");
        run.turn_count = 1;
        run.push_turn(MessageRole::Assistant, "reply");

        let numbers: Vec<u32> = run.history.iter().map(|t| t.turn_number).collect();
        assert_eq!(numbers, vec![0, 1]);
        assert_eq!(run.messages()[1], Message::assistant("reply"));
    }

    #[test]
    fn test_serialized_shape() {
        let mut run = run();
        run.finish(RunOutcome::GoalAchieved);
        let json = serde_json::to_value(&run).unwrap();

        assert_eq!(json["status"], "completed");
        assert_eq!(json["outcome"]["kind"], "goal_achieved");
        let back: Run = serde_json::from_value(json).unwrap();
        assert_eq!(back, run);
    }
}
