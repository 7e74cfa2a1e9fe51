pub mod agent;
pub mod events;
pub mod runs;

pub use agent::AgentDefinition;
pub use events::{EventEnvelope, RunEvent};
pub use runs::{
    ConversationTurn, InputValues, LogEntry, LogLevel, RequestKind, RetryState, Run, RunOutcome,
    RunRequest, RunStatus, ToolCallRecord,
};
