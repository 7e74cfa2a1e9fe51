//! Drives one run from `pending` to a terminal (or paused) state.

use std::sync::Arc;

use chrono::Utc;
use tracing::instrument;

use crate::engine::domain::{
    EventEnvelope, LogLevel, RequestKind, RetryState, Run, RunEvent, RunOutcome, RunRequest,
    RunStatus,
};
use crate::engine::error::EngineError;
use crate::engine::persistence::{AgentProvider, RunStore};
use crate::engine::runtime::goal;
use crate::engine::runtime::registry::ControlHandle;
use crate::engine::runtime::retry::InferencePolicy;
use crate::engine::runtime::template;
use crate::engine::sink::EventSink;
use crate::llm::{InferenceBackend, Message, MessageRole};

pub const DEFAULT_CONTINUATION_PROMPT: &str = "Continue working towards the goal.";
pub const DEFAULT_LOG_BATCH_SIZE: usize = 5;

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Persist after this many new log entries, in addition to turn boundaries.
    pub log_batch_size: usize,
    pub continuation_prompt: String,
    pub inference: InferencePolicy,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            log_batch_size: DEFAULT_LOG_BATCH_SIZE,
            continuation_prompt: DEFAULT_CONTINUATION_PROMPT.to_string(),
            inference: InferencePolicy::default(),
        }
    }
}

#[derive(Debug)]
pub struct ConversationExecutor {
    agents: Arc<dyn AgentProvider>,
    store: Arc<dyn RunStore>,
    backend: Arc<dyn InferenceBackend>,
    sink: Arc<dyn EventSink>,
    settings: ExecutorSettings,
}

/// How the turn loop stopped.
enum Exit {
    Finished(RunOutcome),
    Paused,
}

impl ConversationExecutor {
    pub fn new(
        agents: Arc<dyn AgentProvider>,
        store: Arc<dyn RunStore>,
        backend: Arc<dyn InferenceBackend>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            agents,
            store,
            backend,
            sink,
            settings: ExecutorSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ExecutorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn store(&self) -> Arc<dyn RunStore> {
        Arc::clone(&self.store)
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Execute `request` under `control` until the run finishes or pauses.
    ///
    /// Every failure after the run record exists ends as a `failed` run; the
    /// final state is returned. `None` means no run record could be created or
    /// reopened.
    #[instrument(
        name = "run.execute",
        skip(self, request, control),
        fields(run_id = %request.run_id, agent_id = %request.agent_id, kind = ?request.kind)
    )]
    pub async fn execute(&self, request: RunRequest, control: ControlHandle) -> Option<Run> {
        let mut worker = match request.kind {
            RequestKind::Start => Worker::create(self, &request, control).await?,
            RequestKind::Resume => Worker::reopen(self, &request, control).await?,
        };

        let exit = worker.drive(request.kind).await;
        worker.settle(exit).await;
        Some(worker.run)
    }

    /// Mark a run failed after its worker panicked. Terminal runs are left alone.
    pub async fn recover_panicked(&self, run_id: &str, agent_id: &str, message: &str) {
        let mut run = match self.store.get(run_id, agent_id).await {
            Ok(Some(run)) => run,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(%run_id, error = %e, "Failed to load run after worker panic");
                return;
            }
        };
        let error = format!("worker panicked: {message}");
        if !run.finish(RunOutcome::Failed { error: error.clone() }) {
            return;
        }
        run.push_log(LogLevel::Error, format!("Run failed: {error}"));
        if let Err(e) = self.store.update(&run).await {
            tracing::error!(%run_id, error = %e, "Failed to persist panicked run");
        }
    }
}

/// Mutable state of one execution. Owned by a single worker task.
struct Worker<'a> {
    exec: &'a ConversationExecutor,
    run: Run,
    control: ControlHandle,
    unflushed_logs: usize,
}

impl<'a> Worker<'a> {
    async fn create(
        exec: &'a ConversationExecutor,
        request: &RunRequest,
        control: ControlHandle,
    ) -> Option<Self> {
        let run = match exec.store.create(&Run::new(request)).await {
            Ok(run) => run,
            Err(e) => {
                tracing::error!(name: "run.create_failed", error = %e, "Failed to create run record");
                return None;
            }
        };
        let mut worker = Self {
            exec,
            run,
            control,
            unflushed_logs: 0,
        };
        worker.publish_status().await;
        worker.record(LogLevel::Info, "Run started").await;
        Some(worker)
    }

    async fn reopen(
        exec: &'a ConversationExecutor,
        request: &RunRequest,
        control: ControlHandle,
    ) -> Option<Self> {
        let run = match exec.store.get(&request.run_id, &request.agent_id).await {
            Ok(Some(run)) if !run.is_terminal() => run,
            Ok(Some(run)) => {
                tracing::warn!(status = %run.status, "Refusing to resume a finished run");
                return None;
            }
            Ok(None) => {
                tracing::warn!("Run to resume no longer exists");
                return None;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to load run to resume");
                return None;
            }
        };
        let mut worker = Self {
            exec,
            run,
            control,
            unflushed_logs: 0,
        };
        worker.run.mark_running();
        if let Err(e) = worker.persist().await {
            tracing::error!(error = %e, "Failed to mark resumed run as running");
            return None;
        }
        worker.publish_status().await;
        let turn = worker.run.turn_count;
        worker
            .record(LogLevel::Info, format!("Run resumed at turn {turn}"))
            .await;
        Some(worker)
    }

    async fn drive(&mut self, kind: RequestKind) -> Result<Exit, EngineError> {
        if kind == RequestKind::Start {
            self.prepare().await?;
        }
        self.turn_loop().await
    }

    /// Load the agent, validate inputs and seed the conversation.
    async fn prepare(&mut self) -> Result<(), EngineError> {
        let agent = self
            .exec
            .agents
            .get(&self.run.agent_id)
            .await?
            .ok_or_else(|| EngineError::AgentNotFound(self.run.agent_id.clone()))?;

        template::validate_inputs(&agent.required_inputs, &self.run.inputs)?;
        let prompt = template::render(&agent.prompt_template, &self.run.inputs);

        self.run.turn_budget = agent.turn_budget;
        self.run.goal = agent.goal().map(str::to_string);

        let seed = self.run.push_turn(MessageRole::System, prompt);
        self.publish(RunEvent::Turn(seed)).await;

        self.run.mark_running();
        self.publish_status().await;
        self.log(
            LogLevel::Info,
            format!(
                "Executing agent '{}' with a budget of {} turns",
                agent.name.as_deref().unwrap_or(&agent.id),
                agent.turn_budget
            ),
        )
        .await?;
        self.persist().await
    }

    async fn turn_loop(&mut self) -> Result<Exit, EngineError> {
        while self.run.turn_count < self.run.turn_budget
            && !self.run.goal_achieved
            && !self.control.is_cancelled()
        {
            if self.pause_requested().await? {
                self.pause().await?;
                return Ok(Exit::Paused);
            }

            // 1. Assistant turn
            self.run.turn_count += 1;
            let turn = self.run.turn_count;
            self.log(LogLevel::Debug, format!("Starting turn {turn}")).await?;

            let Some(reply) = self.infer(self.run.messages()).await? else {
                break;
            };
            let appended = self.run.push_turn(MessageRole::Assistant, reply);
            self.publish(RunEvent::Turn(appended)).await;

            // 2. Goal check, outside the transcript
            if let Some(goal_text) = self.run.goal.clone() {
                let question = goal::goal_check_history(&self.run.messages(), &goal_text);
                let Some(verdict) = self.infer(question).await? else {
                    break;
                };
                if goal::goal_achieved(&verdict) {
                    self.run.goal_achieved = true;
                    self.log(LogLevel::Info, format!("Goal achieved on turn {turn}"))
                        .await?;
                } else {
                    self.log(LogLevel::Debug, "Goal not yet achieved").await?;
                }
            }

            // 3. Continuation
            if !self.run.goal_achieved && self.run.turn_count < self.run.turn_budget {
                let prompt = self.exec.settings.continuation_prompt.clone();
                let appended = self.run.push_turn(MessageRole::User, prompt);
                self.publish(RunEvent::Turn(appended)).await;
            }

            self.persist().await?;
        }

        let outcome = if self.run.goal_achieved {
            RunOutcome::GoalAchieved
        } else if self.run.turn_count >= self.run.turn_budget {
            RunOutcome::TurnBudgetExhausted
        } else {
            RunOutcome::Cancelled
        };
        Ok(Exit::Finished(outcome))
    }

    /// In-memory request first, then the persisted status. A `true` return
    /// means the pause is committed and can no longer be withdrawn.
    async fn pause_requested(&mut self) -> Result<bool, EngineError> {
        if self.control.commit_pause() {
            return Ok(true);
        }
        let persisted = self
            .exec
            .store
            .get(&self.run.run_id, &self.run.agent_id)
            .await?
            .ok_or_else(|| EngineError::RunNotFound(self.run.run_id.clone()))?;
        if persisted.status != RunStatus::Paused {
            return Ok(false);
        }
        self.control.commit_external_pause();
        Ok(true)
    }

    async fn pause(&mut self) -> Result<(), EngineError> {
        self.run.mark_paused();
        let turn = self.run.turn_count;
        self.record(LogLevel::Info, format!("Run paused after turn {turn}"))
            .await;
        self.publish_status().await;
        self.persist().await
    }

    /// One inference call with deadline and retries.
    ///
    /// `Ok(None)` means cancellation arrived during a backoff.
    async fn infer(&mut self, history: Vec<Message>) -> Result<Option<String>, EngineError> {
        let policy = self.exec.settings.inference.clone();
        let mut retry = 0;

        loop {
            match policy.call_once(self.exec.backend.as_ref(), &history).await {
                Ok(text) => {
                    if self.run.retry.take().is_some() {
                        self.log(LogLevel::Info, "Inference recovered after retry")
                            .await?;
                    }
                    return Ok(Some(text));
                }
                Err(e) if retry < policy.max_retries => {
                    retry += 1;
                    let delay = policy.backoff(retry);
                    let attempt = retry + 1;
                    let max_attempts = policy.max_attempts();
                    tracing::warn!(
                        name: "run.inference_retry",
                        attempt,
                        max_attempts,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Inference failed, retrying"
                    );

                    self.run.retry = Some(RetryState {
                        attempt,
                        max_attempts,
                        last_error: e.to_string(),
                        since: Utc::now(),
                    });
                    self.record(
                        LogLevel::Warn,
                        format!("Inference failed ({e}); attempt {attempt}/{max_attempts} in {delay:?}"),
                    )
                    .await;
                    self.persist().await?;

                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = self.control.cancelled() => return Ok(None),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Apply the loop's exit to the run and persist the final state.
    async fn settle(&mut self, exit: Result<Exit, EngineError>) {
        let outcome = match exit {
            Ok(Exit::Paused) => return,
            Ok(Exit::Finished(outcome)) => outcome,
            Err(e) => RunOutcome::Failed {
                error: e.to_string(),
            },
        };

        let (level, message) = match &outcome {
            RunOutcome::GoalAchieved => (LogLevel::Info, "Run completed: goal achieved".to_string()),
            RunOutcome::TurnBudgetExhausted => {
                (LogLevel::Info, "Run completed: max turns reached".to_string())
            }
            RunOutcome::Cancelled => (LogLevel::Info, "Run cancelled".to_string()),
            RunOutcome::Failed { error } => (LogLevel::Error, format!("Run failed: {error}")),
        };

        if !self.run.finish(outcome) {
            return;
        }
        self.record(level, message).await;
        self.publish_status().await;

        if let Err(e) = self.persist().await {
            tracing::error!(name: "run.persist_failed", error = %e, "Failed to persist final run state");
        }
        tracing::info!(
            name: "run.finished",
            status = %self.run.status,
            turns = self.run.turn_count,
            "Run finished"
        );
    }

    /// Append a log entry, flushing when the batch is full.
    async fn log(&mut self, level: LogLevel, message: impl Into<String>) -> Result<(), EngineError> {
        self.record(level, message).await;
        if self.unflushed_logs >= self.exec.settings.log_batch_size.max(1) {
            self.persist().await?;
        }
        Ok(())
    }

    /// Append a log entry without flushing.
    async fn record(&mut self, level: LogLevel, message: impl Into<String>) {
        let entry = self.run.push_log(level, message);
        self.unflushed_logs += 1;
        mirror(entry.level, entry.turn, &entry.message);
        self.publish(RunEvent::Log(entry)).await;
    }

    async fn persist(&mut self) -> Result<(), EngineError> {
        self.run = self.exec.store.update(&self.run).await?;
        self.unflushed_logs = 0;
        Ok(())
    }

    async fn publish_status(&self) {
        self.publish(RunEvent::Status {
            status: self.run.status,
            outcome: self.run.outcome.clone(),
        })
        .await;
    }

    async fn publish(&self, event: RunEvent) {
        let envelope = EventEnvelope::new(&self.run.run_id, &self.run.agent_id, event);
        if let Err(e) = self.exec.sink.publish(envelope).await {
            tracing::warn!(error = %e, "Event sink rejected event");
        }
    }
}

fn mirror(level: LogLevel, turn: u32, message: &str) {
    match level {
        LogLevel::Error => tracing::error!(name: "run.log", turn, "{message}"),
        LogLevel::Warn => tracing::warn!(name: "run.log", turn, "{message}"),
        LogLevel::Info => tracing::info!(name: "run.log", turn, "{message}"),
        LogLevel::Debug => tracing::debug!(name: "run.log", turn, "{message}"),
    }
}
