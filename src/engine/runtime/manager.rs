use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::instrument;

use crate::engine::domain::{InputValues, Run, RunRequest, RunStatus};
use crate::engine::error::EngineError;
use crate::engine::persistence::RunStore;
use crate::engine::runtime::dispatcher::Dispatcher;
use crate::engine::runtime::executor::ConversationExecutor;
use crate::engine::runtime::queue::RunQueue;
use crate::engine::runtime::registry::{ControlHandle, RunRegistry};

#[derive(Debug, Clone, Default)]
pub struct RunManagerOptions {
    /// Upper bound on workers in flight; `None` is unbounded.
    pub max_concurrent_runs: Option<usize>,
}

/// Public control surface of the run engine.
///
/// Submission only enqueues; a background dispatcher launches one worker per
/// request. Control calls act on the in-memory registry and never block on a
/// running worker.
#[derive(Debug)]
pub struct RunManager {
    queue: RunQueue,
    registry: RunRegistry,
    store: Arc<dyn RunStore>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl RunManager {
    /// Spawn the dispatcher and return the manager. Must be called from
    /// within a Tokio runtime.
    ///
    /// Cancelling `shutdown` stops the engine the same way
    /// [`shutdown`](Self::shutdown) does, minus the wait.
    pub fn start(
        executor: ConversationExecutor,
        options: RunManagerOptions,
        shutdown: CancellationToken,
    ) -> Self {
        let store = executor.store();
        let (queue, rx) = RunQueue::new();
        let registry = RunRegistry::new();
        let tracker = TaskTracker::new();

        let dispatcher = Dispatcher::new(
            rx,
            registry.clone(),
            Arc::new(executor),
            tracker.clone(),
            shutdown.clone(),
        )
        .with_max_concurrent(options.max_concurrent_runs);
        let handle = tokio::spawn(dispatcher.run());

        tracing::info!(
            name: "engine.started",
            max_concurrent_runs = ?options.max_concurrent_runs,
            "Run engine started"
        );

        Self {
            queue,
            registry,
            store,
            tracker,
            shutdown,
            dispatcher: Mutex::new(Some(handle)),
        }
    }

    /// Accept a run and return its id without waiting for execution.
    ///
    /// Validation happens in the worker: an unknown agent or missing input
    /// yields a `failed` run, not an error here.
    #[instrument(skip(self, inputs), fields(run_id = tracing::field::Empty))]
    pub fn submit(
        &self,
        agent_id: impl Into<String> + std::fmt::Debug,
        inputs: InputValues,
    ) -> Result<String, EngineError> {
        let request = RunRequest::start(agent_id, inputs);
        let run_id = request.run_id.clone();
        tracing::Span::current().record("run_id", &run_id);

        let handle = ControlHandle::new(&run_id, &request.agent_id, self.shutdown.child_token());
        self.enqueue(handle, request)?;

        tracing::info!(name: "run.submitted", "Run accepted");
        Ok(run_id)
    }

    /// Register before enqueueing so control calls work the moment the id is returned.
    fn enqueue(&self, handle: ControlHandle, request: RunRequest) -> Result<(), EngineError> {
        if self.queue.is_closed() {
            return Err(EngineError::QueueClosed);
        }
        self.registry.register(handle.clone())?;
        if let Err(e) = self.queue.enqueue(request) {
            self.registry.deregister(&handle);
            return Err(e);
        }
        Ok(())
    }

    /// Signal cancellation. Returns false if the run is not registered.
    pub fn request_cancel(&self, run_id: &str) -> bool {
        let found = self.registry.request_cancel(run_id);
        tracing::info!(name: "run.cancel_requested", %run_id, found, "Cancel requested");
        found
    }

    /// Ask a run to pause at its next turn boundary.
    pub fn request_pause(&self, run_id: &str) -> bool {
        let found = self.registry.request_pause(run_id);
        tracing::info!(name: "run.pause_requested", %run_id, found, "Pause requested");
        found
    }

    /// Continue a paused run.
    ///
    /// Returns `Ok(false)` when the run exists but is not paused.
    #[instrument(skip(self))]
    pub async fn request_resume(&self, run_id: &str, agent_id: &str) -> Result<bool, EngineError> {
        if let Some(handle) = self.registry.get(run_id) {
            if handle.withdraw_pause() {
                tracing::info!(name: "run.resumed", "Pending pause withdrawn");
                return Ok(true);
            }
            if handle.is_pausing() {
                handle.exited().await;
            }
        }

        let mut run = self
            .store
            .get(run_id, agent_id)
            .await?
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
        if run.status != RunStatus::Paused {
            return Ok(false);
        }

        // A live worker that has not polled yet only needs the status flipped back.
        if self.registry.contains(run_id) {
            run.mark_running();
            self.store.update(&run).await?;
            return Ok(true);
        }

        let handle = ControlHandle::new(run_id, agent_id, self.shutdown.child_token());
        if let Err(e) = self.registry.register(handle.clone()) {
            tracing::debug!(error = %e, "Resume raced with another resume");
            return Ok(false);
        }

        run.mark_running();
        if let Err(e) = self.store.update(&run).await {
            self.registry.deregister(&handle);
            return Err(e.into());
        }
        if let Err(e) = self.queue.enqueue(RunRequest::resume(run_id, agent_id)) {
            self.registry.deregister(&handle);
            run.mark_paused();
            if let Err(revert) = self.store.update(&run).await {
                tracing::warn!(error = %revert, "Failed to restore paused status");
            }
            return Err(e);
        }

        tracing::info!(name: "run.resumed", turn = run.turn_count, "Paused run re-submitted");
        Ok(true)
    }

    /// Ids of runs accepted and not yet finished, including queued ones.
    pub fn list_active(&self) -> BTreeSet<String> {
        self.registry.list_active()
    }

    pub fn is_active(&self, run_id: &str) -> bool {
        self.registry.contains(run_id)
    }

    /// Read the persisted run.
    pub async fn get_run(&self, run_id: &str, agent_id: &str) -> Result<Option<Run>, EngineError> {
        Ok(self.store.get(run_id, agent_id).await?)
    }

    /// Wait until no worker holds the run, then read it.
    ///
    /// Returns once the run is terminal, paused, or was never launched.
    pub async fn wait(&self, run_id: &str, agent_id: &str) -> Result<Option<Run>, EngineError> {
        while let Some(handle) = self.registry.get(run_id) {
            handle.exited().await;
        }
        self.get_run(run_id, agent_id).await
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop accepting runs, cancel every live run and wait up to `grace` for
    /// workers to persist their final state.
    ///
    /// Returns false if workers were still running when `grace` elapsed.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, grace: Duration) -> bool {
        tracing::info!(name: "engine.shutdown", active = self.registry.len(), "Shutting down run engine");
        self.queue.close();
        self.shutdown.cancel();

        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Dispatcher task failed");
            }
        }

        self.tracker.close();
        let drained = tokio::time::timeout(grace, self.tracker.wait()).await.is_ok();
        if drained {
            tracing::info!(name: "engine.stopped", "All workers finished");
        } else {
            tracing::warn!(
                name: "engine.stopped",
                remaining = self.registry.len(),
                "Grace period elapsed with workers still running"
            );
        }
        drained
    }
}
