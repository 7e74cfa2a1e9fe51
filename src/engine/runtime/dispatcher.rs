//! Long-lived task that turns queued requests into worker tasks.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::instrument;

use crate::engine::domain::RunRequest;
use crate::engine::runtime::executor::ConversationExecutor;
use crate::engine::runtime::registry::RunRegistry;

#[derive(Debug)]
pub struct Dispatcher {
    rx: mpsc::UnboundedReceiver<RunRequest>,
    registry: RunRegistry,
    executor: Arc<ConversationExecutor>,
    tracker: TaskTracker,
    limiter: Option<Arc<Semaphore>>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        rx: mpsc::UnboundedReceiver<RunRequest>,
        registry: RunRegistry,
        executor: Arc<ConversationExecutor>,
        tracker: TaskTracker,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            rx,
            registry,
            executor,
            tracker,
            limiter: None,
            shutdown,
        }
    }

    /// Bound the number of workers in flight. `None` or zero means unbounded.
    pub fn with_max_concurrent(mut self, max: Option<usize>) -> Self {
        self.limiter = max.filter(|n| *n > 0).map(|n| Arc::new(Semaphore::new(n)));
        self
    }

    /// Launch a worker per request until shutdown or until every queue
    /// handle is dropped.
    #[instrument(name = "run.dispatcher", skip(self))]
    pub async fn run(mut self) {
        tracing::info!(name: "dispatcher.started", "Run dispatcher started");

        loop {
            let request = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(request) => request,
                    None => break,
                },
            };
            self.launch(request).await;
        }

        self.drain_unlaunched();
        tracing::info!(name: "dispatcher.stopped", "Run dispatcher stopped");
    }

    async fn launch(&self, request: RunRequest) {
        let Some(handle) = self.registry.get(&request.run_id) else {
            tracing::warn!(run_id = %request.run_id, "Dropping request with no control handle");
            return;
        };

        let permit = match &self.limiter {
            Some(limiter) => {
                let acquired = tokio::select! {
                    biased;
                    () = self.shutdown.cancelled() => None,
                    permit = Arc::clone(limiter).acquire_owned() => permit.ok(),
                };
                if acquired.is_none() {
                    self.registry.deregister(&handle);
                    return;
                }
                acquired
            }
            None => None,
        };

        let registration = self.registry.registration(&handle);
        let executor = Arc::clone(&self.executor);

        tracing::debug!(
            name: "dispatcher.launch",
            run_id = %request.run_id,
            agent_id = %request.agent_id,
            kind = ?request.kind,
            "Launching worker"
        );

        self.tracker.spawn(async move {
            let _permit = permit;
            let _registration = registration;
            let run_id = request.run_id.clone();
            let agent_id = request.agent_id.clone();

            let result = AssertUnwindSafe(executor.execute(request, handle))
                .catch_unwind()
                .await;
            if let Err(panic) = result {
                let message = panic_message(panic.as_ref());
                tracing::error!(name: "run.worker_panicked", %run_id, %agent_id, %message, "Run worker panicked");
                executor.recover_panicked(&run_id, &agent_id, &message).await;
            }
        });
    }

    /// Deregister requests that were accepted but never reached a worker.
    fn drain_unlaunched(&mut self) {
        self.rx.close();
        while let Ok(request) = self.rx.try_recv() {
            if let Some(handle) = self.registry.get(&request.run_id) {
                self.registry.deregister(&handle);
            }
            tracing::warn!(
                name: "dispatcher.dropped",
                run_id = %request.run_id,
                agent_id = %request.agent_id,
                "Request dropped at shutdown"
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
