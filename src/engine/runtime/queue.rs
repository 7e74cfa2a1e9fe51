//! Unbounded FIFO of run requests, decoupling submission from execution.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use crate::engine::domain::RunRequest;
use crate::engine::error::EngineError;

#[derive(Debug, Clone)]
pub struct RunQueue {
    tx: mpsc::UnboundedSender<RunRequest>,
    closed: Arc<AtomicBool>,
}

impl RunQueue {
    /// Create a queue and the receiver the dispatcher drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RunRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Self {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        };
        (queue, rx)
    }

    /// Enqueue without waiting for a worker. Fails only once the queue is closed.
    pub fn enqueue(&self, request: RunRequest) -> Result<(), EngineError> {
        if self.is_closed() {
            return Err(EngineError::QueueClosed);
        }
        self.tx
            .send(request)
            .map_err(|_send_error| EngineError::QueueClosed)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::domain::InputValues;

    #[tokio::test]
    async fn test_fifo_order() {
        let (queue, mut rx) = RunQueue::new();
        let a = RunRequest::start("underwriter", InputValues::new());
        let b = RunRequest::start("appraiser", InputValues::new());
        queue.enqueue(a.clone()).unwrap();
        queue.enqueue(b.clone()).unwrap();

        assert_eq!(rx.recv().await.unwrap().run_id, a.run_id);
        assert_eq!(rx.recv().await.unwrap().run_id, b.run_id);
    }

    #[test]
    fn test_closed_queue_rejects() {
        let (queue, _rx) = RunQueue::new();
        queue.close();
        let err = queue
            .enqueue(RunRequest::start("underwriter", InputValues::new()))
            .unwrap_err();
        assert!(matches!(err, EngineError::QueueClosed));
    }

    #[test]
    fn test_dropped_receiver_closes_queue() {
        let (queue, rx) = RunQueue::new();
        drop(rx);
        assert!(queue.is_closed());
        assert!(queue
            .enqueue(RunRequest::start("underwriter", InputValues::new()))
            .is_err());
    }
}
