//! Best-effort delivery of run events to observers.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::engine::domain::{EventEnvelope, RunEvent};
use crate::engine::error::SinkError;

#[async_trait]
pub trait EventSink: Send + Sync + std::fmt::Debug {
    /// Deliver one event. Callers log failures and carry on.
    async fn publish(&self, envelope: EventEnvelope) -> Result<(), SinkError>;
}

/// Fans events out over a `tokio::sync::broadcast` channel.
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<EventEnvelope>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EventSink for BroadcastEventSink {
    async fn publish(&self, envelope: EventEnvelope) -> Result<(), SinkError> {
        // No subscribers is not a failure.
        let _ = self.tx.send(envelope);
        Ok(())
    }
}

/// Writes turn and status events to the tracing subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn publish(&self, envelope: EventEnvelope) -> Result<(), SinkError> {
        let EventEnvelope {
            run_id,
            agent_id,
            event,
            ..
        } = envelope;
        match event {
            // The executor mirrors log entries itself.
            RunEvent::Log(_) => {}
            RunEvent::Turn(turn) => {
                tracing::debug!(
                    name: "run.turn",
                    %run_id,
                    %agent_id,
                    turn = turn.turn_number,
                    role = %turn.role,
                    chars = turn.content.len(),
                    "Conversation turn appended"
                );
            }
            RunEvent::Status { status, outcome } => {
                tracing::info!(name: "run.status", %run_id, %agent_id, %status, ?outcome, "Run status changed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::domain::RunStatus;

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_ok() {
        let sink = BroadcastEventSink::new(4);
        let env = EventEnvelope::new(
            "r1",
            "a1",
            RunEvent::Status {
                status: RunStatus::Running,
                outcome: None,
            },
        );
        assert!(sink.publish(env).await.is_ok());
    }

    #[tokio::test]
    async fn test_broadcast_delivers() {
        let sink = BroadcastEventSink::new(4);
        let mut rx = sink.subscribe();
        let env = EventEnvelope::new(
            "r1",
            "a1",
            RunEvent::Status {
                status: RunStatus::Paused,
                outcome: None,
            },
        );
        sink.publish(env.clone()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), env);
    }
}
