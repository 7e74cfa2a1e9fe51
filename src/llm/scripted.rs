//! Scripted backend for tests and offline runs.
//!
//! Returns queued replies without making network calls. Goal-check prompts
//! are answered from their own queue so a test can script "work" replies and
//! "is the goal met?" verdicts independently.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::anyhow;

use super::{InferenceBackend, Message};
use crate::engine::runtime::goal::is_goal_check;

#[derive(Debug, Clone)]
enum Step {
    Reply(String),
    Fail(String),
}

#[derive(Debug)]
struct Script {
    replies: VecDeque<Step>,
    goal_replies: VecDeque<Step>,
    default_reply: String,
    default_goal_reply: String,
    requests: Vec<Vec<Message>>,
    reply_calls: usize,
    goal_calls: usize,
}

/// Backend that replays canned replies in FIFO order.
#[derive(Debug, Clone)]
pub struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
    latency: Option<Duration>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBackend {
    /// Backend that answers every turn with a fixed reply and every goal
    /// check with "no".
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                replies: VecDeque::new(),
                goal_replies: VecDeque::new(),
                default_reply: "Reviewing the application.".to_string(),
                default_goal_reply: "no".to_string(),
                requests: Vec::new(),
                reply_calls: 0,
                goal_calls: 0,
            })),
            latency: None,
        }
    }

    /// Queue assistant replies.
    #[must_use]
    pub fn with_replies<I, S>(self, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for r in replies {
            self.queue_reply(r);
        }
        self
    }

    /// Queue goal-check verdicts.
    #[must_use]
    pub fn with_goal_replies<I, S>(self, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut script = self.lock();
            script
                .goal_replies
                .extend(replies.into_iter().map(|r| Step::Reply(r.into())));
        }
        self
    }

    /// Reply used once the queue is empty.
    #[must_use]
    pub fn with_default(self, reply: impl Into<String>) -> Self {
        self.lock().default_reply = reply.into();
        self
    }

    /// Goal-check verdict used once the goal queue is empty.
    #[must_use]
    pub fn with_goal_default(self, reply: impl Into<String>) -> Self {
        self.lock().default_goal_reply = reply.into();
        self
    }

    /// Delay every call, to simulate a slow model.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn queue_reply(&self, reply: impl Into<String>) {
        self.lock().replies.push_back(Step::Reply(reply.into()));
    }

    /// Make the next assistant call fail with `message`.
    pub fn queue_failure(&self, message: impl Into<String>) {
        self.lock().replies.push_back(Step::Fail(message.into()));
    }

    /// Make the next goal check fail with `message`.
    pub fn queue_goal_failure(&self, message: impl Into<String>) {
        self.lock().goal_replies.push_back(Step::Fail(message.into()));
    }

    /// Every history this backend was called with, in call order.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.lock().requests.clone()
    }

    /// Number of assistant-turn calls served.
    pub fn reply_calls(&self) -> usize {
        self.lock().reply_calls
    }

    /// Number of goal-check calls served.
    pub fn goal_check_calls(&self) -> usize {
        self.lock().goal_calls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_step(&self, history: &[Message]) -> Step {
        let mut script = self.lock();
        script.requests.push(history.to_vec());

        if history.last().is_some_and(|m| is_goal_check(&m.content)) {
            script.goal_calls += 1;
            let fallback = Step::Reply(script.default_goal_reply.clone());
            script.goal_replies.pop_front().unwrap_or(fallback)
        } else {
            script.reply_calls += 1;
            let fallback = Step::Reply(script.default_reply.clone());
            script.replies.pop_front().unwrap_or(fallback)
        }
    }
}

#[async_trait::async_trait]
impl InferenceBackend for ScriptedBackend {
    async fn complete(&self, history: &[Message]) -> anyhow::Result<String> {
        if let Some(d) = self.latency {
            tokio::time::sleep(d).await;
        }

        match self.next_step(history) {
            Step::Reply(text) => Ok(text),
            Step::Fail(message) => Err(anyhow!(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::runtime::goal::goal_check_prompt;

    #[tokio::test]
    async fn test_replies_in_order_then_default() {
        let backend = ScriptedBackend::new()
            .with_replies(["first", "second"])
            .with_default("fallback");
        let history = vec![Message::system("prompt")];

        assert_eq!(backend.complete(&history).await.unwrap(), "first");
        assert_eq!(backend.complete(&history).await.unwrap(), "second");
        assert_eq!(backend.complete(&history).await.unwrap(), "fallback");
        assert_eq!(backend.reply_calls(), 3);
        assert_eq!(backend.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_goal_checks_use_their_own_queue() {
        let backend = ScriptedBackend::new()
            .with_replies(["drafting"])
            .with_goal_replies(["No, not yet", "Yes, goal met"]);

        let mut history = vec![Message::system("prompt"), Message::assistant("drafting")];
        history.push(Message::user(goal_check_prompt("Collect the W-2")));

        assert_eq!(backend.complete(&history).await.unwrap(), "No, not yet");
        assert_eq!(backend.complete(&history).await.unwrap(), "Yes, goal met");
        assert_eq!(backend.complete(&history).await.unwrap(), "no");
        assert_eq!(backend.goal_check_calls(), 3);
        assert_eq!(backend.reply_calls(), 0);
    }

    #[tokio::test]
    async fn test_queued_failure() {
        let backend = ScriptedBackend::new();
        backend.queue_failure("rate limited");

        let err = backend.complete(&[Message::user("hi")]).await.unwrap_err();
        assert_eq!(err.to_string(), "rate limited");
        assert!(backend.complete(&[Message::user("hi")]).await.is_ok());
    }
}
