//! Goal-completion check.
//!
//! After each assistant turn the executor asks the model a separate yes/no
//! question about the goal. The verdict is a case-insensitive substring match
//! on "yes", which is lenient: "Yes, not yet" counts as achieved and
//! "Affirmative" does not.

use crate::llm::Message;

/// Marks the question so scripted backends can route it.
pub const GOAL_CHECK_PREFIX: &str = "[goal-check]";

pub fn goal_check_prompt(goal: &str) -> String {
    format!(
        "{GOAL_CHECK_PREFIX} Goal: {goal}\n\n\
         Based on the conversation so far, has this goal been fully achieved? \
         Answer strictly with \"yes\" or \"no\"."
    )
}

pub fn is_goal_check(content: &str) -> bool {
    content.starts_with(GOAL_CHECK_PREFIX)
}

/// The transcript so far followed by the goal question.
pub fn goal_check_history(history: &[Message], goal: &str) -> Vec<Message> {
    let mut messages = history.to_vec();
    messages.push(Message::user(goal_check_prompt(goal)));
    messages
}

pub fn goal_achieved(reply: &str) -> bool {
    reply.to_lowercase().contains("yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdicts() {
        assert!(goal_achieved("Yes, goal met"));
        assert!(goal_achieved("YES"));
        assert!(!goal_achieved("No."));
        assert!(!goal_achieved(""));
        // Known false positive of the lenient match.
        assert!(goal_achieved("yes, not yet"));
    }

    #[test]
    fn test_history_appends_question() {
        let history = vec![Message::system("prompt"), Message::assistant("done")];
        let msgs = goal_check_history(&history, "Flag missing pay stubs");

        assert_eq!(msgs.len(), 3);
        assert!(is_goal_check(&msgs[2].content));
        assert!(msgs[2].content.contains("Flag missing pay stubs"));
        assert!(!is_goal_check(&msgs[1].content));
    }
}
