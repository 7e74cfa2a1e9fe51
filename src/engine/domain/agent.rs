use serde::{Deserialize, Serialize};

fn default_turn_budget() -> u32 {
    10
}

/// What an agent is asked to do and how long it may take.
///
/// Definitions are usually authored as YAML:
///
/// ```yaml
/// id: income-verification
/// prompt_template: |
///   Verify the stated income of {{applicant_name}}.
/// required_inputs: [applicant_name]
/// turn_budget: 6
/// goal_prompt: The applicant's income has been verified or rejected.
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentDefinition {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Prompt with `{{input_name}}` placeholders.
    pub prompt_template: String,
    #[serde(default)]
    pub required_inputs: Vec<String>,
    #[serde(default = "default_turn_budget")]
    pub turn_budget: u32,
    /// When set, every turn is followed by a goal check.
    #[serde(default)]
    pub goal_prompt: Option<String>,
}

impl AgentDefinition {
    pub fn new(id: impl Into<String>, prompt_template: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            description: None,
            prompt_template: prompt_template.into(),
            required_inputs: Vec::new(),
            turn_budget: default_turn_budget(),
            goal_prompt: None,
        }
    }

    #[must_use]
    pub fn with_required_inputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_inputs = names.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_turn_budget(mut self, turn_budget: u32) -> Self {
        self.turn_budget = turn_budget;
        self
    }

    #[must_use]
    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goal_prompt = Some(goal.into());
        self
    }

    /// Goal text, ignoring blank goals.
    pub fn goal(&self) -> Option<&str> {
        self.goal_prompt
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yaml_with_defaults() {
        let yaml = r"
id: document-checklist
prompt_template: List missing documents for {{applicant_name}}.
required_inputs:
  - applicant_name
";
        let agent: AgentDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(agent.id, "document-checklist");
        assert_eq!(agent.required_inputs, vec!["applicant_name"]);
        assert_eq!(agent.turn_budget, 10);
        assert!(agent.goal().is_none());
    }

    #[test]
    fn test_blank_goal_is_no_goal() {
        let agent = AgentDefinition::new("a", "p").with_goal("   ");
        assert!(agent.goal().is_none());
        let agent = agent.with_goal(" Approve or decline ");
        assert_eq!(agent.goal(), Some("Approve or decline"));
    }
}
