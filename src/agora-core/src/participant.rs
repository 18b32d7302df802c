//! Debate participant definitions.
//!
//! Represents the three model-backed roles with their configuration.

use serde::{Deserialize, Serialize};

use crate::scoring::Side;

/// Role of a participant in the debate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Neutral judge: produces stances, scores turns, delivers the verdict.
    Referee,
    /// Arguing in favor of the topic.
    Pro,
    /// Arguing against the topic.
    Con,
    /// Answers transport commands; never part of a debate.
    Assistant,
}

impl AgentRole {
    pub fn display_name(&self) -> &str {
        match self {
            AgentRole::Referee => "REFEREE",
            AgentRole::Pro => "PRO",
            AgentRole::Con => "CON",
            AgentRole::Assistant => "ASSISTANT",
        }
    }

    /// Participant name used when the configuration gives none.
    pub fn default_name(&self) -> &'static str {
        match self {
            AgentRole::Referee => "Referee",
            AgentRole::Pro => "Affirmative",
            AgentRole::Con => "Negative",
            AgentRole::Assistant => "Assistant",
        }
    }

    /// The debating side this role argues for, if any.
    pub fn side(&self) -> Option<Side> {
        match self {
            AgentRole::Referee | AgentRole::Assistant => None,
            AgentRole::Pro => Some(Side::Pro),
            AgentRole::Con => Some(Side::Con),
        }
    }
}

impl From<Side> for AgentRole {
    fn from(side: Side) -> Self {
        match side {
            Side::Pro => AgentRole::Pro,
            Side::Con => AgentRole::Con,
        }
    }
}

/// Model settings for one participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Display name for this participant.
    pub name: String,
    /// The LLM model to use (e.g., "gpt-4o", "deepseek-r1").
    pub model: String,
    /// The role this participant plays.
    pub role: AgentRole,
    /// Upper bound on reply length.
    pub max_tokens: u32,
    /// Sampling temperature, provider default when unset.
    pub temperature: Option<f32>,
    /// Optional system prompt sent ahead of every request.
    pub system_prompt: Option<String>,
    /// Names of registered tools this participant may call.
    pub tools: Vec<String>,
}

impl AgentProfile {
    /// Create a new profile with the given name, model, and role.
    pub fn new(name: impl Into<String>, model: impl Into<String>, role: AgentRole) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            role,
            max_tokens: 800,
            temperature: None,
            system_prompt: None,
            tools: Vec::new(),
        }
    }

    /// Set a system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Allow this participant to call the named tools.
    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    /// Get the full display name with role.
    pub fn display_name_with_role(&self) -> String {
        format!("{} ({})", self.name, self.role.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_sides() {
        assert_eq!(AgentRole::Pro.side(), Some(Side::Pro));
        assert_eq!(AgentRole::Con.side(), Some(Side::Con));
        assert_eq!(AgentRole::Referee.side(), None);
        assert_eq!(AgentRole::from(Side::Con), AgentRole::Con);
    }

    #[test]
    fn test_display_name_with_role() {
        let profile = AgentProfile::new("Affirmative", "gpt-4o", AgentRole::Pro);
        assert_eq!(profile.display_name_with_role(), "Affirmative (PRO)");
    }

    #[test]
    fn test_builder_sets_tools() {
        let profile = AgentProfile::new("Negative", "gpt-4o", AgentRole::Con)
            .with_tools(["web_search"])
            .with_max_tokens(300);
        assert_eq!(profile.tools, vec!["web_search".to_string()]);
        assert_eq!(profile.max_tokens, 300);
    }
}
