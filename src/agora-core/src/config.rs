//! Configuration module for loading TOML config files.
//!
//! Every section and key is optional; anything missing falls back to the
//! defaults in [`default_config`]. Secrets (API keys) are read from the
//! environment by the caller and never live in the file.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::DebateError;
use crate::participant::{AgentProfile, AgentRole};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub debate: DebateSettings,
    pub agents: AgentsConfig,
    pub prompts: PromptsConfig,
    pub tools: ToolsConfig,
    pub server: ServerConfig,
}

/// Connection settings for the OpenAI-compatible endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Attempts per call, including the first.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub backoff_base_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            request_timeout_secs: 120,
            connect_timeout_secs: 30,
            max_retries: 3,
            backoff_base_ms: 1000,
        }
    }
}

/// Round count, pacing and context settings for a debate.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebateSettings {
    pub rounds: u32,
    /// Character budget for the transcript sent as context. Unbounded if unset.
    pub max_context_chars: Option<usize>,
    /// Pause after each argument.
    pub after_argument_delay_ms: u64,
    /// Pause after each score, to stay under provider rate limits.
    pub after_score_delay_ms: u64,
    /// Deadline for a single model call, retries included.
    pub call_deadline_secs: u64,
    /// Directory for Markdown transcripts. No file is written if unset.
    pub transcript_dir: Option<PathBuf>,
}

impl Default for DebateSettings {
    fn default() -> Self {
        Self {
            rounds: 4,
            max_context_chars: Some(24_000),
            after_argument_delay_ms: 1_000,
            after_score_delay_ms: 15_000,
            call_deadline_secs: 600,
            transcript_dir: Some(PathBuf::from("transcripts")),
        }
    }
}

/// Model settings for each role.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    pub referee: AgentConfig,
    pub pro: AgentConfig,
    pub con: AgentConfig,
    /// The agent behind the stdio and event-stream servers.
    pub assistant: AgentConfig,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            referee: AgentConfig::named(AgentRole::Referee.default_name()),
            pro: AgentConfig::named(AgentRole::Pro.default_name()),
            con: AgentConfig::named(AgentRole::Con.default_name()),
            assistant: AgentConfig::named(AgentRole::Assistant.default_name()),
        }
    }
}

impl AgentsConfig {
    pub fn get(&self, role: AgentRole) -> &AgentConfig {
        match role {
            AgentRole::Referee => &self.referee,
            AgentRole::Pro => &self.pro,
            AgentRole::Con => &self.con,
            AgentRole::Assistant => &self.assistant,
        }
    }

    pub fn get_mut(&mut self, role: AgentRole) -> &mut AgentConfig {
        match role {
            AgentRole::Referee => &mut self.referee,
            AgentRole::Pro => &mut self.pro,
            AgentRole::Con => &mut self.con,
            AgentRole::Assistant => &mut self.assistant,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub system_prompt: Option<String>,
    pub tools: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 800,
            temperature: None,
            system_prompt: None,
            tools: Vec::new(),
        }
    }
}

impl AgentConfig {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Build the participant profile for `role`. An empty name falls back to
    /// the role's default, so a partial `[agents.*]` table keeps it.
    pub fn to_profile(&self, role: AgentRole) -> AgentProfile {
        let name = if self.name.trim().is_empty() {
            role.default_name().to_string()
        } else {
            self.name.clone()
        };

        let mut profile = AgentProfile::new(name, &self.model, role)
            .with_max_tokens(self.max_tokens)
            .with_tools(self.tools.iter().cloned());
        if let Some(temperature) = self.temperature {
            profile = profile.with_temperature(temperature);
        }
        if let Some(prompt) = &self.system_prompt {
            profile = profile.with_system_prompt(prompt);
        }
        profile
    }
}

/// Prompt templates. Placeholders are written as `{name}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    /// Variables: `topic`, `history`, `task`.
    pub referee_template: String,
    /// Variables: `topic`, `stance`, `history`.
    pub debater_template: String,
    pub stance_task: String,
    /// Variables: `side`.
    pub score_task: String,
    /// Variables: `pro_score`, `con_score`, `winner`.
    pub verdict_task: String,
    /// Variables: `tools`.
    pub tool_agent_instructions: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            referee_template: DEFAULT_REFEREE_TEMPLATE.to_string(),
            debater_template: DEFAULT_DEBATER_TEMPLATE.to_string(),
            stance_task: "Generate the opposing stances for this debate.".to_string(),
            score_task: "Score the statement the {side} debater just made.".to_string(),
            verdict_task: "The debate is over. Final totals: Pro {pro_score}, Con {con_score}. \
                           Announce '{winner}' as the result and deliver a closing summary."
                .to_string(),
            tool_agent_instructions: DEFAULT_TOOL_AGENT_INSTRUCTIONS.to_string(),
        }
    }
}

impl PromptsConfig {
    /// Render the referee prompt for a task.
    pub fn referee_prompt(&self, topic: &str, history: &str, task: &str) -> String {
        render_template(
            &self.referee_template,
            &[("topic", topic), ("history", history), ("task", task)],
        )
    }

    /// Render a debater prompt.
    pub fn debater_prompt(&self, topic: &str, stance: &str, history: &str) -> String {
        render_template(
            &self.debater_template,
            &[("topic", topic), ("stance", stance), ("history", history)],
        )
    }
}

/// Tool wiring for tool-augmented agents and the transport servers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// HTTP endpoint answering `GET ?q=<query>` with search hits. Search is
    /// unavailable if unset.
    pub search_endpoint: Option<String>,
    pub search_max_results: usize,
    /// Root directory for the directory-listing tool. Disabled if unset.
    pub sandbox_dir: Option<PathBuf>,
    /// Reason/act iterations before a tool agent gives up.
    pub max_iterations: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            search_endpoint: None,
            search_max_results: 5,
            sandbox_dir: Some(PathBuf::from("sandbox")),
            max_iterations: 6,
        }
    }
}

/// Settings for the stdio and event-stream servers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub session_ttl_secs: u64,
    /// Turns kept per session; oldest turns are dropped first.
    pub session_history_limit: usize,
    /// Wait after spawning a stdio server before the first request.
    pub settle_delay_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            session_ttl_secs: 1800,
            session_history_limit: 40,
            settle_delay_ms: 2000,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DebateError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| DebateError::ConfigError(format!("Failed to read config: {}", e)))?;

        Self::from_str(&content)
    }

    /// Load configuration from string content.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, DebateError> {
        let config: Config = toml::from_str(content)
            .map_err(|e| DebateError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that would make a debate impossible.
    pub fn validate(&self) -> Result<(), DebateError> {
        if self.debate.rounds == 0 {
            return Err(DebateError::ConfigError(
                "debate.rounds must be at least 1".to_string(),
            ));
        }
        for role in [
            AgentRole::Referee,
            AgentRole::Pro,
            AgentRole::Con,
            AgentRole::Assistant,
        ] {
            if self.agents.get(role).model.trim().is_empty() {
                return Err(DebateError::ConfigError(format!(
                    "agents.{} has no model",
                    role.display_name().to_lowercase()
                )));
            }
        }
        if self.tools.max_iterations == 0 {
            return Err(DebateError::ConfigError(
                "tools.max_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Replace every `{key}` in `template` with its value in a single pass.
///
/// Substituted values are never scanned again, and unknown placeholders are
/// left untouched.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let Ok(re) = regex::Regex::new(r"\{(\w+)\}") else {
        return template.to_string();
    };

    re.replace_all(template, |caps: &regex::Captures| {
        let key = &caps[1];
        vars.iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value.to_string())
            .unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}

/// Default configuration embedded in the binary.
pub fn default_config() -> Config {
    Config::default()
}

const DEFAULT_REFEREE_TEMPLATE: &str = r#"You are an experienced and strictly neutral debate referee. You judge the debate on logic, evidence and persuasiveness.

# Debate topic: {topic}

# Your duties:
1. **Generate stances**: From the topic, produce clear, opposing and arguable positions for the two sides. Reply in JSON with the keys "pro_stance" and "con_stance".
2. **Score a turn**: After each statement, score the side that just spoke:
    - **Logical clarity (1-5)**: Is the argument well structured and the reasoning rigorous?
    - **Evidence (1-5)**: Are facts, data or examples used effectively to support the position?
    - **Persuasiveness (1-5)**: Is the delivery fluent, forceful and convincing?
   Reply in JSON containing "score" (the total out of 15, as a single integer) and "reasoning".
3. **Final verdict**: When all rounds are over, announce the winner from the totals and give a closing summary.

# Debate so far:
{history}

---
Now carry out your duty.
{task}
"#;

const DEFAULT_DEBATER_TEMPLATE: &str = r#"You are a top competitive debater. Your style is rigorous, sharp and persuasive.

# Debate topic: {topic}
# Your stance: {stance}

# Your job:
- **State your case**: Lay out the arguments that support your stance.
- **Back it up**: Use facts, data, reasoning or vivid examples.
- **Rebut**: If the opponent has spoken in the history, answer their points directly.
- **Hold your ground**: Defend your stance throughout; never switch sides.

# Debate so far:
{history}

---
It is your turn. Deliver your statement now and output only the words you say.
"#;

const DEFAULT_TOOL_AGENT_INSTRUCTIONS: &str = r#"You can use the following tools:

{tools}

To use a tool, reply with ONLY a JSON object of the form:
{"action": "<tool name>", "action_input": { ...arguments... }}

You will then receive the tool's output and may continue. When you have enough information, reply with your final answer as plain text (not JSON)."#;
