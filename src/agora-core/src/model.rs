//! Model callers.
//!
//! A [`ModelCaller`] turns a conversation into a text reply. The debate and the
//! transports only ever see this trait; the OpenAI-compatible client is one
//! implementation and scripted stubs are another.

use std::time::Duration;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ApiConfig;
use crate::error::DebateError;
use crate::extract::strip_reasoning;
use crate::participant::AgentProfile;

/// Author of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Something that can answer a conversation with text.
#[async_trait]
pub trait ModelCaller: Send + Sync {
    /// Short label used in logs and errors.
    fn label(&self) -> &str;

    /// Reply to the given conversation.
    async fn chat(&self, turns: &[ChatTurn]) -> Result<String, DebateError>;

    /// Reply to a single rendered prompt.
    async fn generate(&self, prompt: &str) -> Result<String, DebateError> {
        self.chat(&[ChatTurn::user(prompt)]).await
    }
}

/// Chat-completions client for any OpenAI-compatible endpoint.
pub struct OpenAiCaller {
    client: Client<OpenAIConfig>,
    profile: AgentProfile,
    max_retries: u32,
    backoff_base: Duration,
}

impl OpenAiCaller {
    pub fn new(
        api: &ApiConfig,
        api_key: &str,
        profile: AgentProfile,
    ) -> Result<Self, DebateError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(api.request_timeout_secs))
            .connect_timeout(Duration::from_secs(api.connect_timeout_secs))
            .build()
            .map_err(|e| {
                DebateError::ConfigError(format!("Failed to create HTTP client: {}", e))
            })?;

        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(&api.base_url);

        Ok(Self {
            client: Client::with_config(config).with_http_client(http_client),
            profile,
            max_retries: api.max_retries.max(1),
            backoff_base: Duration::from_millis(api.backoff_base_ms),
        })
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    fn to_request_messages(&self, turns: &[ChatTurn]) -> Vec<ChatCompletionRequestMessage> {
        let mut messages = Vec::with_capacity(turns.len() + 1);

        if let Some(system) = &self.profile.system_prompt {
            messages.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessage {
                    content: system.clone().into(),
                    name: None,
                },
            ));
        }

        for turn in turns {
            let message = match turn.role {
                ChatRole::System => {
                    ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                        content: turn.content.clone().into(),
                        name: None,
                    })
                }
                ChatRole::User => {
                    ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                        content: turn.content.clone().into(),
                        name: None,
                    })
                }
                ChatRole::Assistant => ChatCompletionRequestMessage::Assistant(
                    ChatCompletionRequestAssistantMessage::from(turn.content.clone()),
                ),
            };
            messages.push(message);
        }

        messages
    }
}

#[async_trait]
impl ModelCaller for OpenAiCaller {
    fn label(&self) -> &str {
        &self.profile.name
    }

    /// Includes retry logic with exponential backoff for transient failures
    /// and for empty replies.
    async fn chat(&self, turns: &[ChatTurn]) -> Result<String, DebateError> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.profile.model)
            .max_completion_tokens(self.profile.max_tokens)
            .messages(self.to_request_messages(turns));
        if let Some(temperature) = self.profile.temperature {
            args.temperature(temperature);
        }
        let request = args.build()?;

        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(self.backoff_base, attempt)).await;
            }

            match self.client.chat().create(request.clone()).await {
                Ok(response) => {
                    let content = response
                        .choices
                        .first()
                        .and_then(|c| c.message.content.clone())
                        .unwrap_or_default();
                    debug!(agent = %self.profile.name, reply = %content, "model reply");

                    if strip_reasoning(&content).trim().is_empty() {
                        warn!(
                            agent = %self.profile.name,
                            attempt = attempt + 1,
                            "empty reply from model, retrying"
                        );
                        last_error = Some(DebateError::RemoteCallFailure {
                            role: self.profile.name.clone(),
                            message: "model returned an empty reply".to_string(),
                        });
                        continue;
                    }
                    return Ok(content);
                }
                Err(e) => {
                    warn!(
                        agent = %self.profile.name,
                        attempt = attempt + 1,
                        max = self.max_retries,
                        error = %e,
                        "chat completion failed"
                    );
                    last_error = Some(DebateError::from(e));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| DebateError::RemoteCallFailure {
            role: self.profile.name.clone(),
            message: "unknown API error after retries".to_string(),
        }))
    }
}

/// Exponential backoff before retry `attempt` (1-based): base, 2x base, 4x
/// base and so on, saturating instead of overflowing.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted callers for exercising orchestration without a network.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Replies with queued responses in order; records every conversation seen.
    pub struct ScriptedCaller {
        label: String,
        replies: Mutex<VecDeque<Result<String, String>>>,
        pub seen: Mutex<Vec<Vec<ChatTurn>>>,
    }

    impl ScriptedCaller {
        pub fn new<I, S>(label: &str, replies: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                label: label.to_string(),
                replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
                seen: Mutex::new(Vec::new()),
            }
        }

        /// Queue a remote failure after the current replies.
        pub fn then_fail(self, message: &str) -> Self {
            self.replies
                .lock()
                .unwrap()
                .push_back(Err(message.to_string()));
            self
        }

        pub fn prompts(&self) -> Vec<String> {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .filter_map(|turns| turns.last().map(|t| t.content.clone()))
                .collect()
        }
    }

    #[async_trait]
    impl ModelCaller for ScriptedCaller {
        fn label(&self) -> &str {
            &self.label
        }

        async fn chat(&self, turns: &[ChatTurn]) -> Result<String, DebateError> {
            self.seen.lock().unwrap().push(turns.to_vec());
            match self.replies.lock().unwrap().pop_front() {
                Some(Ok(reply)) => Ok(reply),
                Some(Err(message)) => Err(DebateError::RemoteCallFailure {
                    role: self.label.clone(),
                    message,
                }),
                None => Err(DebateError::RemoteCallFailure {
                    role: self.label.clone(),
                    message: "script exhausted".to_string(),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedCaller;
    use super::*;
    use crate::participant::AgentRole;

    #[tokio::test]
    async fn test_generate_wraps_prompt_in_user_turn() {
        let caller = ScriptedCaller::new("referee", ["ok"]);
        let reply = caller.generate("score this").await.unwrap();
        assert_eq!(reply, "ok");
        let seen = caller.seen.lock().unwrap();
        assert_eq!(seen[0], vec![ChatTurn::user("score this")]);
    }

    #[test]
    fn test_backoff_doubles_and_saturates() {
        let base = Duration::from_millis(1000);
        assert_eq!(backoff_delay(base, 1), base);
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(4000));
        assert_eq!(backoff_delay(Duration::ZERO, 40), Duration::ZERO);
        assert_eq!(backoff_delay(base, 40), base.saturating_mul(u32::MAX));
        assert_eq!(backoff_delay(Duration::MAX, 5), Duration::MAX);
    }

    #[tokio::test]
    async fn test_many_retries_against_dead_endpoint_fail_cleanly() {
        let api = ApiConfig {
            base_url: "http://127.0.0.1:9/v1".to_string(),
            max_retries: 40,
            backoff_base_ms: 0,
            request_timeout_secs: 2,
            connect_timeout_secs: 1,
        };
        let profile = AgentProfile::new("Pro", "gpt-4o", AgentRole::Pro);
        let caller = OpenAiCaller::new(&api, "sk-test", profile).unwrap();
        assert!(caller.generate("hi").await.is_err());
    }

    #[test]
    fn test_assistant_turns_keep_their_text() {
        let profile = AgentProfile::new("Pro", "gpt-4o", AgentRole::Pro);
        let caller = OpenAiCaller::new(&ApiConfig::default(), "sk-test", profile).unwrap();
        let messages = caller.to_request_messages(&[ChatTurn::assistant("earlier reply")]);
        let json = serde_json::to_value(&messages[0]).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"], "earlier reply");
    }

    #[test]
    fn test_system_prompt_is_prepended() {
        let profile = AgentProfile::new("Referee", "gpt-4o", AgentRole::Referee)
            .with_system_prompt("Be neutral.");
        let caller = OpenAiCaller::new(&ApiConfig::default(), "sk-test", profile).unwrap();
        let messages = caller.to_request_messages(&[ChatTurn::user("hi")]);
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(messages[1], ChatCompletionRequestMessage::User(_)));
    }
}
