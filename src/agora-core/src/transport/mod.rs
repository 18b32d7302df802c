//! Process transports: a line-delimited JSON protocol over a child process's
//! stdio, and a server-sent event stream over HTTP.
//!
//! Both serve the same [`CommandHandler`]; the agent behind it is the only
//! thing that talks to a model.

pub mod sse;
pub mod stdio;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::agent::{AgentStep, ToolAgent};
use crate::error::DebateError;
use crate::model::ChatTurn;
use crate::session::SessionRegistry;

/// Id echoed when a request could not be parsed.
pub const UNKNOWN_ID: &str = "unknown";

/// Id used when a parsed request carries none.
pub const MISSING_ID: &str = "no-id";

/// Answers a command, optionally within a named session.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// `steps` receives intermediate steps when the caller streams them.
    async fn handle(
        &self,
        command: &str,
        session: Option<&str>,
        steps: Option<&mpsc::Sender<AgentStep>>,
    ) -> Result<String, DebateError>;
}

/// Serves commands with a [`ToolAgent`], keeping per-session history.
pub struct AgentCommandHandler {
    agent: ToolAgent,
    sessions: Arc<SessionRegistry>,
}

impl AgentCommandHandler {
    pub fn new(agent: ToolAgent, sessions: Arc<SessionRegistry>) -> Self {
        Self { agent, sessions }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }
}

#[async_trait]
impl CommandHandler for AgentCommandHandler {
    async fn handle(
        &self,
        command: &str,
        session: Option<&str>,
        steps: Option<&mpsc::Sender<AgentStep>>,
    ) -> Result<String, DebateError> {
        let mut turns = match session {
            Some(id) => self.sessions.history(id).await,
            None => Vec::new(),
        };
        turns.push(ChatTurn::user(command));

        let answer = self.agent.run(&turns, steps).await?;

        if let Some(id) = session {
            self.sessions
                .record(id, ChatTurn::user(command), ChatTurn::assistant(&answer))
                .await;
        }
        Ok(answer)
    }
}

/// One request line of the stdio protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StdioRequest {
    #[serde(default = "missing_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

fn missing_id() -> String {
    MISSING_ID.to_string()
}

impl StdioRequest {
    /// A request with a fresh random id.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            command: Some(command.into()),
            session: None,
        }
    }

    pub fn in_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// One response line of the stdio protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StdioResponse {
    pub id: String,
    pub status: ResponseStatus,
    pub payload: Value,
}

impl StdioResponse {
    pub fn success(id: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            id: id.into(),
            status: ResponseStatus::Success,
            payload: payload.into(),
        }
    }

    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ResponseStatus::Error,
            payload: Value::String(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Answers `ping` with `pong`, echoes anything else, fails on `fail`.
    /// Emits one tool call/output pair for commands starting with `tool:`.
    pub struct EchoHandler;

    #[async_trait]
    impl CommandHandler for EchoHandler {
        async fn handle(
            &self,
            command: &str,
            session: Option<&str>,
            steps: Option<&mpsc::Sender<AgentStep>>,
        ) -> Result<String, DebateError> {
            if command == "fail" {
                return Err(DebateError::RemoteCallFailure {
                    role: "echo".to_string(),
                    message: "requested failure".to_string(),
                });
            }
            if let (Some(arg), Some(tx)) = (command.strip_prefix("tool:"), steps) {
                let _ = tx
                    .send(AgentStep::ToolCall {
                        tool: "shout".to_string(),
                        tool_input: serde_json::json!({ "text": arg }),
                        log: command.to_string(),
                    })
                    .await;
                let _ = tx
                    .send(AgentStep::ToolOutput {
                        tool_output: arg.to_uppercase(),
                    })
                    .await;
            }
            Ok(match (command, session) {
                ("ping", _) => "pong".to_string(),
                (other, Some(id)) => format!("[{}] {}", id, other),
                (other, None) => other.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::ScriptedCaller;
    use crate::tools::ToolRegistry;
    use std::time::Duration;

    #[test]
    fn test_request_defaults() {
        let request: StdioRequest = serde_json::from_str(r#"{"command": "ping"}"#).unwrap();
        assert_eq!(request.id, MISSING_ID);
        assert_eq!(request.session, None);

        let line = serde_json::to_string(&StdioRequest {
            id: "abc".into(),
            command: Some("ping".into()),
            session: None,
        })
        .unwrap();
        assert_eq!(line, r#"{"id":"abc","command":"ping"}"#);
    }

    #[test]
    fn test_response_wire_format() {
        let line = serde_json::to_string(&StdioResponse::error(UNKNOWN_ID, "bad")).unwrap();
        assert_eq!(line, r#"{"id":"unknown","status":"error","payload":"bad"}"#);
    }

    #[test]
    fn test_new_requests_get_distinct_ids() {
        assert_ne!(StdioRequest::new("a").id, StdioRequest::new("a").id);
    }

    #[tokio::test]
    async fn test_agent_handler_threads_session_history() {
        let caller = Arc::new(ScriptedCaller::new("assistant", ["first answer", "second answer"]));
        let agent = ToolAgent::new(caller.clone(), ToolRegistry::new(), "{tools}", 2);
        let sessions = Arc::new(SessionRegistry::new(Duration::from_secs(60), 10));
        let handler = AgentCommandHandler::new(agent, sessions.clone());

        handler.handle("hello", Some("s1"), None).await.unwrap();
        handler.handle("again", Some("s1"), None).await.unwrap();

        let seen = caller.seen.lock().unwrap();
        assert_eq!(
            seen[1],
            vec![
                ChatTurn::user("hello"),
                ChatTurn::assistant("first answer"),
                ChatTurn::user("again"),
            ]
        );
        drop(seen);
        assert_eq!(sessions.history("s1").await.len(), 4);
    }

    #[tokio::test]
    async fn test_agent_handler_without_session_is_stateless() {
        let caller = Arc::new(ScriptedCaller::new("assistant", ["one", "two"]));
        let agent = ToolAgent::new(caller.clone(), ToolRegistry::new(), "{tools}", 2);
        let sessions = Arc::new(SessionRegistry::new(Duration::from_secs(60), 10));
        let handler = AgentCommandHandler::new(agent, sessions.clone());

        handler.handle("a", None, None).await.unwrap();
        handler.handle("b", None, None).await.unwrap();
        assert_eq!(caller.seen.lock().unwrap()[1], vec![ChatTurn::user("b")]);
        assert!(sessions.is_empty().await);
    }
}
