//! Tool-augmented agent.
//!
//! A [`ToolAgent`] runs a bounded reason/act loop over a [`ModelCaller`]: the
//! model either answers in plain text or asks for a tool with a JSON action.
//! Every step is reported as an [`AgentStep`], which is also the vocabulary of
//! the event-stream transport.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::render_template;
use crate::error::{DebateError, ToolError};
use crate::extract::{strip_code_fences, strip_reasoning};
use crate::model::{ChatTurn, ModelCaller};
use crate::tools::ToolRegistry;

/// One observable step of an agent run.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentStep {
    ToolCall {
        tool: String,
        tool_input: Value,
        /// The model reply that requested the call.
        log: String,
    },
    ToolOutput {
        tool_output: String,
    },
    FinalAnswer {
        answer: String,
    },
    Error {
        error: String,
    },
}

impl AgentStep {
    /// Event name on the wire.
    pub fn event_name(&self) -> &'static str {
        match self {
            AgentStep::ToolCall { .. } => "tool_call",
            AgentStep::ToolOutput { .. } => "tool_output",
            AgentStep::FinalAnswer { .. } => "final_answer",
            AgentStep::Error { .. } => "error",
        }
    }

    /// JSON payload on the wire.
    pub fn payload(&self) -> Value {
        match self {
            AgentStep::ToolCall {
                tool,
                tool_input,
                log,
            } => json!({ "tool": tool, "tool_input": tool_input, "log": log }),
            AgentStep::ToolOutput { tool_output } => json!({ "tool_output": tool_output }),
            AgentStep::FinalAnswer { answer } => json!({ "answer": answer }),
            AgentStep::Error { error } => json!({ "error": error }),
        }
    }

    /// Whether this step ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentStep::FinalAnswer { .. } | AgentStep::Error { .. })
    }
}

/// A tool request parsed from a model reply.
#[derive(Debug, Clone, PartialEq)]
struct Action {
    tool: String,
    input: Value,
}

fn parse_action(reply: &str) -> Option<Action> {
    let without_reasoning = strip_reasoning(reply);
    let cleaned = strip_code_fences(&without_reasoning);
    let Ok(Value::Object(mut map)) = serde_json::from_str::<Value>(cleaned) else {
        return None;
    };
    let tool = map.get("action")?.as_str()?.trim().to_string();
    if tool.is_empty() {
        return None;
    }
    let input = map
        .remove("action_input")
        .unwrap_or_else(|| Value::Object(Default::default()));
    Some(Action { tool, input })
}

pub struct ToolAgent {
    caller: Arc<dyn ModelCaller>,
    tools: ToolRegistry,
    instructions: String,
    max_iterations: usize,
}

impl ToolAgent {
    /// `instructions_template` may reference `{tools}`, the rendered catalogue.
    pub fn new(
        caller: Arc<dyn ModelCaller>,
        tools: ToolRegistry,
        instructions_template: &str,
        max_iterations: usize,
    ) -> Self {
        let instructions = render_template(instructions_template, &[("tools", &tools.describe())]);
        Self {
            caller,
            tools,
            instructions,
            max_iterations: max_iterations.max(1),
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run until the model gives a final answer.
    ///
    /// When `steps` is given, every step is sent on it; if the receiver goes
    /// away the run stops with [`DebateError::Cancelled`].
    pub async fn run(
        &self,
        turns: &[ChatTurn],
        steps: Option<&mpsc::Sender<AgentStep>>,
    ) -> Result<String, DebateError> {
        let mut conversation = Vec::with_capacity(turns.len() + 1);
        if !self.tools.is_empty() {
            conversation.push(ChatTurn::system(&self.instructions));
        }
        conversation.extend_from_slice(turns);

        for iteration in 0..self.max_iterations {
            let reply = match self.caller.chat(&conversation).await {
                Ok(reply) => reply,
                Err(e) => {
                    emit(steps, AgentStep::Error {
                        error: e.to_string(),
                    })
                    .await?;
                    return Err(e);
                }
            };

            let action = if self.tools.is_empty() {
                None
            } else {
                parse_action(&reply)
            };

            let Some(action) = action else {
                let answer = strip_reasoning(&reply).trim().to_string();
                info!(agent = self.caller.label(), iteration, "final answer produced");
                emit(steps, AgentStep::FinalAnswer {
                    answer: answer.clone(),
                })
                .await?;
                return Ok(answer);
            };

            debug!(agent = self.caller.label(), tool = %action.tool, input = %action.input, "tool call");
            emit(steps, AgentStep::ToolCall {
                tool: action.tool.clone(),
                tool_input: action.input.clone(),
                log: reply.clone(),
            })
            .await?;

            let observation = match self.tools.invoke(&action.tool, action.input).await {
                Ok(output) => output,
                Err(e) => {
                    warn!(agent = self.caller.label(), tool = %action.tool, error = %e, "tool failed");
                    format!("Error: {}", e)
                }
            };
            emit(steps, AgentStep::ToolOutput {
                tool_output: observation.clone(),
            })
            .await?;

            conversation.push(ChatTurn::assistant(reply));
            conversation.push(ChatTurn::user(format!(
                "Tool output ({}):\n{}",
                action.tool, observation
            )));
        }

        let err = ToolError::IterationLimit(self.max_iterations);
        emit(steps, AgentStep::Error {
            error: err.to_string(),
        })
        .await?;
        Err(err.into())
    }
}

async fn emit(steps: Option<&mpsc::Sender<AgentStep>>, step: AgentStep) -> Result<(), DebateError> {
    if let Some(tx) = steps {
        if tx.send(step).await.is_err() {
            debug!("step receiver dropped, stopping agent run");
            return Err(DebateError::Cancelled);
        }
    }
    Ok(())
}

#[async_trait]
impl ModelCaller for ToolAgent {
    fn label(&self) -> &str {
        self.caller.label()
    }

    async fn chat(&self, turns: &[ChatTurn]) -> Result<String, DebateError> {
        self.run(turns, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::ScriptedCaller;
    use crate::tools::testing::ShoutTool;

    fn registry() -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(ShoutTool)).unwrap();
        tools
    }

    async fn collect(mut rx: mpsc::Receiver<AgentStep>) -> Vec<AgentStep> {
        let mut steps = Vec::new();
        while let Some(step) = rx.recv().await {
            steps.push(step);
        }
        steps
    }

    #[test]
    fn test_parse_action_accepts_fenced_json() {
        let action = parse_action("```json\n{\"action\": \"shout\", \"action_input\": {\"text\": \"hi\"}}\n```")
            .unwrap();
        assert_eq!(action.tool, "shout");
        assert_eq!(action.input, json!({"text": "hi"}));
        assert!(parse_action("Just an answer.").is_none());
        assert!(parse_action(r#"{"score": 3}"#).is_none());
    }

    #[tokio::test]
    async fn test_tool_call_then_final_answer() {
        let caller = Arc::new(ScriptedCaller::new(
            "assistant",
            [
                r#"{"action": "shout", "action_input": {"text": "quiet"}}"#,
                "<think>got it</think>The tool said QUIET.",
            ],
        ));
        let agent = ToolAgent::new(caller.clone(), registry(), "Tools:\n{tools}", 4);
        let (tx, rx) = mpsc::channel(16);

        let answer = agent.run(&[ChatTurn::user("make it loud")], Some(&tx)).await.unwrap();
        drop(tx);
        assert_eq!(answer, "The tool said QUIET.");

        let steps = collect(rx).await;
        let names: Vec<_> = steps.iter().map(AgentStep::event_name).collect();
        assert_eq!(names, vec!["tool_call", "tool_output", "final_answer"]);
        assert_eq!(steps[1], AgentStep::ToolOutput {
            tool_output: "QUIET".to_string()
        });

        let seen = caller.seen.lock().unwrap();
        assert!(seen[0][0].content.contains("- shout:"));
        assert_eq!(seen[1].last().unwrap().content, "Tool output (shout):\nQUIET");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_fed_back() {
        let caller = Arc::new(ScriptedCaller::new(
            "assistant",
            [r#"{"action": "teleport", "action_input": {}}"#, "Cannot do that."],
        ));
        let agent = ToolAgent::new(caller.clone(), registry(), "{tools}", 4);
        let answer = agent.run(&[ChatTurn::user("go")], None).await.unwrap();
        assert_eq!(answer, "Cannot do that.");
        let seen = caller.seen.lock().unwrap();
        assert!(seen[1].last().unwrap().content.contains("Unknown tool: teleport"));
    }

    #[tokio::test]
    async fn test_iteration_limit() {
        let call = r#"{"action": "shout", "action_input": {"text": "again"}}"#;
        let caller = Arc::new(ScriptedCaller::new("assistant", [call, call]));
        let agent = ToolAgent::new(caller, registry(), "{tools}", 2);
        let (tx, rx) = mpsc::channel(16);

        let err = agent.run(&[ChatTurn::user("loop")], Some(&tx)).await.unwrap_err();
        drop(tx);
        assert!(matches!(err, DebateError::Tool(ToolError::IterationLimit(2))));
        let steps = collect(rx).await;
        assert_eq!(steps.last().unwrap().event_name(), "error");
    }

    #[tokio::test]
    async fn test_without_tools_json_reply_is_an_answer() {
        let caller = Arc::new(ScriptedCaller::new(
            "referee",
            [r#"{"action": "shout", "action_input": {}}"#],
        ));
        let agent = ToolAgent::new(caller.clone(), ToolRegistry::new(), "{tools}", 2);
        let answer = agent.chat(&[ChatTurn::user("q")]).await.unwrap();
        assert!(answer.contains("\"action\""));
        assert_eq!(caller.seen.lock().unwrap()[0].len(), 1);
    }

    #[tokio::test]
    async fn test_remote_failure_emits_error_step() {
        let caller = Arc::new(ScriptedCaller::new("assistant", Vec::<String>::new()).then_fail("boom"));
        let agent = ToolAgent::new(caller, registry(), "{tools}", 2);
        let (tx, rx) = mpsc::channel(4);
        assert!(agent.run(&[ChatTurn::user("q")], Some(&tx)).await.is_err());
        drop(tx);
        let steps = collect(rx).await;
        assert_eq!(steps.len(), 1);
        assert!(steps[0].is_terminal());
    }

    #[test]
    fn test_payload_shapes() {
        let step = AgentStep::ToolCall {
            tool: "shout".into(),
            tool_input: json!({"text": "a"}),
            log: "raw".into(),
        };
        assert_eq!(step.payload(), json!({"tool": "shout", "tool_input": {"text": "a"}, "log": "raw"}));
        assert_eq!(
            AgentStep::FinalAnswer { answer: "done".into() }.payload(),
            json!({"answer": "done"})
        );
    }
}
