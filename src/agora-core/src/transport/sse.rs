//! Server-sent event transport.
//!
//! `GET /mcp-stream?command=...&session=...` answers with a stream of
//! `tool_call`, `tool_output` and exactly one terminal `final_answer` or
//! `error` event, each carrying a JSON object as its data.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use super::CommandHandler;
use crate::agent::AgentStep;
use crate::error::TransportError;

const STEP_BUFFER: usize = 16;

#[derive(Debug, Deserialize)]
struct StreamParams {
    command: String,
    #[serde(default)]
    session: Option<String>,
}

/// Routes for the event-stream server.
pub fn router(handler: Arc<dyn CommandHandler>) -> Router {
    Router::new()
        .route("/mcp-stream", get(stream_command))
        .route("/health", get(health))
        .with_state(handler)
}

/// Serve on an already-bound listener until the process stops.
pub async fn serve(
    listener: TcpListener,
    handler: Arc<dyn CommandHandler>,
) -> Result<(), TransportError> {
    info!(addr = %listener.local_addr()?, "event-stream server listening");
    axum::serve(listener, router(handler)).await?;
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn stream_command(
    State(handler): State<Arc<dyn CommandHandler>>,
    Query(params): Query<StreamParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(command = %params.command, session = ?params.session, "stream requested");

    let (tx, rx) = mpsc::channel(STEP_BUFFER);
    tokio::spawn(produce_steps(handler, params, tx));

    let events = ReceiverStream::new(rx).map(|step: AgentStep| {
        Ok::<_, Infallible>(
            Event::default()
                .event(step.event_name())
                .data(step.payload().to_string()),
        )
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

/// Forward the handler's steps to `out`, ending with exactly one terminal step.
async fn produce_steps(
    handler: Arc<dyn CommandHandler>,
    params: StreamParams,
    out: mpsc::Sender<AgentStep>,
) {
    let (tx, mut rx) = mpsc::channel(STEP_BUFFER);
    let task = tokio::spawn(async move {
        handler
            .handle(&params.command, params.session.as_deref(), Some(&tx))
            .await
    });

    let mut finished = false;
    while let Some(step) = rx.recv().await {
        if finished {
            continue;
        }
        finished = step.is_terminal();
        if out.send(step).await.is_err() {
            debug!("stream client went away, abandoning command");
            task.abort();
            return;
        }
    }
    if finished {
        return;
    }

    // The handler reported no terminal step; derive it from its result.
    let last = match task.await {
        Ok(Ok(answer)) => AgentStep::FinalAnswer { answer },
        Ok(Err(e)) => AgentStep::Error {
            error: e.to_string(),
        },
        Err(e) => {
            warn!(error = %e, "command task failed");
            AgentStep::Error {
                error: e.to_string(),
            }
        }
    };
    let _ = out.send(last).await;
}

/// One decoded event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

impl SseEvent {
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.data).ok()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.event.as_str(), "final_answer" | "error")
    }
}

/// Incremental decoder for an event stream, fed arbitrary byte chunks.
#[derive(Debug, Default)]
pub struct SseEventParser {
    buffer: Vec<u8>,
}

impl SseEventParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chunk and return every event it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some((end, sep)) = frame_end(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..end + sep).take(end).collect();
            if let Some(event) = parse_frame(&String::from_utf8_lossy(&frame)) {
                events.push(event);
            }
        }
        events
    }
}

/// Position and length of the first blank-line separator.
fn frame_end(buf: &[u8]) -> Option<(usize, usize)> {
    (0..buf.len()).find_map(|i| {
        if buf[i..].starts_with(b"\r\n\r\n") {
            Some((i, 4))
        } else if buf[i..].starts_with(b"\n\n") {
            Some((i, 2))
        } else {
            None
        }
    })
}

fn parse_frame(frame: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();
    for line in frame.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }
    if event.is_none() && data.is_empty() {
        return None;
    }
    Some(SseEvent {
        event: event.unwrap_or_else(|| "message".to_string()),
        data: data.join("\n"),
    })
}

/// Client for the event-stream server.
pub struct SseClient {
    base_url: String,
    client: reqwest::Client,
}

impl SseClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Stream one command, calling `on_event` for each event as it arrives.
    /// Returns every event received, stopping after the terminal one.
    pub async fn stream<F>(
        &self,
        command: &str,
        session: Option<&str>,
        mut on_event: F,
    ) -> Result<Vec<SseEvent>, TransportError>
    where
        F: FnMut(&SseEvent),
    {
        let mut query = vec![("command", command)];
        if let Some(session) = session {
            query.push(("session", session));
        }
        let response = self
            .client
            .get(format!("{}/mcp-stream", self.base_url))
            .query(&query)
            .send()
            .await?
            .error_for_status()?;

        let mut parser = SseEventParser::new();
        let mut received = Vec::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            for event in parser.push(&chunk?) {
                on_event(&event);
                let terminal = event.is_terminal();
                received.push(event);
                if terminal {
                    return Ok(received);
                }
            }
        }

        warn!("event stream ended without a final answer");
        Err(TransportError::ConnectionAborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::EchoHandler;

    async fn start_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, Arc::new(EchoHandler)));
        format!("http://{}", addr)
    }

    #[test]
    fn test_parser_handles_split_chunks_and_comments() {
        let mut parser = SseEventParser::new();
        assert!(parser.push(b": keep-alive\n\nevent: tool_ca").is_empty());
        let events = parser.push(b"ll\ndata: {\"tool\":\"x\"}\n\nevent: final_answer\r\ndata: {}\r\n\r\n");
        assert_eq!(
            events,
            vec![
                SseEvent {
                    event: "tool_call".into(),
                    data: "{\"tool\":\"x\"}".into()
                },
                SseEvent {
                    event: "final_answer".into(),
                    data: "{}".into()
                },
            ]
        );
        assert!(events[1].is_terminal());
    }

    #[test]
    fn test_parser_joins_multiline_data() {
        let mut parser = SseEventParser::new();
        let events = parser.push(b"data: a\ndata: b\n\n");
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "a\nb");
    }

    #[tokio::test]
    async fn test_stream_emits_tool_steps_then_final_answer() {
        let base = start_server().await;
        let client = SseClient::new(&base);

        let mut names = Vec::new();
        let events = client
            .stream("tool:quiet", None, |e| names.push(e.event.clone()))
            .await
            .unwrap();

        assert_eq!(names, ["tool_call", "tool_output", "final_answer"]);
        assert_eq!(events[0].json().unwrap()["tool"], "shout");
        assert_eq!(events[1].json().unwrap()["tool_output"], "QUIET");
        assert_eq!(events[2].json().unwrap()["answer"], "tool:quiet");
    }

    #[tokio::test]
    async fn test_failed_command_ends_with_error_event() {
        let base = start_server().await;
        let events = SseClient::new(&base)
            .stream("fail", Some("s1"), |_| {})
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "error");
        assert!(
            events[0].json().unwrap()["error"]
                .as_str()
                .unwrap()
                .contains("requested failure")
        );
    }

    #[tokio::test]
    async fn test_session_and_health() {
        let base = start_server().await;
        let events = SseClient::new(&base)
            .stream("hi", Some("s2"), |_| {})
            .await
            .unwrap();
        assert_eq!(events[0].json().unwrap()["answer"], "[s2] hi");

        let health: Value = reqwest::get(format!("{}/health", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");
    }

    #[tokio::test]
    async fn test_missing_command_is_rejected() {
        let base = start_server().await;
        let status = reqwest::get(format!("{}/mcp-stream", base))
            .await
            .unwrap()
            .status();
        assert!(status.is_client_error());
    }
}
