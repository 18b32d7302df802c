//! Agora Core Library
//!
//! Debate orchestration between a referee and two debating agents, plus the
//! pieces around it: structured-response extraction, scoring, the transcript
//! and its sinks, tool-augmented agents and the stdio/event-stream transports.

pub mod agent;
pub mod config;
pub mod error;
pub mod extract;
pub mod model;
pub mod orchestrator;
pub mod participant;
pub mod scoring;
pub mod session;
pub mod sink;
pub mod tools;
pub mod transcript;
pub mod transport;

pub use agent::{AgentStep, ToolAgent};
pub use config::{Config, default_config};
pub use error::{DebateError, ExtractionFailed, SinkError, ToolError, TransportError};
pub use extract::{ScoreVerdict, Stances, extract_score, extract_stances};
pub use model::{ChatRole, ChatTurn, ModelCaller, OpenAiCaller};
pub use orchestrator::{
    DebateConfig, DebateEvent, DebateOrchestrator, DebateOutcome, DebatePhase, DebateRoles,
};
pub use participant::{AgentProfile, AgentRole};
pub use scoring::{MAX_TURN_SCORE, ScoreBoard, ScoreEntry, Side, Winner};
pub use session::SessionRegistry;
pub use sink::{MarkdownFileSink, TracingSink, TranscriptSink};
pub use tools::{Tool, ToolRegistry};
pub use transcript::{EntryKind, Transcript, TranscriptEntry};
pub use transport::{AgentCommandHandler, CommandHandler, StdioRequest, StdioResponse};
