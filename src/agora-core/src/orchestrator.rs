//! Debate orchestration logic.
//!
//! Drives a refereed debate through its phases:
//!
//! ```text
//! Uninitialized -> StancesReady -> RoundInProgress(1..=n) -> RoundsComplete -> VerdictReady
//!        \__________________ any fatal error __________________________________-> Aborted
//! ```
//!
//! Every model call is awaited before the next one starts. Each round runs
//! Pro argument, Pro score, Con argument, Con score, in that order, and every
//! call sees the transcript as it stood right after the previous append.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{DebateSettings, PromptsConfig, render_template};
use crate::error::DebateError;
use crate::extract::{Stances, extract_score, extract_stances, sanitize_response, strip_reasoning};
use crate::model::ModelCaller;
use crate::participant::AgentRole;
use crate::scoring::{MAX_TURN_SCORE, ScoreBoard, ScoreEntry, Side, Winner};
use crate::sink::TranscriptSink;
use crate::transcript::{EntryKind, Transcript};

/// Configuration for running a debate.
#[derive(Debug, Clone)]
pub struct DebateConfig {
    /// The topic being debated.
    pub topic: String,
    /// Number of Pro/Con exchanges.
    pub rounds: u32,
    /// Character budget for transcript context in prompts.
    pub max_context_chars: Option<usize>,
    pub after_argument_delay: Duration,
    pub after_score_delay: Duration,
    /// Deadline for each model call.
    pub call_deadline: Option<Duration>,
    pub prompts: PromptsConfig,
}

impl DebateConfig {
    /// A config with default prompts, no pacing, no deadline and no context
    /// budget.
    pub fn new(topic: impl Into<String>, rounds: u32) -> Self {
        Self {
            topic: topic.into(),
            rounds,
            max_context_chars: None,
            after_argument_delay: Duration::ZERO,
            after_score_delay: Duration::ZERO,
            call_deadline: None,
            prompts: PromptsConfig::default(),
        }
    }

    pub fn from_settings(
        topic: impl Into<String>,
        settings: &DebateSettings,
        prompts: &PromptsConfig,
    ) -> Self {
        Self {
            topic: topic.into(),
            rounds: settings.rounds,
            max_context_chars: settings.max_context_chars,
            after_argument_delay: Duration::from_millis(settings.after_argument_delay_ms),
            after_score_delay: Duration::from_millis(settings.after_score_delay_ms),
            call_deadline: (settings.call_deadline_secs > 0)
                .then(|| Duration::from_secs(settings.call_deadline_secs)),
            prompts: prompts.clone(),
        }
    }

    pub fn with_context_budget(mut self, chars: usize) -> Self {
        self.max_context_chars = Some(chars);
        self
    }

    pub fn with_call_deadline(mut self, deadline: Duration) -> Self {
        self.call_deadline = Some(deadline);
        self
    }

    pub fn with_pacing(mut self, after_argument: Duration, after_score: Duration) -> Self {
        self.after_argument_delay = after_argument;
        self.after_score_delay = after_score;
        self
    }
}

/// The three model-backed roles of a debate.
#[derive(Clone)]
pub struct DebateRoles {
    pub referee: Arc<dyn ModelCaller>,
    pub pro: Arc<dyn ModelCaller>,
    pub con: Arc<dyn ModelCaller>,
}

impl DebateRoles {
    fn get(&self, role: AgentRole) -> &Arc<dyn ModelCaller> {
        match role {
            AgentRole::Referee | AgentRole::Assistant => &self.referee,
            AgentRole::Pro => &self.pro,
            AgentRole::Con => &self.con,
        }
    }
}

/// Where a debate stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebatePhase {
    Uninitialized,
    StancesReady,
    RoundInProgress(u32),
    RoundsComplete,
    VerdictReady,
    Aborted,
}

/// Callback for debate events.
pub type DebateCallback = Box<dyn Fn(DebateEvent) + Send + Sync>;

/// Events emitted during a debate.
#[derive(Debug, Clone)]
pub enum DebateEvent {
    /// The referee fixed both positions.
    StancesReady { pro_stance: String, con_stance: String },
    /// A new round is starting.
    RoundStart { round: u32, total: u32 },
    /// A debater has finished speaking.
    Argument {
        round: u32,
        side: Side,
        name: String,
        content: String,
    },
    /// The referee scored the last argument.
    Score { round: u32, entry: ScoreEntry },
    /// The referee's score could not be read; the turn counts as zero.
    ScoreSkipped {
        round: u32,
        side: Side,
        reason: String,
    },
    /// Final totals and the referee's closing statement.
    Verdict {
        winner: Winner,
        pro_total: u32,
        con_total: u32,
        text: String,
    },
    /// The debate has concluded.
    DebateEnd,
}

/// Everything a finished debate produced.
#[derive(Debug, Clone)]
pub struct DebateOutcome {
    pub stances: Stances,
    pub scoreboard: ScoreBoard,
    pub winner: Winner,
    pub verdict: String,
    pub transcript: Transcript,
}

/// Orchestrates a refereed debate between two AI debaters.
pub struct DebateOrchestrator {
    config: DebateConfig,
    roles: DebateRoles,
    phase: DebatePhase,
    stances: Option<Stances>,
    transcript: Transcript,
    scoreboard: ScoreBoard,
    verdict: Option<String>,
    sink: Option<Box<dyn TranscriptSink>>,
    callback: Option<DebateCallback>,
    cancel: CancellationToken,
}

impl DebateOrchestrator {
    /// Create a new orchestrator with the given configuration.
    pub fn new(config: DebateConfig, roles: DebateRoles) -> Result<Self, DebateError> {
        if config.topic.trim().is_empty() {
            return Err(DebateError::ConfigError("topic must not be empty".to_string()));
        }
        if config.rounds == 0 {
            return Err(DebateError::ConfigError(
                "a debate needs at least one round".to_string(),
            ));
        }

        Ok(Self {
            config,
            roles,
            phase: DebatePhase::Uninitialized,
            stances: None,
            transcript: Transcript::new(),
            scoreboard: ScoreBoard::new(),
            verdict: None,
            sink: None,
            callback: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Set a callback for debate events.
    pub fn with_callback(mut self, callback: DebateCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Mirror every transcript block to `sink`.
    pub fn with_sink(mut self, sink: Box<dyn TranscriptSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Stop at the next turn boundary once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run the full debate.
    pub async fn run(&mut self) -> Result<DebateOutcome, DebateError> {
        let result = self.run_all().await;
        if let Err(e) = &result {
            error!(phase = ?self.phase, error = %e, "debate aborted");
            self.phase = DebatePhase::Aborted;
        }
        result
    }

    async fn run_all(&mut self) -> Result<DebateOutcome, DebateError> {
        self.setup().await?;
        for round in 1..=self.config.rounds {
            self.run_round(round).await?;
        }
        self.deliver_verdict().await
    }

    /// Ask the referee for both stances. Failure here is fatal.
    pub async fn setup(&mut self) -> Result<Stances, DebateError> {
        self.expect_phase(DebatePhase::Uninitialized)?;
        info!(topic = %self.config.topic, "generating stances");

        let prompt = self.config.prompts.referee_prompt(
            &self.config.topic,
            &self.context(),
            &self.config.prompts.stance_task,
        );
        let raw = match self.call(AgentRole::Referee, &prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                self.phase = DebatePhase::Aborted;
                return Err(e);
            }
        };

        let stances = match extract_stances(&raw) {
            Ok(stances) => stances,
            Err(e) => {
                error!(reason = %e.reason, raw = %e.raw, "referee gave no usable stances");
                self.phase = DebatePhase::Aborted;
                return Err(DebateError::SetupFailure {
                    reason: e.reason,
                    raw: e.raw,
                });
            }
        };

        let preamble = format!(
            "Topic: {}\nPro stance: {}\nCon stance: {}\n\n",
            self.config.topic, stances.pro_stance, stances.con_stance
        );
        self.append(EntryKind::Preamble, preamble).await;
        self.stances = Some(stances.clone());
        self.phase = DebatePhase::StancesReady;

        self.emit_event(DebateEvent::StancesReady {
            pro_stance: stances.pro_stance.clone(),
            con_stance: stances.con_stance.clone(),
        });
        Ok(stances)
    }

    /// Run round `round`: Pro speaks and is scored, then Con.
    pub async fn run_round(&mut self, round: u32) -> Result<(), DebateError> {
        let expected = if round == 1 {
            DebatePhase::StancesReady
        } else {
            DebatePhase::RoundInProgress(round - 1)
        };
        self.expect_phase(expected)?;
        if round > self.config.rounds {
            return Err(DebateError::ConfigError(format!(
                "round {} exceeds the configured {} rounds",
                round, self.config.rounds
            )));
        }

        self.phase = DebatePhase::RoundInProgress(round);
        info!(round, total = self.config.rounds, "round started");
        self.emit_event(DebateEvent::RoundStart {
            round,
            total: self.config.rounds,
        });

        for side in [Side::Pro, Side::Con] {
            self.debate_turn(round, side).await?;
        }

        if round == self.config.rounds {
            self.phase = DebatePhase::RoundsComplete;
        }
        Ok(())
    }

    /// One argument followed immediately by its score.
    async fn debate_turn(&mut self, round: u32, side: Side) -> Result<(), DebateError> {
        let role = AgentRole::from(side);
        let stance = self.stance(side)?.to_string();

        let prompt =
            self.config
                .prompts
                .debater_prompt(&self.config.topic, &stance, &self.context());
        let raw = self.call(role, &prompt).await?;
        let argument = sanitize_response(&raw);
        if argument.is_empty() {
            return Err(DebateError::RemoteCallFailure {
                role: self.roles.get(role).label().to_string(),
                message: "argument was empty after sanitizing".to_string(),
            });
        }

        self.append(
            EntryKind::Argument { round, side },
            format!("Round {} - {}: {}\n", round, side, argument),
        )
        .await;
        self.emit_event(DebateEvent::Argument {
            round,
            side,
            name: self.roles.get(role).label().to_string(),
            content: argument,
        });
        self.pause(self.config.after_argument_delay).await?;

        self.score_turn(round, side).await?;
        self.pause(self.config.after_score_delay).await
    }

    /// Ask the referee to score the argument just appended. An unreadable
    /// score is logged and counts as zero.
    async fn score_turn(&mut self, round: u32, side: Side) -> Result<(), DebateError> {
        let task = render_template(&self.config.prompts.score_task, &[("side", side.label())]);
        let prompt =
            self.config
                .prompts
                .referee_prompt(&self.config.topic, &self.context(), &task);
        let raw = self.call(AgentRole::Referee, &prompt).await?;

        match extract_score(&raw) {
            Ok(verdict) => {
                let entry = ScoreEntry {
                    side,
                    score: verdict.score,
                    reasoning: verdict.reasoning,
                };
                self.scoreboard.record(&entry);
                debug!(round, %side, score = entry.score, "score recorded");
                self.append(
                    EntryKind::Score { round, side },
                    format!(
                        "Referee score ({}): {}/{}, reasoning: {}\n\n",
                        side, entry.score, MAX_TURN_SCORE, entry.reasoning
                    ),
                )
                .await;
                self.emit_event(DebateEvent::Score { round, entry });
            }
            Err(e) => {
                warn!(round, %side, reason = %e.reason, raw = %e.raw, "skipping unreadable score");
                self.emit_event(DebateEvent::ScoreSkipped {
                    round,
                    side,
                    reason: e.reason,
                });
            }
        }
        Ok(())
    }

    /// Compare totals and ask the referee for the closing verdict.
    pub async fn deliver_verdict(&mut self) -> Result<DebateOutcome, DebateError> {
        self.expect_phase(DebatePhase::RoundsComplete)?;

        let winner = self.scoreboard.winner();
        let pro_total = self.scoreboard.pro().to_string();
        let con_total = self.scoreboard.con().to_string();
        info!(pro = %pro_total, con = %con_total, %winner, "rounds complete");

        let task = render_template(
            &self.config.prompts.verdict_task,
            &[
                ("pro_score", &pro_total),
                ("con_score", &con_total),
                ("winner", winner.label()),
            ],
        );
        let prompt =
            self.config
                .prompts
                .referee_prompt(&self.config.topic, &self.context(), &task);
        let raw = self.call(AgentRole::Referee, &prompt).await?;
        let verdict = strip_reasoning(&raw).trim().to_string();

        self.append(
            EntryKind::Verdict,
            format!(
                "Final scores - Pro: {} | Con: {}\nWinner: {}\nReferee verdict: {}\n",
                pro_total, con_total, winner, verdict
            ),
        )
        .await;
        self.verdict = Some(verdict.clone());
        self.phase = DebatePhase::VerdictReady;

        self.emit_event(DebateEvent::Verdict {
            winner,
            pro_total: self.scoreboard.pro(),
            con_total: self.scoreboard.con(),
            text: verdict.clone(),
        });
        self.emit_event(DebateEvent::DebateEnd);

        Ok(DebateOutcome {
            stances: self.stance_pair()?,
            scoreboard: self.scoreboard,
            winner,
            verdict,
            transcript: self.transcript.clone(),
        })
    }

    /// Invoke one role, bounded by the call deadline and the cancellation token.
    async fn call(&self, role: AgentRole, prompt: &str) -> Result<String, DebateError> {
        if self.cancel.is_cancelled() {
            return Err(DebateError::Cancelled);
        }
        let caller = self.roles.get(role);
        debug!(role = role.display_name(), agent = caller.label(), %prompt, "invoking model");

        let invocation = async {
            match self.config.call_deadline {
                Some(deadline) => tokio::time::timeout(deadline, caller.generate(prompt))
                    .await
                    .unwrap_or_else(|_| {
                        Err(DebateError::Timeout {
                            role: caller.label().to_string(),
                            deadline,
                        })
                    }),
                None => caller.generate(prompt).await,
            }
        };

        tokio::select! {
            _ = self.cancel.cancelled() => Err(DebateError::Cancelled),
            reply = invocation => reply,
        }
    }

    /// Pacing delay between turns; interrupted by cancellation.
    async fn pause(&self, delay: Duration) -> Result<(), DebateError> {
        if delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(DebateError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Append to the transcript and mirror the block to the sink.
    async fn append(&mut self, kind: EntryKind, text: String) {
        self.transcript.append(kind, text);
        let Some(sink) = &self.sink else {
            return;
        };
        let Some(entry) = self.transcript.entries().last() else {
            return;
        };
        if let Err(e) = sink.write_block(&entry.text).await {
            warn!(error = %e, "transcript sink write failed");
        }
    }

    fn context(&self) -> String {
        self.transcript.render_context(self.config.max_context_chars)
    }

    fn expect_phase(&self, expected: DebatePhase) -> Result<(), DebateError> {
        if self.phase != expected {
            return Err(DebateError::ConfigError(format!(
                "debate is in phase {:?}, expected {:?}",
                self.phase, expected
            )));
        }
        Ok(())
    }

    fn stance(&self, side: Side) -> Result<&str, DebateError> {
        let stances = self.stances.as_ref().ok_or_else(|| DebateError::SetupFailure {
            reason: "stances have not been generated".to_string(),
            raw: String::new(),
        })?;
        Ok(match side {
            Side::Pro => &stances.pro_stance,
            Side::Con => &stances.con_stance,
        })
    }

    fn stance_pair(&self) -> Result<Stances, DebateError> {
        Ok(Stances {
            pro_stance: self.stance(Side::Pro)?.to_string(),
            con_stance: self.stance(Side::Con)?.to_string(),
        })
    }

    /// Emit an event if a callback is registered.
    fn emit_event(&self, event: DebateEvent) {
        if let Some(ref callback) = self.callback {
            callback(event);
        }
    }

    pub fn phase(&self) -> DebatePhase {
        self.phase
    }

    pub fn stances(&self) -> Option<&Stances> {
        self.stances.as_ref()
    }

    /// Get the full transcript.
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn scoreboard(&self) -> &ScoreBoard {
        &self.scoreboard
    }

    pub fn verdict(&self) -> Option<&str> {
        self.verdict.as_deref()
    }
}
