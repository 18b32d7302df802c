//! Agora CLI - refereed AI debates
//!
//! Runs a debate between two model-backed debaters under a model referee, and
//! serves or talks to the tool agent over stdio or an event stream.

use std::env;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use agora_core::config::ToolsConfig;
use agora_core::transport::{sse, stdio};
use agora_core::{
    AgentCommandHandler, AgentRole, Config, DebateConfig, DebateEvent, DebateOrchestrator,
    DebateRoles, MarkdownFileSink, ModelCaller, OpenAiCaller, SessionRegistry, Side, ToolAgent,
    ToolRegistry, Winner, default_config,
};
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "agora.toml";

const SESSION_SWEEP_PERIOD: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(
    name = "agora",
    version,
    about = "Agora - watch AIs debate under an AI referee",
    long_about = "A CLI tool for refereed debates between AI agents using OpenAI-compatible APIs, \
                  plus stdio and event-stream servers for a tool-using assistant."
)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log more detail to stderr (RUST_LOG overrides)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a debate on a topic
    Debate {
        /// The topic to debate
        #[arg(value_name = "TOPIC")]
        topic: String,

        /// Number of rounds (each round is one Pro and one Con turn)
        #[arg(short, long, value_name = "ROUNDS")]
        rounds: Option<u32>,

        /// Model for the referee
        #[arg(long, value_name = "MODEL")]
        referee_model: Option<String>,

        /// Model for the Pro debater
        #[arg(long, value_name = "MODEL")]
        pro_model: Option<String>,

        /// Model for the Con debater
        #[arg(long, value_name = "MODEL")]
        con_model: Option<String>,

        /// Skip the pauses between turns
        #[arg(long)]
        no_pacing: bool,

        /// Do not write a transcript file
        #[arg(long)]
        no_transcript: bool,
    },

    /// Serve the assistant over stdin/stdout, one JSON request per line
    ServeStdio,

    /// Serve the assistant as a server-sent event stream over HTTP
    ServeSse {
        /// Address to listen on
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },

    /// Send commands to a stdio server process
    Send {
        /// Commands to send, in order
        #[arg(value_name = "COMMAND", required = true)]
        commands: Vec<String>,

        /// Session to run the commands in
        #[arg(short, long, value_name = "ID")]
        session: Option<String>,

        /// Server program (defaults to this binary's `serve-stdio`)
        #[arg(long, value_name = "PROGRAM")]
        server: Option<PathBuf>,

        /// Argument for the server program (repeatable)
        #[arg(long = "server-arg", action = ArgAction::Append, value_name = "ARG")]
        server_args: Vec<String>,
    },

    /// Stream one command from an event-stream server
    Stream {
        /// The command to run
        #[arg(value_name = "COMMAND")]
        command: String,

        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:8000", value_name = "URL")]
        url: String,

        /// Session to run the command in
        #[arg(short, long, value_name = "ID")]
        session: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    match cli.command {
        Command::Debate {
            topic,
            rounds,
            referee_model,
            pro_model,
            con_model,
            no_pacing,
            no_transcript,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(rounds) = rounds {
                config.debate.rounds = rounds;
            }
            for (role, model) in [
                (AgentRole::Referee, referee_model),
                (AgentRole::Pro, pro_model),
                (AgentRole::Con, con_model),
            ] {
                if let Some(model) = model {
                    config.agents.get_mut(role).model = model;
                }
            }
            if no_pacing {
                config.debate.after_argument_delay_ms = 0;
                config.debate.after_score_delay_ms = 0;
            }
            if no_transcript {
                config.debate.transcript_dir = None;
            }
            config.validate()?;
            run_debate(config, topic).await
        }
        Command::ServeStdio => {
            let config = load_config(cli.config.as_deref())?;
            let handler = assistant_handler(&config)?;
            let _sweeper = handler.sessions().spawn_sweeper(SESSION_SWEEP_PERIOD);
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            stdio::serve(&handler, stdin, tokio::io::stdout())
                .await
                .map_err(Into::into)
        }
        Command::ServeSse { bind } => {
            let config = load_config(cli.config.as_deref())?;
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            let handler = Arc::new(assistant_handler(&config)?);
            let _sweeper = handler.sessions().spawn_sweeper(SESSION_SWEEP_PERIOD);
            let listener = tokio::net::TcpListener::bind(&bind).await?;
            println!("{} http://{}/mcp-stream", "Listening on".bold(), bind);
            sse::serve(listener, handler).await.map_err(Into::into)
        }
        Command::Send {
            commands,
            session,
            server,
            server_args,
        } => {
            let config = load_config(cli.config.as_deref())?;
            send_commands(&config, cli.config.as_deref(), commands, session, server, server_args)
                .await
        }
        Command::Stream {
            command,
            url,
            session,
        } => stream_command(&url, &command, session.as_deref()).await,
    }
}

/// Logs go to stderr so stdout stays free for the stdio protocol.
fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn Error>> {
    let mut config = match path {
        Some(path) => Config::load(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => Config::load(DEFAULT_CONFIG_FILE)?,
        None => default_config(),
    };

    if let Ok(base) = env::var("OPENAI_API_BASE").or_else(|_| env::var("OPENAI_BASE_URL")) {
        config.api.base_url = base;
    }
    Ok(config)
}

fn api_key() -> String {
    env::var("OPENAI_API_KEY").unwrap_or_else(|_| {
        eprintln!(
            "{}",
            "Warning: OPENAI_API_KEY not set. API calls may fail.".yellow()
        );
        String::new()
    })
}

/// The caller for `role`, wrapped in a tool agent when the role names tools.
fn build_caller(
    config: &Config,
    api_key: &str,
    role: AgentRole,
    registry: &ToolRegistry,
) -> Result<Arc<dyn ModelCaller>, Box<dyn Error>> {
    let profile = config.agents.get(role).to_profile(role);
    let tool_names = profile.tools.clone();
    let caller: Arc<dyn ModelCaller> = Arc::new(OpenAiCaller::new(&config.api, api_key, profile)?);

    if tool_names.is_empty() {
        return Ok(caller);
    }
    let tools = registry.subset(&tool_names)?;
    Ok(Arc::new(ToolAgent::new(
        caller,
        tools,
        &config.prompts.tool_agent_instructions,
        config.tools.max_iterations,
    )))
}

fn tool_registry(tools: &ToolsConfig) -> Result<ToolRegistry, Box<dyn Error>> {
    let registry = ToolRegistry::from_config(tools)?;
    info!(tools = ?registry.names(), "tools registered");
    Ok(registry)
}

async fn run_debate(config: Config, topic: String) -> Result<(), Box<dyn Error>> {
    let api_key = api_key();
    let registry = tool_registry(&config.tools)?;
    let roles = DebateRoles {
        referee: build_caller(&config, &api_key, AgentRole::Referee, &registry)?,
        pro: build_caller(&config, &api_key, AgentRole::Pro, &registry)?,
        con: build_caller(&config, &api_key, AgentRole::Con, &registry)?,
    };

    // Print header
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!("{}", format!("  {}", "Agora Debate".bold()).bright_blue().bold());
    println!("{}", "═".repeat(70).bright_blue());
    println!();
    println!("{} {}", "Topic:".bold(), topic.bright_white());
    println!();
    println!("{}", "Participants:".bold());
    for role in [AgentRole::Referee, AgentRole::Pro, AgentRole::Con] {
        let profile = config.agents.get(role).to_profile(role);
        println!(
            "  {} - using {}",
            profile.display_name_with_role().bright_cyan(),
            profile.model.dimmed()
        );
    }
    println!();
    println!("{}", "─".repeat(70).dimmed());

    let debate_config = DebateConfig::from_settings(&topic, &config.debate, &config.prompts);
    let cancel = CancellationToken::new();
    let mut orchestrator = DebateOrchestrator::new(debate_config, roles)?
        .with_callback(create_console_callback(&config))
        .with_cancellation(cancel.clone());

    if let Some(dir) = &config.debate.transcript_dir {
        let sink = MarkdownFileSink::new(dir, chrono::Local::now());
        println!("{} {}", "Transcript:".bold(), sink.path().display());
        orchestrator = orchestrator.with_sink(Box::new(sink));
    }

    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping the debate");
            watcher.cancel();
        }
    });

    let outcome = orchestrator.run().await?;

    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!(
        "{}",
        format!(
            "  Debate concluded - {} (Pro {} | Con {})",
            outcome.winner,
            outcome.scoreboard.pro(),
            outcome.scoreboard.con()
        )
        .bright_green()
        .bold()
    );
    println!("{}", "═".repeat(70).bright_blue());
    println!();

    Ok(())
}

/// Create a callback that prints debate events to the console.
fn create_console_callback(config: &Config) -> Box<dyn Fn(DebateEvent) + Send + Sync> {
    let referee = config.agents.referee.to_profile(AgentRole::Referee).name;
    Box::new(move |event| match event {
        DebateEvent::StancesReady {
            pro_stance,
            con_stance,
        } => {
            println!();
            println!("{} {}", "Pro stance:".green().bold(), pro_stance);
            println!("{} {}", "Con stance:".red().bold(), con_stance);
        }
        DebateEvent::RoundStart { round, total } => {
            println!();
            println!("{}", "═".repeat(70).bright_magenta());
            println!(
                "{}",
                format!("  ROUND {} OF {}", round, total).bright_magenta().bold()
            );
            println!("{}", "═".repeat(70).bright_magenta());
            println!();
        }
        DebateEvent::Argument {
            side, name, content, ..
        } => {
            let label = match side {
                Side::Pro => format!("({})", side).green(),
                Side::Con => format!("({})", side).red(),
            };
            println!("{} {} {}", "▶".bright_cyan(), name.bright_cyan().bold(), label);
            // Word wrap and indent the content
            let wrapped = textwrap(&content, 66);
            for line in wrapped.lines() {
                println!("  {}", line);
            }
            println!();
        }
        DebateEvent::Score { entry, .. } => {
            println!(
                "  {} {} {}",
                format!("{}:", referee).yellow().bold(),
                format!("{} scores {}/15.", entry.side, entry.score).yellow(),
                entry.reasoning.dimmed()
            );
            println!();
        }
        DebateEvent::ScoreSkipped { side, reason, .. } => {
            println!(
                "  {} {}",
                format!("{}:", referee).yellow().bold(),
                format!("no score for {} ({}), counted as 0.", side, reason).dimmed()
            );
            println!();
        }
        DebateEvent::Verdict {
            winner,
            pro_total,
            con_total,
            text,
        } => {
            println!();
            println!("{}", "─".repeat(70).dimmed());
            println!(
                "{} Pro {} | Con {}",
                "Final scores:".bold(),
                pro_total,
                con_total
            );
            let winner_line = match winner {
                Winner::Pro => winner.label().green(),
                Winner::Con => winner.label().red(),
                Winner::Tie => winner.label().yellow(),
            };
            println!("{} {}", "Result:".bold(), winner_line.bold());
            println!();
            for line in textwrap(&text, 66).lines() {
                println!("  {}", line);
            }
        }
        DebateEvent::DebateEnd => {
            // Handled in run_debate
        }
    })
}

/// The tool agent served by both server subcommands.
fn assistant_handler(config: &Config) -> Result<AgentCommandHandler, Box<dyn Error>> {
    let api_key = api_key();
    let registry = tool_registry(&config.tools)?;
    let profile = config.agents.assistant.to_profile(AgentRole::Assistant);
    let tools = if profile.tools.is_empty() {
        registry
    } else {
        registry.subset(&profile.tools)?
    };
    let caller = Arc::new(OpenAiCaller::new(&config.api, &api_key, profile)?);
    let agent = ToolAgent::new(
        caller,
        tools,
        &config.prompts.tool_agent_instructions,
        config.tools.max_iterations,
    );
    let sessions = Arc::new(SessionRegistry::new(
        Duration::from_secs(config.server.session_ttl_secs),
        config.server.session_history_limit,
    ));
    Ok(AgentCommandHandler::new(agent, sessions))
}

async fn send_commands(
    config: &Config,
    config_path: Option<&Path>,
    commands: Vec<String>,
    session: Option<String>,
    server: Option<PathBuf>,
    server_args: Vec<String>,
) -> Result<(), Box<dyn Error>> {
    let (program, args) = match server {
        Some(program) => (program, server_args),
        None => {
            let mut args = vec!["serve-stdio".to_string()];
            if let Some(path) = config_path {
                args.push("--config".to_string());
                args.push(path.display().to_string());
            }
            (env::current_exe()?, args)
        }
    };

    let settle = Duration::from_millis(config.server.settle_delay_ms);
    let mut client = stdio::StdioClient::spawn(&program, &args, settle).await?;

    for command in commands {
        let mut request = agora_core::StdioRequest::new(&command);
        if let Some(session) = &session {
            request = request.in_session(session);
        }
        println!("{} {}", "▶".bright_cyan(), command.bright_white());
        let response = match client.send_request(&request).await {
            Ok(response) => response,
            Err(e) => {
                eprintln!("{} {}", "Connection lost:".red().bold(), e);
                break;
            }
        };
        let payload = match response.payload.as_str() {
            Some(text) => text.to_string(),
            None => response.payload.to_string(),
        };
        if response.is_success() {
            for line in textwrap(&payload, 66).lines() {
                println!("  {}", line);
            }
        } else {
            println!("  {} {}", "error:".red().bold(), payload);
        }
        println!();
    }

    client.shutdown().await?;
    Ok(())
}

async fn stream_command(
    url: &str,
    command: &str,
    session: Option<&str>,
) -> Result<(), Box<dyn Error>> {
    let client = sse::SseClient::new(url);
    client
        .stream(command, session, |event| {
            let name = match event.event.as_str() {
                "final_answer" => event.event.green().bold(),
                "error" => event.event.red().bold(),
                _ => event.event.cyan(),
            };
            println!("{} {}", name, event.data);
        })
        .await?;
    Ok(())
}

/// Simple text wrapping function.
fn textwrap(text: &str, width: usize) -> String {
    let mut result = String::new();

    for (i, paragraph) in text.lines().enumerate() {
        if i > 0 {
            result.push('\n');
        }
        let mut current_line_len = 0;
        for word in paragraph.split_whitespace() {
            let word_len = word.chars().count();
            if current_line_len + word_len + 1 > width && current_line_len > 0 {
                result.push('\n');
                current_line_len = 0;
            }
            if current_line_len > 0 {
                result.push(' ');
                current_line_len += 1;
            }
            result.push_str(word);
            current_line_len += word_len;
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_textwrap_keeps_paragraphs_and_width() {
        let wrapped = textwrap("one two three\nfour", 7);
        assert_eq!(wrapped, "one two\nthree\nfour");
    }

    #[test]
    fn test_cli_parses_debate_overrides() {
        let cli = Cli::try_parse_from([
            "agora",
            "-v",
            "debate",
            "Cats vs dogs",
            "-r",
            "2",
            "--pro-model",
            "gpt-4o",
            "--no-pacing",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Command::Debate {
                topic,
                rounds,
                pro_model,
                no_pacing,
                ..
            } => {
                assert_eq!(topic, "Cats vs dogs");
                assert_eq!(rounds, Some(2));
                assert_eq!(pro_model.as_deref(), Some("gpt-4o"));
                assert!(no_pacing);
            }
            _ => panic!("expected debate"),
        }
    }

    #[test]
    fn test_send_requires_a_command() {
        assert!(Cli::try_parse_from(["agora", "send"]).is_err());
    }
}
