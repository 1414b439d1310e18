//! SafeSF replay CLI - inspect, replay and record cached sessions
//!
//! Usage:
//!     safesf-replay list
//!     safesf-replay show "Is Union Square safe at night?"
//!     safesf-replay replay "Is Union Square safe at night?"
//!     safesf-replay record "Is SoMa safe?" --input session.jsonl
//!     safesf-replay --cache-dir /tmp/safesf hash "Is SoMa safe?"

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use safesf_replay::dispatch::SessionOutcome;
use safesf_replay::event::{
    AgentComplete, AgentProgress, AgentSpawned, DataReceived, SessionStarted, ToolCalled,
    ToolResult,
};
use safesf_replay::source::ReaderSource;
use safesf_replay::{
    prompt_hash, CacheBackendType, LiveEventSource, LivePhase, ReplayConfig, SessionController,
    SessionSink, SessionState,
};
use tokio::io::{AsyncBufRead, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CACHE_DIR: &str = ".safesf-cache";

#[derive(Parser, Debug)]
#[command(name = "safesf-replay")]
#[command(about = "Record and replay SafeSF agent sessions")]
#[command(version)]
struct Args {
    /// Directory holding cached sessions
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Run without the session cache
    #[arg(long, global = true)]
    no_cache: bool,

    /// Replay speed factor applied to recorded gaps
    #[arg(long, global = true)]
    speed: Option<f64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List cached prompts
    List,
    /// Print summaries of cached sessions as JSON
    Entries,
    /// Show a cached session and its replay schedule
    Show { prompt: String },
    /// Replay a cached session to the console
    Replay { prompt: String },
    /// Record a session from a JSONL transcript (stdin by default)
    Record {
        prompt: String,
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Remove every cached session
    Clear,
    /// Print the cache key for a prompt
    Hash { text: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs on stderr; stdout carries command output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "safesf_replay=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = build_config(&args);
    let controller = SessionController::new(config)?;

    match args.command {
        Command::List => {
            for prompt in controller.cache().list_prompts() {
                println!("{}", prompt);
            }
        }
        Command::Entries => {
            println!("{}", serde_json::to_string_pretty(&controller.cache().entries())?);
        }
        Command::Show { prompt } => {
            let Some(recording) = controller.cache().get(&prompt) else {
                return Err(format!("No cached session for \"{}\"", prompt).into());
            };
            println!("{}", serde_json::to_string_pretty(&recording.summary())?);
            println!();
            for step in controller.player().plan(&recording) {
                println!(
                    "{:>4}  {:<16} recorded {:>6}ms  replay {:>4}ms",
                    step.index, step.event_type, step.recorded_delay_ms, step.wait_ms
                );
            }
        }
        Command::Replay { prompt } => {
            let mut sink = ConsoleSink::default();
            match controller.replay_cached(&prompt, &mut sink).await? {
                Some(stats) => {
                    print_result(&sink.state);
                    println!(
                        "\nReplayed {} events ({} skipped) in {}ms",
                        stats.events_applied, stats.events_skipped, stats.total_wait_ms
                    );
                }
                None => return Err(format!("No cached session for \"{}\"", prompt).into()),
            }
        }
        Command::Record { prompt, input } => {
            let reader: Box<dyn AsyncBufRead + Unpin + Send> = match input {
                Some(path) => Box::new(BufReader::new(tokio::fs::File::open(path).await?)),
                None => Box::new(BufReader::new(tokio::io::stdin())),
            };
            record(&controller, &prompt, ReaderSource::new(reader)).await?;
        }
        Command::Clear => {
            let count = controller.cache().list_prompts().len();
            controller.cache().clear_all();
            println!("Cleared {} cached session(s)", count);
        }
        Command::Hash { text } => {
            println!("{}", prompt_hash(&text));
        }
    }

    Ok(())
}

fn build_config(args: &Args) -> ReplayConfig {
    let mut config = ReplayConfig::from_env();

    if let Some(dir) = &args.cache_dir {
        config.cache.directory = Some(dir.clone());
    }
    if config.cache.directory.is_none() {
        config.cache.directory = Some(PathBuf::from(DEFAULT_CACHE_DIR));
    }
    config.cache.backend = CacheBackendType::File;

    if args.no_cache {
        config.cache.enabled = false;
    }
    if let Some(speed) = args.speed {
        config.timing.speed = speed;
    }
    config
}

/// Drive a live session from `source` until it settles or runs dry
async fn record<E>(
    controller: &SessionController,
    prompt: &str,
    mut source: E,
) -> Result<(), Box<dyn std::error::Error>>
where
    E: LiveEventSource,
{
    let mut sink = ConsoleSink::default();
    let mut session = controller.live_session(prompt);

    source.connect(&controller.config().endpoint).await?;
    source.send_query(prompt).await?;

    while let Some(raw) = source.next_message().await? {
        if session.handle_message(&raw, &mut sink) == LivePhase::Settled {
            break;
        }
    }
    source.disconnect().await?;
    session.fail("Transcript ended before the session completed", &mut sink);

    print_result(&sink.state);
    let persisted = session.persisted();
    match session.close() {
        Some(recording) if persisted => println!(
            "\nRecorded {} events as {}",
            recording.events.len(),
            recording.prompt_hash
        ),
        Some(recording) => println!(
            "\nRecorded {} events as {} but the cache did not store them",
            recording.events.len(),
            recording.prompt_hash
        ),
        None => println!("\nSession did not complete; nothing recorded"),
    }
    Ok(())
}

/// Prints each update while keeping a [`SessionState`]
#[derive(Default)]
struct ConsoleSink {
    state: SessionState,
}

impl SessionSink for ConsoleSink {
    fn reset(&mut self) {
        self.state.reset();
    }

    fn session_started(&mut self, event: &SessionStarted, at: i64) {
        println!("\n[Session] Started: {}", event.request_id.as_deref().unwrap_or("-"));
        self.state.session_started(event, at);
    }

    fn agent_spawned(&mut self, event: &AgentSpawned, at: i64) {
        println!(
            "  [+] Agent: {} ({})",
            event.agent_id,
            event.agent_type.as_deref().unwrap_or("unknown")
        );
        if let Some(input) = &event.input_id {
            println!("      Input: {}", input);
        }
        if let Some(task) = &event.description {
            println!("      Task: {}", task);
        }
        self.state.agent_spawned(event, at);
    }

    fn agent_progress(&mut self, event: &AgentProgress, at: i64) {
        if let Some(message) = &event.message {
            println!("      ... {}", message);
        }
        self.state.agent_progress(event, at);
    }

    fn tool_called(&mut self, event: &ToolCalled, at: i64) {
        println!("      Tool: {} called", event.tool_name);
        self.state.tool_called(event, at);
    }

    fn tool_result(&mut self, event: &ToolResult, at: i64) {
        match event.row_count {
            Some(rows) => println!("      Result: {} rows returned", rows),
            None => println!("      Result received"),
        }
        self.state.tool_result(event, at);
    }

    fn data_received(&mut self, event: &DataReceived, at: i64) {
        println!(
            "      Data: {} points with {} coordinates",
            event.row_count.unwrap_or(0),
            event.coordinates.len()
        );
        self.state.data_received(event, at);
    }

    fn agent_complete(&mut self, event: &AgentComplete, at: i64) {
        println!(
            "  [-] Agent {} completed ({})",
            event.agent_id,
            event.status.as_deref().unwrap_or("completed")
        );
        self.state.agent_complete(event, at);
    }

    fn session_complete(&mut self, outcome: &SessionOutcome, at: i64) {
        if let Some(duration) = outcome.duration_ms {
            println!("\n[Session] Completed in {}ms", duration);
        }
        if !outcome.flow_trace.is_empty() {
            println!("  Flow: {}", outcome.flow_trace.join(" -> "));
        }
        self.state.session_complete(outcome, at);
    }

    fn session_error(&mut self, message: &str, at: i64) {
        println!("\n[Session] Error: {}", message);
        self.state.session_error(message, at);
    }
}

fn print_result(state: &SessionState) {
    println!("\n{}", "=".repeat(65));
    println!("RESULTS");
    println!("{}", "=".repeat(65));

    if let Some(error) = &state.error {
        println!("\nError: {}", error);
        return;
    }

    let Some(result) = &state.result else {
        println!("\nNo result");
        return;
    };

    if let Some(score) = result.safety_score {
        println!(
            "\nSafety score: {:.1} ({})",
            score,
            result.rating.as_deref().unwrap_or("unrated")
        );
    }
    if !result.data.is_empty() {
        println!("Rows: {}", result.data.len());
    }
    if !result.coordinates.is_empty() {
        println!("Coordinates: {}", result.coordinates.len());
    }
    if let Some(summary) = result.summary.as_deref().or(result.analysis.as_deref()) {
        println!("\n{}", summary);
    }
    if !result.recommendations.is_empty() {
        println!("\nRecommendations:");
        for rec in &result.recommendations {
            println!("  - {}", rec);
        }
    }
}
