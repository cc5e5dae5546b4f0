//! mnemo hook binary
//!
//! Invoked by the host on session start, prompt submit, tool use, and
//! session end. Reads one JSON envelope from stdin, runs the matching
//! pipeline handler, and writes the response envelope to stdout. Hook
//! errors go to stderr and never block the host; the process exits 0
//! unless setup itself fails.

use std::io::Read;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use mnemo::hooks::{HookInput, HookPipeline, HookResponse};
use mnemo::{MemoryConfig, MemoryService};

#[derive(Parser)]
#[command(name = "mnemo-hook")]
#[command(about = "Memory hook pipeline for coding assistants")]
#[command(version)]
struct Cli {
    /// Project base directory; state lives under <base>/.claude/memory
    #[arg(long, env = "MNEMO_BASE_DIR", default_value = ".")]
    base_dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Emit recent project context for a starting session
    Context,
    /// Ensure the session record exists
    SessionInit,
    /// Capture one tool invocation as an observation
    Observation,
    /// Fold the session into a summary and complete it
    Summarize,
    /// Record a submitted user prompt
    UserMessage,
    /// Re-run enrichment for a stored observation
    Enrich {
        observation_id: String,
        cwd: Option<String>,
    },
}

fn read_stdin() -> String {
    let mut buffer = String::new();
    if let Err(err) = std::io::stdin().read_to_string(&mut buffer) {
        tracing::error!(%err, "failed to read stdin");
    }
    buffer
}

fn emit(response: &HookResponse) {
    match serde_json::to_string(response) {
        Ok(json) => println!("{}", json),
        Err(err) => {
            tracing::error!(%err, "failed to serialize response");
            println!("{{\"continue\":true,\"suppressOutput\":true}}");
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = MemoryConfig::for_base_dir(&cli.base_dir);
    let service = Arc::new(MemoryService::new(config));
    if let Err(err) = service.initialize().await {
        // The one fatal path: without storage there is nothing to do.
        eprintln!("mnemo-hook: setup failed: {}", err);
        std::process::exit(1);
    }
    let pipeline = HookPipeline::new(service.clone());

    let response = match cli.command {
        Commands::Context => {
            let input = HookInput::from_json(&read_stdin());
            pipeline.handle_session_start(&input).await
        }
        Commands::SessionInit => {
            let input = HookInput::from_json(&read_stdin());
            if let Err(err) = service.storage().ensure_session(
                &input.session_id,
                &input.project,
                input.prompt.as_deref(),
            ) {
                tracing::error!(%err, "session-init failed; continuing");
            }
            HookResponse::ok()
        }
        Commands::Observation => {
            let input = HookInput::from_json(&read_stdin());
            pipeline.handle_tool_use(&input).await
        }
        Commands::Summarize => {
            let input = HookInput::from_json(&read_stdin());
            pipeline.handle_session_end(&input).await
        }
        Commands::UserMessage => {
            let input = HookInput::from_json(&read_stdin());
            pipeline.handle_user_prompt(&input).await
        }
        Commands::Enrich {
            observation_id,
            cwd: _,
        } => pipeline.enrich_observation(&observation_id).await,
    };

    emit(&response);
    service.shutdown().await;
}
