//! Run one dispatch over a prompt, with container tasks on the local Docker
//! daemon.
//!
//! Reads the model key from `OPENROUTER_API_KEY` and, when set, the web
//! search key from `BRAVE_SEARCH_KEY`.
//!
//! # Examples
//!
//! ```sh
//! # Let the model pick an action
//! brig --prompt "Does this project's test suite pass on python 3.12?"
//!
//! # Force a container task and remember what it learns
//! brig --action runContainerTask --knowledge-file .brig/knowledge.json \
//!   --prompt "Install ripgrep in alpine and report its version"
//!
//! # Unattended: confirm every proposal automatically
//! cat request.md | brig --yes
//! ```

use brig::Turn;
use brig::api::openrouter::OpenRouterClient;
use brig::api::{DEFAULT_CHEAP_MODEL, DEFAULT_MODEL, TierRouting};
use brig::commands::CommandRegistry;
use brig::commands::search::WebSearch;
use brig::container::docker::{DEFAULT_PULL_TIMEOUT, DockerEngine};
use brig::context::ContextLimits;
use brig::context::budget::{DEFAULT_MAX_MESSAGES, DEFAULT_MAX_TOKENS};
use brig::dispatch::{
    ActionRegistry, DEFAULT_MAX_ITERATIONS, DispatchOptions, Dispatcher, StopReason,
};
use brig::interact::{
    AutoInteraction, CompositeEventHandler, EventBus, EventObserver, Interaction, LoggingHandler,
    TaskEvent, TerminalInteraction,
};
use brig::knowledge::{FileBackend, KnowledgeStore};
use brig::secrets::SecretRegistry;
use brig::signal::RunSignals;
use brig::task::{ContainerTaskOrchestrator, DEFAULT_MAX_COMMANDS, TaskConfig};
use clap::Parser;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Agentic action dispatch with sandboxed container tasks.
#[derive(Parser)]
#[command(name = "brig")]
struct Cli {
    // ── Input ──────────────────────────────────────────────────
    /// User request. Read from stdin when omitted.
    #[arg(long)]
    prompt: Option<String>,

    /// Run this action on the first iteration instead of asking the model
    #[arg(long)]
    action: Option<String>,

    // ── Models ─────────────────────────────────────────────────
    /// Model for command turns and replies
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Model for action selection and task proposals
    #[arg(long, default_value = DEFAULT_CHEAP_MODEL)]
    cheap_model: String,

    // ── Limits ─────────────────────────────────────────────────
    /// Command turns per container task
    #[arg(long, default_value_t = DEFAULT_MAX_COMMANDS)]
    max_commands: u32,

    /// Transcript turns before wrapContext is forced
    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGES)]
    max_messages: usize,

    /// Estimated transcript tokens before wrapContext is forced
    #[arg(long, default_value_t = DEFAULT_MAX_TOKENS)]
    max_tokens: usize,

    /// Actions per dispatch
    #[arg(long, default_value_t = DEFAULT_MAX_ITERATIONS)]
    max_iterations: u32,

    /// Seconds to wait for an image pull
    #[arg(long, default_value_t = DEFAULT_PULL_TIMEOUT.as_secs())]
    pull_timeout: u64,

    // ── Host access ────────────────────────────────────────────
    /// Directory container transfers are confined to
    #[arg(long, default_value = ".")]
    host_root: PathBuf,

    /// Persist knowledge to this JSON file (in memory when omitted)
    #[arg(long)]
    knowledge_file: Option<PathBuf>,

    /// Knowledge namespace
    #[arg(long, default_value = "default")]
    namespace: String,

    // ── Behavior ───────────────────────────────────────────────
    /// Approve every task without prompting; secrets are declined
    #[arg(long)]
    yes: bool,

    /// Debug logging
    #[arg(long, short)]
    verbose: bool,
}

fn read_prompt(cli: &Cli) -> String {
    if let Some(prompt) = &cli.prompt {
        return prompt.clone();
    }
    let mut buf = String::new();
    if let Err(e) = io::stdin().read_to_string(&mut buf) {
        eprintln!("Error: failed to read stdin: {e}");
        process::exit(1);
    }
    buf
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let prompt = read_prompt(&cli);
    if prompt.trim().is_empty() {
        eprintln!("Error: no prompt given (use --prompt or pipe one on stdin)");
        process::exit(1);
    }

    // ── Collaborators ──────────────────────────────────────────
    let routing = TierRouting::split(&cli.cheap_model, &cli.model);
    let generator = match OpenRouterClient::from_env(routing) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    let pull_timeout = Duration::from_secs(cli.pull_timeout);
    let engine = match DockerEngine::connect() {
        Ok(engine) => Arc::new(engine.with_pull_timeout(pull_timeout)),
        Err(e) => {
            eprintln!("Error: cannot reach Docker: {e}");
            process::exit(1);
        }
    };

    let interaction: Arc<dyn Interaction> = if cli.yes {
        Arc::new(AutoInteraction::approve_all())
    } else {
        Arc::new(TerminalInteraction::new())
    };

    let handler = CompositeEventHandler::new()
        .with(LoggingHandler)
        .with(EventObserver::new(|event: &TaskEvent<'_>| {
            if let TaskEvent::AssistantMessage(text) = event {
                println!("{text}\n");
            }
        }));
    let events = EventBus::new(Arc::new(handler), SecretRegistry::new());

    let knowledge = match &cli.knowledge_file {
        Some(path) => KnowledgeStore::new(Arc::new(FileBackend::new(path.clone())), &cli.namespace),
        None => KnowledgeStore::in_memory(&cli.namespace),
    };

    let search = WebSearch::from_env();
    if search.is_none() {
        info!("BRAVE_SEARCH_KEY not set; webSearch disabled");
    }

    // ── Orchestrator and dispatcher ────────────────────────────
    let config = TaskConfig::default()
        .with_max_commands(cli.max_commands)
        .with_limits(
            ContextLimits::default()
                .with_max_messages(cli.max_messages)
                .with_max_tokens(cli.max_tokens),
        )
        .with_host_root(cli.host_root.clone())
        .with_pull_timeout(pull_timeout);
    let orchestrator = ContainerTaskOrchestrator::new(
        generator.clone(),
        engine,
        interaction,
        events.clone(),
    )
    .with_knowledge(knowledge)
    .with_registry(CommandRegistry::with_builtins(search))
    .with_config(config);

    let signals = RunSignals::new();
    let dispatcher = Dispatcher::new(
        generator,
        ActionRegistry::with_defaults(Arc::new(orchestrator)),
        events,
    )
    .with_signals(signals.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling");
            signals.cancel();
        }
    });

    let mut options = DispatchOptions::default().with_max_iterations(cli.max_iterations);
    if let Some(action) = &cli.action {
        options = options.with_forced_action(action);
    }

    let result = dispatcher.run(vec![Turn::user(prompt)], &options).await;
    info!(
        iterations = result.iterations,
        turns = result.transcript.len(),
        "Dispatch finished: {:?}",
        result.stop
    );
    let code = match result.stop {
        StopReason::Completed | StopReason::NoAction => 0,
        StopReason::Cancelled => 130,
        StopReason::Failed(_) | StopReason::MaxIterations => 1,
    };
    process::exit(code);
}
