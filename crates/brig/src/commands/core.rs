//! Command trait, per-task context, and the registry that dispatches calls.

use crate::commands::plan::ExecutionPlan;
use crate::container::{ContainerEngine, ContainerSession};
use crate::context::{ContextLimits, ContextMetrics};
use crate::interact::{EventBus, Interaction};
use crate::knowledge::KnowledgeStore;
use crate::secrets::SecretRegistry;
use crate::signal::RunSignals;
use crate::{Call, Definition, Turn};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Default ceiling on any single command response, in bytes.
pub const DEFAULT_MAX_RESULT_BYTES: usize = 64 * 1024;

// ── Outcome ────────────────────────────────────────────────────────

/// How a command wants the loop to proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopSignal {
    Continue,
    Complete { summary: String },
    Fail { reason: String },
}

/// What a command hands back to the loop. Commands never return errors;
/// failures are ordinary content starting with `Error:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub content: String,
    pub signal: LoopSignal,
    /// The command rewrote `ctx.transcript` itself, including its own
    /// call/response pair.
    pub replaced_transcript: bool,
}

impl CommandOutcome {
    pub fn reply(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            signal: LoopSignal::Continue,
            replaced_transcript: false,
        }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self::reply(format!("Error: {message}"))
    }

    pub fn complete(summary: impl Into<String>) -> Self {
        let summary = summary.into();
        Self {
            content: format!("Task marked complete: {summary}"),
            signal: LoopSignal::Complete { summary },
            replaced_transcript: false,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            content: format!("Task marked failed: {reason}"),
            signal: LoopSignal::Fail { reason },
            replaced_transcript: false,
        }
    }

    pub fn is_error(&self) -> bool {
        self.content.starts_with("Error:")
    }

    /// Whether the outer loop should stop.
    pub fn should_break_outer(&self) -> bool {
        !matches!(self.signal, LoopSignal::Continue)
    }
}

// ── Context ────────────────────────────────────────────────────────

/// Output ceilings for shell-like commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputLimits {
    pub max_bytes: usize,
    pub max_lines: usize,
}

impl Default for OutputLimits {
    fn default() -> Self {
        Self {
            max_bytes: 16 * 1024,
            max_lines: 500,
        }
    }
}

/// Everything a command may touch during one container task.
///
/// Owned by the command loop for the duration of the task; commands borrow
/// it mutably one at a time.
pub struct CommandContext {
    pub session: ContainerSession,
    pub engine: Arc<dyn ContainerEngine>,
    pub interaction: Arc<dyn Interaction>,
    pub events: EventBus,
    pub secrets: SecretRegistry,
    pub knowledge: KnowledgeStore,
    pub signals: RunSignals,
    pub limits: ContextLimits,
    pub output_limits: OutputLimits,
    /// Host directory that copy commands are confined to.
    pub host_root: PathBuf,
    pub transcript: Vec<Turn>,
    pub plan: Option<ExecutionPlan>,
    pub metrics: ContextMetrics,
    /// Command turns used so far, nudges included.
    pub commands_executed: u32,
}

impl CommandContext {
    pub fn new(
        session: ContainerSession,
        engine: Arc<dyn ContainerEngine>,
        interaction: Arc<dyn Interaction>,
        events: EventBus,
    ) -> Self {
        let secrets = events.secrets().clone();
        Self {
            session,
            engine,
            interaction,
            events,
            secrets,
            knowledge: KnowledgeStore::in_memory("default"),
            signals: RunSignals::new(),
            limits: ContextLimits::default(),
            output_limits: OutputLimits::default(),
            host_root: PathBuf::from("."),
            transcript: Vec::new(),
            plan: None,
            metrics: ContextMetrics::default(),
            commands_executed: 0,
        }
    }

    pub fn with_knowledge(mut self, knowledge: KnowledgeStore) -> Self {
        self.knowledge = knowledge;
        self
    }

    pub fn with_signals(mut self, signals: RunSignals) -> Self {
        self.signals = signals;
        self
    }

    pub fn with_limits(mut self, limits: ContextLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_output_limits(mut self, limits: OutputLimits) -> Self {
        self.output_limits = limits;
        self
    }

    pub fn with_host_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.host_root = root.into();
        self
    }

    pub fn with_transcript(mut self, transcript: Vec<Turn>) -> Self {
        self.metrics = self.limits.measure(&transcript);
        self.transcript = transcript;
        self
    }

    /// Recompute metrics for the current transcript.
    pub fn refresh_metrics(&mut self) -> ContextMetrics {
        self.metrics = self.limits.measure(&self.transcript);
        self.metrics
    }
}

// ── Command trait ──────────────────────────────────────────────────

pub type CommandFuture<'a> = Pin<Box<dyn Future<Output = CommandOutcome> + Send + 'a>>;

/// A command the model can run inside a container task.
pub trait Command: Send + Sync {
    fn definition(&self) -> Definition;

    fn execute<'a>(&'a self, call: &'a Call, ctx: &'a mut CommandContext) -> CommandFuture<'a>;

    fn name(&self) -> String {
        self.definition().name
    }
}

/// Deserialize call arguments into a typed struct.
///
/// The error is a model-facing `Error: ...` string.
pub fn parse_args<T: serde::de::DeserializeOwned>(args: &serde_json::Value) -> Result<T, String> {
    serde_json::from_value(args.clone()).map_err(|e| {
        format!(
            "Error: invalid command arguments: {e}. \
             Please provide arguments matching the command's parameter schema."
        )
    })
}

/// Validate arguments against a definition's JSON Schema.
pub fn validate_args(definition: &Definition, args: &serde_json::Value) -> Option<String> {
    // An invalid schema skips validation.
    let validator = jsonschema::validator_for(&definition.parameters).ok()?;
    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| format!("  - {}: {e}", e.instance_path()))
        .collect();
    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Error: argument validation failed for command '{}':\n{}\n\
             Please fix the arguments and try again.",
            definition.name,
            errors.join("\n")
        ))
    }
}

/// Largest index `<= max` that lies on a char boundary of `s`.
fn floor_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut idx = max;
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Truncate to at most `max` bytes on a char boundary, appending a notice.
pub fn truncate_result(s: String, max: usize) -> String {
    if s.len() > max {
        let cut = floor_boundary(&s, max);
        let head = s.get(..cut).unwrap_or_default();
        format!("{head}...\n[truncated: {} bytes total]", s.len())
    } else {
        s
    }
}

/// Truncate to at most `max_lines` lines and `max_bytes` bytes.
pub fn truncate_output(s: &str, max_bytes: usize, max_lines: usize) -> String {
    let total_lines = s.lines().count();
    let mut out = if total_lines > max_lines {
        let kept: Vec<&str> = s.lines().take(max_lines).collect();
        format!(
            "{}\n[truncated: showing {max_lines} of {total_lines} lines]",
            kept.join("\n")
        )
    } else {
        s.to_string()
    };
    if out.len() > max_bytes {
        out = truncate_result(out, max_bytes);
    }
    out
}

fn log_command_call(name: &str, args: &serde_json::Value) {
    let rendered = args.to_string();
    let preview: String = rendered.chars().take(120).collect();
    info!(
        "[command] {name}({preview}{})",
        if rendered.len() > 120 { "..." } else { "" }
    );
    trace!("[command] {name} arguments: {rendered}");
}

// ── Registry ───────────────────────────────────────────────────────

/// Name-keyed table of commands. Registering a name twice replaces the
/// earlier command.
pub struct CommandRegistry {
    commands: HashMap<String, Box<dyn Command>>,
    validate: bool,
    max_result_bytes: usize,
    timeout: Option<Duration>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
            validate: true,
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
            timeout: None,
        }
    }

    pub fn with(mut self, command: impl Command + 'static) -> Self {
        self.register(command);
        self
    }

    pub fn with_if(self, condition: bool, command: impl Command + 'static) -> Self {
        if condition { self.with(command) } else { self }
    }

    pub fn register(&mut self, command: impl Command + 'static) {
        let name = command.name();
        if self.commands.insert(name.clone(), Box::new(command)).is_some() {
            debug!("Command '{name}' replaced an earlier registration");
        }
    }

    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    pub fn with_max_result_bytes(mut self, max: usize) -> Self {
        self.max_result_bytes = max;
        self
    }

    /// Per-command wall-clock limit. Off by default: some commands wait on
    /// the user.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Definitions, sorted by name.
    pub fn definitions(&self) -> Vec<Definition> {
        let mut defs: Vec<Definition> = self.commands.values().map(|c| c.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.commands.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Validate, run and truncate one call.
    pub async fn execute(&self, call: &Call, ctx: &mut CommandContext) -> CommandOutcome {
        let Some(command) = self.commands.get(&call.name) else {
            return CommandOutcome::error(format!(
                "unknown command '{}'. Available commands: {}",
                call.name,
                self.names().join(", ")
            ));
        };

        if self.validate
            && let Some(error) = validate_args(&command.definition(), &call.args)
        {
            return CommandOutcome::reply(error);
        }

        log_command_call(&call.name, &ctx.secrets.redact_value(&call.args));
        let start = std::time::Instant::now();

        let mut outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, command.execute(call, ctx)).await {
                Ok(outcome) => outcome,
                Err(_) => CommandOutcome::error(format!(
                    "command '{}' timed out after {:.0} seconds",
                    call.name,
                    limit.as_secs_f64()
                )),
            },
            None => command.execute(call, ctx).await,
        };

        debug!(
            "Command {} completed in {:.0}ms ({} bytes)",
            call.name,
            start.elapsed().as_secs_f64() * 1000.0,
            outcome.content.len()
        );
        outcome.content = truncate_result(outcome.content, self.max_result_bytes);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeEngine, ScriptedInteraction, context_with};
    use schemars::JsonSchema;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize, JsonSchema)]
    struct EchoArgs {
        text: String,
    }

    struct Echo;

    impl Command for Echo {
        fn definition(&self) -> Definition {
            crate::commands::spec::CommandSpec::builder("echo")
                .purpose("Echo text back")
                .parameters_for::<EchoArgs>()
                .to_definition()
        }

        fn execute<'a>(&'a self, call: &'a Call, _ctx: &'a mut CommandContext) -> CommandFuture<'a> {
            Box::pin(async move {
                match parse_args::<EchoArgs>(&call.args) {
                    Ok(args) => CommandOutcome::reply(args.text),
                    Err(e) => CommandOutcome::reply(e),
                }
            })
        }
    }

    fn ctx() -> CommandContext {
        context_with(FakeEngine::new(), ScriptedInteraction::new())
    }

    #[tokio::test]
    async fn executes_registered_command() {
        let registry = CommandRegistry::new().with(Echo);
        let mut ctx = ctx();
        let call = Call::new("1", "echo", json!({"text": "hi"}));
        let out = registry.execute(&call, &mut ctx).await;
        assert_eq!(out.content, "hi");
        assert!(!out.should_break_outer());
    }

    #[tokio::test]
    async fn unknown_command_is_error_content() {
        let registry = CommandRegistry::new().with(Echo);
        let mut ctx = ctx();
        let out = registry
            .execute(&Call::new("1", "nope", json!({})), &mut ctx)
            .await;
        assert!(out.is_error());
        assert!(out.content.contains("Available commands: echo"));
    }

    #[tokio::test]
    async fn schema_violation_is_reported() {
        let registry = CommandRegistry::new().with(Echo);
        let mut ctx = ctx();
        let out = registry
            .execute(&Call::new("1", "echo", json!({"text": 5})), &mut ctx)
            .await;
        assert!(out.content.contains("argument validation failed for command 'echo'"));
    }

    #[tokio::test]
    async fn results_are_truncated() {
        let registry = CommandRegistry::new().with(Echo).with_max_result_bytes(10);
        let mut ctx = ctx();
        let out = registry
            .execute(&Call::new("1", "echo", json!({"text": "x".repeat(50)})), &mut ctx)
            .await;
        assert!(out.content.starts_with("xxxxxxxxxx..."));
        assert!(out.content.contains("[truncated: 50 bytes total]"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "é".repeat(10); // 20 bytes
        let out = truncate_result(s, 5);
        assert!(out.starts_with("éé..."));
    }

    #[test]
    fn truncate_output_limits_lines_then_bytes() {
        let text: String = (0..1000).map(|i| format!("line {i}\n")).collect();
        let out = truncate_output(&text, 16 * 1024, 500);
        assert!(out.contains("line 499"));
        assert!(!out.contains("line 500\n"));
        assert!(out.contains("showing 500 of 1000 lines"));

        let out = truncate_output(&"y".repeat(20_000), 16 * 1024, 500);
        assert!(out.len() < 16 * 1024 + 64);
        assert!(out.contains("[truncated: 20000 bytes total]"));
    }

    #[test]
    fn outcome_constructors() {
        assert!(CommandOutcome::error("bad").is_error());
        assert!(CommandOutcome::complete("done").should_break_outer());
        assert_eq!(
            CommandOutcome::fail("nope").signal,
            LoopSignal::Fail {
                reason: "nope".into()
            }
        );
    }
}
