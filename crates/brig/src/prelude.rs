//! Convenience re-exports for common `brig` types.
//!
//! Meant to be glob-imported when wiring a dispatcher:
//!
//! ```ignore
//! use brig::prelude::*;
//! ```
//!
//! This pulls in the transcript types, the [`Generator`] contract and its
//! OpenRouter adapter, the dispatch and task entry points, the command and
//! action traits, and the event bus. Test doubles live in
//! `brig::testing` (behind the `test-utils` feature) and are not
//! re-exported here.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{
    Call, CallResponse, Definition, Result, Role, TaskError, Turn, generate_call_id,
    json_schema_for,
};

// ── Content generation ──────────────────────────────────────────────
pub use crate::api::openrouter::OpenRouterClient;
pub use crate::api::{GenerateConfig, Generator, ImageGenerator, ModelTier, Part, TierRouting};

// ── Dispatch ────────────────────────────────────────────────────────
pub use crate::dispatch::{
    ActionContext, ActionFuture, ActionHandler, ActionOutcome, ActionRegistry, DispatchOptions,
    DispatchResult, Dispatcher, StopReason,
};

// ── Container tasks ─────────────────────────────────────────────────
pub use crate::container::{AllowedImage, ContainerEngine, docker::DockerEngine};
pub use crate::task::{ContainerTaskOrchestrator, TaskConfig, TaskOutcome, TaskReport, TaskStatus};

// ── Commands ────────────────────────────────────────────────────────
pub use crate::commands::spec::CommandSpec;
pub use crate::commands::{
    Command, CommandContext, CommandFuture, CommandOutcome, CommandRegistry, parse_args,
};

// ── Interaction and observability ───────────────────────────────────
pub use crate::interact::{
    AutoInteraction, CompositeEventHandler, EventBus, EventHandler, EventObserver, Interaction,
    LoggingHandler, NoopHandler, TaskEvent, terminal::TerminalInteraction,
};

// ── Support ─────────────────────────────────────────────────────────
pub use crate::context::ContextLimits;
pub use crate::knowledge::KnowledgeStore;
pub use crate::secrets::SecretRegistry;
pub use crate::signal::RunSignals;
