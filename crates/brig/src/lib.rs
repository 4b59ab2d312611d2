//! Agentic action dispatch with sandboxed container tasks.
//!
//! `brig` lets a content-generation service drive a coding assistant one
//! action at a time. The outer [`Dispatcher`](dispatch::Dispatcher) asks the
//! model to pick exactly one action per iteration and routes it to an
//! [`ActionHandler`](dispatch::ActionHandler). One built-in action runs a
//! multi-step task inside an ephemeral container: the
//! [`ContainerTaskOrchestrator`](task::ContainerTaskOrchestrator) proposes the
//! task, asks the user to confirm, pulls an allow-listed image, runs a bounded
//! [`CommandLoop`](task::CommandLoop) and always removes the container.
//!
//! # Where to find things
//!
//! - **Talk to a model:** the [`Generator`](api::Generator) trait is the only
//!   thing the loops depend on. [`OpenRouterClient`](api::openrouter::OpenRouterClient)
//!   implements it over HTTP.
//!
//! - **Add a command the model can run inside a container:** implement
//!   [`Command`](commands::Command) and register it on a
//!   [`CommandRegistry`](commands::CommandRegistry). Use
//!   [`CommandSpec`](commands::spec::CommandSpec) for structured descriptions.
//!
//! - **Add an outer action:** implement [`ActionHandler`](dispatch::ActionHandler)
//!   and register it as a plugin on the [`ActionRegistry`](dispatch::ActionRegistry).
//!   Plugins shadow built-ins with the same name.
//!
//! - **Observe a run:** implement [`EventHandler`](interact::EventHandler).
//!   Every event passes through [`EventBus`](interact::EventBus), which scrubs
//!   registered secrets first.
//!
//! - **Stop or pause a run:** see [`RunSignals`](signal::RunSignals).
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`api`] | Content-generation contract, model tiers, OpenRouter adapter |
//! | [`commands`] | Command trait, registry, and every built-in container command |
//! | [`container`] | Container engine contract, Docker engine, tar archive handling |
//! | [`context`] | Transcript metrics, budget limits, `wrapContext` compaction |
//! | [`dispatch`] | Action registry, built-in actions, outer dispatch loop |
//! | [`interact`] | Human-interaction contract, observability bus, terminal prompts |
//! | [`knowledge`] | Namespaced cross-task knowledge store |
//! | [`secrets`] | Secret registry and transcript redaction |
//! | [`signal`] | Cooperative cancellation and pause |
//! | [`task`] | Task config, command loop, container orchestrator |
//! | `testing` | Scripted generator, fake engine and interaction for tests (`test-utils` feature) |

pub mod api;
pub mod commands;
pub mod container;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod interact;
pub mod knowledge;
pub mod prelude;
pub mod secrets;
pub mod signal;
pub mod task;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

pub use error::{Result, TaskError};
pub use schemars;

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`.
///
/// # Example
///
/// ```
/// use brig::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct RunArgs {
///     command: String,
///     #[serde(default)]
///     working_dir: Option<String>,
/// }
///
/// let schema = json_schema_for::<RunArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"command".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Call identifiers ───────────────────────────────────────────────

static CALL_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique call id: `{prefix}-{unix_ms}-{counter}`.
///
/// Used when a provider omits ids and for programmatically forced calls.
pub fn generate_call_id(prefix: &str) -> String {
    let ts = chrono::Utc::now().timestamp_millis();
    let seq = CALL_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{ts}-{seq}")
}

// ── Definitions ────────────────────────────────────────────────────

/// A callable definition offered to the model: an action or a command.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Definition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl Definition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

// ── Transcript types ───────────────────────────────────────────────

/// Role of a turn in the transcript.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// An action or command selected by the model: `{name, id, args}`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Call {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl Call {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }
}

/// The response recorded for a [`Call`], keyed by its id.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CallResponse {
    pub id: String,
    pub name: String,
    pub content: String,
}

impl CallResponse {
    pub fn to(call: &Call, content: impl Into<String>) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            content: content.into(),
        }
    }
}

/// One entry in a [`Transcript`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Turn {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<Call>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub responses: Vec<CallResponse>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cache: bool,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: Some(text.into()),
            calls: Vec::new(),
            responses: Vec::new(),
            cache: false,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: Some(text.into()),
            calls: Vec::new(),
            responses: Vec::new(),
            cache: false,
        }
    }

    pub fn call(call: Call) -> Self {
        Self {
            role: Role::Assistant,
            text: None,
            calls: vec![call],
            responses: Vec::new(),
            cache: false,
        }
    }

    pub fn responses(responses: Vec<CallResponse>) -> Self {
        Self {
            role: Role::User,
            text: None,
            calls: Vec::new(),
            responses,
            cache: false,
        }
    }

    /// Mark this turn as a prompt-cache breakpoint.
    pub fn with_cache(mut self) -> Self {
        self.cache = true;
        self
    }

    /// Whether this turn carries a call with the given name.
    pub fn has_call(&self, name: &str) -> bool {
        self.calls.iter().any(|c| c.name == name)
    }

    /// Whether this turn answers the call with the given id.
    pub fn answers(&self, call_id: &str) -> bool {
        self.responses.iter().any(|r| r.id == call_id)
    }

    /// Characters carried by this turn, used for token estimation.
    pub fn char_len(&self) -> usize {
        let text = self.text.as_ref().map_or(0, |t| t.len());
        let calls: usize = self
            .calls
            .iter()
            .map(|c| c.name.len() + c.args.to_string().len())
            .sum();
        let responses: usize = self
            .responses
            .iter()
            .map(|r| r.name.len() + r.content.len())
            .sum();
        text + calls + responses
    }
}

/// The ordered turn history of one run.
pub type Transcript = Vec<Turn>;

/// Render a transcript as plain text for logs and prompts.
pub fn render_transcript(transcript: &[Turn]) -> String {
    let mut out = String::new();
    for turn in transcript {
        if let Some(text) = &turn.text {
            out.push_str(&format!("[{}] {text}\n", turn.role));
        }
        for call in &turn.calls {
            out.push_str(&format!("[{}] call {}({})\n", turn.role, call.name, call.args));
        }
        for resp in &turn.responses {
            out.push_str(&format!("[{}] {} -> {}\n", turn.role, resp.name, resp.content));
        }
    }
    out
}
