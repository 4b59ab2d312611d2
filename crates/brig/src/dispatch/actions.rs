//! Action handler contract and the two-table registry.
//!
//! Lookup order is plugins, then built-ins, then the `sendMessage` fallback.
//! Plugins are ordinary handlers registered with priority; there is no
//! separate loading mechanism.

use super::dispatch_loop::DispatchOptions;
use crate::api::{Generator, ImageGenerator};
use crate::interact::EventBus;
use crate::signal::RunSignals;
use crate::{Call, Definition, Turn};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

/// Name of the fallback action.
pub const SEND_MESSAGE_ACTION: &str = "sendMessage";

/// Everything a handler gets for one invocation.
pub struct ActionContext<'a> {
    pub transcript: &'a [Turn],
    pub call: &'a Call,
    pub options: &'a DispatchOptions,
    pub generator: &'a dyn Generator,
    pub images: Option<&'a dyn ImageGenerator>,
    /// Cancellation and pause; handlers wrap suspending calls in
    /// [`RunSignals::suspend`].
    pub signals: &'a RunSignals,
    pub events: &'a EventBus,
}

/// Turns to append, and whether the dispatch loop should stop.
#[derive(Debug, Clone, Default)]
pub struct ActionOutcome {
    pub turns: Vec<Turn>,
    pub done: bool,
}

impl ActionOutcome {
    pub fn done(turns: Vec<Turn>) -> Self {
        Self { turns, done: true }
    }

    pub fn more(turns: Vec<Turn>) -> Self {
        Self { turns, done: false }
    }
}

pub type ActionFuture<'a> = Pin<Box<dyn Future<Output = Result<ActionOutcome, String>> + Send + 'a>>;

/// One outer action type.
///
/// `Err` terminates the dispatch loop with a system message.
pub trait ActionHandler: Send + Sync {
    fn definition(&self) -> Definition;

    fn handle<'a>(&'a self, ctx: ActionContext<'a>) -> ActionFuture<'a>;

    fn name(&self) -> String {
        self.definition().name
    }
}

/// Plugin and built-in handler tables.
#[derive(Default, Clone)]
pub struct ActionRegistry {
    plugins: HashMap<String, Arc<dyn ActionHandler>>,
    builtins: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin(mut self, handler: impl ActionHandler + 'static) -> Self {
        self.builtins.insert(handler.name(), Arc::new(handler));
        self
    }

    pub fn with_plugin(mut self, handler: impl ActionHandler + 'static) -> Self {
        self.register_plugin(handler);
        self
    }

    /// Register a plugin. It shadows any built-in with the same name.
    pub fn register_plugin(&mut self, handler: impl ActionHandler + 'static) {
        let name = handler.name();
        if self.builtins.contains_key(&name) {
            debug!("Plugin action '{name}' overrides the built-in");
        }
        self.plugins.insert(name, Arc::new(handler));
    }

    /// Resolve a handler by action name, falling back to `sendMessage`.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.plugins
            .get(name)
            .or_else(|| self.builtins.get(name))
            .or_else(|| {
                debug!("No handler for action '{name}'; falling back to {SEND_MESSAGE_ACTION}");
                self.plugins
                    .get(SEND_MESSAGE_ACTION)
                    .or_else(|| self.builtins.get(SEND_MESSAGE_ACTION))
            })
            .cloned()
    }

    /// Effective definitions, plugins winning, sorted by name.
    pub fn definitions(&self) -> Vec<Definition> {
        let mut merged: HashMap<&str, &Arc<dyn ActionHandler>> = HashMap::new();
        for (name, handler) in &self.builtins {
            merged.insert(name, handler);
        }
        for (name, handler) in &self.plugins {
            merged.insert(name, handler);
        }
        let mut defs: Vec<Definition> = merged.values().map(|h| h.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn names(&self) -> Vec<String> {
        self.definitions().into_iter().map(|d| d.name).collect()
    }
}
