//! Observability bus.
//!
//! The loops emit [`TaskEvent`]s through an [`EventBus`], which scrubs
//! registered secrets from every string before handing the event to the
//! configured [`EventHandler`]. Delivery is one-way: handlers cannot steer the
//! loops, and a panicking handler is contained so it never blocks progress.
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Ignore all events |
//! | [`LoggingHandler`] | Forward events to `tracing` |
//! | [`EventObserver`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Fan out to several handlers |

use crate::context::{BudgetBreach, ContextMetrics};
use crate::secrets::SecretRegistry;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Severity of a container log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Events emitted by the dispatch loop, the orchestrator and the command loop.
#[derive(Debug)]
pub enum TaskEvent<'a> {
    SystemMessage(&'a str),
    AssistantMessage(&'a str),
    UserMessage(&'a str),
    ContainerLog {
        level: LogLevel,
        text: &'a str,
        data: Option<&'a serde_json::Value>,
    },
    /// The dispatch loop resolved an action.
    ActionSelected { name: &'a str, iteration: u32 },
    /// The command loop is about to dispatch a command.
    CommandStart {
        name: &'a str,
        turn: u32,
        max_commands: u32,
        metrics: &'a ContextMetrics,
    },
    CommandResult { name: &'a str, content: &'a str },
    /// A limit was exceeded; the next command turn is forced to `wrapContext`.
    ForcedWrap {
        breach: BudgetBreach,
        metrics: &'a ContextMetrics,
    },
    TaskFinished { success: bool, summary: &'a str },
}

/// Observer of [`TaskEvent`]s.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, _event: &TaskEvent<'_>) {}
}

/// A no-op event handler.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// Closure-backed handler.
///
/// ```
/// use brig::interact::{EventObserver, TaskEvent};
///
/// let observer = EventObserver::new(|event: &TaskEvent<'_>| {
///     if let TaskEvent::SystemMessage(text) = event {
///         eprintln!("{text}");
///     }
/// });
/// # let _ = observer;
/// ```
pub struct EventObserver<F>(F)
where
    F: Fn(&TaskEvent<'_>) + Send + Sync;

impl<F> EventObserver<F>
where
    F: Fn(&TaskEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for EventObserver<F>
where
    F: Fn(&TaskEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &TaskEvent<'_>) {
        (self.0)(event);
    }
}

/// Fans every event out to each registered handler, in order.
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    pub fn with_opt(self, handler: Option<impl EventHandler + 'static>) -> Self {
        match handler {
            Some(h) => self.with(h),
            None => self,
        }
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &TaskEvent<'_>) {
        for handler in &self.handlers {
            deliver(handler.as_ref(), event);
        }
    }
}

/// An event handler that logs events via `tracing`.
pub struct LoggingHandler;

fn preview(text: &str) -> String {
    let head: String = text.chars().take(200).collect();
    if head.len() < text.len() {
        format!("{head}...")
    } else {
        head
    }
}

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &TaskEvent<'_>) {
        match event {
            TaskEvent::SystemMessage(text) => info!("[system] {text}"),
            TaskEvent::AssistantMessage(text) => info!("[assistant] {}", preview(text)),
            TaskEvent::UserMessage(text) => debug!("[user] {}", preview(text)),
            TaskEvent::ContainerLog { level, text, data } => {
                let data = data.map(|d| d.to_string()).unwrap_or_default();
                match level {
                    LogLevel::Debug => debug!(target: "brig::container", "{text} {data}"),
                    LogLevel::Info => info!(target: "brig::container", "{text} {data}"),
                    LogLevel::Warn => warn!(target: "brig::container", "{text} {data}"),
                    LogLevel::Error => error!(target: "brig::container", "{text} {data}"),
                }
            }
            TaskEvent::ActionSelected { name, iteration } => {
                info!("[iteration {iteration}] action: {name}");
            }
            TaskEvent::CommandStart {
                name,
                turn,
                max_commands,
                metrics,
            } => {
                info!(
                    "[command {turn}/{max_commands}] {name} ({})",
                    metrics.to_log_string()
                );
            }
            TaskEvent::CommandResult { name, content } => {
                debug!("Command {name} result: {} bytes", content.len());
            }
            TaskEvent::ForcedWrap { breach, metrics } => {
                warn!(
                    "Context over budget on {breach} ({}); forcing wrapContext",
                    metrics.to_log_string()
                );
            }
            TaskEvent::TaskFinished { success, summary } => {
                let status = if *success { "Success" } else { "Failed" };
                info!("Task finished: {status}: {}", preview(summary));
            }
        }
    }
}

fn deliver(handler: &dyn EventHandler, event: &TaskEvent<'_>) {
    if std::panic::catch_unwind(AssertUnwindSafe(|| handler.on_event(event))).is_err() {
        warn!("Event handler panicked; event dropped");
    }
}

// ── Bus ────────────────────────────────────────────────────────────

/// Redacting front end over an [`EventHandler`]. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    handler: Arc<dyn EventHandler>,
    secrets: SecretRegistry,
}

impl EventBus {
    pub fn new(handler: Arc<dyn EventHandler>, secrets: SecretRegistry) -> Self {
        Self { handler, secrets }
    }

    /// A bus that drops everything.
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopHandler), SecretRegistry::new())
    }

    pub fn secrets(&self) -> &SecretRegistry {
        &self.secrets
    }

    pub fn system(&self, text: &str) {
        self.emit(&TaskEvent::SystemMessage(text));
    }

    pub fn assistant(&self, text: &str) {
        self.emit(&TaskEvent::AssistantMessage(text));
    }

    pub fn user(&self, text: &str) {
        self.emit(&TaskEvent::UserMessage(text));
    }

    pub fn container_log(&self, level: LogLevel, text: &str, data: Option<&serde_json::Value>) {
        self.emit(&TaskEvent::ContainerLog { level, text, data });
    }

    /// Redact and deliver one event.
    pub fn emit(&self, event: &TaskEvent<'_>) {
        let r = |s: &str| self.secrets.redact_str(s).into_owned();
        match event {
            TaskEvent::SystemMessage(t) => {
                let t = r(t);
                deliver(self.handler.as_ref(), &TaskEvent::SystemMessage(&t));
            }
            TaskEvent::AssistantMessage(t) => {
                let t = r(t);
                deliver(self.handler.as_ref(), &TaskEvent::AssistantMessage(&t));
            }
            TaskEvent::UserMessage(t) => {
                let t = r(t);
                deliver(self.handler.as_ref(), &TaskEvent::UserMessage(&t));
            }
            TaskEvent::ContainerLog { level, text, data } => {
                let text = r(text);
                let data = data.map(|d| self.secrets.redact_value(d));
                deliver(
                    self.handler.as_ref(),
                    &TaskEvent::ContainerLog {
                        level: *level,
                        text: &text,
                        data: data.as_ref(),
                    },
                );
            }
            TaskEvent::CommandResult { name, content } => {
                let content = r(content);
                deliver(
                    self.handler.as_ref(),
                    &TaskEvent::CommandResult {
                        name: *name,
                        content: &content,
                    },
                );
            }
            TaskEvent::TaskFinished { success, summary } => {
                let summary = r(summary);
                deliver(
                    self.handler.as_ref(),
                    &TaskEvent::TaskFinished {
                        success: *success,
                        summary: &summary,
                    },
                );
            }
            other => deliver(self.handler.as_ref(), other),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}
