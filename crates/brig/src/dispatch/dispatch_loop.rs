//! The outer dispatch loop.
//!
//! Each iteration asks the model to pick exactly one action through the
//! fixed `pickAction` definition, resolves a handler and appends whatever
//! turns it produces. The loop stops when a handler reports completion, when
//! no action comes back, when a handler fails, on cancellation, or after
//! `max_iterations`. Handler failures and panics become a system message;
//! nothing is retried at this layer.

use super::actions::{ActionContext, ActionRegistry};
use crate::api::{GenerateConfig, Generator, ImageGenerator, ModelTier, take_first_call};
use crate::interact::{EventBus, TaskEvent};
use crate::signal::RunSignals;
use crate::task::orchestrator::panic_message;
use crate::{Call, Definition, Turn, generate_call_id};
use futures::FutureExt;
use serde::Deserialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const PICK_ACTION: &str = "pickAction";
pub const DEFAULT_MAX_ITERATIONS: u32 = 12;

/// Per-run dispatch settings.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Skip model selection on the first iteration and run this action.
    pub forced_action: Option<String>,
    pub max_iterations: u32,
    pub temperature: f32,
    pub tier: ModelTier,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            forced_action: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            temperature: 0.1,
            tier: ModelTier::Cheap,
        }
    }
}

impl DispatchOptions {
    pub fn with_forced_action(mut self, action: impl Into<String>) -> Self {
        self.forced_action = Some(action.into());
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }
}

/// Why a dispatch run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// A handler reported completion.
    Completed,
    /// The model returned no action.
    NoAction,
    /// Selection or a handler failed.
    Failed(String),
    Cancelled,
    MaxIterations,
}

#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub transcript: Vec<Turn>,
    pub iterations: u32,
    pub stop: StopReason,
}

impl DispatchResult {
    pub fn completed(&self) -> bool {
        self.stop == StopReason::Completed
    }
}

#[derive(Deserialize)]
struct PickArgs {
    action: String,
}

fn pick_definition(names: &[String]) -> Definition {
    Definition::new(
        PICK_ACTION,
        "Pick the single next action to take for the user.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": names,
                    "description": "The action to run next"
                },
                "reason": {
                    "type": "string",
                    "description": "One sentence on why"
                }
            },
            "required": ["action"]
        }),
    )
}

fn selection_prompt(registry: &ActionRegistry) -> String {
    let mut prompt = String::from(
        "Choose exactly one action for the next step. Available actions:\n",
    );
    for def in registry.definitions() {
        prompt.push_str(&format!("- {}: {}\n", def.name, def.description));
    }
    prompt
}

pub struct Dispatcher {
    generator: Arc<dyn Generator>,
    images: Option<Arc<dyn ImageGenerator>>,
    registry: ActionRegistry,
    events: EventBus,
    signals: RunSignals,
}

impl Dispatcher {
    pub fn new(generator: Arc<dyn Generator>, registry: ActionRegistry, events: EventBus) -> Self {
        Self {
            generator,
            images: None,
            registry,
            events,
            signals: RunSignals::new(),
        }
    }

    pub fn with_images(mut self, images: Arc<dyn ImageGenerator>) -> Self {
        self.images = Some(images);
        self
    }

    pub fn with_signals(mut self, signals: RunSignals) -> Self {
        self.signals = signals;
        self
    }

    pub fn signals(&self) -> &RunSignals {
        &self.signals
    }

    /// Ask the model for the next action. `Ok(None)` means no action came back.
    async fn select(
        &self,
        transcript: &[Turn],
        options: &DispatchOptions,
        definition: &Definition,
        system_prompt: &str,
    ) -> Result<Option<Call>, String> {
        let request = GenerateConfig::call(vec![definition.clone()])
            .with_required_name(PICK_ACTION)
            .with_tier(options.tier)
            .with_temperature(options.temperature)
            .with_system_prompt(system_prompt);
        let parts = self
            .signals
            .suspend(self.generator.generate(transcript, &request))
            .await
            .map_err(|e| e.to_string())??;
        let (pick, _) = take_first_call(parts);
        let Some(pick) = pick else {
            return Ok(None);
        };
        let args: PickArgs = serde_json::from_value(pick.args.clone())
            .map_err(|e| format!("invalid {PICK_ACTION} arguments: {e}"))?;
        Ok(Some(Call::new(pick.id, args.action, pick.args)))
    }

    /// Run until a stop condition. Never fails: every ending is a
    /// [`StopReason`].
    pub async fn run(&self, transcript: Vec<Turn>, options: &DispatchOptions) -> DispatchResult {
        let mut transcript = transcript;
        let definition = pick_definition(&self.registry.names());
        let system_prompt = selection_prompt(&self.registry);
        let mut iterations = 0;

        let stop = loop {
            if iterations >= options.max_iterations {
                warn!("Dispatch stopped after {iterations} iterations");
                self.events.system(&format!(
                    "Stopped after {} actions without finishing.",
                    options.max_iterations
                ));
                break StopReason::MaxIterations;
            }
            if self.signals.checkpoint().await.is_err() {
                break StopReason::Cancelled;
            }
            iterations += 1;

            let forced = (iterations == 1)
                .then(|| options.forced_action.clone())
                .flatten();
            let call = match forced {
                Some(name) => {
                    debug!("Forced action: {name}");
                    Call::new(generate_call_id("forced"), name, serde_json::json!({}))
                }
                None => match self.select(&transcript, options, &definition, &system_prompt).await {
                    Ok(Some(call)) => call,
                    Ok(None) => {
                        self.events.system("No action was selected; stopping.");
                        break StopReason::NoAction;
                    }
                    Err(_) if self.signals.is_cancelled() => break StopReason::Cancelled,
                    Err(e) => {
                        self.events.system(&format!("Action selection failed: {e}"));
                        break StopReason::Failed(e);
                    }
                },
            };

            self.events.emit(&TaskEvent::ActionSelected {
                name: &call.name,
                iteration: iterations,
            });
            let Some(handler) = self.registry.resolve(&call.name) else {
                let message = format!("No handler for action '{}'", call.name);
                self.events.system(&message);
                break StopReason::Failed(message);
            };

            let ctx = ActionContext {
                transcript: &transcript,
                call: &call,
                options,
                generator: self.generator.as_ref(),
                images: self.images.as_deref(),
                signals: &self.signals,
                events: &self.events,
            };
            let result = AssertUnwindSafe(handler.handle(ctx)).catch_unwind().await;

            if self.signals.is_cancelled() {
                break StopReason::Cancelled;
            }
            match result {
                Ok(Ok(outcome)) => {
                    transcript.extend(outcome.turns);
                    if outcome.done {
                        info!("Action '{}' completed the dispatch", call.name);
                        break StopReason::Completed;
                    }
                }
                Ok(Err(e)) => {
                    let message = format!("Action '{}' failed: {e}", call.name);
                    self.events.system(&message);
                    break StopReason::Failed(message);
                }
                Err(panic) => {
                    let message = format!(
                        "Action '{}' crashed: {}",
                        call.name,
                        panic_message(panic.as_ref())
                    );
                    self.events.system(&message);
                    break StopReason::Failed(message);
                }
            }
        };

        DispatchResult {
            transcript,
            iterations,
            stop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::builtin::SendMessageAction;
    use crate::testing::ScriptedGenerator;
    use serde_json::json;

    fn dispatcher(generator: ScriptedGenerator) -> Dispatcher {
        Dispatcher::new(
            Arc::new(generator),
            ActionRegistry::new().with_builtin(SendMessageAction),
            EventBus::noop(),
        )
    }

    #[tokio::test]
    async fn picks_and_replies() {
        let generator = ScriptedGenerator::new()
            .then_call(PICK_ACTION, json!({"action": "sendMessage"}))
            .then_text("Hello!");
        let result = dispatcher(generator.clone())
            .run(vec![Turn::user("hi")], &DispatchOptions::default())
            .await;
        assert!(result.completed());
        assert_eq!(result.iterations, 1);
        assert_eq!(result.transcript.last().unwrap().text.as_deref(), Some("Hello!"));

        let pick = &generator.requests()[0].config;
        assert_eq!(pick.required_name.as_deref(), Some(PICK_ACTION));
        assert_eq!(pick.model_tier, ModelTier::Cheap);
    }

    #[tokio::test]
    async fn no_action_aborts() {
        let result = dispatcher(ScriptedGenerator::new())
            .run(vec![Turn::user("hi")], &DispatchOptions::default())
            .await;
        assert_eq!(result.stop, StopReason::NoAction);
        assert_eq!(result.transcript.len(), 1);
    }

    #[tokio::test]
    async fn forced_action_skips_selection() {
        let generator = ScriptedGenerator::new().then_text("Continuing.");
        let options = DispatchOptions::default().with_forced_action("sendMessage");
        let result = dispatcher(generator.clone())
            .run(vec![Turn::user("go on")], &options)
            .await;
        assert!(result.completed());
        assert_eq!(generator.requests().len(), 1);
        assert!(generator.requests()[0].config.required_name.is_none());
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let d = dispatcher(ScriptedGenerator::new());
        d.signals().cancel();
        let result = d.run(vec![Turn::user("hi")], &DispatchOptions::default()).await;
        assert_eq!(result.stop, StopReason::Cancelled);
        assert_eq!(result.iterations, 0);
    }

    #[tokio::test]
    async fn handler_error_terminates() {
        // The reply generation fails, so the handler returns Err.
        let generator = ScriptedGenerator::new()
            .then_call(PICK_ACTION, json!({"action": "sendMessage"}))
            .then_error("quota exceeded");
        let result = dispatcher(generator)
            .run(vec![Turn::user("hi")], &DispatchOptions::default())
            .await;
        assert!(matches!(result.stop, StopReason::Failed(ref m) if m.contains("quota exceeded")));
    }
}
