//! Built-in actions: `sendMessage` and `runContainerTask`.

use super::actions::{ActionContext, ActionFuture, ActionHandler, ActionOutcome, SEND_MESSAGE_ACTION};
use crate::api::{GenerateConfig, ModelTier, collect_text};
use crate::error::TaskError;
use crate::task::ContainerTaskOrchestrator;
use crate::{CallResponse, Definition, Turn};
use std::sync::Arc;

pub const RUN_CONTAINER_TASK_ACTION: &str = "runContainerTask";

/// Reply to the user in plain text. Ends the dispatch.
pub struct SendMessageAction;

impl ActionHandler for SendMessageAction {
    fn definition(&self) -> Definition {
        Definition::new(
            SEND_MESSAGE_ACTION,
            "Reply to the user in plain text: answer a question, report results, or ask \
             for clarification.",
            serde_json::json!({"type": "object", "properties": {}}),
        )
    }

    fn handle<'a>(&'a self, ctx: ActionContext<'a>) -> ActionFuture<'a> {
        Box::pin(async move {
            let request = GenerateConfig::text().with_tier(ModelTier::Main);
            let parts = ctx
                .signals
                .suspend(ctx.generator.generate(ctx.transcript, &request))
                .await
                .map_err(|e| e.to_string())??;
            let text = collect_text(&parts);
            if text.trim().is_empty() {
                return Err("the model returned an empty reply".into());
            }
            ctx.events.assistant(&text);
            Ok(ActionOutcome::done(vec![Turn::assistant(text)]))
        })
    }
}

/// Run a multi-step task in an ephemeral container.
///
/// Records the action call and exactly one response carrying the task's
/// final status, then lets the dispatch loop continue so the model can tell
/// the user about it.
pub struct ContainerTaskAction {
    orchestrator: Arc<ContainerTaskOrchestrator>,
}

impl ContainerTaskAction {
    pub fn new(orchestrator: Arc<ContainerTaskOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

impl ActionHandler for ContainerTaskAction {
    fn definition(&self) -> Definition {
        Definition::new(
            RUN_CONTAINER_TASK_ACTION,
            "Run a multi-step task (build, test, install, script) in an isolated, \
             ephemeral container after the user confirms.",
            serde_json::json!({"type": "object", "properties": {}}),
        )
    }

    fn handle<'a>(&'a self, ctx: ActionContext<'a>) -> ActionFuture<'a> {
        Box::pin(async move {
            let outcome = match self.orchestrator.run(ctx.transcript, ctx.signals).await {
                Ok(outcome) => outcome,
                Err(TaskError::Cancelled) => return Err("cancelled".into()),
                Err(e) => return Err(e.to_string()),
            };
            let call = ctx.call;
            Ok(ActionOutcome::more(vec![
                Turn::call(call.clone()),
                Turn::responses(vec![CallResponse::to(call, outcome.to_response())]),
            ]))
        })
    }
}
