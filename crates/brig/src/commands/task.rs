//! `completeTask` and `failTask`: the only commands that end a task.

use super::core::{Command, CommandContext, CommandFuture, CommandOutcome, parse_args};
use super::spec::CommandSpec;
use crate::{Call, Definition};
use schemars::JsonSchema;
use serde::Deserialize;

pub const COMPLETE_TASK: &str = "completeTask";
pub const FAIL_TASK: &str = "failTask";

#[derive(Deserialize, JsonSchema)]
pub struct CompleteTaskArgs {
    /// What was accomplished, for the user.
    pub summary: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct FailTaskArgs {
    /// Why the task cannot be completed.
    pub reason: String,
}

pub struct CompleteTask;

impl Command for CompleteTask {
    fn definition(&self) -> Definition {
        CommandSpec::builder(COMPLETE_TASK)
            .purpose("Finish the task successfully and report a summary to the user")
            .when_to_use("Once the task is done and you have verified the result")
            .when_not_to_use("While work remains or the result is unverified")
            .parameters_for::<CompleteTaskArgs>()
            .to_definition()
    }

    fn execute<'a>(&'a self, call: &'a Call, _ctx: &'a mut CommandContext) -> CommandFuture<'a> {
        Box::pin(async move {
            match parse_args::<CompleteTaskArgs>(&call.args) {
                Ok(args) => CommandOutcome::complete(args.summary),
                Err(e) => CommandOutcome::reply(e),
            }
        })
    }
}

pub struct FailTask;

impl Command for FailTask {
    fn definition(&self) -> Definition {
        CommandSpec::builder(FAIL_TASK)
            .purpose("Give up on the task and explain why")
            .when_to_use("When the task cannot be completed in this container")
            .when_not_to_use("For recoverable errors; fix them and continue instead")
            .parameters_for::<FailTaskArgs>()
            .to_definition()
    }

    fn execute<'a>(&'a self, call: &'a Call, _ctx: &'a mut CommandContext) -> CommandFuture<'a> {
        Box::pin(async move {
            match parse_args::<FailTaskArgs>(&call.args) {
                Ok(args) => CommandOutcome::fail(args.reason),
                Err(e) => CommandOutcome::reply(e),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::LoopSignal;
    use crate::testing::{FakeEngine, ScriptedInteraction, context_with};
    use serde_json::json;

    #[tokio::test]
    async fn complete_and_fail_signal_the_loop() {
        let mut ctx = context_with(FakeEngine::new(), ScriptedInteraction::new());

        let call = Call::new("1", COMPLETE_TASK, json!({"summary": "printed hello"}));
        let out = CompleteTask.execute(&call, &mut ctx).await;
        assert_eq!(
            out.signal,
            LoopSignal::Complete {
                summary: "printed hello".into()
            }
        );

        let call = Call::new("2", FAIL_TASK, json!({"reason": "cannot proceed"}));
        let out = FailTask.execute(&call, &mut ctx).await;
        assert!(out.should_break_outer());
        assert!(out.content.contains("cannot proceed"));
    }

    #[tokio::test]
    async fn missing_summary_is_recoverable() {
        let mut ctx = context_with(FakeEngine::new(), ScriptedInteraction::new());
        let out = CompleteTask
            .execute(&Call::new("1", COMPLETE_TASK, json!({})), &mut ctx)
            .await;
        assert!(out.is_error());
        assert!(!out.should_break_outer());
    }
}
