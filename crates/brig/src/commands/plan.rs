//! Execution plan state and the commands that maintain it.

use super::core::{Command, CommandContext, CommandFuture, CommandOutcome, parse_args};
use super::spec::CommandSpec;
use crate::{Call, Definition};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const SET_EXECUTION_PLAN: &str = "setExecutionPlan";
pub const UPDATE_EXECUTION_PLAN: &str = "updateExecutionPlan";

/// Free-text plan for one container task.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    /// Ordered steps to finish the task.
    pub plan: String,
    /// What has been done so far.
    #[serde(default)]
    pub progress: String,
    /// The next concrete action.
    #[serde(default)]
    pub next_step: String,
}

impl ExecutionPlan {
    pub fn render(&self) -> String {
        let mut out = format!("Plan:\n{}", self.plan.trim());
        if !self.progress.trim().is_empty() {
            out.push_str(&format!("\nProgress:\n{}", self.progress.trim()));
        }
        if !self.next_step.trim().is_empty() {
            out.push_str(&format!("\nNext step: {}", self.next_step.trim()));
        }
        out
    }
}

/// Partial update; omitted fields keep their value.
#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlanArgs {
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub progress: Option<String>,
    #[serde(default)]
    pub next_step: Option<String>,
}

pub struct SetExecutionPlan;

impl Command for SetExecutionPlan {
    fn definition(&self) -> Definition {
        CommandSpec::builder(SET_EXECUTION_PLAN)
            .purpose("Record the plan for this task. Replaces any existing plan")
            .when_to_use("Early in a task with more than a couple of steps")
            .parameters_for::<ExecutionPlan>()
            .to_definition()
    }

    fn execute<'a>(&'a self, call: &'a Call, ctx: &'a mut CommandContext) -> CommandFuture<'a> {
        Box::pin(async move {
            match parse_args::<ExecutionPlan>(&call.args) {
                Ok(plan) => {
                    let rendered = plan.render();
                    ctx.plan = Some(plan);
                    CommandOutcome::reply(format!("Execution plan set.\n{rendered}"))
                }
                Err(e) => CommandOutcome::reply(e),
            }
        })
    }
}

pub struct UpdateExecutionPlan;

impl Command for UpdateExecutionPlan {
    fn definition(&self) -> Definition {
        CommandSpec::builder(UPDATE_EXECUTION_PLAN)
            .purpose("Update progress, next step or the plan itself")
            .when_to_use("After finishing a step or when the plan changes")
            .when_not_to_use("Before setExecutionPlan has been called")
            .parameters_for::<UpdatePlanArgs>()
            .to_definition()
    }

    fn execute<'a>(&'a self, call: &'a Call, ctx: &'a mut CommandContext) -> CommandFuture<'a> {
        Box::pin(async move {
            let args = match parse_args::<UpdatePlanArgs>(&call.args) {
                Ok(a) => a,
                Err(e) => return CommandOutcome::reply(e),
            };
            let Some(plan) = ctx.plan.as_mut() else {
                return CommandOutcome::error("no execution plan yet; call setExecutionPlan first");
            };
            if let Some(p) = args.plan {
                plan.plan = p;
            }
            if let Some(p) = args.progress {
                plan.progress = p;
            }
            if let Some(n) = args.next_step {
                plan.next_step = n;
            }
            CommandOutcome::reply(format!("Execution plan updated.\n{}", plan.render()))
        })
    }
}
