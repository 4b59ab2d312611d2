//! `wrapContext` and `checkContext`.

use super::core::{Command, CommandContext, CommandFuture, CommandOutcome, parse_args};
use super::spec::CommandSpec;
use crate::context::{WRAP_CONTEXT, WrapSummary, compact};
use crate::{Call, Definition};
use tracing::info;

pub const CHECK_CONTEXT: &str = "checkContext";

pub struct WrapContext;

impl Command for WrapContext {
    fn definition(&self) -> Definition {
        CommandSpec::builder(WRAP_CONTEXT)
            .purpose(
                "Replace the conversation so far with a compact summary. Earlier \
                 command output is dropped; only what you write here survives",
            )
            .when_to_use(
                "When the context is near its limits, or when told to. Record \
                 everything needed to continue",
            )
            .parameters_for::<WrapSummary>()
            .output_format("The summary as it will be kept, then the new context status")
            .to_definition()
    }

    fn execute<'a>(&'a self, call: &'a Call, ctx: &'a mut CommandContext) -> CommandFuture<'a> {
        Box::pin(async move {
            let summary = match parse_args::<WrapSummary>(&call.args) {
                Ok(s) => s,
                Err(e) => return CommandOutcome::reply(e),
            };
            let before = ctx.transcript.len();
            let compacted = compact(&ctx.transcript, call, &summary, &ctx.limits);
            info!(
                before,
                after = compacted.transcript.len(),
                within_limits = compacted.within_limits,
                "Wrapped context"
            );
            let content = compacted
                .transcript
                .last()
                .and_then(|t| t.responses.first())
                .map(|r| r.content.clone())
                .unwrap_or_default();
            ctx.transcript = compacted.transcript;
            ctx.metrics = compacted.metrics;
            CommandOutcome {
                replaced_transcript: true,
                ..CommandOutcome::reply(content)
            }
        })
    }
}

pub struct CheckContext;

impl Command for CheckContext {
    fn definition(&self) -> Definition {
        CommandSpec::builder(CHECK_CONTEXT)
            .purpose("Report how much of the context budget is used")
            .when_to_use("Before a step that will produce a lot of output")
            .parameters(serde_json::json!({"type": "object", "properties": {}}))
            .to_definition()
    }

    fn execute<'a>(&'a self, _call: &'a Call, ctx: &'a mut CommandContext) -> CommandFuture<'a> {
        Box::pin(async move {
            let metrics = ctx.refresh_metrics();
            CommandOutcome::reply(ctx.limits.report(&metrics))
        })
    }
}
