//! `runCommand`: shell execution inside the task container.

use super::core::{Command, CommandContext, CommandFuture, CommandOutcome, parse_args, truncate_output};
use super::spec::CommandSpec;
use crate::container::{ExecOutput, ExecRequest};
use crate::interact::LogLevel;
use crate::{Call, Definition};
use schemars::JsonSchema;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const RUN_COMMAND: &str = "runCommand";

/// Default exec timeout when the model does not ask for one.
const DEFAULT_TIMEOUT_SECS: u64 = 300;
const MAX_TIMEOUT_SECS: u64 = 1800;

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunCommandArgs {
    /// Shell command, run with `sh -c` (e.g. 'cargo test 2>&1 | tail -20').
    pub command: String,
    /// Directory to run in; defaults to the task working directory.
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Seconds before the command is abandoned (default 300, max 1800).
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

pub struct RunCommand;

/// Render an exec result as model-facing text.
pub fn format_exec(output: &ExecOutput, max_bytes: usize, max_lines: usize) -> String {
    let mut text = format!("Exit code: {}\n", output.exit_code);
    text.push_str("STDOUT:\n");
    text.push_str(&truncate_output(&output.stdout, max_bytes, max_lines));
    if !output.stderr.is_empty() {
        text.push_str("\nSTDERR:\n");
        text.push_str(&truncate_output(&output.stderr, max_bytes, max_lines));
    }
    text
}

impl Command for RunCommand {
    fn definition(&self) -> Definition {
        CommandSpec::builder(RUN_COMMAND)
            .purpose("Run a shell command inside the task container")
            .when_to_use(
                "To build, test, install packages, inspect the file system or run \
                 any program in the container",
            )
            .when_not_to_use("To read or write a single file; use viewFile or editFile")
            .parameters_for::<RunCommandArgs>()
            .example(
                "runCommand(command='echo \"hello world\"')",
                "Exit code: 0\nSTDOUT:\nhello world",
            )
            .output_format(
                "Exit code, then STDOUT and STDERR. Long output is truncated to 16 KiB \
                 or 500 lines per stream",
            )
            .to_definition()
    }

    fn execute<'a>(&'a self, call: &'a Call, ctx: &'a mut CommandContext) -> CommandFuture<'a> {
        Box::pin(async move {
            let args = match parse_args::<RunCommandArgs>(&call.args) {
                Ok(a) => a,
                Err(e) => return CommandOutcome::reply(e),
            };
            let dir = match &args.working_dir {
                Some(dir) => ctx.session.resolve(dir),
                None => ctx.session.working_dir.clone(),
            };
            let request = ExecRequest::shell(args.command.clone()).in_dir(dir);
            let limit = Duration::from_secs(
                args.timeout_seconds
                    .unwrap_or(DEFAULT_TIMEOUT_SECS)
                    .clamp(1, MAX_TIMEOUT_SECS),
            );

            ctx.events.container_log(LogLevel::Info, &format!("$ {}", args.command), None);
            let engine = ctx.engine.clone();
            let exec = tokio::time::timeout(limit, engine.exec(&ctx.session.id, &request));
            let result = match ctx.signals.suspend(exec).await {
                Ok(result) => result,
                Err(e) => return CommandOutcome::error(e),
            };

            match result {
                Ok(Ok(output)) => {
                    debug!(exit_code = output.exit_code, "runCommand finished");
                    let limits = ctx.output_limits;
                    CommandOutcome::reply(format_exec(&output, limits.max_bytes, limits.max_lines))
                }
                Ok(Err(e)) => {
                    ctx.events.container_log(LogLevel::Error, &e.to_string(), None);
                    CommandOutcome::error(e)
                }
                Err(_) => CommandOutcome::error(format!(
                    "command timed out after {} seconds",
                    limit.as_secs()
                )),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeEngine, ScriptedInteraction, context_with};
    use serde_json::json;

    #[tokio::test]
    async fn reports_exit_code_and_streams() {
        let engine = FakeEngine::new().with_exec_output(ExecOutput {
            exit_code: 2,
            stdout: "partial".into(),
            stderr: "boom".into(),
        });
        let mut ctx = context_with(engine.clone(), ScriptedInteraction::new());
        let call = Call::new("1", RUN_COMMAND, json!({"command": "make"}));
        let out = RunCommand.execute(&call, &mut ctx).await;
        assert!(out.content.starts_with("Exit code: 2"));
        assert!(out.content.contains("STDOUT:\npartial"));
        assert!(out.content.contains("STDERR:\nboom"));
        assert_eq!(engine.exec_scripts(), vec!["make".to_string()]);
    }

    #[tokio::test]
    async fn exec_failure_becomes_content() {
        let engine = FakeEngine::new().failing_exec("connection reset");
        let mut ctx = context_with(engine, ScriptedInteraction::new());
        let call = Call::new("1", RUN_COMMAND, json!({"command": "ls"}));
        let out = RunCommand.execute(&call, &mut ctx).await;
        assert!(out.is_error());
        assert!(out.content.contains("connection reset"));
    }

    #[test]
    fn long_output_is_truncated() {
        let output = ExecOutput {
            exit_code: 0,
            stdout: "z\n".repeat(2000),
            stderr: String::new(),
        };
        let text = format_exec(&output, 16 * 1024, 500);
        assert!(text.contains("showing 500 of 2000 lines"));
        assert!(!text.contains("STDERR"));
    }
}
