//! The inner command loop.
//!
//! Each turn asks the model for exactly one command call, dispatches it
//! through the [`CommandRegistry`] and appends the call/response pair to the
//! task transcript held in [`CommandContext::transcript`]. The loop alone
//! counts executed commands. After every turn it re-measures the transcript;
//! when a limit is exceeded the next turn is pinned to `wrapContext`.

use super::config::TaskConfig;
use crate::api::{GenerateConfig, Generator, collect_text, take_first_call};
use crate::commands::{CommandContext, CommandOutcome, CommandRegistry, LoopSignal};
use crate::context::{BudgetBreach, ContextMetrics, WRAP_CONTEXT};
use crate::error::{Result, TaskError};
use crate::interact::TaskEvent;
use crate::{CallResponse, Turn};
use tracing::{debug, info, warn};

/// Final status of a container task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Success,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Success => write!(f, "Success"),
            TaskStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// How the command loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub status: TaskStatus,
    pub summary: String,
    pub commands_executed: u32,
}

const NUDGE: &str = "Reply with exactly one command call. Use sendMessage to talk to the \
                     user, completeTask when the task is done, or failTask if it cannot be done.";

pub struct CommandLoop<'a> {
    generator: &'a dyn Generator,
    registry: &'a CommandRegistry,
    config: &'a TaskConfig,
}

impl<'a> CommandLoop<'a> {
    pub fn new(
        generator: &'a dyn Generator,
        registry: &'a CommandRegistry,
        config: &'a TaskConfig,
    ) -> Self {
        Self {
            generator,
            registry,
            config,
        }
    }

    fn system_prompt(
        &self,
        ctx: &CommandContext,
        metrics: &ContextMetrics,
        force_wrap: Option<BudgetBreach>,
    ) -> String {
        let mut prompt = format!(
            "You are working inside an isolated {image} container. The working directory \
             is {dir}. Project files are not mounted: use copyToContainer to bring them in \
             and copyFromContainer to deliver results.\n\
             Call exactly one command per turn. Finish with completeTask, or failTask if the \
             task cannot be done.\n\n\
             Commands used: {executed}/{max}.\n{report}",
            image = ctx.session.image,
            dir = ctx.session.working_dir,
            executed = ctx.commands_executed,
            max = self.config.max_commands,
            report = ctx.limits.report(metrics),
        );
        if let Some(plan) = &ctx.plan {
            prompt.push_str("\n\nCurrent execution plan:\n");
            prompt.push_str(&plan.render());
        }
        if let Some(breach) = force_wrap {
            prompt.push_str(&format!(
                "\n\nThe context exceeds its limits on {breach}. Call wrapContext now and \
                 carry forward everything needed to finish the task."
            ));
        }
        prompt
    }

    /// Run until a command ends the task, the command cap is reached, or
    /// cancellation is observed (`Err(TaskError::Cancelled)`).
    ///
    /// Generation failures end the loop with `Err(TaskError::Generation)`;
    /// command failures never do.
    pub async fn run(&self, ctx: &mut CommandContext) -> Result<LoopOutcome> {
        let max = self.config.max_commands;
        let definitions = self.registry.definitions();
        let can_wrap = self.registry.contains(WRAP_CONTEXT);
        let mut force_wrap: Option<BudgetBreach> = None;

        loop {
            ctx.signals.checkpoint().await?;

            if ctx.commands_executed >= max {
                let reason = format!(
                    "Task not completed: {}.",
                    TaskError::MaxCommandsExceeded(max)
                );
                warn!("{reason}");
                return Ok(LoopOutcome {
                    status: TaskStatus::Failed,
                    summary: reason,
                    commands_executed: ctx.commands_executed,
                });
            }

            let metrics = ctx.refresh_metrics();
            let mut request = GenerateConfig::call(definitions.clone())
                .with_tier(self.config.command_tier)
                .with_temperature(self.config.command_temperature)
                .with_system_prompt(self.system_prompt(ctx, &metrics, force_wrap));
            if force_wrap.is_some() && can_wrap {
                request = request.with_required_name(WRAP_CONTEXT);
            }

            let parts = ctx
                .signals
                .suspend(self.generator.generate(&ctx.transcript, &request))
                .await?
                .map_err(TaskError::Generation)?;
            let text = collect_text(&parts);
            let (call, total) = take_first_call(parts);

            let Some(call) = call else {
                debug!("Model replied without a command call; nudging");
                if !text.trim().is_empty() {
                    ctx.events.assistant(&text);
                    ctx.transcript.push(Turn::assistant(text));
                }
                ctx.transcript.push(Turn::user(NUDGE));
                ctx.commands_executed += 1;
                continue;
            };
            if total > 1 {
                warn!(
                    "Model returned {total} command calls; dispatching only '{}'",
                    call.name
                );
            }

            ctx.events.emit(&TaskEvent::CommandStart {
                name: &call.name,
                turn: ctx.commands_executed + 1,
                max_commands: max,
                metrics: &metrics,
            });
            ctx.transcript.push(Turn::call(call.clone()));

            let outcome = if force_wrap.is_some() && can_wrap && call.name != WRAP_CONTEXT {
                CommandOutcome::error(
                    "the context exceeds its limits. Call wrapContext before any other command.",
                )
            } else {
                self.registry.execute(&call, ctx).await
            };

            // Abandon the turn without recording it.
            if ctx.signals.is_cancelled() {
                info!("Cancelled during {}", call.name);
                return Err(TaskError::Cancelled);
            }

            ctx.events.emit(&TaskEvent::CommandResult {
                name: &call.name,
                content: &outcome.content,
            });
            if !outcome.replaced_transcript {
                ctx.transcript
                    .push(Turn::responses(vec![CallResponse::to(&call, outcome.content)]));
            }
            ctx.commands_executed += 1;

            match outcome.signal {
                LoopSignal::Complete { summary } => {
                    return Ok(LoopOutcome {
                        status: TaskStatus::Success,
                        summary,
                        commands_executed: ctx.commands_executed,
                    });
                }
                LoopSignal::Fail { reason } => {
                    return Ok(LoopOutcome {
                        status: TaskStatus::Failed,
                        summary: reason,
                        commands_executed: ctx.commands_executed,
                    });
                }
                LoopSignal::Continue => {}
            }

            let metrics = ctx.refresh_metrics();
            force_wrap = ctx.limits.breach(&metrics);
            if let Some(breach) = force_wrap {
                ctx.events.emit(&TaskEvent::ForcedWrap {
                    breach,
                    metrics: &metrics,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::task::{COMPLETE_TASK, FAIL_TASK};
    use crate::container::ExecOutput;
    use crate::context::ContextLimits;
    use crate::testing::{FakeEngine, ScriptedGenerator, ScriptedInteraction, context_with};
    use serde_json::json;

    fn ctx(engine: FakeEngine) -> CommandContext {
        context_with(engine, ScriptedInteraction::new())
            .with_transcript(vec![Turn::user("Task: print hello")])
    }

    #[tokio::test]
    async fn runs_until_complete() {
        let engine = FakeEngine::new().with_exec_output(ExecOutput {
            exit_code: 0,
            stdout: "hello world\n".into(),
            stderr: String::new(),
        });
        let generator = ScriptedGenerator::new()
            .then_call("runCommand", json!({"command": "echo \"hello world\""}))
            .then_call(COMPLETE_TASK, json!({"summary": "printed hello"}));
        let registry = CommandRegistry::with_builtins(None);
        let config = TaskConfig::default();
        let mut ctx = ctx(engine.clone());

        let outcome = CommandLoop::new(&generator, &registry, &config)
            .run(&mut ctx)
            .await
            .unwrap();
        assert_eq!(outcome.status, TaskStatus::Success);
        assert_eq!(outcome.summary, "printed hello");
        assert_eq!(outcome.commands_executed, 2);
        assert!(crate::render_transcript(&ctx.transcript).contains("hello world"));
    }

    #[tokio::test]
    async fn only_first_call_is_dispatched() {
        let engine = FakeEngine::new();
        let first = crate::Call::new("a", "runCommand", json!({"command": "first"}));
        let second = crate::Call::new("b", "runCommand", json!({"command": "second"}));
        let generator = ScriptedGenerator::new()
            .then_parts(vec![
                crate::api::Part::Call(first),
                crate::api::Part::Call(second),
            ])
            .then_call(FAIL_TASK, json!({"reason": "stop"}));
        let registry = CommandRegistry::with_builtins(None);
        let config = TaskConfig::default();
        let mut ctx = ctx(engine.clone());

        CommandLoop::new(&generator, &registry, &config)
            .run(&mut ctx)
            .await
            .unwrap();
        assert_eq!(engine.exec_scripts(), vec!["first".to_string()]);
    }

    #[tokio::test]
    async fn cap_fails_the_task() {
        let mut generator = ScriptedGenerator::new();
        for _ in 0..5 {
            generator = generator.then_call("runCommand", json!({"command": "true"}));
        }
        let registry = CommandRegistry::with_builtins(None);
        let config = TaskConfig::default().with_max_commands(3);
        let mut ctx = ctx(FakeEngine::new());

        let outcome = CommandLoop::new(&generator, &registry, &config)
            .run(&mut ctx)
            .await
            .unwrap();
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert_eq!(outcome.commands_executed, 3);
        assert!(outcome.summary.contains("maximum of 3 commands"));
        assert_eq!(generator.remaining(), 2);
    }

    #[tokio::test]
    async fn breach_forces_wrap_on_next_turn() {
        let generator = ScriptedGenerator::new()
            .then_call("runCommand", json!({"command": "ls"}))
            .then_call("runCommand", json!({"command": "ls again"}))
            .then_call(WRAP_CONTEXT, json!({"summary": "listed files"}))
            .then_call(COMPLETE_TASK, json!({"summary": "done"}));
        let registry = CommandRegistry::with_builtins(None);
        let config = TaskConfig::default();
        let engine = FakeEngine::new().with_exec_output(ExecOutput {
            exit_code: 0,
            stdout: "x".repeat(2000),
            stderr: String::new(),
        });
        let mut ctx = ctx(engine.clone()).with_limits(ContextLimits::default().with_max_tokens(300));

        let outcome = CommandLoop::new(&generator, &registry, &config)
            .run(&mut ctx)
            .await
            .unwrap();
        assert_eq!(outcome.status, TaskStatus::Success);

        let requests = generator.requests();
        assert_eq!(requests[0].config.required_name, None);
        assert_eq!(requests[1].config.required_name.as_deref(), Some(WRAP_CONTEXT));
        // The non-wrap call made while forced was refused.
        assert_eq!(engine.exec_scripts(), vec!["ls".to_string()]);
        assert_eq!(requests[3].transcript.len(), 3);
        assert!(requests[3].config.required_name.is_none());
    }

    #[tokio::test]
    async fn free_text_counts_as_a_turn() {
        let generator = ScriptedGenerator::new()
            .then_text("I think I should list files.")
            .then_call(COMPLETE_TASK, json!({"summary": "ok"}));
        let registry = CommandRegistry::with_builtins(None);
        let config = TaskConfig::default();
        let mut ctx = ctx(FakeEngine::new());

        let outcome = CommandLoop::new(&generator, &registry, &config)
            .run(&mut ctx)
            .await
            .unwrap();
        assert_eq!(outcome.commands_executed, 2);
        assert!(ctx.transcript.iter().any(|t| t.text.as_deref() == Some(NUDGE)));
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let generator = ScriptedGenerator::new().then_call("runCommand", json!({"command": "ls"}));
        let registry = CommandRegistry::with_builtins(None);
        let config = TaskConfig::default();
        let mut ctx = ctx(FakeEngine::new());
        ctx.signals.cancel();

        let err = CommandLoop::new(&generator, &registry, &config)
            .run(&mut ctx)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(generator.requests().is_empty());
    }
}
