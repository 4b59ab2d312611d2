//! Container task lifecycle.
//!
//! ```text
//! ProposeTask → AwaitConfirmation → PullImage → CreateContainer → StartContainer → CommandLoop → Cleanup → Done
//! ```
//!
//! Proposal, confirmation and pull touch no container. Once a container
//! exists, [`ContainerTaskOrchestrator::run`] reaches cleanup exactly once on
//! every path, including a panic inside the command loop.

use super::command_loop::{CommandLoop, LoopOutcome, TaskStatus};
use super::config::TaskConfig;
use crate::api::{GenerateConfig, Generator, take_first_call};
use crate::commands::{CommandContext, CommandRegistry, parse_args};
use crate::container::{
    AllowedImage, ContainerEngine, ContainerSession, ContainerSpec, SessionStatus,
};
use crate::error::{Result, TaskError};
use crate::interact::{ConfirmRequest, EventBus, Interaction, TaskEvent};
use crate::knowledge::KnowledgeStore;
use crate::signal::RunSignals;
use crate::{Definition, Turn, generate_call_id};
use futures::FutureExt;
use serde::Deserialize;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const PROPOSE_CONTAINER_TASK: &str = "proposeContainerTask";

/// What the model proposes to run.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskProposal {
    pub image: String,
    pub task_description: String,
    #[serde(default)]
    pub working_dir: Option<String>,
}

fn proposal_definition() -> Definition {
    Definition::new(
        PROPOSE_CONTAINER_TASK,
        "Propose a task to run in an isolated container. Pick the smallest image that \
         has the tools the task needs.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "image": {
                    "type": "string",
                    "enum": AllowedImage::references(),
                    "description": "Base image for the container"
                },
                "taskDescription": {
                    "type": "string",
                    "description": "Concrete description of what to do, including how to verify it"
                },
                "workingDir": {
                    "type": "string",
                    "description": "Absolute working directory inside the container"
                }
            },
            "required": ["image", "taskDescription"]
        }),
    )
}

/// Final report of a container task that ran (or failed to start).
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub status: TaskStatus,
    /// Redacted.
    pub summary: String,
    pub commands_executed: u32,
    /// The task transcript, redacted. Empty when no container was created.
    pub transcript: Vec<Turn>,
}

/// Result of one orchestrator run.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    /// The user said no. Nothing was pulled or created.
    Declined { reason: Option<String> },
    Finished(TaskReport),
}

impl TaskOutcome {
    /// The single response recorded for the action call in the outer
    /// transcript.
    pub fn to_response(&self) -> String {
        match self {
            TaskOutcome::Declined { reason: None } => {
                "The user declined to run the container task.".to_string()
            }
            TaskOutcome::Declined {
                reason: Some(reason),
            } => format!("The user declined to run the container task: {reason}"),
            TaskOutcome::Finished(report) => format!(
                "Container task finished with status {} after {} commands.\n{}",
                report.status, report.commands_executed, report.summary
            ),
        }
    }
}

/// Runs one container task from proposal to cleanup.
pub struct ContainerTaskOrchestrator {
    generator: Arc<dyn Generator>,
    engine: Arc<dyn ContainerEngine>,
    interaction: Arc<dyn Interaction>,
    events: EventBus,
    knowledge: KnowledgeStore,
    registry: Arc<CommandRegistry>,
    config: TaskConfig,
}

impl ContainerTaskOrchestrator {
    pub fn new(
        generator: Arc<dyn Generator>,
        engine: Arc<dyn ContainerEngine>,
        interaction: Arc<dyn Interaction>,
        events: EventBus,
    ) -> Self {
        Self {
            generator,
            engine,
            interaction,
            events,
            knowledge: KnowledgeStore::in_memory("default"),
            registry: Arc::new(CommandRegistry::with_builtins(None)),
            config: TaskConfig::default(),
        }
    }

    pub fn with_knowledge(mut self, knowledge: KnowledgeStore) -> Self {
        self.knowledge = knowledge;
        self
    }

    pub fn with_registry(mut self, registry: CommandRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_config(mut self, config: TaskConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    fn failed(&self, summary: impl Into<String>) -> TaskOutcome {
        let summary = summary.into();
        self.events.system(&summary);
        self.finish(TaskReport {
            status: TaskStatus::Failed,
            summary: self.events.secrets().redact_str(&summary).into_owned(),
            commands_executed: 0,
            transcript: Vec::new(),
        })
    }

    fn finish(&self, report: TaskReport) -> TaskOutcome {
        self.events.emit(&TaskEvent::TaskFinished {
            success: report.status == TaskStatus::Success,
            summary: &report.summary,
        });
        TaskOutcome::Finished(report)
    }

    async fn propose(&self, transcript: &[Turn], signals: &RunSignals) -> Result<TaskProposal> {
        let request = GenerateConfig::call(vec![proposal_definition()])
            .with_required_name(PROPOSE_CONTAINER_TASK)
            .with_tier(self.config.proposal_tier)
            .with_temperature(self.config.proposal_temperature)
            .with_system_prompt(format!(
                "Turn the user's request into a concrete container task. Allowed images: {}.",
                AllowedImage::references().join(", ")
            ));
        let parts = signals
            .suspend(self.generator.generate(transcript, &request))
            .await?
            .map_err(TaskError::Generation)?;
        let (call, _) = take_first_call(parts);
        let call = call.ok_or_else(|| TaskError::InvalidProposal("no proposal returned".into()))?;
        parse_args::<TaskProposal>(&call.args).map_err(TaskError::InvalidProposal)
    }

    /// Run one task against the outer transcript.
    ///
    /// Returns `Err` only for cancellation; every other failure is a
    /// `Failed` report.
    pub async fn run(&self, transcript: &[Turn], signals: &RunSignals) -> Result<TaskOutcome> {
        // ── ProposeTask ──
        let proposal = match self.propose(transcript, signals).await {
            Ok(p) => p,
            Err(TaskError::Cancelled) => return Err(TaskError::Cancelled),
            Err(e) => return Ok(self.failed(format!("Could not plan a container task: {e}"))),
        };
        let image = match AllowedImage::from_str(&proposal.image) {
            Ok(image) => image,
            Err(e) => {
                warn!("Rejected proposal: {e}");
                return Ok(self.failed(format!(
                    "Container task rejected: {e}. Allowed images: {}",
                    AllowedImage::references().join(", ")
                )));
            }
        };
        let working_dir = proposal
            .working_dir
            .filter(|d| d.starts_with('/'))
            .unwrap_or_else(|| self.config.working_dir.clone());

        // ── AwaitConfirmation ──
        let request = ConfirmRequest::new(format!(
            "Run this task in a {image} container (working directory {working_dir})?\n\n{}",
            proposal.task_description
        ))
        .with_labels("Run", "Cancel");
        let confirmation = match signals
            .suspend(self.interaction.confirm_with_answer(&request))
            .await?
        {
            Ok(c) => c,
            Err(e) => return Ok(self.failed(TaskError::Interaction(e).to_string())),
        };
        if let Some(answer) = &confirmation.answer {
            self.events.user(answer);
        }
        if !confirmation.confirmed {
            info!("Container task declined");
            self.events.system("Container task declined.");
            return Ok(TaskOutcome::Declined {
                reason: confirmation.answer,
            });
        }

        // ── PullImage ──
        self.events.system(&format!("Pulling {image}..."));
        let pull = tokio::time::timeout(self.config.pull_timeout, self.engine.pull(image));
        let pulled = match signals.suspend(pull).await? {
            Ok(result) => result,
            Err(_) => Err(TaskError::ImagePull {
                image: image.reference().to_string(),
                reason: format!("timed out after {:?}", self.config.pull_timeout),
            }),
        };
        if let Err(e) = pulled {
            error!("Image pull failed: {e}");
            return Ok(self.failed(format!("Image pull failed: {e}")));
        }

        // ── CreateContainer ──
        // Not raced against cancellation, so a created container is never lost.
        let spec = ContainerSpec::new(generate_call_id("brig"), image, working_dir.clone());
        let id = match self.engine.create(&spec).await {
            Ok(id) => id,
            Err(e) => {
                error!("Container creation failed: {e}");
                return Ok(self.failed(format!("Container creation failed: {e}")));
            }
        };
        let mut session = ContainerSession {
            id,
            image,
            working_dir,
            status: SessionStatus::Created,
        };
        if let Err(e) = self.engine.start(&session.id).await {
            error!(container = %session.id, "Container start failed: {e}");
            self.cleanup(&mut session).await;
            return Ok(self.failed(format!("Container start failed: {e}")));
        }
        session.status = SessionStatus::Running;
        info!(container = %session.id, "Container started");

        // ── CommandLoop ──
        let mut task_prompt = format!("Task: {}", proposal.task_description);
        if let Some(answer) = confirmation.answer {
            task_prompt.push_str(&format!("\nUser note: {answer}"));
        }
        let mut ctx = CommandContext::new(
            session,
            self.engine.clone(),
            self.interaction.clone(),
            self.events.clone(),
        )
        .with_knowledge(self.knowledge.clone())
        .with_signals(signals.clone())
        .with_limits(self.config.limits)
        .with_output_limits(self.config.output_limits)
        .with_host_root(self.config.host_root.clone())
        .with_transcript(vec![Turn::user(task_prompt)]);

        let command_loop = CommandLoop::new(self.generator.as_ref(), &self.registry, &self.config);
        let result = AssertUnwindSafe(command_loop.run(&mut ctx))
            .catch_unwind()
            .await;

        // ── Cleanup ──
        self.cleanup(&mut ctx.session).await;

        let loop_outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(TaskError::Cancelled)) => {
                self.events.system("Container task cancelled.");
                return Err(TaskError::Cancelled);
            }
            Ok(Err(e)) => LoopOutcome {
                status: TaskStatus::Failed,
                summary: format!("Task aborted: {e}"),
                commands_executed: ctx.commands_executed,
            },
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Command loop panicked: {message}");
                LoopOutcome {
                    status: TaskStatus::Failed,
                    summary: format!("Task aborted by an internal error: {message}"),
                    commands_executed: ctx.commands_executed,
                }
            }
        };

        let secrets = self.events.secrets();
        Ok(self.finish(TaskReport {
            status: loop_outcome.status,
            summary: secrets.redact_str(&loop_outcome.summary).into_owned(),
            commands_executed: loop_outcome.commands_executed,
            transcript: secrets.redact(&ctx.transcript),
        }))
    }

    /// Stop then remove. Errors are logged, never propagated.
    async fn cleanup(&self, session: &mut ContainerSession) {
        info!(container = %session.id, "Cleaning up container");
        match self.engine.stop(&session.id).await {
            Ok(()) => session.status = SessionStatus::Stopped,
            Err(e) => warn!(container = %session.id, "Failed to stop container: {e}"),
        }
        if let Err(e) = self.engine.remove(&session.id).await {
            warn!(container = %session.id, "Failed to remove container: {e}");
        }
        session.status = SessionStatus::Removed;
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
