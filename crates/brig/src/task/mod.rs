//! Container tasks.
//!
//! - [`config`]: [`TaskConfig`] with caps, limits and model tiers.
//! - [`command_loop`]: [`CommandLoop`], one command per turn until the task ends.
//! - [`orchestrator`]: [`ContainerTaskOrchestrator`], the lifecycle around it.

pub mod command_loop;
pub mod config;
pub mod orchestrator;

pub use command_loop::{CommandLoop, LoopOutcome, TaskStatus};
pub use config::{DEFAULT_MAX_COMMANDS, DEFAULT_WORKING_DIR, TaskConfig};
pub use orchestrator::{
    ContainerTaskOrchestrator, PROPOSE_CONTAINER_TASK, TaskOutcome, TaskProposal, TaskReport,
};
