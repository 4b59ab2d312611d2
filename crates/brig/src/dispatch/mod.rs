//! Outer action dispatch.
//!
//! - [`actions`]: [`ActionHandler`] contract and [`ActionRegistry`].
//! - [`builtin`]: `sendMessage` and `runContainerTask`.
//! - [`dispatch_loop`]: [`Dispatcher`], one action per iteration.

pub mod actions;
pub mod builtin;
pub mod dispatch_loop;

pub use actions::{
    ActionContext, ActionFuture, ActionHandler, ActionOutcome, ActionRegistry, SEND_MESSAGE_ACTION,
};
pub use builtin::{ContainerTaskAction, RUN_CONTAINER_TASK_ACTION, SendMessageAction};
pub use dispatch_loop::{
    DEFAULT_MAX_ITERATIONS, DispatchOptions, DispatchResult, Dispatcher, PICK_ACTION, StopReason,
};

use crate::task::ContainerTaskOrchestrator;
use std::sync::Arc;

impl ActionRegistry {
    /// The built-in actions.
    pub fn with_defaults(orchestrator: Arc<ContainerTaskOrchestrator>) -> Self {
        Self::new()
            .with_builtin(SendMessageAction)
            .with_builtin(ContainerTaskAction::new(orchestrator))
    }
}
