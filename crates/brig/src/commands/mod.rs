//! Commands the model can run inside a container task.
//!
//! | Command | Module | Description |
//! |---------|--------|-------------|
//! | `completeTask` / `failTask` | [`task`] | End the task |
//! | `sendMessage` | [`message`] | Talk to the user, optionally wait for a reply |
//! | `runCommand` | [`shell`] | Shell exec with truncated output |
//! | `viewFile` / `editFile` | [`files`] | Read, replace or patch one file |
//! | `copyToContainer` / `copyFromContainer` | [`transfer`] | Host ↔ container archives |
//! | `requestSecret` | [`secret`] | Out-of-band credential entry |
//! | `setExecutionPlan` / `updateExecutionPlan` | [`plan`] | Plan state |
//! | `wrapContext` / `checkContext` | [`context`] | Compaction and budget report |
//! | `gainKnowledge` / `queryKnowledge` / `forgetKnowledge` | [`knowledge`] | Cross-task memory |
//! | `webSearch` | [`search`] | Brave Search, when configured |

pub mod context;
pub mod core;
pub mod files;
pub mod knowledge;
pub mod message;
pub mod plan;
pub mod search;
pub mod secret;
pub mod shell;
pub mod spec;
pub mod task;
pub mod transfer;

pub use self::core::{
    Command, CommandContext, CommandFuture, CommandOutcome, CommandRegistry, LoopSignal,
    OutputLimits, parse_args, truncate_output, truncate_result, validate_args,
};
pub use plan::ExecutionPlan;
pub use spec::CommandSpec;

impl CommandRegistry {
    /// Every built-in command. `webSearch` is added only when a search
    /// client is supplied.
    pub fn with_builtins(search: Option<search::WebSearch>) -> Self {
        let registry = Self::new()
            .with(task::CompleteTask)
            .with(task::FailTask)
            .with(message::SendMessage)
            .with(shell::RunCommand)
            .with(files::ViewFile)
            .with(files::EditFile)
            .with(transfer::CopyToContainer)
            .with(transfer::CopyFromContainer)
            .with(secret::RequestSecret)
            .with(plan::SetExecutionPlan)
            .with(plan::UpdateExecutionPlan)
            .with(context::WrapContext)
            .with(context::CheckContext)
            .with(knowledge::GainKnowledge)
            .with(knowledge::QueryKnowledge)
            .with(knowledge::ForgetKnowledge);
        match search {
            Some(search) => registry.with(search),
            None => registry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::WRAP_CONTEXT;

    #[test]
    fn builtins_are_registered() {
        let registry = CommandRegistry::with_builtins(None);
        assert_eq!(registry.len(), 16);
        for name in [
            task::COMPLETE_TASK,
            task::FAIL_TASK,
            shell::RUN_COMMAND,
            files::EDIT_FILE,
            transfer::COPY_FROM_CONTAINER,
            secret::REQUEST_SECRET,
            WRAP_CONTEXT,
            knowledge::QUERY_KNOWLEDGE,
        ] {
            assert!(registry.contains(name), "missing {name}");
        }
        assert!(!registry.contains(search::WEB_SEARCH));

        let with_search = CommandRegistry::with_builtins(Some(search::WebSearch::new("key")));
        assert!(with_search.contains(search::WEB_SEARCH));
    }

    #[test]
    fn builtin_schemas_are_objects() {
        for def in CommandRegistry::with_builtins(None).definitions() {
            assert_eq!(def.parameters["type"], "object", "{}", def.name);
            assert!(!def.description.is_empty());
        }
    }
}
