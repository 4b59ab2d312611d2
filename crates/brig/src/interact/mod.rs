//! Human interaction and observability.
//!
//! - [`Interaction`] is the contract the loops use to ask a person something:
//!   a yes/no confirmation with an optional reason, a free-text answer, or a
//!   secret. [`terminal::TerminalInteraction`] implements it over stdin, and
//!   [`AutoInteraction`] answers without a person.
//! - [`events`] is the one-way observability bus.

pub mod events;
pub mod terminal;

pub use events::{
    CompositeEventHandler, EventBus, EventHandler, EventObserver, LogLevel, LoggingHandler,
    NoopHandler, TaskEvent,
};
pub use terminal::TerminalInteraction;

use std::future::Future;
use std::pin::Pin;

/// A yes/no question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmRequest {
    pub prompt: String,
    pub yes_label: String,
    pub no_label: String,
    /// Answer used when the user just presses enter.
    pub default: bool,
}

impl ConfirmRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            yes_label: "yes".into(),
            no_label: "no".into(),
            default: false,
        }
    }

    pub fn with_labels(mut self, yes: impl Into<String>, no: impl Into<String>) -> Self {
        self.yes_label = yes.into();
        self.no_label = no.into();
        self
    }

    pub fn with_default(mut self, default: bool) -> Self {
        self.default = default;
        self
    }
}

/// The user's decision plus any free text they added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub confirmed: bool,
    pub answer: Option<String>,
}

pub type InteractFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, String>> + Send + 'a>>;

/// Human-interaction contract.
pub trait Interaction: Send + Sync {
    fn confirm_with_answer<'a>(&'a self, request: &'a ConfirmRequest)
    -> InteractFuture<'a, Confirmation>;

    fn ask_for_input<'a>(&'a self, label: &'a str, prompt: &'a str) -> InteractFuture<'a, String>;

    /// `None` means the user declined.
    fn ask_for_secret<'a>(&'a self, prompt: &'a str) -> InteractFuture<'a, Option<String>>;
}

/// Non-interactive answers for unattended runs.
///
/// Confirms (or rejects) every proposal, answers free-text questions with a
/// fixed reply and declines every secret request.
#[derive(Debug, Clone)]
pub struct AutoInteraction {
    pub confirm: bool,
    pub reply: String,
}

impl AutoInteraction {
    pub fn approve_all() -> Self {
        Self {
            confirm: true,
            reply: "Proceed as you see fit.".into(),
        }
    }
}

impl Interaction for AutoInteraction {
    fn confirm_with_answer<'a>(
        &'a self,
        _request: &'a ConfirmRequest,
    ) -> InteractFuture<'a, Confirmation> {
        Box::pin(async move {
            Ok(Confirmation {
                confirmed: self.confirm,
                answer: None,
            })
        })
    }

    fn ask_for_input<'a>(&'a self, _label: &'a str, _prompt: &'a str) -> InteractFuture<'a, String> {
        Box::pin(async move { Ok(self.reply.clone()) })
    }

    fn ask_for_secret<'a>(&'a self, _prompt: &'a str) -> InteractFuture<'a, Option<String>> {
        Box::pin(async { Ok(None) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn auto_interaction_answers() {
        let auto = AutoInteraction::approve_all();
        let c = auto
            .confirm_with_answer(&ConfirmRequest::new("run?"))
            .await
            .unwrap();
        assert!(c.confirmed);
        assert_eq!(auto.ask_for_secret("key").await.unwrap(), None);
        assert!(!auto.ask_for_input("Reply", "?").await.unwrap().is_empty());
    }

    #[test]
    fn confirm_request_builders() {
        let req = ConfirmRequest::new("Run task?")
            .with_labels("Run", "Cancel")
            .with_default(true);
        assert_eq!(req.yes_label, "Run");
        assert_eq!(req.no_label, "Cancel");
        assert!(req.default);
    }
}
