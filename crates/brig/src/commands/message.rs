//! `sendMessage`: talk to the user mid-task, optionally waiting for a reply.

use super::core::{Command, CommandContext, CommandFuture, CommandOutcome, parse_args};
use super::spec::CommandSpec;
use crate::{Call, Definition};
use schemars::JsonSchema;
use serde::Deserialize;

pub const SEND_MESSAGE: &str = "sendMessage";

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageArgs {
    /// Message shown to the user.
    pub message: String,
    /// Wait for the user's answer before continuing.
    #[serde(default)]
    pub expect_reply: bool,
}

pub struct SendMessage;

impl Command for SendMessage {
    fn definition(&self) -> Definition {
        CommandSpec::builder(SEND_MESSAGE)
            .purpose("Show a message to the user, optionally waiting for a reply")
            .when_to_use("To report progress or ask a question you cannot answer yourself")
            .when_not_to_use("To finish the task; use completeTask instead")
            .parameters_for::<SendMessageArgs>()
            .output_format("The user's reply, or an acknowledgment that the message was shown")
            .to_definition()
    }

    fn execute<'a>(&'a self, call: &'a Call, ctx: &'a mut CommandContext) -> CommandFuture<'a> {
        Box::pin(async move {
            let args = match parse_args::<SendMessageArgs>(&call.args) {
                Ok(a) => a,
                Err(e) => return CommandOutcome::reply(e),
            };
            ctx.events.assistant(&args.message);
            if !args.expect_reply {
                return CommandOutcome::reply("Message shown to the user.");
            }

            let interaction = ctx.interaction.clone();
            let asked = ctx
                .signals
                .suspend(interaction.ask_for_input("Reply", &args.message))
                .await;
            match asked {
                Ok(Ok(answer)) => {
                    ctx.events.user(&answer);
                    CommandOutcome::reply(format!("User replied: {answer}"))
                }
                Ok(Err(e)) => CommandOutcome::error(format!("could not read the reply: {e}")),
                // The loop observes cancellation at its next checkpoint.
                Err(e) => CommandOutcome::error(e),
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
    async fn waits_for_reply_when_asked() {
        let interaction = ScriptedInteraction::new().with_input("use port 8080");
        let mut ctx = context_with(FakeEngine::new(), interaction);
        let call = Call::new(
            "1",
            SEND_MESSAGE,
            json!({"message": "Which port?", "expectReply": true}),
        );
        let out = SendMessage.execute(&call, &mut ctx).await;
        assert_eq!(out.content, "User replied: use port 8080");
    }

    #[tokio::test]
    async fn fire_and_forget() {
        let mut ctx = context_with(FakeEngine::new(), ScriptedInteraction::new());
        let call = Call::new("1", SEND_MESSAGE, json!({"message": "Building..."}));
        let out = SendMessage.execute(&call, &mut ctx).await;
        assert_eq!(out.content, "Message shown to the user.");
    }
}
