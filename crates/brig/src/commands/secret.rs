//! `requestSecret`: ask the user for a credential and drop it into the
//! container without it ever entering the transcript.

use super::core::{Command, CommandContext, CommandFuture, CommandOutcome, parse_args};
use super::spec::CommandSpec;
use crate::container::archive::pack_file;
use crate::container::split_container_path;
use crate::{Call, Definition};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::info;

pub const REQUEST_SECRET: &str = "requestSecret";

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RequestSecretArgs {
    /// What to ask the user for, e.g. 'npm publish token'.
    pub prompt: String,
    /// Container file the secret is written to (mode 0600).
    pub container_path: String,
}

pub struct RequestSecret;

impl Command for RequestSecret {
    fn definition(&self) -> Definition {
        CommandSpec::builder(REQUEST_SECRET)
            .purpose(
                "Ask the user for a secret (token, password, key) and write it to a file \
                 in the container. You never see the value",
            )
            .when_to_use("When a step needs credentials the container does not have")
            .when_not_to_use("For non-sensitive input; use sendMessage with expectReply")
            .parameters_for::<RequestSecretArgs>()
            .output_format("An acknowledgment naming the file, or a note that the user declined")
            .to_definition()
    }

    fn execute<'a>(&'a self, call: &'a Call, ctx: &'a mut CommandContext) -> CommandFuture<'a> {
        Box::pin(async move {
            let args = match parse_args::<RequestSecretArgs>(&call.args) {
                Ok(a) => a,
                Err(e) => return CommandOutcome::reply(e),
            };
            let path = ctx.session.resolve(&args.container_path);
            let Some((dir, name)) = split_container_path(&path) else {
                return CommandOutcome::error(format!("'{path}' is not a file path"));
            };

            let interaction = ctx.interaction.clone();
            let secret = match ctx.signals.suspend(interaction.ask_for_secret(&args.prompt)).await {
                Ok(Ok(Some(secret))) => secret,
                Ok(Ok(None)) => {
                    return CommandOutcome::reply(
                        "The user declined to provide the secret. Continue without it or \
                         explain what is blocked.",
                    );
                }
                Ok(Err(e)) => return CommandOutcome::error(format!("could not read the secret: {e}")),
                Err(e) => return CommandOutcome::error(e),
            };

            // Register before anything else can observe the value.
            ctx.secrets.register(secret.as_str());

            let archive = match pack_file(&name, secret.as_bytes(), 0o600) {
                Ok(a) => a,
                Err(e) => return CommandOutcome::error(e),
            };
            let engine = ctx.engine.clone();
            match ctx
                .signals
                .suspend(engine.upload(&ctx.session.id, &dir, archive))
                .await
            {
                Ok(Ok(())) => {
                    info!(path = %path, "Secret written to container");
                    CommandOutcome::reply(format!("Secret received and written to {path}."))
                }
                Ok(Err(e)) | Err(e) => {
                    let message = ctx.secrets.redact_str(&e.to_string()).into_owned();
                    CommandOutcome::error(format!("failed to write the secret: {message}"))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::archive::first_file_contents;
    use crate::testing::{FakeEngine, ScriptedInteraction, context_with};
    use serde_json::json;

    #[tokio::test]
    async fn secret_is_written_but_not_returned() {
        let engine = FakeEngine::new();
        let interaction = ScriptedInteraction::new().with_secret(Some("hunter2-token"));
        let mut ctx = context_with(engine.clone(), interaction);
        let call = Call::new(
            "1",
            REQUEST_SECRET,
            json!({"prompt": "API token", "containerPath": ".env"}),
        );
        let out = RequestSecret.execute(&call, &mut ctx).await;

        assert!(!out.content.contains("hunter2-token"));
        assert!(out.content.contains("/workspace/.env"));
        assert_eq!(ctx.secrets.redact_str("x hunter2-token"), "x [REDACTED]");
        let uploads = engine.uploads();
        assert_eq!(
            first_file_contents(&uploads[0].1).unwrap().as_deref(),
            Some("hunter2-token")
        );
    }

    #[tokio::test]
    async fn declining_is_recoverable() {
        let engine = FakeEngine::new();
        let interaction = ScriptedInteraction::new().with_secret(None);
        let mut ctx = context_with(engine.clone(), interaction);
        let call = Call::new(
            "1",
            REQUEST_SECRET,
            json!({"prompt": "API token", "containerPath": ".env"}),
        );
        let out = RequestSecret.execute(&call, &mut ctx).await;
        assert!(!out.is_error());
        assert!(!out.should_break_outer());
        assert!(out.content.contains("declined"));
        assert!(engine.uploads().is_empty());
    }
}
