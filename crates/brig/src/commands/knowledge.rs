//! `gainKnowledge`, `queryKnowledge` and `forgetKnowledge`.
//!
//! Entries go to the shared [`KnowledgeStore`](crate::knowledge::KnowledgeStore)
//! and outlive the container task that wrote them.

use super::core::{Command, CommandContext, CommandFuture, CommandOutcome, parse_args};
use super::spec::CommandSpec;
use crate::error::TaskError;
use crate::knowledge::{KnowledgeEntry, KnowledgeQuery};
use crate::{Call, Definition};
use schemars::JsonSchema;
use serde::Deserialize;

pub const GAIN_KNOWLEDGE: &str = "gainKnowledge";
pub const QUERY_KNOWLEDGE: &str = "queryKnowledge";
pub const FORGET_KNOWLEDGE: &str = "forgetKnowledge";

#[derive(Deserialize, JsonSchema)]
pub struct GainKnowledgeArgs {
    /// Stable key, e.g. 'build.command' or 'project.test-runner'.
    pub key: String,
    /// Any JSON value worth remembering.
    pub value: serde_json::Value,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Deserialize, JsonSchema)]
pub struct QueryKnowledgeArgs {
    /// Exact key to look up.
    #[serde(default)]
    pub key: Option<String>,
    /// Return every key starting with this prefix.
    #[serde(default)]
    pub prefix: Option<String>,
    /// Only entries carrying all of these tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Deserialize, JsonSchema)]
pub struct ForgetKnowledgeArgs {
    pub key: String,
}

fn format_entries(entries: &[KnowledgeEntry]) -> String {
    entries
        .iter()
        .map(|e| {
            let tags = if e.tags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", e.tags.join(", "))
            };
            format!("- {}{tags} ({}): {}", e.key, e.timestamp, e.value)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct GainKnowledge;

impl Command for GainKnowledge {
    fn definition(&self) -> Definition {
        CommandSpec::builder(GAIN_KNOWLEDGE)
            .purpose("Remember a fact for future tasks on this project")
            .when_to_use(
                "When you learn something durable: build commands, quirks, versions, \
                 locations of important files",
            )
            .when_not_to_use("For anything secret or only relevant to this task")
            .parameters_for::<GainKnowledgeArgs>()
            .to_definition()
    }

    fn execute<'a>(&'a self, call: &'a Call, ctx: &'a mut CommandContext) -> CommandFuture<'a> {
        Box::pin(async move {
            let args = match parse_args::<GainKnowledgeArgs>(&call.args) {
                Ok(a) => a,
                Err(e) => return CommandOutcome::reply(e),
            };
            // Never persist a registered secret.
            let value = ctx.secrets.redact_value(&args.value);
            match ctx.knowledge.gain(&args.key, value, args.tags) {
                Ok(entry) => CommandOutcome::reply(format!("Remembered '{}'.", entry.key)),
                Err(e) => CommandOutcome::error(TaskError::Knowledge(e).to_string()),
            }
        })
    }
}

pub struct QueryKnowledge;

impl Command for QueryKnowledge {
    fn definition(&self) -> Definition {
        CommandSpec::builder(QUERY_KNOWLEDGE)
            .purpose("Look up facts remembered by earlier tasks")
            .when_to_use("At the start of a task, before rediscovering how the project works")
            .parameters_for::<QueryKnowledgeArgs>()
            .output_format("One line per entry: key, tags, timestamp, value")
            .to_definition()
    }

    fn execute<'a>(&'a self, call: &'a Call, ctx: &'a mut CommandContext) -> CommandFuture<'a> {
        Box::pin(async move {
            let args = match parse_args::<QueryKnowledgeArgs>(&call.args) {
                Ok(a) => a,
                Err(e) => return CommandOutcome::reply(e),
            };
            let query = KnowledgeQuery {
                key: args.key,
                prefix: args.prefix,
                tags: args.tags,
            };
            match ctx.knowledge.query(&query) {
                Ok(entries) if entries.is_empty() => CommandOutcome::reply("No matching knowledge."),
                Ok(entries) => CommandOutcome::reply(format!(
                    "{} entries:\n{}",
                    entries.len(),
                    format_entries(&entries)
                )),
                Err(e) => CommandOutcome::error(TaskError::Knowledge(e).to_string()),
            }
        })
    }
}

pub struct ForgetKnowledge;

impl Command for ForgetKnowledge {
    fn definition(&self) -> Definition {
        CommandSpec::builder(FORGET_KNOWLEDGE)
            .purpose("Delete a remembered fact that turned out to be wrong or stale")
            .parameters_for::<ForgetKnowledgeArgs>()
            .to_definition()
    }

    fn execute<'a>(&'a self, call: &'a Call, ctx: &'a mut CommandContext) -> CommandFuture<'a> {
        Box::pin(async move {
            let args = match parse_args::<ForgetKnowledgeArgs>(&call.args) {
                Ok(a) => a,
                Err(e) => return CommandOutcome::reply(e),
            };
            match ctx.knowledge.forget(&args.key) {
                Ok(true) => CommandOutcome::reply(format!("Forgot '{}'.", args.key)),
                Ok(false) => CommandOutcome::reply(format!("Nothing stored under '{}'.", args.key)),
                Err(e) => CommandOutcome::error(TaskError::Knowledge(e).to_string()),
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
    async fn gain_query_forget() {
        let mut ctx = context_with(FakeEngine::new(), ScriptedInteraction::new());

        for (key, tags) in [("build.cmd", json!(["build"])), ("build.dir", json!([])), ("os", json!([]))] {
            let call = Call::new("g", GAIN_KNOWLEDGE, json!({"key": key, "value": "v", "tags": tags}));
            GainKnowledge.execute(&call, &mut ctx).await;
        }

        let call = Call::new("q", QUERY_KNOWLEDGE, json!({"prefix": "build."}));
        let out = QueryKnowledge.execute(&call, &mut ctx).await;
        assert!(out.content.starts_with("2 entries:"));

        let call = Call::new("q", QUERY_KNOWLEDGE, json!({"tags": ["build"]}));
        let out = QueryKnowledge.execute(&call, &mut ctx).await;
        assert!(out.content.contains("build.cmd [build]"));

        let call = Call::new("f", FORGET_KNOWLEDGE, json!({"key": "os"}));
        assert_eq!(ForgetKnowledge.execute(&call, &mut ctx).await.content, "Forgot 'os'.");
        let out = QueryKnowledge
            .execute(&Call::new("q", QUERY_KNOWLEDGE, json!({"key": "os"})), &mut ctx)
            .await;
        assert_eq!(out.content, "No matching knowledge.");
    }

    #[tokio::test]
    async fn secrets_are_not_persisted() {
        let mut ctx = context_with(FakeEngine::new(), ScriptedInteraction::new());
        ctx.secrets.register("s3cr3t-value");
        let call = Call::new(
            "g",
            GAIN_KNOWLEDGE,
            json!({"key": "token", "value": "token is s3cr3t-value"}),
        );
        GainKnowledge.execute(&call, &mut ctx).await;
        let entry = ctx.knowledge.get("token").unwrap().unwrap();
        assert_eq!(entry.value, json!("token is [REDACTED]"));
    }
}
