//! `copyToContainer` and `copyFromContainer`.
//!
//! Nothing is shared with the container automatically. Host paths on both
//! sides are confined to the configured host root, and archives coming back
//! from the container are validated entry by entry before anything is written.

use super::core::{Command, CommandContext, CommandFuture, CommandOutcome, parse_args};
use super::spec::CommandSpec;
use crate::container::archive::{ensure_real_within, pack_path, resolve_within, unpack_within};
use crate::interact::LogLevel;
use crate::{Call, Definition};
use schemars::JsonSchema;
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

pub const COPY_TO_CONTAINER: &str = "copyToContainer";
pub const COPY_FROM_CONTAINER: &str = "copyFromContainer";

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CopyToContainerArgs {
    /// File or directory on the host, relative to the project root.
    pub host_path: String,
    /// Container directory to copy into.
    pub container_path: String,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CopyFromContainerArgs {
    /// File or directory in the container.
    pub container_path: String,
    /// Host directory, relative to the project root, to extract into.
    pub host_path: String,
}

pub struct CopyToContainer;

impl Command for CopyToContainer {
    fn definition(&self) -> Definition {
        CommandSpec::builder(COPY_TO_CONTAINER)
            .purpose("Copy a file or directory from the host project into the container")
            .when_to_use(
                "At the start of a task that needs project files; the container starts empty",
            )
            .parameters_for::<CopyToContainerArgs>()
            .example(
                "copyToContainer(hostPath='src', containerPath='/workspace/src')",
                "Copied src into /workspace/src",
            )
            .to_definition()
    }

    fn execute<'a>(&'a self, call: &'a Call, ctx: &'a mut CommandContext) -> CommandFuture<'a> {
        Box::pin(async move {
            let args = match parse_args::<CopyToContainerArgs>(&call.args) {
                Ok(a) => a,
                Err(e) => return CommandOutcome::reply(e),
            };
            let source = match resolve_within(&ctx.host_root, Path::new(&args.host_path)) {
                Ok(p) => p,
                Err(e) => return CommandOutcome::error(e),
            };
            if !source.exists() {
                return CommandOutcome::error(format!("host path '{}' does not exist", args.host_path));
            }
            let source = match ensure_real_within(&ctx.host_root, &source, Path::new(&args.host_path)) {
                Ok(p) => p,
                Err(e) => return CommandOutcome::error(e),
            };
            let archive = match pack_path(&source) {
                Ok(a) => a,
                Err(e) => return CommandOutcome::error(format!("failed to archive {}: {e}", args.host_path)),
            };
            let dest = ctx.session.resolve(&args.container_path);
            let size = archive.len();
            let engine = ctx.engine.clone();
            match ctx
                .signals
                .suspend(engine.upload(&ctx.session.id, &dest, archive))
                .await
            {
                Ok(Ok(())) => {
                    info!(bytes = size, dest = %dest, "Copied {} into container", args.host_path);
                    CommandOutcome::reply(format!("Copied {} into {dest}", args.host_path))
                }
                Ok(Err(e)) | Err(e) => CommandOutcome::error(e),
            }
        })
    }
}

pub struct CopyFromContainer;

impl Command for CopyFromContainer {
    fn definition(&self) -> Definition {
        CommandSpec::builder(COPY_FROM_CONTAINER)
            .purpose("Copy a file or directory from the container back to the host project")
            .when_to_use("To deliver build artifacts or edited files to the user")
            .when_not_to_use("For scratch files the user does not need")
            .parameters_for::<CopyFromContainerArgs>()
            .output_format("The host paths written, or an error naming the rejected path")
            .to_definition()
    }

    fn execute<'a>(&'a self, call: &'a Call, ctx: &'a mut CommandContext) -> CommandFuture<'a> {
        Box::pin(async move {
            let args = match parse_args::<CopyFromContainerArgs>(&call.args) {
                Ok(a) => a,
                Err(e) => return CommandOutcome::reply(e),
            };
            let dest = match resolve_within(&ctx.host_root, Path::new(&args.host_path)) {
                Ok(p) => p,
                Err(e) => return CommandOutcome::error(e),
            };
            if dest.exists()
                && let Err(e) = ensure_real_within(&ctx.host_root, &dest, Path::new(&args.host_path))
            {
                return CommandOutcome::error(e);
            }
            let source = ctx.session.resolve(&args.container_path);
            let engine = ctx.engine.clone();
            let data = match ctx.signals.suspend(engine.download(&ctx.session.id, &source)).await {
                Ok(Ok(data)) => data,
                Ok(Err(e)) | Err(e) => return CommandOutcome::error(e),
            };

            match unpack_within(&data, &dest) {
                Ok(written) => {
                    info!(files = written.len(), dest = %dest.display(), "Copied {source} to host");
                    let listed: Vec<String> = written
                        .iter()
                        .filter_map(|p| p.strip_prefix(&ctx.host_root).ok())
                        .map(|p| p.display().to_string())
                        .collect();
                    CommandOutcome::reply(format!(
                        "Copied {source} to {} ({} entries):\n{}",
                        args.host_path,
                        written.len(),
                        listed.join("\n")
                    ))
                }
                Err(e) => {
                    warn!("Rejected archive from {source}: {e}");
                    ctx.events
                        .container_log(LogLevel::Warn, &format!("Rejected transfer: {e}"), None);
                    CommandOutcome::error(format!("{e}. The transfer was rejected."))
                }
            }
        })
    }
}
