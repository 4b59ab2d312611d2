//! `viewFile` and `editFile`: single-file access inside the container.
//!
//! Writes go through a one-file tar upload into the parent directory, so file
//! contents never pass through a shell.

use super::core::{Command, CommandContext, CommandFuture, CommandOutcome, parse_args, truncate_output};
use super::spec::CommandSpec;
use crate::container::archive::{first_file_contents, pack_file};
use crate::container::{ExecRequest, split_container_path};
use crate::error::TaskError;
use crate::{Call, Definition};
use schemars::JsonSchema;
use serde::Deserialize;

pub const VIEW_FILE: &str = "viewFile";
pub const EDIT_FILE: &str = "editFile";

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ViewFileArgs {
    /// Container path, absolute or relative to the working directory.
    pub path: String,
    /// First line to show (1-based, inclusive).
    #[serde(default)]
    pub start_line: Option<usize>,
    /// Last line to show (1-based, inclusive).
    #[serde(default)]
    pub end_line: Option<usize>,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EditFileArgs {
    /// Container path, absolute or relative to the working directory.
    pub path: String,
    /// Full replacement contents. Mutually exclusive with `patch`.
    #[serde(default)]
    pub new_content: Option<String>,
    /// Unified diff against the current contents. Mutually exclusive with
    /// `newContent`.
    #[serde(default)]
    pub patch: Option<String>,
}

/// Number and slice lines for display.
fn select_lines(text: &str, start: Option<usize>, end: Option<usize>) -> Result<String, String> {
    let lines: Vec<&str> = text.lines().collect();
    let start = start.unwrap_or(1).max(1);
    let end = end.unwrap_or(lines.len()).min(lines.len());
    if start > lines.len().max(1) {
        return Err(format!(
            "startLine {start} is past the end of the file ({} lines)",
            lines.len()
        ));
    }
    if end < start && !lines.is_empty() {
        return Err(format!("endLine {end} is before startLine {start}"));
    }
    let width = end.max(1).to_string().len();
    Ok(lines
        .iter()
        .enumerate()
        .skip(start - 1)
        .take(end.saturating_sub(start - 1))
        .map(|(i, line)| format!("{:>width$} | {line}", i + 1))
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Apply a unified diff to `base`.
pub fn apply_patch(base: &str, patch: &str) -> Result<String, TaskError> {
    let parsed = diffy::Patch::from_str(patch).map_err(|e| TaskError::PatchApply(e.to_string()))?;
    diffy::apply(base, &parsed).map_err(|e| TaskError::PatchApply(e.to_string()))
}

pub struct ViewFile;

impl Command for ViewFile {
    fn definition(&self) -> Definition {
        CommandSpec::builder(VIEW_FILE)
            .purpose("Show a text file from the container with line numbers")
            .when_to_use("Before editing a file, or to inspect configuration and source")
            .when_not_to_use("To list directories or search; use runCommand with ls or grep")
            .parameters_for::<ViewFileArgs>()
            .output_format("Numbered lines ('  12 | text'), truncated for very large files")
            .to_definition()
    }

    fn execute<'a>(&'a self, call: &'a Call, ctx: &'a mut CommandContext) -> CommandFuture<'a> {
        Box::pin(async move {
            let args = match parse_args::<ViewFileArgs>(&call.args) {
                Ok(a) => a,
                Err(e) => return CommandOutcome::reply(e),
            };
            let path = ctx.session.resolve(&args.path);
            let request = ExecRequest::argv(["cat", "--", path.as_str()]);
            let engine = ctx.engine.clone();
            let output = match ctx.signals.suspend(engine.exec(&ctx.session.id, &request)).await {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => return CommandOutcome::error(e),
                Err(e) => return CommandOutcome::error(e),
            };
            if !output.success() {
                return CommandOutcome::error(format!(
                    "cannot read {path}: {}",
                    output.stderr.trim()
                ));
            }
            match select_lines(&output.stdout, args.start_line, args.end_line) {
                Ok(text) => {
                    let limits = ctx.output_limits;
                    CommandOutcome::reply(truncate_output(&text, limits.max_bytes, limits.max_lines))
                }
                Err(e) => CommandOutcome::error(e),
            }
        })
    }
}

pub struct EditFile;

impl EditFile {
    async fn read_current(ctx: &CommandContext, path: &str) -> Result<String, TaskError> {
        let data = ctx
            .signals
            .suspend(ctx.engine.download(&ctx.session.id, path))
            .await??;
        first_file_contents(&data)?
            .ok_or_else(|| TaskError::PatchApply(format!("{path} is not a regular file")))
    }
}

impl Command for EditFile {
    fn definition(&self) -> Definition {
        CommandSpec::builder(EDIT_FILE)
            .purpose("Write a container file, either in full or by applying a unified diff")
            .when_to_use(
                "To create a file (newContent) or change part of an existing one (patch). \
                 View the file first when patching",
            )
            .when_not_to_use("Never supply both newContent and patch in one call")
            .parameters_for::<EditFileArgs>()
            .example(
                "editFile(path='src/lib.rs', patch='--- a\\n+++ b\\n@@ -1 +1 @@\\n-old\\n+new\\n')",
                "Patched /workspace/src/lib.rs (1 lines)",
            )
            .to_definition()
    }

    fn execute<'a>(&'a self, call: &'a Call, ctx: &'a mut CommandContext) -> CommandFuture<'a> {
        Box::pin(async move {
            let args = match parse_args::<EditFileArgs>(&call.args) {
                Ok(a) => a,
                Err(e) => return CommandOutcome::reply(e),
            };
            let path = ctx.session.resolve(&args.path);
            let Some((dir, name)) = split_container_path(&path) else {
                return CommandOutcome::error(format!("'{path}' is not a file path"));
            };

            let (contents, verb) = match (args.new_content, args.patch) {
                (Some(_), Some(_)) => {
                    return CommandOutcome::error(
                        "provide either newContent or patch, not both. Nothing was written.",
                    );
                }
                (None, None) => {
                    return CommandOutcome::error("provide one of newContent or patch");
                }
                (Some(content), None) => (content, "Wrote"),
                (None, Some(patch)) => {
                    let current = match Self::read_current(ctx, &path).await {
                        Ok(c) => c,
                        Err(e) => return CommandOutcome::error(e),
                    };
                    match apply_patch(&current, &patch) {
                        Ok(patched) => (patched, "Patched"),
                        Err(e) => {
                            return CommandOutcome::error(format!(
                                "{e}. The file was left unchanged; view it and retry."
                            ));
                        }
                    }
                }
            };

            let archive = match pack_file(&name, contents.as_bytes(), 0o644) {
                Ok(a) => a,
                Err(e) => return CommandOutcome::error(e),
            };
            let engine = ctx.engine.clone();
            match ctx
                .signals
                .suspend(engine.upload(&ctx.session.id, &dir, archive))
                .await
            {
                Ok(Ok(())) => CommandOutcome::reply(format!(
                    "{verb} {path} ({} lines)",
                    contents.lines().count()
                )),
                Ok(Err(e)) | Err(e) => CommandOutcome::error(e),
            }
        })
    }
}
