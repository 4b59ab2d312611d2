//! Container engine contract and session types.
//!
//! [`ContainerEngine`] is the narrow surface the orchestrator and commands
//! need: pull, create, start, exec, archive upload/download, stop, remove. Images are
//! typed as [`AllowedImage`], so an image outside the allow-list cannot reach
//! `pull` at all.
//!
//! - [`docker`]: [`DockerEngine`](docker::DockerEngine), backed by `bollard`.
//! - [`archive`]: tar packing and root-confined extraction.

pub mod archive;
pub mod docker;

use crate::error::{Result, TaskError};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

// ── Images ─────────────────────────────────────────────────────────

/// The fixed set of base images a task may run in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllowedImage {
    Alpine,
    Ubuntu,
    Debian,
    Node,
    Python,
    Rust,
}

impl AllowedImage {
    pub const ALL: [AllowedImage; 6] = [
        AllowedImage::Alpine,
        AllowedImage::Ubuntu,
        AllowedImage::Debian,
        AllowedImage::Node,
        AllowedImage::Python,
        AllowedImage::Rust,
    ];

    /// Full image reference passed to the engine.
    pub fn reference(&self) -> &'static str {
        match self {
            AllowedImage::Alpine => "alpine:latest",
            AllowedImage::Ubuntu => "ubuntu:24.04",
            AllowedImage::Debian => "debian:bookworm-slim",
            AllowedImage::Node => "node:22-bookworm-slim",
            AllowedImage::Python => "python:3.12-slim",
            AllowedImage::Rust => "rust:1-slim-bookworm",
        }
    }

    /// Every allowed reference, for prompts and schemas.
    pub fn references() -> Vec<&'static str> {
        Self::ALL.iter().map(|i| i.reference()).collect()
    }
}

impl FromStr for AllowedImage {
    type Err = TaskError;

    /// Exact match on the full reference only.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|i| i.reference() == s)
            .ok_or_else(|| TaskError::ImageNotAllowed(s.to_string()))
    }
}

impl std::fmt::Display for AllowedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reference())
    }
}

// ── Sessions ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Created,
    Running,
    Stopped,
    Removed,
}

/// The ephemeral container backing one task run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSession {
    pub id: String,
    pub image: AllowedImage,
    pub working_dir: String,
    pub status: SessionStatus,
}

impl ContainerSession {
    /// Resolve `path` against the session's working directory.
    pub fn resolve(&self, path: &str) -> String {
        container_path(&self.working_dir, path)
    }
}

/// What to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: AllowedImage,
    pub working_dir: String,
    pub labels: HashMap<String, String>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: AllowedImage, working_dir: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image,
            working_dir: working_dir.into(),
            labels: HashMap::from([("brig.managed".to_string(), "true".to_string())]),
        }
    }
}

/// One command to run inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub command: Vec<String>,
    pub working_dir: Option<String>,
}

impl ExecRequest {
    /// Run `script` through `sh -c`.
    pub fn shell(script: impl Into<String>) -> Self {
        Self {
            command: vec!["sh".into(), "-c".into(), script.into()],
            working_dir: None,
        }
    }

    /// Run an argv directly, without a shell.
    pub fn argv<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: args.into_iter().map(Into::into).collect(),
            working_dir: None,
        }
    }

    pub fn in_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Captured result of an exec.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

// ── Engine ─────────────────────────────────────────────────────────

pub type EngineFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Container engine contract. Calls carry their own transport timeouts and
/// are never retried by callers.
pub trait ContainerEngine: Send + Sync {
    fn pull(&self, image: AllowedImage) -> EngineFuture<'_, ()>;

    /// Create a container without starting it; returns its handle.
    fn create<'a>(&'a self, spec: &'a ContainerSpec) -> EngineFuture<'a, String>;

    fn start<'a>(&'a self, id: &'a str) -> EngineFuture<'a, ()>;

    fn exec<'a>(&'a self, id: &'a str, request: &'a ExecRequest) -> EngineFuture<'a, ExecOutput>;

    /// Extract a tar archive into `dest_dir` inside the container.
    fn upload<'a>(&'a self, id: &'a str, dest_dir: &'a str, archive: Vec<u8>)
    -> EngineFuture<'a, ()>;

    /// Fetch `path` from the container as a tar archive.
    fn download<'a>(&'a self, id: &'a str, path: &'a str) -> EngineFuture<'a, Vec<u8>>;

    fn stop<'a>(&'a self, id: &'a str) -> EngineFuture<'a, ()>;

    fn remove<'a>(&'a self, id: &'a str) -> EngineFuture<'a, ()>;
}

// ── Container paths ────────────────────────────────────────────────

/// Join a container path onto a working directory. Absolute paths win.
pub fn container_path(working_dir: &str, path: &str) -> String {
    if path.starts_with('/') {
        return path.to_string();
    }
    let base = working_dir.trim_end_matches('/');
    let rel = path.trim_start_matches("./");
    if rel.is_empty() || rel == "." {
        return if base.is_empty() { "/".into() } else { base.to_string() };
    }
    format!("{base}/{rel}")
}

/// Split a container path into `(parent_dir, file_name)`.
pub fn split_container_path(path: &str) -> Option<(String, String)> {
    let trimmed = path.trim_end_matches('/');
    let (dir, name) = trimmed.rsplit_once('/')?;
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    let dir = if dir.is_empty() { "/" } else { dir };
    Some((dir.to_string(), name.to_string()))
}
