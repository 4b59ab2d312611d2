//! Error types for the orchestration core.
//!
//! Only real failures live here. Declined confirmations, declined secrets and
//! budget breaches are ordinary outcomes and are modelled as enum values by
//! the modules that produce them.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("image '{0}' is not in the allowed image list")]
    ImageNotAllowed(String),

    #[error("failed to pull image {image}: {reason}")]
    ImagePull { image: String, reason: String },

    #[error("failed to create container: {0}")]
    ContainerCreate(String),

    #[error("command execution failed: {0}")]
    CommandExecution(String),

    #[error("failed to apply patch: {0}")]
    PatchApply(String),

    #[error("path '{}' escapes the destination root", path.display())]
    PathTraversal { path: PathBuf },

    #[error("reached the maximum of {0} commands")]
    MaxCommandsExceeded(u32),

    #[error("cancelled")]
    Cancelled,

    #[error("content generation failed: {0}")]
    Generation(String),

    #[error("user interaction failed: {0}")]
    Interaction(String),

    #[error("invalid task proposal: {0}")]
    InvalidProposal(String),

    #[error("knowledge store error: {0}")]
    Knowledge(String),

    #[error("container engine error: {0}")]
    Engine(String),

    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TaskError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }
}

pub type Result<T, E = TaskError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_traversal_names_the_path() {
        let err = TaskError::PathTraversal {
            path: PathBuf::from("../../evil"),
        };
        assert_eq!(err.to_string(), "path '../../evil' escapes the destination root");
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: TaskError = io.into();
        assert!(matches!(err, TaskError::Io(_)));
        assert!(!err.is_cancelled());
        assert!(TaskError::Cancelled.is_cancelled());
    }
}
