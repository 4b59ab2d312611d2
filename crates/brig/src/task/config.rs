//! Container task configuration.

use crate::api::ModelTier;
use crate::commands::OutputLimits;
use crate::container::docker::DEFAULT_PULL_TIMEOUT;
use crate::context::ContextLimits;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MAX_COMMANDS: u32 = 50;
pub const DEFAULT_WORKING_DIR: &str = "/workspace";

/// Settings for one container task run.
///
/// # Example
///
/// ```
/// use brig::task::TaskConfig;
///
/// let config = TaskConfig::default()
///     .with_max_commands(20)
///     .with_host_root("/home/me/project");
/// assert_eq!(config.max_commands, 20);
/// assert_eq!(config.working_dir, "/workspace");
/// ```
#[derive(Debug, Clone)]
pub struct TaskConfig {
    /// Hard cap on command turns; reaching it fails the task.
    pub max_commands: u32,
    pub limits: ContextLimits,
    pub command_temperature: f32,
    pub command_tier: ModelTier,
    pub proposal_temperature: f32,
    pub proposal_tier: ModelTier,
    /// Used when the proposal names no working directory.
    pub working_dir: String,
    /// Host directory copy commands are confined to.
    pub host_root: PathBuf,
    pub output_limits: OutputLimits,
    /// Applied by the orchestrator around the engine's pull.
    pub pull_timeout: Duration,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_commands: DEFAULT_MAX_COMMANDS,
            limits: ContextLimits::default(),
            command_temperature: 0.2,
            command_tier: ModelTier::Main,
            proposal_temperature: 0.1,
            proposal_tier: ModelTier::Cheap,
            working_dir: DEFAULT_WORKING_DIR.to_string(),
            host_root: PathBuf::from("."),
            output_limits: OutputLimits::default(),
            pull_timeout: DEFAULT_PULL_TIMEOUT,
        }
    }
}

impl TaskConfig {
    pub fn with_max_commands(mut self, max: u32) -> Self {
        self.max_commands = max;
        self
    }

    pub fn with_limits(mut self, limits: ContextLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_command_temperature(mut self, temperature: f32) -> Self {
        self.command_temperature = temperature;
        self
    }

    pub fn with_command_tier(mut self, tier: ModelTier) -> Self {
        self.command_tier = tier;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_host_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.host_root = root.into();
        self
    }

    pub fn with_output_limits(mut self, limits: OutputLimits) -> Self {
        self.output_limits = limits;
        self
    }

    pub fn with_pull_timeout(mut self, timeout: Duration) -> Self {
        self.pull_timeout = timeout;
        self
    }
}
