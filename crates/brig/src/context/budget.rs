//! Transcript size metrics and budget limits.
//!
//! [`ContextMetrics::measure`] is a pure function over a transcript. The
//! thresholds live in [`ContextLimits`], which callers configure per
//! deployment; the command loop only asks whether a breach occurred.

use crate::Turn;

/// Default characters per token (conservative estimate for English text).
/// Most tokenizers average 3-4 chars per token; we use 3.5 as a middle ground.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

pub const DEFAULT_MAX_MESSAGES: usize = 80;
pub const DEFAULT_MAX_TOKENS: usize = 120_000;

/// Size of a transcript. Derived every turn, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContextMetrics {
    pub message_count: usize,
    pub estimated_tokens: usize,
}

impl ContextMetrics {
    pub fn measure(transcript: &[Turn], chars_per_token: f64) -> Self {
        let chars: usize = transcript.iter().map(Turn::char_len).sum();
        let cpt = if chars_per_token > 0.0 {
            chars_per_token
        } else {
            DEFAULT_CHARS_PER_TOKEN
        };
        Self {
            message_count: transcript.len(),
            estimated_tokens: (chars as f64 / cpt).ceil() as usize,
        }
    }

    pub fn to_log_string(&self) -> String {
        format!(
            "{} messages, ~{} tokens",
            self.message_count, self.estimated_tokens
        )
    }
}

/// Which ceiling a transcript exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetBreach {
    Messages,
    Tokens,
    Both,
}

impl std::fmt::Display for BudgetBreach {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BudgetBreach::Messages => write!(f, "message count"),
            BudgetBreach::Tokens => write!(f, "estimated tokens"),
            BudgetBreach::Both => write!(f, "message count and estimated tokens"),
        }
    }
}

/// Ceilings that trigger forced compaction.
///
/// # Example
///
/// ```
/// use brig::context::{ContextLimits, ContextMetrics};
///
/// let limits = ContextLimits::default().with_max_messages(4);
/// let metrics = ContextMetrics { message_count: 5, estimated_tokens: 100 };
/// assert!(limits.breach(&metrics).is_some());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextLimits {
    pub max_messages: usize,
    pub max_tokens: usize,
    pub chars_per_token: f64,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            max_messages: DEFAULT_MAX_MESSAGES,
            max_tokens: DEFAULT_MAX_TOKENS,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }
}

impl ContextLimits {
    pub fn with_max_messages(mut self, max: usize) -> Self {
        self.max_messages = max;
        self
    }

    pub fn with_max_tokens(mut self, max: usize) -> Self {
        self.max_tokens = max;
        self
    }

    pub fn with_chars_per_token(mut self, cpt: f64) -> Self {
        self.chars_per_token = cpt;
        self
    }

    pub fn measure(&self, transcript: &[Turn]) -> ContextMetrics {
        ContextMetrics::measure(transcript, self.chars_per_token)
    }

    pub fn breach(&self, metrics: &ContextMetrics) -> Option<BudgetBreach> {
        let messages = metrics.message_count > self.max_messages;
        let tokens = metrics.estimated_tokens > self.max_tokens;
        match (messages, tokens) {
            (true, true) => Some(BudgetBreach::Both),
            (true, false) => Some(BudgetBreach::Messages),
            (false, true) => Some(BudgetBreach::Tokens),
            (false, false) => None,
        }
    }

    pub fn is_within(&self, metrics: &ContextMetrics) -> bool {
        self.breach(metrics).is_none()
    }

    /// Human-readable status line shared by `checkContext` and `wrapContext`.
    pub fn report(&self, metrics: &ContextMetrics) -> String {
        let head = format!(
            "{}/{} messages, ~{}/{} tokens",
            metrics.message_count, self.max_messages, metrics.estimated_tokens, self.max_tokens
        );
        match self.breach(metrics) {
            None => format!("Context is within limits ({head})."),
            Some(breach) => format!("Context exceeds limits on {breach} ({head})."),
        }
    }
}
