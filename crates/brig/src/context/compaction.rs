//! `wrapContext` compaction.
//!
//! [`compact`] is pure: it returns a new transcript made of the pinned task
//! prompt, every earlier `wrapContext` call/response pair, and the new pair
//! carrying the model's summary. Everything else is dropped, so repeated
//! wraps grow the transcript by one pair each and never by the size of the
//! history they replaced.

use super::budget::{ContextLimits, ContextMetrics};
use crate::{Call, CallResponse, Role, Turn};
use schemars::JsonSchema;
use serde::Deserialize;

pub const WRAP_CONTEXT: &str = "wrapContext";

/// What the model carries forward across a wrap.
#[derive(Deserialize, JsonSchema, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WrapSummary {
    /// What has happened so far.
    pub summary: String,
    /// The overall plan.
    #[serde(default)]
    pub plan: String,
    /// What is done and what remains.
    #[serde(default)]
    pub progress: String,
    /// Container paths worth revisiting.
    #[serde(default)]
    pub important_files: Vec<String>,
    /// The very next action to take.
    #[serde(default)]
    pub next_step: String,
}

impl WrapSummary {
    pub fn render(&self) -> String {
        let mut out = format!("## Context summary\n{}\n", self.summary.trim());
        if !self.plan.trim().is_empty() {
            out.push_str(&format!("\n## Plan\n{}\n", self.plan.trim()));
        }
        if !self.progress.trim().is_empty() {
            out.push_str(&format!("\n## Progress\n{}\n", self.progress.trim()));
        }
        if !self.important_files.is_empty() {
            out.push_str("\n## Important files\n");
            for f in &self.important_files {
                out.push_str(&format!("- {f}\n"));
            }
        }
        if !self.next_step.trim().is_empty() {
            out.push_str(&format!("\n## Next step\n{}\n", self.next_step.trim()));
        }
        out
    }
}

/// Result of one compaction.
#[derive(Debug, Clone)]
pub struct Compacted {
    pub transcript: Vec<Turn>,
    pub metrics: ContextMetrics,
    pub within_limits: bool,
}

fn is_pinned_prompt(turn: &Turn) -> bool {
    turn.role == Role::User && turn.text.is_some() && turn.responses.is_empty()
}

/// Earlier wrap pairs, in order, excluding the call being applied now.
fn prior_wraps(transcript: &[Turn], current_id: &str) -> Vec<Turn> {
    let mut kept = Vec::new();
    for (i, turn) in transcript.iter().enumerate() {
        for call in turn.calls.iter().filter(|c| c.name == WRAP_CONTEXT) {
            if call.id == current_id {
                continue;
            }
            let response = transcript
                .iter()
                .skip(i + 1)
                .flat_map(|t| t.responses.iter())
                .find(|r| r.id == call.id);
            if let Some(response) = response {
                kept.push(Turn::call(call.clone()));
                kept.push(Turn::responses(vec![response.clone()]));
            }
        }
    }
    kept
}

/// Replace the active history with a single summary pair.
pub fn compact(
    transcript: &[Turn],
    wrap_call: &Call,
    summary: &WrapSummary,
    limits: &ContextLimits,
) -> Compacted {
    let mut out = Vec::new();
    if let Some(first) = transcript.first().filter(|t| is_pinned_prompt(t)) {
        out.push(first.clone().with_cache());
    }
    out.extend(prior_wraps(transcript, &wrap_call.id));

    let body = summary.render();
    out.push(Turn::call(wrap_call.clone()));
    out.push(Turn::responses(vec![CallResponse::to(wrap_call, body.clone())]));

    let metrics = limits.measure(&out);
    let status = limits.report(&metrics);
    if let Some(last) = out.last_mut() {
        last.responses = vec![CallResponse::to(wrap_call, format!("{body}\n{status}"))];
    }
    let metrics = limits.measure(&out);

    Compacted {
        within_limits: limits.is_within(&metrics),
        transcript: out,
        metrics,
    }
}
