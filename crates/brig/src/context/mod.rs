//! Context window management: transcript metrics, limits, and compaction.
//!
//! 1. **[`budget`]** computes [`ContextMetrics`] for a transcript and checks
//!    them against configurable [`ContextLimits`].
//!
//! 2. **[`compaction`]** implements `wrapContext`: a pure function that
//!    replaces history with a bounded summary pair.
//!
//! The command loop recomputes metrics after every turn and forces
//! `wrapContext` on the next turn when a limit is exceeded.

pub mod budget;
pub mod compaction;

pub use budget::{BudgetBreach, ContextLimits, ContextMetrics, DEFAULT_CHARS_PER_TOKEN};
pub use compaction::{Compacted, WRAP_CONTEXT, WrapSummary, compact};
