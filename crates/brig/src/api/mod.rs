//! Content-generation contract.
//!
//! The loops depend only on [`Generator`]: hand it a transcript and a
//! [`GenerateConfig`] and get back typed [`Part`]s. Provider specifics
//! (wire formats, retries, fallbacks) stay inside adapters such as
//! [`openrouter::OpenRouterClient`].
//!
//! - [`router`]: [`ModelTier`] and [`TierRouting`] for cheap vs. main models.
//! - [`openrouter`]: HTTP adapter for the OpenRouter chat completions API.

pub mod openrouter;
pub mod router;

pub use router::{DEFAULT_CHEAP_MODEL, DEFAULT_MODEL, ModelTier, TierRouting};

use crate::{Call, Definition, Turn};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// What the caller expects back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseShape {
    #[default]
    Text,
    /// Exactly one call to one of the offered definitions.
    Call,
}

/// Per-request generation settings.
#[derive(Debug, Clone, Default)]
pub struct GenerateConfig {
    pub definitions: Vec<Definition>,
    /// Force the model to call this definition.
    pub required_name: Option<String>,
    pub model_tier: ModelTier,
    pub temperature: f32,
    pub expected: ResponseShape,
    pub system_prompt: Option<String>,
    /// Zero means provider default.
    pub max_tokens: u32,
}

impl GenerateConfig {
    /// Request one call from `definitions`.
    pub fn call(definitions: Vec<Definition>) -> Self {
        Self {
            definitions,
            expected: ResponseShape::Call,
            ..Default::default()
        }
    }

    /// Request free text.
    pub fn text() -> Self {
        Self::default()
    }

    pub fn with_required_name(mut self, name: impl Into<String>) -> Self {
        self.required_name = Some(name.into());
        self
    }

    pub fn with_tier(mut self, tier: ModelTier) -> Self {
        self.model_tier = tier;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// One search hit attached to a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
}

/// A typed piece of a generation response.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    Call(Call),
    ExecutableCode { language: String, code: String },
    CodeResult { outcome: String, output: String },
    SearchResults(Vec<SearchHit>),
}

/// The first call among `parts`, plus how many calls were returned in total.
pub fn take_first_call(parts: Vec<Part>) -> (Option<Call>, usize) {
    let mut first = None;
    let mut count = 0;
    for part in parts {
        if let Part::Call(call) = part {
            count += 1;
            if first.is_none() {
                first = Some(call);
            }
        }
    }
    (first, count)
}

/// Concatenated text parts.
pub fn collect_text(parts: &[Part]) -> String {
    parts
        .iter()
        .filter_map(|p| match p {
            Part::Text(t) => Some(t.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

/// Future returned by [`Generator::generate`].
pub type GenerateFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<Part>, String>> + Send + 'a>>;

/// A content-generation service.
///
/// Cancellation is the caller's job: dropping the future abandons the request.
pub trait Generator: Send + Sync {
    fn generate<'a>(&'a self, transcript: &'a [Turn], config: &'a GenerateConfig)
    -> GenerateFuture<'a>;
}

/// A generated image.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

pub type ImageFuture<'a> = Pin<Box<dyn Future<Output = Result<GeneratedImage, String>> + Send + 'a>>;

/// An image-generation service handed to action handlers.
pub trait ImageGenerator: Send + Sync {
    fn generate_image<'a>(&'a self, prompt: &'a str) -> ImageFuture<'a>;
}
