//! `webSearch` via the Brave Search API.
//!
//! Only registered when `BRAVE_SEARCH_KEY` is set.

use super::core::{Command, CommandContext, CommandFuture, CommandOutcome, parse_args};
use super::spec::CommandSpec;
use crate::api::SearchHit;
use crate::{Call, Definition};
use schemars::JsonSchema;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const WEB_SEARCH: &str = "webSearch";
pub const BRAVE_SEARCH_KEY_ENV: &str = "BRAVE_SEARCH_KEY";

const BRAVE_ENDPOINT: &str = "https://api.search.brave.com/res/v1/web/search";

#[derive(Deserialize, JsonSchema)]
pub struct WebSearchArgs {
    /// The search query (e.g. 'alpine apk add python3 pip').
    pub query: String,
    /// Number of results to return (default 5, max 20).
    #[serde(default)]
    pub count: Option<u32>,
}

pub struct WebSearch {
    client: reqwest::Client,
    api_key: String,
}

impl WebSearch {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: api_key.into(),
        }
    }

    /// `None` when the key is not configured.
    pub fn from_env() -> Option<Self> {
        std::env::var(BRAVE_SEARCH_KEY_ENV)
            .ok()
            .filter(|k| !k.is_empty())
            .map(Self::new)
    }

    async fn search(&self, query: &str, count: u32) -> Result<Vec<SearchHit>, String> {
        let url = format!("{BRAVE_ENDPOINT}?q={}&count={count}", urlencoded(query));
        let resp = self
            .client
            .get(&url)
            .header("X-Subscription-Token", &self.api_key)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("HTTP {status}: {body}"));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e: reqwest::Error| e.to_string())?;
        Ok(parse_brave_results(&body))
    }
}

/// Minimal percent-encoding for URL query parameters.
fn urlencoded(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 3);
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

fn parse_brave_results(body: &serde_json::Value) -> Vec<SearchHit> {
    body["web"]["results"]
        .as_array()
        .map(|results| {
            results
                .iter()
                .map(|r| SearchHit {
                    title: r["title"].as_str().unwrap_or("").to_string(),
                    url: r["url"].as_str().unwrap_or("").to_string(),
                    snippet: r["description"].as_str().unwrap_or("").to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn format_hits(hits: &[SearchHit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            let mut entry = format!("{}. {}\n   {}", i + 1, hit.title, hit.url);
            if !hit.snippet.is_empty() {
                entry.push_str(&format!("\n   {}", hit.snippet));
            }
            entry
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

impl Command for WebSearch {
    fn definition(&self) -> Definition {
        CommandSpec::builder(WEB_SEARCH)
            .purpose("Search the web and return results with titles, URLs, and snippets")
            .when_to_use(
                "When you need current documentation, package names or error explanations",
            )
            .when_not_to_use("When the answer is in the container; look there first")
            .parameters_for::<WebSearchArgs>()
            .output_format("Numbered list of results: title, URL, and snippet")
            .to_definition()
    }

    fn execute<'a>(&'a self, call: &'a Call, ctx: &'a mut CommandContext) -> CommandFuture<'a> {
        Box::pin(async move {
            let args = match parse_args::<WebSearchArgs>(&call.args) {
                Ok(a) => a,
                Err(e) => return CommandOutcome::reply(e),
            };
            let count = args.count.unwrap_or(5).clamp(1, 20);
            debug!(query = %args.query, count, "webSearch");
            match ctx.signals.suspend(self.search(&args.query, count)).await {
                Ok(Ok(hits)) if hits.is_empty() => {
                    CommandOutcome::reply(format!("No results found for '{}'", args.query))
                }
                Ok(Ok(hits)) => CommandOutcome::reply(format_hits(&hits)),
                Ok(Err(e)) => CommandOutcome::error(format!("web search failed: {e}")),
                Err(e) => CommandOutcome::error(e),
            }
        })
    }
}
