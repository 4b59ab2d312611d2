//! OpenRouter chat completions adapter.
//!
//! Translates transcripts into the OpenAI function-calling wire format and
//! responses back into [`Part`]s. No retries happen here; a failed request is
//! reported to the calling loop as an `Err(String)`.

use super::{GenerateConfig, GenerateFuture, Generator, Part, ResponseShape, SearchHit, TierRouting};
use crate::{Call, Definition, Role, Turn, generate_call_id};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

// ── Wire types ─────────────────────────────────────────────────────

#[derive(Serialize, Debug, Default)]
pub(crate) struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl WireMessage {
    fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Serialize, Debug)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: Definition,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: WireFunctionCall,
}

fn function_type() -> String {
    "function".into()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
    annotations: Option<Vec<Annotation>>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

#[derive(Deserialize, Debug)]
struct Annotation {
    #[serde(rename = "type")]
    annotation_type: Option<String>,
    url_citation: Option<UrlCitation>,
}

#[derive(Deserialize, Debug)]
struct UrlCitation {
    url: String,
    title: Option<String>,
    content: Option<String>,
}

// ── Conversion ─────────────────────────────────────────────────────

fn to_wire_messages(system_prompt: Option<&str>, transcript: &[Turn]) -> Vec<WireMessage> {
    let mut out = Vec::new();
    if let Some(system) = system_prompt {
        out.push(WireMessage::text("system", system));
    }
    for turn in transcript {
        match turn.role {
            Role::Assistant => {
                let tool_calls: Vec<WireToolCall> = turn
                    .calls
                    .iter()
                    .map(|c| WireToolCall {
                        id: c.id.clone(),
                        call_type: function_type(),
                        function: WireFunctionCall {
                            name: c.name.clone(),
                            arguments: c.args.to_string(),
                        },
                    })
                    .collect();
                if turn.text.is_some() || !tool_calls.is_empty() {
                    out.push(WireMessage {
                        role: "assistant".into(),
                        content: turn.text.clone(),
                        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                        tool_call_id: None,
                    });
                }
            }
            Role::User => {
                for resp in &turn.responses {
                    out.push(WireMessage {
                        role: "tool".into(),
                        content: Some(resp.content.clone()),
                        tool_calls: None,
                        tool_call_id: Some(resp.id.clone()),
                    });
                }
                if let Some(text) = &turn.text {
                    out.push(WireMessage::text("user", text.clone()));
                }
            }
        }
    }
    out
}

fn tool_choice(config: &GenerateConfig) -> Option<serde_json::Value> {
    if config.definitions.is_empty() {
        return None;
    }
    match (&config.required_name, config.expected) {
        (Some(name), _) => Some(serde_json::json!({
            "type": "function",
            "function": { "name": name }
        })),
        (None, ResponseShape::Call) => Some(serde_json::json!("required")),
        (None, ResponseShape::Text) => None,
    }
}

fn to_parts(message: RawResponseMessage) -> Vec<Part> {
    let mut parts = Vec::new();
    if let Some(text) = message.content.filter(|t| !t.is_empty()) {
        parts.push(Part::Text(text));
    }
    for tc in message.tool_calls.unwrap_or_default() {
        let args = if tc.function.arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            // Unparseable arguments are passed through so schema validation
            // can report them back to the model.
            serde_json::from_str(&tc.function.arguments)
                .unwrap_or(serde_json::Value::String(tc.function.arguments))
        };
        let id = if tc.id.is_empty() {
            generate_call_id("call")
        } else {
            tc.id
        };
        parts.push(Part::Call(Call::new(id, tc.function.name, args)));
    }
    let hits: Vec<SearchHit> = message
        .annotations
        .unwrap_or_default()
        .into_iter()
        .filter(|a| a.annotation_type.as_deref() == Some("url_citation"))
        .filter_map(|a| a.url_citation)
        .map(|c| SearchHit {
            title: c.title.unwrap_or_else(|| c.url.clone()),
            url: c.url,
            snippet: c.content.unwrap_or_default(),
        })
        .collect();
    if !hits.is_empty() {
        parts.push(Part::SearchResults(hits));
    }
    parts
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for the OpenRouter chat completions API.
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
    routing: TierRouting,
    referer: String,
    title: String,
}

impl OpenRouterClient {
    pub fn new(api_key: impl Into<String>, routing: TierRouting) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent("brig/0.1")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            routing,
            referer: "https://github.com/brig-rs/brig".into(),
            title: "brig".into(),
        })
    }

    /// Read the key from `OPENROUTER_API_KEY`.
    pub fn from_env(routing: TierRouting) -> Result<Self, String> {
        let key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| "OPENROUTER_API_KEY not set".to_string())?;
        Self::new(key, routing)
    }

    pub(crate) fn build_request(&self, transcript: &[Turn], config: &GenerateConfig) -> ChatRequest {
        let tools = (!config.definitions.is_empty()).then(|| {
            config
                .definitions
                .iter()
                .map(|d| WireTool {
                    tool_type: "function",
                    function: d.clone(),
                })
                .collect()
        });
        ChatRequest {
            model: self.routing.model_for(config.model_tier).to_string(),
            messages: to_wire_messages(config.system_prompt.as_deref(), transcript),
            max_tokens: (config.max_tokens > 0).then_some(config.max_tokens),
            temperature: config.temperature,
            tools,
            tool_choice: tool_choice(config),
        }
    }

    async fn chat(&self, body: &ChatRequest) -> Result<Vec<Part>, String> {
        debug!(
            "LLM request: model={}, messages={}, tools={}, temp={}",
            body.model,
            body.messages.len(),
            body.tools.as_ref().map_or(0, |t| t.len()),
            body.temperature,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();
        let resp = self
            .client
            .post(OPENROUTER_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(body)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| format!("failed to read response: {e}"))?;
        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(format!("OpenRouter API HTTP {status}: {text}"));
        }

        let parsed: RawChatResponse =
            serde_json::from_str(&text).map_err(|e| format!("failed to parse response: {e}"))?;
        if let Some(err) = parsed.error {
            return Err(format!("OpenRouter API error: {}", err.message));
        }

        let parts = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .map(|c| to_parts(c.message))
            .unwrap_or_default();
        debug!("LLM output: {} part(s)", parts.len());
        Ok(parts)
    }
}

impl Generator for OpenRouterClient {
    fn generate<'a>(
        &'a self,
        transcript: &'a [Turn],
        config: &'a GenerateConfig,
    ) -> GenerateFuture<'a> {
        Box::pin(async move {
            let body = self.build_request(transcript, config);
            self.chat(&body).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CallResponse;
    use crate::api::ModelTier;
    use serde_json::json;

    fn client() -> OpenRouterClient {
        OpenRouterClient::new("key", TierRouting::split("cheap-model", "main-model")).unwrap()
    }

    #[test]
    fn request_maps_turns_to_wire_messages() {
        let call = Call::new("c1", "runCommand", json!({"command": "ls"}));
        let transcript = vec![
            Turn::user("list files"),
            Turn::call(call.clone()),
            Turn::responses(vec![CallResponse::to(&call, "a.txt")]),
        ];
        let config = GenerateConfig::call(vec![Definition::new("runCommand", "run", json!({}))])
            .with_system_prompt("be brief");
        let req = client().build_request(&transcript, &config);
        let json = serde_json::to_value(&req).unwrap();

        assert_eq!(json["model"], "main-model");
        let roles: Vec<_> = json["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "tool"]);
        assert_eq!(json["messages"][2]["tool_calls"][0]["function"]["arguments"], r#"{"command":"ls"}"#);
        assert_eq!(json["messages"][3]["tool_call_id"], "c1");
        assert_eq!(json["tool_choice"], "required");
        assert_eq!(json["tools"][0]["type"], "function");
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn required_name_forces_function() {
        let config = GenerateConfig::call(vec![Definition::new("wrapContext", "wrap", json!({}))])
            .with_required_name("wrapContext")
            .with_tier(ModelTier::Cheap);
        let req = client().build_request(&[], &config);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "cheap-model");
        assert_eq!(json["tool_choice"]["function"]["name"], "wrapContext");
    }

    #[test]
    fn text_request_omits_tools() {
        let req = client().build_request(&[Turn::user("hi")], &GenerateConfig::text());
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json.get("tool_choice").is_none());
    }

    #[test]
    fn response_message_becomes_parts() {
        let raw: RawResponseMessage = serde_json::from_value(json!({
            "content": "ok",
            "tool_calls": [
                {"id": "", "type": "function", "function": {"name": "runCommand", "arguments": "{\"command\":\"ls\"}"}},
                {"id": "x", "type": "function", "function": {"name": "bad", "arguments": "{oops"}}
            ],
            "annotations": [
                {"type": "url_citation", "url_citation": {"url": "https://example.com", "title": "Example"}}
            ]
        }))
        .unwrap();
        let parts = to_parts(raw);
        assert_eq!(parts[0], Part::Text("ok".into()));
        match &parts[1] {
            Part::Call(c) => {
                assert!(c.id.starts_with("call-"));
                assert_eq!(c.args["command"], "ls");
            }
            other => panic!("expected call, got {other:?}"),
        }
        match &parts[2] {
            Part::Call(c) => assert_eq!(c.args, json!("{oops")),
            other => panic!("expected call, got {other:?}"),
        }
        assert!(matches!(&parts[3], Part::SearchResults(h) if h[0].title == "Example"));
    }
}
