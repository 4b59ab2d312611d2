//! Secret registry and redaction.
//!
//! Secret values revealed by the user are registered once and scrubbed from
//! every transcript, event and summary that leaves the command turn that used
//! them. The registry is append-only and shared by cloning the handle.

use crate::{Call, CallResponse, Turn};
use regex::Regex;
use std::borrow::Cow;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Marker that replaces every occurrence of a registered secret.
pub const REDACTED: &str = "[REDACTED]";

#[derive(Default)]
struct Inner {
    secrets: Vec<String>,
    pattern: Option<Regex>,
}

/// Process-lifetime, append-only set of plaintext secrets.
#[derive(Clone, Default)]
pub struct SecretRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl std::fmt::Debug for SecretRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretRegistry")
            .field("len", &self.len())
            .finish()
    }
}

impl SecretRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a secret value. Empty and duplicate values are ignored.
    pub fn register(&self, secret: impl Into<String>) {
        let secret = secret.into();
        if secret.is_empty() {
            return;
        }
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.secrets.contains(&secret) {
            return;
        }
        inner.secrets.push(secret);

        // Longest first so a secret that contains another is replaced whole.
        let mut ordered: Vec<&String> = inner.secrets.iter().collect();
        ordered.sort_by_key(|s| std::cmp::Reverse(s.len()));
        let alternation = ordered
            .iter()
            .map(|s| regex::escape(s))
            .collect::<Vec<_>>()
            .join("|");
        inner.pattern = Regex::new(&alternation).ok();
        debug!(count = inner.secrets.len(), "Registered secret");
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .secrets
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace every registered secret in `text` with [`REDACTED`].
    pub fn redact_str<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        match &inner.pattern {
            Some(re) if re.is_match(text) => Cow::Owned(re.replace_all(text, REDACTED).into_owned()),
            _ => Cow::Borrowed(text),
        }
    }

    /// Redact every string inside a JSON value.
    pub fn redact_value(&self, value: &serde_json::Value) -> serde_json::Value {
        use serde_json::Value;
        match value {
            Value::String(s) => Value::String(self.redact_str(s).into_owned()),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.redact_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Return a copy of `transcript` with every registered secret replaced.
    pub fn redact(&self, transcript: &[Turn]) -> Vec<Turn> {
        if self.is_empty() {
            return transcript.to_vec();
        }
        transcript
            .iter()
            .map(|turn| Turn {
                role: turn.role,
                text: turn.text.as_deref().map(|t| self.redact_str(t).into_owned()),
                calls: turn
                    .calls
                    .iter()
                    .map(|c| Call {
                        id: c.id.clone(),
                        name: c.name.clone(),
                        args: self.redact_value(&c.args),
                    })
                    .collect(),
                responses: turn
                    .responses
                    .iter()
                    .map(|r| CallResponse {
                        id: r.id.clone(),
                        name: r.name.clone(),
                        content: self.redact_str(&r.content).into_owned(),
                    })
                    .collect(),
                cache: turn.cache,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_registry_borrows() {
        let reg = SecretRegistry::new();
        assert!(matches!(reg.redact_str("nothing here"), Cow::Borrowed(_)));
    }

    #[test]
    fn redacts_literal_with_regex_metacharacters() {
        let reg = SecretRegistry::new();
        reg.register("p@ss.w*rd(1)");
        let out = reg.redact_str("token=p@ss.w*rd(1) and pXssXwXrd(1)");
        assert_eq!(out, format!("token={REDACTED} and pXssXwXrd(1)"));
    }

    #[test]
    fn longer_secret_wins_over_prefix() {
        let reg = SecretRegistry::new();
        reg.register("abc");
        reg.register("abcdef");
        assert_eq!(reg.redact_str("abcdef"), REDACTED);
        assert_eq!(reg.redact_str("abc!"), format!("{REDACTED}!"));
    }

    #[test]
    fn ignores_empty_and_duplicates() {
        let reg = SecretRegistry::new();
        reg.register("");
        reg.register("s3cret");
        reg.register("s3cret");
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn redacted_transcript_contains_no_secret() {
        let reg = SecretRegistry::new();
        reg.register("hunter2");
        let call = Call::new(
            "c1",
            "runCommand",
            serde_json::json!({"command": "echo hunter2", "env": ["X=hunter2"]}),
        );
        let transcript = vec![
            Turn::user("my password is hunter2"),
            Turn::call(call.clone()),
            Turn::responses(vec![CallResponse::to(&call, "hunter2\n")]),
        ];
        let redacted = reg.redact(&transcript);
        let serialized = serde_json::to_string(&redacted).unwrap();
        assert!(!serialized.contains("hunter2"));
        assert_eq!(serialized.matches(REDACTED).count(), 4);
    }

    #[test]
    fn clones_share_state() {
        let reg = SecretRegistry::new();
        let other = reg.clone();
        other.register("shared");
        assert_eq!(reg.redact_str("shared"), REDACTED);
    }
}
