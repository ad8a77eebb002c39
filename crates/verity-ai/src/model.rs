//! The language-model capability the reasoning engine depends on.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    /// Transport or server failure.
    #[error("model call failed: {0}")]
    Call(String),

    /// The model answered, but not in the requested shape.
    #[error("malformed model output: {detail}")]
    Malformed { detail: String, raw: String },

    #[error("model call timed out after {0:?}")]
    Timeout(Duration),
}

/// A text-generation backend.
///
/// Implementations are shared across concurrent section evaluations, so
/// calls take `&self`.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Short identifier for logs.
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &Prompt) -> Result<String, ModelError>;

    /// Generate a JSON object shaped by `schema`.
    ///
    /// The default implementation appends the schema to the system prompt and
    /// parses the free-text reply with [`parse_json_reply`].
    async fn generate_structured(
        &self,
        prompt: &Prompt,
        schema: &Value,
    ) -> Result<Value, ModelError> {
        let prompt = Prompt {
            system: with_schema(&prompt.system, schema),
            user: prompt.user.clone(),
        };
        let raw = self.generate(&prompt).await?;
        parse_json_reply(&raw)
    }
}

pub(crate) fn with_schema(system: &str, schema: &Value) -> String {
    format!(
        "{system}\n\nRespond with a single JSON object matching this JSON Schema, and nothing else:\n{schema}"
    )
}

/// Parse a model reply as a JSON object.
///
/// Tolerates Markdown code fences and prose around the object; anything that
/// still is not a JSON object is [`ModelError::Malformed`].
pub fn parse_json_reply(raw: &str) -> Result<Value, ModelError> {
    let body = strip_fences(raw.trim());

    let candidate = match serde_json::from_str::<Value>(body) {
        Ok(v) => Some(v),
        Err(_) => match (body.find('{'), body.rfind('}')) {
            (Some(start), Some(end)) if end > start => {
                serde_json::from_str::<Value>(&body[start..=end]).ok()
            }
            _ => None,
        },
    };

    match candidate {
        Some(v @ Value::Object(_)) => Ok(v),
        Some(other) => Err(ModelError::Malformed {
            detail: format!("expected a JSON object, got {}", json_kind(&other)),
            raw: raw.to_string(),
        }),
        None => Err(ModelError::Malformed {
            detail: "reply is not valid JSON".into(),
            raw: raw.to_string(),
        }),
    }
}

fn strip_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string (`json`) on the opening fence line.
    let rest = rest.split_once('\n').map_or(rest, |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_plain_object() {
        let v = parse_json_reply(r#"{"status": "compliant"}"#).unwrap();
        assert_eq!(v["status"], "compliant");
    }

    #[test]
    fn strips_markdown_fences() {
        let raw = "```json\n{\"status\": \"non_compliant\", \"citations\": [\"a8-24\"]}\n```";
        let v = parse_json_reply(raw).unwrap();
        assert_eq!(v["citations"][0], "a8-24");

        let bare = "```\n{\"ok\": true}\n```";
        assert_eq!(parse_json_reply(bare).unwrap()["ok"], true);
    }

    #[test]
    fn extracts_object_from_surrounding_prose() {
        let raw = "Here is my assessment:\n{\"status\": \"partially_compliant\"}\nThanks.";
        let v = parse_json_reply(raw).unwrap();
        assert_eq!(v["status"], "partially_compliant");
    }

    #[test]
    fn non_object_is_malformed() {
        let err = parse_json_reply("[1, 2, 3]").unwrap_err();
        match err {
            ModelError::Malformed { detail, raw } => {
                assert!(detail.contains("array"), "{detail}");
                assert_eq!(raw, "[1, 2, 3]");
            }
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn prose_is_malformed() {
        assert!(matches!(
            parse_json_reply("The policy looks compliant to me."),
            Err(ModelError::Malformed { .. })
        ));
    }

    struct Echo(String);

    #[async_trait]
    impl LanguageModel for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(&self, prompt: &Prompt) -> Result<String, ModelError> {
            assert!(prompt.system.contains("JSON Schema"));
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn default_structured_call_parses_reply() {
        let model = Echo("```json\n{\"verdict\": 1}\n```".into());
        let v = model
            .generate_structured(&Prompt::new("sys", "user"), &json!({"type": "object"}))
            .await
            .unwrap();
        assert_eq!(v["verdict"], 1);
    }
}
