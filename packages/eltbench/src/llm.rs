//! Model access for the agent loops.
//!
//! Everything above this module talks to a [`LlmClient`] trait object, so the
//! loops and pipelines can be driven by a scripted client in tests. The
//! production [`ApiClient`] routes on the model-name prefix: `claude-*` goes
//! to an Anthropic-style messages endpoint, everything else to an
//! OpenAI-style chat-completions endpoint.

use std::sync::LazyLock;
use std::time::Duration;

use bon::Builder;
use color_eyre::eyre::{Context, Result, eyre};
use regex::Regex;
use serde_json::json;

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_MAX_TOKENS: u32 = 2048;

#[derive(Debug, Clone, Builder)]
pub struct CompletionRequest {
    #[builder(into)]
    pub model: String,

    #[builder(into)]
    pub prompt: String,

    #[builder(into)]
    pub system: Option<String>,

    #[builder(default = 1.0)]
    pub temperature: f64,
}

pub trait LlmClient {
    /// One blocking completion call; the response is the model's raw text.
    fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// A response that may or may not be structured JSON.
///
/// Several pipeline stages ask for JSON but must tolerate prose; the two
/// cases are explicit so every consumer handles both.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Structured(serde_json::Value),
    Raw(String),
}

static JSON_FRAGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)(\{.*\}|\[.*\])").expect("fragment pattern compiles"));

/// Interpret a model response as JSON if at all possible: first the whole
/// text, then the outermost `{...}`/`[...]` fragment, otherwise the raw text.
pub fn parse_payload(text: &str) -> Payload {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Payload::Structured(value);
    }
    if let Some(caps) = JSON_FRAGMENT_RE.captures(trimmed)
        && let Some(fragment) = caps.get(1)
        && let Ok(value) = serde_json::from_str(fragment.as_str())
    {
        return Payload::Structured(value);
    }
    Payload::Raw(trimmed.to_string())
}

enum Provider {
    OpenAi,
    Anthropic,
}

fn provider_for(model: &str) -> Provider {
    if model.starts_with("claude") {
        Provider::Anthropic
    } else {
        Provider::OpenAi
    }
}

pub struct ApiClient {
    http: reqwest::blocking::Client,
}

impl ApiClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .context("build HTTP client")?;
        Ok(Self { http })
    }

    fn complete_openai(&self, request: &CompletionRequest, with_temperature: bool) -> Result<String> {
        let key = std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY is not set")?;

        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let mut body = json!({"model": request.model, "messages": messages});
        if with_temperature && request.temperature != 1.0 {
            body["temperature"] = json!(request.temperature);
        }

        let response = self
            .http
            .post(OPENAI_URL)
            .bearer_auth(key)
            .json(&body)
            .send()
            .context("send OpenAI request")?;
        let status = response.status();
        let payload: serde_json::Value = response.json().context("decode OpenAI response")?;
        if !status.is_success() {
            return Err(eyre!("OpenAI call failed ({status}): {payload}"));
        }
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| eyre!("OpenAI response has no message content: {payload}"))
    }

    fn complete_anthropic(&self, request: &CompletionRequest, with_temperature: bool) -> Result<String> {
        let key = std::env::var("ANTHROPIC_API_KEY").context("ANTHROPIC_API_KEY is not set")?;

        let mut body = json!({
            "model": request.model,
            "max_tokens": ANTHROPIC_MAX_TOKENS,
            "messages": [{"role": "user", "content": request.prompt}],
        });
        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }
        if with_temperature && request.temperature != 1.0 {
            body["temperature"] = json!(request.temperature);
        }

        let response = self
            .http
            .post(ANTHROPIC_URL)
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .context("send Anthropic request")?;
        let status = response.status();
        let payload: serde_json::Value = response.json().context("decode Anthropic response")?;
        if !status.is_success() {
            return Err(eyre!("Anthropic call failed ({status}): {payload}"));
        }
        let parts = payload["content"]
            .as_array()
            .ok_or_else(|| eyre!("Anthropic response has no content: {payload}"))?;
        let text: String = parts
            .iter()
            .filter(|part| part["type"] == "text")
            .filter_map(|part| part["text"].as_str())
            .collect();
        Ok(text.trim().to_string())
    }

    fn dispatch(&self, request: &CompletionRequest, with_temperature: bool) -> Result<String> {
        match provider_for(&request.model) {
            Provider::OpenAi => self.complete_openai(request, with_temperature),
            Provider::Anthropic => self.complete_anthropic(request, with_temperature),
        }
    }
}

impl LlmClient for ApiClient {
    #[tracing::instrument(skip(self, request), fields(model = %request.model))]
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        match self.dispatch(request, true) {
            Ok(text) => Ok(text),
            // Some models reject any temperature override; retry once
            // with the provider default.
            Err(e) if e.to_string().to_lowercase().contains("temperature") => {
                tracing::warn!(error = %e, "retrying completion without temperature");
                self.dispatch(request, false)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn whole_text_json_is_structured() {
        assert_eq!(
            parse_payload(r#"{"subproblems": ["a", "b"]}"#),
            Payload::Structured(serde_json::json!({"subproblems": ["a", "b"]}))
        );
    }

    #[test]
    fn embedded_json_fragment_is_extracted() {
        let text = "Here is the decomposition:\n{\"steps\": [1, 2]}\nLet me know.";
        assert_eq!(
            parse_payload(text),
            Payload::Structured(serde_json::json!({"steps": [1, 2]}))
        );
    }

    #[test]
    fn bracketed_list_is_extracted() {
        assert_eq!(
            parse_payload("the plan: [\"scan\", \"join\"] done"),
            Payload::Structured(serde_json::json!(["scan", "join"]))
        );
    }

    #[test]
    fn prose_falls_back_to_raw() {
        assert_eq!(
            parse_payload("  no json here  "),
            Payload::Raw("no json here".to_string())
        );
    }

    #[test]
    fn unbalanced_braces_fall_back_to_raw() {
        assert_eq!(
            parse_payload("{ this is not json"),
            Payload::Raw("{ this is not json".to_string())
        );
    }
}
