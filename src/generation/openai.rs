//! OpenAI-compatible chat protocol (`POST /v1/chat/completions`).
//!
//! Requires the `OPENAI_API_KEY` environment variable.

use anyhow::{bail, Result};
use headwater_api::conduit::{GenerationRequest, GenerationResponse, Message, Role};
use headwater_api::error::GenerationError;
use serde_json::{json, Value};

use super::http::ChatProtocol;

pub struct OpenAI {
    url: String,
    api_key: String,
}

impl OpenAI {
    pub fn new(url: &str, api_key: impl Into<String>) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn from_env(url: &str) -> Result<Self> {
        match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.is_empty() => Ok(Self::new(url, key)),
            _ => bail!("OPENAI_API_KEY environment variable not set"),
        }
    }
}

impl ChatProtocol for OpenAI {
    fn name(&self) -> &str {
        "openai"
    }

    fn chat_url(&self) -> String {
        format!("{}/v1/chat/completions", self.url)
    }

    fn chat_body(&self, request: &GenerationRequest) -> Value {
        let params = &request.params;
        let mut body = json!({
            "model": params.model,
            "messages": request.messages,
        });
        if let Some(max_tokens) = params.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = params.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(top_p) = params.top_p {
            body["top_p"] = json!(top_p);
        }
        if !params.stop.is_empty() {
            body["stop"] = json!(params.stop);
        }
        body
    }

    fn parse_chat(
        &self,
        json: &Value,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        let choice = json
            .pointer("/choices/0")
            .ok_or_else(|| GenerationError::InvalidOutput("response has no choices".into()))?;
        let content = choice
            .pointer("/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| GenerationError::InvalidOutput("choice has no message content".into()))?;
        let usage = |field: &str| {
            json.pointer(&format!("/usage/{}", field))
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32
        };

        Ok(GenerationResponse {
            model: json
                .get("model")
                .and_then(|m| m.as_str())
                .unwrap_or(&request.params.model)
                .to_string(),
            message: Message {
                role: Role::Assistant,
                content: content.to_string(),
            },
            input_tokens: usage("prompt_tokens"),
            output_tokens: usage("completion_tokens"),
            duration_ms: 0,
            stop_reason: choice
                .get("finish_reason")
                .and_then(|r| r.as_str())
                .map(str::to_string),
        })
    }

    fn models_url(&self) -> String {
        format!("{}/v1/models", self.url)
    }

    fn parse_models(&self, json: &Value) -> Result<Vec<String>, GenerationError> {
        let data = json
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| GenerationError::InvalidOutput("models response missing data".into()))?;
        Ok(data
            .iter()
            .filter_map(|m| m.get("id").and_then(|id| id.as_str()))
            .map(str::to_string)
            .collect())
    }

    fn bearer_token(&self) -> Option<&str> {
        Some(&self.api_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use headwater_api::conduit::{ConduitOptions, GenerationParams};

    #[test]
    fn parses_completion() {
        let req = GenerationRequest::from_prompt(
            "hi",
            &GenerationParams::new("gpt-4o-mini"),
            &ConduitOptions::default(),
        );
        let reply = json!({
            "model": "gpt-4o-mini-2024",
            "choices": [{"message": {"role": "assistant", "content": "hello"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 1}
        });
        let resp = OpenAI::new("https://api.openai.com", "k").parse_chat(&reply, &req).unwrap();
        assert_eq!(resp.content(), "hello");
        assert_eq!(resp.model, "gpt-4o-mini-2024");
        assert_eq!(resp.input_tokens, 5);
    }

    #[test]
    fn body_omits_unset_sampling() {
        let req = GenerationRequest::from_prompt(
            "hi",
            &GenerationParams::new("gpt-4o-mini"),
            &ConduitOptions::default(),
        );
        let body = OpenAI::new("https://api.openai.com/", "k").chat_body(&req);
        assert!(body.get("max_tokens").is_none());
        assert_eq!(body["messages"][0]["role"], "user");
    }
}
