//! Ollama chat protocol (`POST /api/chat`, `GET /api/tags`).

use headwater_api::conduit::{GenerationRequest, GenerationResponse, Message, Role};
use headwater_api::error::GenerationError;
use serde_json::{json, Map, Value};

use super::http::ChatProtocol;

pub struct Ollama {
    url: String,
}

impl Ollama {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Ollama `options` object for the sampling params that are set.
pub(crate) fn sampling_options(request: &GenerationRequest) -> Value {
    let params = &request.params;
    let mut options = Map::new();
    if let Some(max_tokens) = params.max_tokens {
        options.insert("num_predict".into(), json!(max_tokens));
    }
    if let Some(temperature) = params.temperature {
        options.insert("temperature".into(), json!(temperature));
    }
    if let Some(top_p) = params.top_p {
        options.insert("top_p".into(), json!(top_p));
    }
    if !params.stop.is_empty() {
        options.insert("stop".into(), json!(params.stop));
    }
    Value::Object(options)
}

impl ChatProtocol for Ollama {
    fn name(&self) -> &str {
        "ollama"
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.url)
    }

    fn chat_body(&self, request: &GenerationRequest) -> Value {
        json!({
            "model": request.params.model,
            "messages": request.messages,
            "stream": false,
            "options": sampling_options(request),
        })
    }

    fn parse_chat(
        &self,
        json: &Value,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        let content = json
            .pointer("/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| {
                GenerationError::InvalidOutput("Ollama response missing message.content".into())
            })?;

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
            input_tokens: count_field(json, "prompt_eval_count"),
            output_tokens: count_field(json, "eval_count"),
            duration_ms: 0,
            stop_reason: json
                .get("done_reason")
                .and_then(|r| r.as_str())
                .map(str::to_string),
        })
    }

    fn models_url(&self) -> String {
        format!("{}/api/tags", self.url)
    }

    fn parse_models(&self, json: &Value) -> Result<Vec<String>, GenerationError> {
        let models = json
            .get("models")
            .and_then(|m| m.as_array())
            .ok_or_else(|| GenerationError::InvalidOutput("Ollama tags missing models".into()))?;
        Ok(models
            .iter()
            .filter_map(|m| m.get("name").and_then(|n| n.as_str()))
            .map(str::to_string)
            .collect())
    }
}

pub(crate) fn count_field(json: &Value, field: &str) -> u32 {
    json.get(field).and_then(|v| v.as_u64()).unwrap_or(0) as u32
}
