//! Token counting (`POST /conduit/tokenize`).
//!
//! The Ollama tokenizer asks the model itself: a raw, single-token
//! `/api/generate` call whose `prompt_eval_count` is the prompt's length in
//! tokens. Other providers fall back to an estimate of 4 characters per
//! token.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use headwater_api::error::GenerationError;
use serde_json::json;

use crate::config::ConduitConfig;
use crate::generation::http::post_json;
use crate::generation::ollama::count_field;

/// Approximate characters per token for the estimate tokenizer.
pub const CHARS_PER_TOKEN: usize = 4;

#[async_trait]
pub trait Tokenize: Send + Sync {
    async fn count_tokens(&self, model: &str, text: &str) -> Result<u32, GenerationError>;
}

pub struct OllamaTokenizer {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    max_retries: u32,
}

impl OllamaTokenizer {
    pub fn new(url: &str, timeout: Duration, max_retries: u32) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            url: url.trim_end_matches('/').to_string(),
            timeout,
            max_retries,
        })
    }
}

#[async_trait]
impl Tokenize for OllamaTokenizer {
    async fn count_tokens(&self, model: &str, text: &str) -> Result<u32, GenerationError> {
        if text.is_empty() {
            return Ok(0);
        }
        let body = json!({
            "model": model,
            "prompt": text,
            "raw": true,
            "stream": false,
            "options": {"num_predict": 1},
        });
        let reply = post_json(
            &self.client,
            &format!("{}/api/generate", self.url),
            None,
            &body,
            self.max_retries,
            self.timeout,
        )
        .await?;
        if reply.get("prompt_eval_count").is_none() {
            return Err(GenerationError::InvalidOutput(
                "Ollama response missing prompt_eval_count".into(),
            ));
        }
        Ok(count_field(&reply, "prompt_eval_count"))
    }
}

/// Character-count estimate. Model independent.
pub struct EstimateTokenizer;

impl EstimateTokenizer {
    pub fn estimate(text: &str) -> u32 {
        let chars = text.chars().count();
        chars.div_ceil(CHARS_PER_TOKEN) as u32
    }
}

#[async_trait]
impl Tokenize for EstimateTokenizer {
    async fn count_tokens(&self, _model: &str, text: &str) -> Result<u32, GenerationError> {
        Ok(Self::estimate(text))
    }
}

pub fn create_tokenizer(config: &ConduitConfig) -> Result<Arc<dyn Tokenize>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaTokenizer::new(
            &config.url,
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?)),
        _ => Ok(Arc::new(EstimateTokenizer)),
    }
}
