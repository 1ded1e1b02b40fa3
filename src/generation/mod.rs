//! Generation capabilities and dispatch.
//!
//! A capability turns one fully-resolved [`GenerationRequest`] into one
//! [`GenerationResponse`] or a typed [`GenerationError`]. Two shapes exist:
//!
//! - **[`Generate`]**: async, awaited directly on the runtime.
//! - **[`BlockingGenerate`]**: synchronous, run on tokio's blocking pool via
//!   `spawn_blocking` so it never stalls the serving loop.
//!
//! [`GenerationDispatch`] fixes which shape is used when the service is
//! built; callers only ever see `dispatch.generate(request).await`.
//!
//! # Providers
//!
//! | Config value | Capability |
//! |-------------|------------|
//! | `"ollama"` | [`http::HttpGeneration`] with [`ollama::Ollama`] (`/api/chat`) |
//! | `"openai"` | [`http::HttpGeneration`] with [`openai::OpenAI`] (`/v1/chat/completions`) |
//! | `"disabled"` | [`DisabledGeneration`] |
//!
//! # Retry Strategy
//!
//! HTTP providers retry with exponential backoff (1s, 2s, 4s, ... capped at
//! 2^5): HTTP 429 and 5xx retry, other 4xx fail immediately, network errors
//! retry. A backend that stays unreachable surfaces as
//! [`GenerationError::Unavailable`].

pub mod cache;
pub mod http;
pub mod ollama;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use headwater_api::conduit::{GenerationRequest, GenerationResponse};
use headwater_api::error::GenerationError;

use crate::config::ConduitConfig;

use self::cache::CachedGeneration;
use self::http::HttpGeneration;

/// Async generation capability. Must tolerate concurrent calls.
#[async_trait]
pub trait Generate: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: GenerationRequest)
        -> Result<GenerationResponse, GenerationError>;

    async fn list_models(&self) -> Result<Vec<String>, GenerationError> {
        Ok(Vec::new())
    }
}

/// Blocking generation capability. Must tolerate concurrent calls from
/// several pool threads.
pub trait BlockingGenerate: Send + Sync {
    fn name(&self) -> &str;

    fn generate_blocking(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError>;

    fn list_models_blocking(&self) -> Result<Vec<String>, GenerationError> {
        Ok(Vec::new())
    }
}

/// How generation calls are executed. Chosen once at construction.
#[derive(Clone)]
pub enum GenerationDispatch {
    Async(Arc<dyn Generate>),
    Pool(Arc<dyn BlockingGenerate>),
}

impl GenerationDispatch {
    pub fn name(&self) -> &str {
        match self {
            GenerationDispatch::Async(g) => g.name(),
            GenerationDispatch::Pool(g) => g.name(),
        }
    }

    pub fn is_pool(&self) -> bool {
        matches!(self, GenerationDispatch::Pool(_))
    }

    pub async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        match self {
            GenerationDispatch::Async(g) => g.generate(request).await,
            GenerationDispatch::Pool(g) => {
                let g = Arc::clone(g);
                tokio::task::spawn_blocking(move || g.generate_blocking(request))
                    .await
                    .map_err(join_failure)?
            }
        }
    }

    pub async fn list_models(&self) -> Result<Vec<String>, GenerationError> {
        match self {
            GenerationDispatch::Async(g) => g.list_models().await,
            GenerationDispatch::Pool(g) => {
                let g = Arc::clone(g);
                tokio::task::spawn_blocking(move || g.list_models_blocking())
                    .await
                    .map_err(join_failure)?
            }
        }
    }

    /// Wrap in the per-project response cache, holding at most
    /// `max_entries` responses.
    pub fn cached(self, max_entries: usize) -> Self {
        GenerationDispatch::Async(Arc::new(CachedGeneration::new(self, max_entries)))
    }
}

fn join_failure(err: tokio::task::JoinError) -> GenerationError {
    if err.is_panic() {
        GenerationError::Internal(format!("generation panicked: {}", panic_message(err.into_panic())))
    } else {
        GenerationError::Internal(format!("generation task cancelled: {}", err))
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Capability used when `conduit.provider = "disabled"`.
pub struct DisabledGeneration;

#[async_trait]
impl Generate for DisabledGeneration {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn generate(
        &self,
        _request: GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        Err(GenerationError::Disabled)
    }
}

/// Build the configured dispatch, wrapped in the response cache.
///
/// # Errors
///
/// Unknown provider or dispatch names, or an `openai` provider without
/// `OPENAI_API_KEY`.
pub fn create_dispatch(config: &ConduitConfig) -> Result<GenerationDispatch> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let dispatch = match (config.provider.as_str(), config.dispatch.as_str()) {
        ("disabled", _) => GenerationDispatch::Async(Arc::new(DisabledGeneration)),
        ("ollama", mode) => {
            let backend = HttpGeneration::new(
                ollama::Ollama::new(&config.url),
                timeout,
                config.max_retries,
            )?;
            wrap(backend, mode)?
        }
        ("openai", mode) => {
            let backend = HttpGeneration::new(
                openai::OpenAI::from_env(&config.url)?,
                timeout,
                config.max_retries,
            )?;
            wrap(backend, mode)?
        }
        (other, _) => bail!("Unknown conduit provider: {}", other),
    };
    Ok(dispatch.cached(config.cache_max_entries))
}

fn wrap<P: http::ChatProtocol>(backend: HttpGeneration<P>, mode: &str) -> Result<GenerationDispatch> {
    let backend = Arc::new(backend);
    match mode {
        "async" => Ok(GenerationDispatch::Async(backend)),
        "pool" => Ok(GenerationDispatch::Pool(backend)),
        other => bail!("Unknown conduit dispatch: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use headwater_api::conduit::{ConduitOptions, GenerationParams, Message};

    struct Echo;

    impl BlockingGenerate for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn generate_blocking(
            &self,
            request: GenerationRequest,
        ) -> Result<GenerationResponse, GenerationError> {
            let prompt = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            if prompt == "panic" {
                panic!("echo exploded");
            }
            Ok(GenerationResponse {
                model: request.params.model,
                message: Message::assistant(prompt),
                input_tokens: 0,
                output_tokens: 0,
                duration_ms: 0,
                stop_reason: None,
            })
        }
    }

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest::from_prompt(prompt, &GenerationParams::new("m1"), &ConduitOptions::default())
    }

    #[tokio::test]
    async fn pool_dispatch_runs_blocking_capability() {
        let dispatch = GenerationDispatch::Pool(Arc::new(Echo));
        assert!(dispatch.is_pool());
        let resp = dispatch.generate(request("hi")).await.unwrap();
        assert_eq!(resp.content(), "hi");
    }

    #[tokio::test]
    async fn pool_dispatch_turns_panic_into_internal_error() {
        let dispatch = GenerationDispatch::Pool(Arc::new(Echo));
        let err = dispatch.generate(request("panic")).await.unwrap_err();
        match err {
            GenerationError::Internal(msg) => assert!(msg.contains("echo exploded")),
            other => panic!("expected internal error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn disabled_provider_fails_every_call() {
        let config = ConduitConfig {
            provider: "disabled".into(),
            ..Default::default()
        };
        let dispatch = create_dispatch(&config).unwrap();
        assert_eq!(
            dispatch.generate(request("hi")).await.unwrap_err(),
            GenerationError::Disabled
        );
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config = ConduitConfig {
            provider: "mystery".into(),
            ..Default::default()
        };
        assert!(create_dispatch(&config).is_err());
    }
}
