//! HTTP transport shared by the chat providers.
//!
//! A [`ChatProtocol`] knows a backend's URLs and JSON shapes;
//! [`HttpGeneration`] adds the client, timeout, and retry loop and
//! implements both [`Generate`] and [`BlockingGenerate`], so the same
//! provider can back either dispatch mode.

use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use headwater_api::conduit::{GenerationRequest, GenerationResponse};
use headwater_api::error::GenerationError;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};

use super::{BlockingGenerate, Generate};

/// URLs and wire shapes of one chat backend.
pub trait ChatProtocol: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn chat_url(&self) -> String;
    fn chat_body(&self, request: &GenerationRequest) -> Value;
    fn parse_chat(&self, json: &Value, request: &GenerationRequest)
        -> Result<GenerationResponse, GenerationError>;
    fn models_url(&self) -> String;
    fn parse_models(&self, json: &Value) -> Result<Vec<String>, GenerationError>;

    fn bearer_token(&self) -> Option<&str> {
        None
    }
}

pub struct HttpGeneration<P> {
    protocol: P,
    client: reqwest::Client,
    timeout: Duration,
    max_retries: u32,
}

impl<P: ChatProtocol> HttpGeneration<P> {
    pub fn new(protocol: P, timeout: Duration, max_retries: u32) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            protocol,
            client,
            timeout,
            max_retries,
        })
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    // Blocking clients own a runtime of their own and must not be created
    // or dropped on an async worker, so one is built per pool call.
    fn blocking_client(&self) -> Result<reqwest::blocking::Client, GenerationError> {
        reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| GenerationError::Internal(format!("failed to build HTTP client: {}", e)))
    }
}

#[async_trait]
impl<P: ChatProtocol> Generate for HttpGeneration<P> {
    fn name(&self) -> &str {
        self.protocol.name()
    }

    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        let started = Instant::now();
        let body = self.protocol.chat_body(&request);
        let json = post_json(
            &self.client,
            &self.protocol.chat_url(),
            self.protocol.bearer_token(),
            &body,
            self.max_retries,
            self.timeout,
        )
        .await?;
        let mut response = self.protocol.parse_chat(&json, &request)?;
        response.duration_ms = started.elapsed().as_millis() as u64;
        Ok(response)
    }

    async fn list_models(&self) -> Result<Vec<String>, GenerationError> {
        let mut req = self.client.get(self.protocol.models_url());
        if let Some(token) = self.protocol.bearer_token() {
            req = req.bearer_auth(token);
        }
        let response = req
            .send()
            .await
            .map_err(|e| transport_error(&e, self.timeout))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GenerationError::Upstream {
                status: status.as_u16(),
                message: text,
            });
        }
        let json: Value = response
            .json()
            .await
            .map_err(|e| GenerationError::InvalidOutput(e.to_string()))?;
        self.protocol.parse_models(&json)
    }
}

impl<P: ChatProtocol> BlockingGenerate for HttpGeneration<P> {
    fn name(&self) -> &str {
        self.protocol.name()
    }

    fn generate_blocking(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, GenerationError> {
        let started = Instant::now();
        let client = self.blocking_client()?;
        let body = self.protocol.chat_body(&request);
        let json = post_json_blocking(
            &client,
            &self.protocol.chat_url(),
            self.protocol.bearer_token(),
            &body,
            self.max_retries,
            self.timeout,
        )?;
        let mut response = self.protocol.parse_chat(&json, &request)?;
        response.duration_ms = started.elapsed().as_millis() as u64;
        Ok(response)
    }

    fn list_models_blocking(&self) -> Result<Vec<String>, GenerationError> {
        let client = self.blocking_client()?;
        let mut req = client.get(self.protocol.models_url());
        if let Some(token) = self.protocol.bearer_token() {
            req = req.bearer_auth(token);
        }
        let response = req.send().map_err(|e| transport_error(&e, self.timeout))?;
        let status = response.status();
        if !status.is_success() {
            return Err(GenerationError::Upstream {
                status: status.as_u16(),
                message: response.text().unwrap_or_default(),
            });
        }
        let json: Value = response
            .json()
            .map_err(|e| GenerationError::InvalidOutput(e.to_string()))?;
        self.protocol.parse_models(&json)
    }
}

/// Exponential backoff: 1s, 2s, 4s, ... capped at 32s.
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt.saturating_sub(1)).min(5))
}

/// Rate limiting and server errors are worth another attempt.
pub fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

pub(crate) fn transport_error(err: &reqwest::Error, timeout: Duration) -> GenerationError {
    if err.is_timeout() {
        GenerationError::Timeout(timeout)
    } else {
        GenerationError::Unavailable(err.to_string())
    }
}

/// POST `body` as JSON and return the decoded JSON reply, retrying
/// transient failures.
pub(crate) async fn post_json(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &Value,
    max_retries: u32,
    timeout: Duration,
) -> Result<Value, GenerationError> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = backoff_delay(attempt);
            debug!(url, attempt, delay_secs = delay.as_secs(), "retrying backend request");
            tokio::time::sleep(delay).await;
        }

        let mut req = client.post(url).json(body);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }

        match req.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return response
                        .json()
                        .await
                        .map_err(|e| GenerationError::InvalidOutput(e.to_string()));
                }

                let text = response.text().await.unwrap_or_default();
                let err = GenerationError::Upstream {
                    status: status.as_u16(),
                    message: text,
                };
                if is_retryable(status) {
                    warn!(url, %status, attempt, "backend returned retryable status");
                    last_err = Some(err);
                    continue;
                }
                return Err(err);
            }
            Err(e) => {
                last_err = Some(transport_error(&e, timeout));
                continue;
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| GenerationError::Internal("request failed after retries".to_string())))
}

/// Blocking twin of [`post_json`]. Sleeps the calling pool thread between
/// attempts.
pub(crate) fn post_json_blocking(
    client: &reqwest::blocking::Client,
    url: &str,
    bearer: Option<&str>,
    body: &Value,
    max_retries: u32,
    timeout: Duration,
) -> Result<Value, GenerationError> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            std::thread::sleep(backoff_delay(attempt));
        }

        let mut req = client.post(url).json(body);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }

        match req.send() {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return response
                        .json()
                        .map_err(|e| GenerationError::InvalidOutput(e.to_string()));
                }

                let err = GenerationError::Upstream {
                    status: status.as_u16(),
                    message: response.text().unwrap_or_default(),
                };
                if is_retryable(status) {
                    warn!(url, %status, attempt, "backend returned retryable status");
                    last_err = Some(err);
                    continue;
                }
                return Err(err);
            }
            Err(e) => {
                last_err = Some(transport_error(&e, timeout));
                continue;
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| GenerationError::Internal("request failed after retries".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(4), Duration::from_secs(8));
        assert_eq!(backoff_delay(6), Duration::from_secs(32));
        assert_eq!(backoff_delay(20), Duration::from_secs(32));
    }

    #[test]
    fn retry_classification() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(StatusCode::NOT_FOUND));
        assert!(!is_retryable(StatusCode::BAD_REQUEST));
    }

    #[tokio::test]
    async fn unreachable_backend_is_unavailable() {
        // Port 9 (discard) is closed on test hosts; the connection is refused.
        let client = reqwest::Client::new();
        let err = post_json(
            &client,
            "http://127.0.0.1:9/api/chat",
            None,
            &serde_json::json!({}),
            0,
            Duration::from_secs(2),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GenerationError::Unavailable(_)), "got {err:?}");
    }
}
