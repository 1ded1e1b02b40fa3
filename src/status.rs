//! `GET /status`: backend reachability and uptime.

use std::time::Instant;

use headwater_api::conduit::{ConduitOptions, GenerationParams, GenerationRequest};
use headwater_api::status::{HealthStatus, StatusResponse};
use tracing::{instrument, warn};

use crate::generation::GenerationDispatch;

pub struct StatusService {
    dispatch: GenerationDispatch,
    health_model: Option<String>,
    started: Instant,
}

impl StatusService {
    pub fn new(dispatch: GenerationDispatch, health_model: Option<String>) -> Self {
        Self {
            dispatch,
            health_model,
            started: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// List models and, when a health model is configured, make a 1-token
    /// generation call.
    ///
    /// `healthy` when every check passes, `degraded` when some do, `error`
    /// when none do.
    #[instrument(skip_all, fields(backend = self.dispatch.name()))]
    pub async fn check(&self) -> StatusResponse {
        let listing = self.dispatch.list_models().await;
        let ping = match &self.health_model {
            Some(model) => Some(self.ping(model).await),
            None => None,
        };

        let (status, message) = match (&listing, &ping) {
            (Ok(_), None) | (Ok(_), Some(Ok(()))) => {
                (HealthStatus::Healthy, format!("{} backend reachable", self.dispatch.name()))
            }
            (Ok(_), Some(Err(e))) => (HealthStatus::Degraded, format!("model ping failed: {}", e)),
            (Err(e), Some(Ok(()))) => (HealthStatus::Degraded, format!("model listing failed: {}", e)),
            (Err(e), None) | (Err(e), Some(Err(_))) => {
                (HealthStatus::Error, format!("generation backend unreachable: {}", e))
            }
        };
        if status != HealthStatus::Healthy {
            warn!(status = ?status, %message, "status check");
        }

        StatusResponse {
            status,
            message,
            models_available: listing.unwrap_or_default(),
            uptime: Some(self.uptime_secs()),
        }
    }

    async fn ping(&self, model: &str) -> Result<(), headwater_api::error::GenerationError> {
        let mut params = GenerationParams::new(model);
        params.max_tokens = Some(1);
        let request = GenerationRequest::from_prompt("ping", &params, &ConduitOptions::default());
        self.dispatch.generate(request).await.map(|_| ())
    }
}
