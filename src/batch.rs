//! Batch facade: wire request in, wire response out.
//!
//! [`BatchFacade::run`] is the only place that knows both the transport
//! shapes ([`BatchRequest`], [`BatchResponse`]) and the internal pipeline:
//! resolve the shape, execute, then convert each outcome into a
//! [`BatchItemResult`]. On success `results.len()` equals the declared
//! batch size and `results[i]` belongs to item `i`.

use headwater_api::batch::{BatchDescription, NormalizedBatch};
use headwater_api::conduit::{BatchItemResult, BatchRequest, BatchResponse, Verbosity};
use headwater_api::error::ShapeError;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::executor::{BatchError, BatchExecutor, ItemOutcome};

#[derive(Debug, Error)]
pub enum BatchRunError {
    /// The request does not name its items unambiguously. Nothing ran.
    #[error(transparent)]
    Shape(#[from] ShapeError),

    /// The batch as a whole failed (deadline or infrastructure).
    #[error(transparent)]
    Execution(#[from] BatchError),
}

#[derive(Clone)]
pub struct BatchFacade {
    executor: BatchExecutor,
}

impl BatchFacade {
    pub fn new(executor: BatchExecutor) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &BatchExecutor {
        &self.executor
    }

    #[instrument(skip_all, fields(declared = request.declared_len(), project = %request.options.project_name))]
    pub async fn run(&self, request: BatchRequest) -> Result<BatchResponse, BatchRunError> {
        let batch = normalize(request)?;
        let verbosity = batch.options.verbosity;
        let outcomes = self
            .executor
            .execute(batch.items, batch.params, batch.options)
            .await?;
        Ok(assemble(outcomes, verbosity))
    }

    /// Synchronous twin of [`run`](Self::run) for callers outside a runtime.
    pub fn run_blocking(&self, request: BatchRequest) -> Result<BatchResponse, BatchRunError> {
        let batch = normalize(request)?;
        let verbosity = batch.options.verbosity;
        let outcomes = self
            .executor
            .execute_blocking(batch.items, batch.params, batch.options)?;
        Ok(assemble(outcomes, verbosity))
    }
}

fn normalize(request: BatchRequest) -> Result<NormalizedBatch, ShapeError> {
    BatchDescription::from(request).normalize().map_err(|err| {
        warn!(error = %err, "rejected batch request");
        err
    })
}

fn assemble(outcomes: Vec<ItemOutcome>, verbosity: Verbosity) -> BatchResponse {
    let response = BatchResponse {
        results: outcomes.into_iter().map(BatchItemResult::from).collect(),
    };

    match verbosity {
        Verbosity::Silent => {}
        Verbosity::Summary => {
            info!(
                items = response.results.len(),
                succeeded = response.succeeded(),
                failed = response.failed(),
                "batch complete"
            );
        }
        Verbosity::Detailed => {
            for (index, result) in response.results.iter().enumerate() {
                match result {
                    BatchItemResult::Ok { response } => info!(
                        index,
                        output_tokens = response.output_tokens,
                        duration_ms = response.duration_ms,
                        "batch item succeeded"
                    ),
                    BatchItemResult::Error { error } => info!(
                        index,
                        kind = ?error.kind,
                        message = %error.message,
                        "batch item failed"
                    ),
                }
            }
            info!(
                items = response.results.len(),
                succeeded = response.succeeded(),
                failed = response.failed(),
                "batch complete"
            );
        }
    }

    response
}
