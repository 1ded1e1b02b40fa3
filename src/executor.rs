//! Bounded-concurrency batch execution.
//!
//! [`BatchExecutor::execute`] runs one independent generation call per
//! [`BatchItem`] and returns outcomes in item order:
//!
//! - at most `max_concurrency` calls are in flight; a task is spawned only
//!   after it holds a semaphore permit, so pending items are never
//!   dispatched early;
//! - each task reports `(index, outcome)` and the outcome lands in slot
//!   `index`, whatever order the calls finish in;
//! - a failing, timed-out, or panicking call only affects its own slot;
//! - dropping the future aborts in-flight async calls and never starts the
//!   rest (blocking calls already on the pool finish, their results are
//!   discarded);
//! - an optional whole-batch deadline turns an overrun into
//!   [`BatchError::Timeout`] with no partial results.
//!
//! [`BatchExecutor::execute_blocking`] serves synchronous callers by
//! driving `execute` on a dedicated runtime.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use headwater_api::batch::BatchItem;
use headwater_api::conduit::{ConduitOptions, GenerationParams, GenerationRequest, GenerationResponse};
use headwater_api::error::GenerationError;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use crate::config::ConduitConfig;
use crate::generation::{panic_message, GenerationDispatch};

/// Result of one batch item.
pub type ItemOutcome = Result<GenerationResponse, GenerationError>;

/// Failure of the batch as a whole. Per-item failures never produce one.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("batch timed out after {0:?}")]
    Timeout(Duration),

    #[error("batch task failed: {0}")]
    Join(String),

    #[error("execute_blocking called from inside a tokio runtime")]
    NestedRuntime,

    #[error("failed to start batch runtime: {0}")]
    Runtime(String),
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_concurrency: usize,
    pub item_timeout: Option<Duration>,
    pub batch_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            item_timeout: None,
            batch_timeout: None,
        }
    }
}

impl From<&ConduitConfig> for ExecutorConfig {
    fn from(config: &ConduitConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency,
            item_timeout: config.item_timeout(),
            batch_timeout: config.batch_timeout(),
        }
    }
}

#[derive(Clone)]
pub struct BatchExecutor {
    dispatch: GenerationDispatch,
    config: ExecutorConfig,
}

impl BatchExecutor {
    pub fn new(dispatch: GenerationDispatch, mut config: ExecutorConfig) -> Self {
        config.max_concurrency = config.max_concurrency.max(1);
        Self { dispatch, config }
    }

    pub fn dispatch(&self) -> &GenerationDispatch {
        &self.dispatch
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run every item and return outcomes aligned with `items`.
    #[instrument(skip_all, fields(items = items.len(), model = %params.model))]
    pub async fn execute(
        &self,
        items: Vec<BatchItem>,
        params: GenerationParams,
        options: ConduitOptions,
    ) -> Result<Vec<ItemOutcome>, BatchError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        match self.config.batch_timeout {
            Some(limit) => tokio::time::timeout(limit, self.run(items, params, options))
                .await
                .unwrap_or_else(|_| {
                    warn!(timeout_secs = limit.as_secs_f64(), "batch deadline exceeded");
                    Err(BatchError::Timeout(limit))
                }),
            None => self.run(items, params, options).await,
        }
    }

    /// Synchronous entry point. Builds a runtime for the duration of the
    /// call: worker threads are capped at the machine's parallelism, the
    /// blocking pool at `max_concurrency`.
    pub fn execute_blocking(
        &self,
        items: Vec<BatchItem>,
        params: GenerationParams,
        options: ConduitOptions,
    ) -> Result<Vec<ItemOutcome>, BatchError> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(BatchError::NestedRuntime);
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(runtime_workers(self.config.max_concurrency))
            .max_blocking_threads(self.config.max_concurrency)
            .thread_name("headwater-batch")
            .enable_all()
            .build()
            .map_err(|e| BatchError::Runtime(e.to_string()))?;
        runtime.block_on(self.execute(items, params, options))
    }

    async fn run(
        &self,
        items: Vec<BatchItem>,
        params: GenerationParams,
        options: ConduitOptions,
    ) -> Result<Vec<ItemOutcome>, BatchError> {
        let total = items.len();
        let params = Arc::new(params);
        let options = Arc::new(options);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut tasks = JoinSet::new();

        for (index, item) in items.into_iter().enumerate() {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| BatchError::Join(e.to_string()))?;
            let dispatch = self.dispatch.clone();
            let params = Arc::clone(&params);
            let options = Arc::clone(&options);
            let item_timeout = self.config.item_timeout;

            tasks.spawn(async move {
                let _permit = permit;
                let request = GenerationRequest::from_prompt(item.prompt(), &params, &options);
                let outcome = run_item(dispatch, request, item_timeout).await;
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<ItemOutcome>> = (0..total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) = joined.map_err(|e| BatchError::Join(e.to_string()))?;
            if let Err(err) = &outcome {
                debug!(index, error = %err, "batch item failed");
            }
            slots[index] = Some(outcome);
        }

        let outcomes: Vec<ItemOutcome> = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    Err(GenerationError::Internal(format!("item {} produced no result", index)))
                })
            })
            .collect();

        if outcomes
            .iter()
            .all(|o| matches!(o, Err(GenerationError::Unavailable(_))))
        {
            warn!(
                items = total,
                backend = self.dispatch.name(),
                "every batch item failed: generation backend unavailable"
            );
        }

        Ok(outcomes)
    }
}

async fn run_item(
    dispatch: GenerationDispatch,
    request: GenerationRequest,
    item_timeout: Option<Duration>,
) -> ItemOutcome {
    let call = AssertUnwindSafe(async move { dispatch.generate(request).await }).catch_unwind();

    let caught = match item_timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(caught) => caught,
            Err(_) => return Err(GenerationError::Timeout(limit)),
        },
        None => call.await,
    };

    caught.unwrap_or_else(|payload| {
        Err(GenerationError::Internal(format!(
            "generation panicked: {}",
            panic_message(payload)
        )))
    })
}

/// Worker threads for [`BatchExecutor::execute_blocking`]'s runtime.
fn runtime_workers(max_concurrency: usize) -> usize {
    let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
    max_concurrency.clamp(1, cores)
}
