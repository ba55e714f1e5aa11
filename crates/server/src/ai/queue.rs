//! Bounded-concurrency, rate-limited, retrying dispatcher for LLM calls.
//!
//! Every per-resource analysis goes through one [`AiQueue`] so the service
//! as a whole stays inside the provider's limits:
//!
//! - at most `concurrency` tasks run at once,
//! - at most `interval_cap` tasks start inside any trailing `interval`,
//! - tasks are admitted in submission order.
//!
//! Admission happens under a fair (FIFO) async mutex that also owns the
//! start-timestamp window. The task at the head of the line holds it while
//! it waits for a concurrency slot and then for the window to open, so a
//! later submission can never overtake an earlier one. Once admitted, a
//! task runs its LLM call under the shared [`RetryPolicy`].

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use insights_core::Resource;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::client::{InferenceBackend, LlmError};
use super::prompts::{self, PromptLimits};
use crate::fhir::{DocumentError, ResolvedContent};
use crate::retry::{self, Backoff, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    /// Maximum tasks executing at once
    pub concurrency: usize,
    /// Maximum task starts per `interval`
    pub interval_cap: usize,
    pub interval: Duration,
    pub retry: RetryPolicy,
    pub limits: PromptLimits,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            concurrency: 5,
            interval_cap: 24,
            interval: Duration::from_secs(60),
            retry: RetryPolicy {
                max_attempts: 3,
                attempt_timeout: Some(Duration::from_secs(30)),
                backoff: Backoff::Linear(Duration::from_secs(1)),
            },
            limits: PromptLimits::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Failed to fetch content: {0}")]
    Content(#[from] DocumentError),

    #[error(transparent)]
    Inference(LlmError),

    #[error("Analysis cancelled")]
    Cancelled,
}

impl From<LlmError> for QueueError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Cancelled => QueueError::Cancelled,
            other => QueueError::Inference(other),
        }
    }
}

pub type PromptBuilder = Box<dyn FnOnce(&Resource) -> String + Send>;
pub type ContentFuture = Pin<Box<dyn Future<Output = Result<ResolvedContent, DocumentError>> + Send>>;
pub type ContentFetcher = Box<dyn FnOnce(&Resource) -> ContentFuture + Send>;

/// One "analyze this item" request
pub struct AnalysisRequest {
    resource: Resource,
    resource_type: String,
    prompt_builder: Option<PromptBuilder>,
    content_fetcher: Option<ContentFetcher>,
    cancel: CancellationToken,
}

impl AnalysisRequest {
    pub fn new(resource: Resource) -> Self {
        let resource_type = resource.resource_type().to_string();
        Self {
            resource,
            resource_type,
            prompt_builder: None,
            content_fetcher: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Override the type tag used in prompts
    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = resource_type.into();
        self
    }

    pub fn with_prompt<F>(mut self, builder: F) -> Self
    where
        F: FnOnce(&Resource) -> String + Send + 'static,
    {
        self.prompt_builder = Some(Box::new(builder));
        self
    }

    /// Fetch out-of-band content before prompting. The fetched content
    /// replaces any prompt builder.
    pub fn with_content<F>(mut self, fetcher: F) -> Self
    where
        F: FnOnce(&Resource) -> ContentFuture + Send + 'static,
    {
        self.content_fetcher = Some(Box::new(fetcher));
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Process-local AI request queue
pub struct AiQueue<B> {
    backend: B,
    settings: QueueSettings,
    slots: Semaphore,
    /// Start times inside the current window; the lock is the admission line
    window: Mutex<VecDeque<Instant>>,
}

impl<B: InferenceBackend> AiQueue<B> {
    pub fn new(backend: B, settings: QueueSettings) -> Self {
        let concurrency = settings.concurrency.max(1);
        Self {
            backend,
            slots: Semaphore::new(concurrency),
            window: Mutex::new(VecDeque::with_capacity(settings.interval_cap)),
            settings,
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Queue an analysis and wait for the model's answer
    pub async fn submit(&self, request: AnalysisRequest) -> Result<String, QueueError> {
        let AnalysisRequest {
            resource,
            resource_type,
            prompt_builder,
            content_fetcher,
            cancel,
        } = request;

        let _permit = self.admit(&cancel).await?;
        let _in_flight = InFlight::enter();

        metrics::counter!("ai_queue_tasks_started_total", "resource_type" => resource_type.clone())
            .increment(1);
        tracing::info!(
            resource_type = %resource_type,
            resource_id = resource.id().unwrap_or("-"),
            "AI task started"
        );

        let limits = &self.settings.limits;
        let prompt = match content_fetcher {
            Some(fetch) => {
                let content = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(QueueError::Cancelled),
                    content = fetch(&resource) => content?,
                };
                let text = limits.bound_content(&content.content);
                prompts::content_prompt(&resource_type, &content.content_type, &text)
            }
            None => {
                let bounded = limits.bound_resource(&resource);
                match prompt_builder {
                    Some(build) => build(&bounded),
                    None => prompts::default_prompt(&resource_type, &bounded),
                }
            }
        };
        let prompt = limits.bound_prompt(prompt);

        let result = self.infer(&prompt, &cancel).await;
        match &result {
            Ok(_) => tracing::info!(resource_type = %resource_type, "AI task finished"),
            Err(e) => tracing::error!(resource_type = %resource_type, error = %e, "AI task failed"),
        }
        result
    }

    /// Run a literal prompt through the same admission and retry path
    pub async fn run_prompt(
        &self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<String, QueueError> {
        let _permit = self.admit(&cancel).await?;
        let _in_flight = InFlight::enter();

        metrics::counter!("ai_queue_tasks_started_total", "resource_type" => "prompt")
            .increment(1);
        tracing::debug!(prompt_chars = prompt.len(), "AI prompt started");

        self.infer(prompt, &cancel).await
    }

    /// Wait until both a concurrency slot and the rate window allow a start
    async fn admit(&self, cancel: &CancellationToken) -> Result<SemaphorePermit<'_>, QueueError> {
        let mut window = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QueueError::Cancelled),
            window = self.window.lock() => window,
        };

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(QueueError::Cancelled),
            permit = self.slots.acquire() => permit.map_err(|_| QueueError::Cancelled)?,
        };

        let cap = self.settings.interval_cap.max(1);
        let interval = self.settings.interval;

        loop {
            let now = Instant::now();
            while window
                .front()
                .is_some_and(|start| now.duration_since(*start) >= interval)
            {
                window.pop_front();
            }

            if window.len() < cap {
                window.push_back(now);
                return Ok(permit);
            }

            // Full window: the oldest start decides when the next slot opens
            let Some(&oldest) = window.front() else {
                continue;
            };
            tracing::debug!(
                wait_ms = (oldest + interval).saturating_duration_since(now).as_millis() as u64,
                "AI queue rate window full"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(QueueError::Cancelled),
                _ = tokio::time::sleep_until(oldest + interval) => {}
            }
        }
    }

    async fn infer(&self, prompt: &str, cancel: &CancellationToken) -> Result<String, QueueError> {
        let backend = &self.backend;
        retry::retry(&self.settings.retry, cancel, |attempt| {
            if attempt > 1 {
                metrics::counter!("ai_queue_retries_total").increment(1);
            }
            backend.complete(prompt)
        })
        .await
        .map_err(|e| {
            metrics::counter!("ai_queue_failures_total").increment(1);
            QueueError::from(e)
        })
    }
}

/// Keeps the in-flight gauge accurate even when a task is dropped
struct InFlight;

impl InFlight {
    fn enter() -> Self {
        metrics::gauge!("ai_queue_in_flight").increment(1.0);
        InFlight
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        metrics::gauge!("ai_queue_in_flight").decrement(1.0);
    }
}

/// Shared handle used by the HTTP layer
pub type SharedQueue<B> = Arc<AiQueue<B>>;
