//! Combine several free-text model responses into one [`Insights`] object.
//!
//! The combining call goes through the shared [`AiQueue`] like every other
//! model call. Model output is non-deterministic, so a reply that carries no
//! JSON, fails to parse, or fails validation counts as a transient failure
//! and the whole round trip is retried under the aggregator's policy.

use std::time::Duration;

use insights_core::{InsightError, Insights, RawInsights};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::client::{InferenceBackend, LlmError};
use super::prompts::{self, InsightSource};
use super::queue::{QueueError, SharedQueue};
use crate::retry::{self, RetryPolicy, Retryable};

#[derive(Debug, Error)]
pub enum CombineError {
    #[error(transparent)]
    Inference(LlmError),

    #[error("Model reply contained no JSON object")]
    NoJson,

    #[error("Model reply is not valid insight JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] InsightError),

    #[error("Combining call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Combining cancelled")]
    Cancelled,
}

impl From<QueueError> for CombineError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Inference(e) => CombineError::Inference(e),
            QueueError::Cancelled => CombineError::Cancelled,
            // run_prompt never fetches content
            QueueError::Content(e) => CombineError::Inference(LlmError::Decode(e.to_string())),
        }
    }
}

impl Retryable for CombineError {
    fn is_transient(&self) -> bool {
        match self {
            CombineError::Inference(e) => e.is_transient(),
            CombineError::Cancelled => false,
            _ => true,
        }
    }

    fn timed_out(after: Duration) -> Self {
        CombineError::Timeout(after)
    }

    fn cancelled() -> Self {
        CombineError::Cancelled
    }
}

pub struct Aggregator<B> {
    queue: SharedQueue<B>,
    policy: RetryPolicy,
}

impl<B: InferenceBackend> Aggregator<B> {
    /// `policy.attempt_timeout` should normally be `None`: each model call
    /// already runs under the queue's per-attempt deadline, and a deadline
    /// here would also count time spent waiting for admission.
    pub fn new(queue: SharedQueue<B>, policy: RetryPolicy) -> Self {
        Self { queue, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Combine `sources` into structured insights.
    ///
    /// Returns `None` once every attempt has failed; callers fall back to
    /// [`Insights::default`].
    pub async fn combine(&self, sources: &[InsightSource]) -> Option<Insights> {
        self.combine_with_cancel(sources, &CancellationToken::new())
            .await
            .ok()
    }

    pub async fn combine_with_cancel(
        &self,
        sources: &[InsightSource],
        cancel: &CancellationToken,
    ) -> Result<Insights, CombineError> {
        let prompt = prompts::combine_prompt(sources);
        let queue = &self.queue;

        let outcome = retry::retry(&self.policy, cancel, |attempt| {
            let prompt = prompt.as_str();
            let cancel = cancel.clone();
            async move {
                if attempt > 1 {
                    metrics::counter!("insight_aggregator_retries_total").increment(1);
                }
                let reply = queue.run_prompt(prompt, cancel).await?;
                parse_insights(&reply)
            }
        })
        .await;

        match &outcome {
            Ok(insights) => tracing::info!(
                sources = sources.len(),
                risk_score = insights.risk_score,
                "Combined insights"
            ),
            Err(e) => {
                metrics::counter!("insight_aggregator_failures_total").increment(1);
                tracing::error!(sources = sources.len(), error = %e, "Failed to combine insights");
            }
        }
        outcome
    }
}

/// Pull the insight object out of a model reply and validate it
pub fn parse_insights(reply: &str) -> Result<Insights, CombineError> {
    let json = prompts::extract_json(reply).ok_or(CombineError::NoJson)?;
    let raw: RawInsights = serde_json::from_str(json)?;
    Ok(raw.validate()?)
}
