//! Model access: the chat-completions client, the request queue every
//! analysis goes through, and the insight aggregator

pub mod aggregator;
pub mod client;
pub mod prompts;
pub mod queue;

pub use aggregator::{Aggregator, CombineError};
pub use client::{InferenceBackend, LlmClient, LlmError};
pub use prompts::{InsightSource, PromptLimits};
pub use queue::{AiQueue, AnalysisRequest, QueueError, QueueSettings, SharedQueue};
