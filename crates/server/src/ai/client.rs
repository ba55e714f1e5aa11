//! Chat-completions client for the LLM inference endpoint

use std::error::Error as StdError;
use std::future::Future;
use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::Retryable;

const SYSTEM_PROMPT: &str = "You are a helpful assistant that analyzes clinical data and provides structured medical insights.";
const MAX_TOKENS: u32 = 1500;
const TEMPERATURE: f32 = 0.5;
const TOP_P: f32 = 1.0;

/// Upstream markers that mean "try again later", matched against the
/// lowercased message of every error in the source chain
const TRANSIENT_MARKERS: &[&str] = &[
    "504",
    "function_invocation_timeout",
    "econnreset",
    "connection reset",
    "timeout",
];

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("LLM API error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Decode(String),

    #[error("No text content in response")]
    EmptyResponse,

    #[error("LLM request timeout after {0:?}")]
    Timeout(Duration),

    #[error("LLM request cancelled")]
    Cancelled,
}

impl Retryable for LlmError {
    fn is_transient(&self) -> bool {
        match self {
            LlmError::Timeout(_) => true,
            LlmError::Cancelled => false,
            LlmError::Request(e) if e.is_timeout() || e.is_connect() => true,
            LlmError::Status { status: 504, .. } => true,
            other => chain_is_transient(other),
        }
    }

    fn timed_out(after: Duration) -> Self {
        LlmError::Timeout(after)
    }

    fn cancelled() -> Self {
        LlmError::Cancelled
    }
}

/// reqwest only names the outer failure in its message; resets show up
/// further down as an `io::Error`.
fn chain_is_transient(error: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<io::Error>() {
            if matches!(
                io.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::TimedOut
            ) {
                return true;
            }
        }
        let message = e.to_string().to_lowercase();
        if TRANSIENT_MARKERS.iter().any(|m| message.contains(m)) {
            return true;
        }
        current = e.source();
    }
    false
}

/// Something that turns a prompt into model text.
///
/// The queue and the aggregator are generic over this so they can be
/// driven by scripted backends in tests.
pub trait InferenceBackend: Send + Sync + 'static {
    fn complete(&self, prompt: &str) -> impl Future<Output = Result<String, LlmError>> + Send;
}

/// A message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// Request body for the chat-completions API
#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
}

/// Response from the chat-completions API
#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-style chat-completions endpoint
#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    endpoint: String,
    api_token: String,
    model: String,
}

impl LlmClient {
    pub fn new(http: reqwest::Client, endpoint: &str, api_token: String, model: String) -> Self {
        Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_token,
            model,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send one user prompt under the clinical system prompt, return the text
    pub async fn message(&self, prompt: &str) -> Result<String, LlmError> {
        let request = ApiRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
            top_p: TOP_P,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(&self.api_token)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status, body });
        }

        let body = response
            .json::<ApiResponse>()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;

        extract_text(body)
    }
}

impl InferenceBackend for LlmClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.message(prompt).await
    }
}

fn extract_text(response: ApiResponse) -> Result<String, LlmError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|text| !text.trim().is_empty())
        .ok_or(LlmError::EmptyResponse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_transient_failures() {
        let gateway = LlmError::Status {
            status: 504,
            body: String::new(),
        };
        assert!(gateway.is_transient());

        let vercel = LlmError::Status {
            status: 500,
            body: "FUNCTION_INVOCATION_TIMEOUT".to_string(),
        };
        assert!(vercel.is_transient());

        assert!(LlmError::Timeout(Duration::from_secs(30)).is_transient());
    }

    #[test]
    fn transient_markers_ignore_case() {
        let reset = LlmError::Status {
            status: 502,
            body: "upstream: Connection reset by peer".to_string(),
        };
        assert!(reset.is_transient());

        let node = LlmError::Decode("read ECONNRESET".to_string());
        assert!(node.is_transient());
    }

    #[tokio::test]
    async fn connection_reset_is_transient() {
        use tokio::io::AsyncReadExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                // Zero linger turns the close into an RST
                #[allow(deprecated)]
                let _ = socket.set_linger(Some(Duration::ZERO));
                drop(socket);
            }
        });

        let client = LlmClient::new(
            reqwest::Client::new(),
            &format!("http://{addr}"),
            "token".to_string(),
            "model".to_string(),
        );
        let err = client.message("hi").await.unwrap_err();

        assert!(matches!(err, LlmError::Request(_)), "got {err:?}");
        assert!(err.is_transient(), "reset not retried: {err:?}");
    }

    #[test]
    fn classifies_permanent_failures() {
        let bad_request = LlmError::Status {
            status: 400,
            body: "prompt too long".to_string(),
        };
        assert!(!bad_request.is_transient());
        assert!(!LlmError::Cancelled.is_transient());
        assert!(!LlmError::EmptyResponse.is_transient());
    }

    #[test]
    fn request_body_shape() {
        let request = ApiRequest {
            model: "m",
            messages: vec![Message {
                role: "user".to_string(),
                content: "hi".to_string(),
            }],
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
            top_p: TOP_P,
        };
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["model"], "m");
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["max_tokens"], 1500);
        assert_eq!(value["top_p"], 1.0);
    }

    #[test]
    fn reads_first_choice() {
        let response: ApiResponse = serde_json::from_value(json!({
            "choices": [{"message": {"role": "assistant", "content": "Stable."}}]
        }))
        .unwrap();
        assert_eq!(extract_text(response).unwrap(), "Stable.");

        let empty: ApiResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(extract_text(empty), Err(LlmError::EmptyResponse)));
    }
}
