//! Application error handling

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::ai::{LlmError, QueueError};
use crate::fhir::{DocumentError, FhirClientError};

/// JSON error body returned by every endpoint
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Status reported by the upstream FHIR or LLM endpoint
    #[serde(rename = "upstreamStatus", skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<u16>,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        body(message.into(), None, None)
    }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    MethodNotAllowed,
    /// Required deployment setting is absent
    Config(String),
    /// Upstream FHIR/LLM failure, with its status and body when known
    Upstream {
        message: String,
        status: Option<u16>,
        detail: String,
    },
    /// The request was cancelled before it completed
    Cancelled(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, body(msg, None, None)),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, body(msg, None, None)),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, body(msg, None, None)),
            AppError::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                body("Method Not Allowed".to_string(), None, None),
            ),
            AppError::Config(msg) => {
                tracing::error!(reason = %msg, "Missing configuration");
                (StatusCode::INTERNAL_SERVER_ERROR, body(msg, None, None))
            }
            AppError::Upstream {
                message,
                status,
                detail,
            } => {
                tracing::warn!(upstream_status = ?status, detail = %detail, "{}", message);
                (StatusCode::BAD_GATEWAY, body(message, Some(detail), status))
            }
            AppError::Cancelled(msg) => (StatusCode::SERVICE_UNAVAILABLE, body(msg, None, None)),
            AppError::Internal(msg) => {
                tracing::error!(reason = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    body("Server error".to_string(), Some(msg), None),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

fn body(message: String, error: Option<String>, upstream_status: Option<u16>) -> ErrorBody {
    ErrorBody {
        message,
        error,
        upstream_status,
    }
}

impl From<LlmError> for AppError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Cancelled => AppError::Cancelled("AI request was cancelled".to_string()),
            LlmError::Status { status, body } => AppError::Upstream {
                message: "AI request failed".to_string(),
                status: Some(status),
                detail: body,
            },
            other => AppError::Upstream {
                message: "AI request failed".to_string(),
                status: None,
                detail: other.to_string(),
            },
        }
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Content(e) => e.into(),
            QueueError::Inference(e) => e.into(),
            QueueError::Cancelled => AppError::Cancelled("Analysis was cancelled".to_string()),
        }
    }
}

impl From<FhirClientError> for AppError {
    fn from(err: FhirClientError) -> Self {
        match err {
            FhirClientError::Unauthorized { status, body } => AppError::Unauthorized(format!(
                "FHIR server rejected the access token ({status}): {body}"
            )),
            FhirClientError::Status { status, body, .. } => AppError::Upstream {
                message: "FHIR request failed".to_string(),
                status: Some(status),
                detail: body,
            },
            FhirClientError::Resource(e) => AppError::Upstream {
                message: "FHIR server returned an invalid resource".to_string(),
                status: None,
                detail: e.to_string(),
            },
            other => AppError::Upstream {
                message: "FHIR request failed".to_string(),
                status: None,
                detail: other.to_string(),
            },
        }
    }
}

impl From<DocumentError> for AppError {
    fn from(err: DocumentError) -> Self {
        match err {
            DocumentError::MissingContentType
            | DocumentError::NoContent
            | DocumentError::NotADocument(_)
            | DocumentError::InvalidBase64(_) => AppError::BadRequest(err.to_string()),
            DocumentError::Status { status, body } => AppError::Upstream {
                message: "Failed to fetch document content".to_string(),
                status: Some(status),
                detail: body,
            },
            DocumentError::Request(e) => AppError::Upstream {
                message: "Failed to fetch document content".to_string(),
                status: None,
                detail: e.to_string(),
            },
        }
    }
}

impl From<insights_core::ResourceError> for AppError {
    fn from(err: insights_core::ResourceError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}
