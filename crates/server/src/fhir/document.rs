//! DocumentReference content resolution (inline attachment or URL)

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use insights_core::{DocumentReference, Resource};
use serde::Serialize;
use thiserror::Error;

use crate::ai::queue::ContentFuture;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Document attachment has no content type")]
    MissingContentType,

    #[error("No content found in the document")]
    NoContent,

    #[error("Expected a DocumentReference, got {0}")]
    NotADocument(String),

    #[error("Attachment data is not valid base64: {0}")]
    InvalidBase64(String),

    #[error("Document fetch failed ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("Document fetch failed: {0}")]
    Request(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedContent {
    pub content: String,
    pub content_type: String,
}

/// Structured text formats that are safe to hand to the model verbatim
fn is_textual(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.starts_with("text/") || ct.contains("json") || ct.contains("xml")
}

#[derive(Clone)]
pub struct DocumentResolver {
    http: reqwest::Client,
}

impl DocumentResolver {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Resolve the first attachment of `doc` to text or base64
    pub async fn resolve(
        &self,
        doc: &DocumentReference,
        token: Option<&str>,
    ) -> Result<ResolvedContent, DocumentError> {
        let attachment = doc.attachment().ok_or(DocumentError::NoContent)?;
        let content_type = attachment
            .content_type
            .clone()
            .filter(|ct| !ct.is_empty())
            .ok_or(DocumentError::MissingContentType)?;

        if let Some(data) = attachment.data.as_deref().filter(|d| !d.is_empty()) {
            let compact: String = data.split_whitespace().collect();
            let bytes = STANDARD
                .decode(compact.as_bytes())
                .map_err(|e| DocumentError::InvalidBase64(e.to_string()))?;

            let content = if is_textual(&content_type) {
                String::from_utf8_lossy(&bytes).into_owned()
            } else {
                STANDARD.encode(&bytes)
            };
            return Ok(ResolvedContent {
                content,
                content_type,
            });
        }

        let Some(url) = attachment.url.as_deref().filter(|u| !u.is_empty()) else {
            return Err(DocumentError::NoContent);
        };

        let mut request = self.http.get(url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DocumentError::Status { status, body });
        }

        let content = if content_type.to_ascii_lowercase().starts_with("text/") {
            response.text().await?
        } else {
            let bytes = response.bytes().await?;
            format!("data:{};base64,{}", content_type, STANDARD.encode(&bytes))
        };

        tracing::debug!(
            content_type = %content_type,
            chars = content.len(),
            "Fetched document content"
        );
        Ok(ResolvedContent {
            content,
            content_type,
        })
    }

    /// Content fetcher for queued DocumentReference analyses
    pub fn fetcher(
        &self,
        token: Option<String>,
    ) -> impl FnOnce(&Resource) -> ContentFuture + Send + 'static {
        let resolver = self.clone();
        move |resource: &Resource| -> ContentFuture {
            let doc = match resource {
                Resource::DocumentReference(doc) => Ok(doc.clone()),
                other => Err(DocumentError::NotADocument(
                    other.resource_type().to_string(),
                )),
            };
            Box::pin(async move { resolver.resolve(&doc?, token.as_deref()).await })
        }
    }
}
