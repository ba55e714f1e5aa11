//! FHIR-facing endpoints: resource fetch, document content and the
//! "last analyzed" marker

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
};
use insights_core::{Resource, is_valid_analysis_date};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::auth::{TokenBody, TokenCandidates};
use crate::error::AppError;
use crate::fhir::{DocumentError, ResolvedContent};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchParams {
    pub patient: Option<String>,
    pub max_items: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResponse {
    pub resource_type: String,
    pub count: usize,
    pub resources: Vec<JsonValue>,
}

#[derive(Debug, Deserialize)]
pub struct DocumentBody {
    pub document: JsonValue,
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastAnalyzedParams {
    pub patient_id: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// GET /api/fhir/{resourceType}?patient=&maxItems=
pub async fn fetch(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
    Query(params): Query<FetchParams>,
    headers: HeaderMap,
) -> Result<Json<FetchResponse>, AppError> {
    let patient_id = params
        .patient
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing patient parameter".to_string()))?;
    let fhir = state.fhir()?;
    let token = state.config.api_token_policy.require(&TokenCandidates {
        headers: Some(&headers),
        ..Default::default()
    })?;

    let resources = fhir
        .fetch(
            &resource_type,
            &patient_id,
            &token,
            state.max_items(params.max_items),
        )
        .await?;

    Ok(Json(FetchResponse {
        resource_type,
        count: resources.len(),
        resources: resources.iter().map(Resource::to_json).collect(),
    }))
}

/// POST /api/document-content - resolve a DocumentReference's attachment
pub async fn document_content(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<DocumentBody>,
) -> Result<Json<ResolvedContent>, AppError> {
    let doc = match Resource::from_json(body.document)? {
        Resource::DocumentReference(doc) => doc,
        other => {
            return Err(DocumentError::NotADocument(other.resource_type().to_string()).into());
        }
    };

    // Inline attachments need no token, so absence is only fatal on fetch
    let token = state.config.api_token_policy.find(&TokenCandidates {
        headers: Some(&headers),
        body: body.token.as_deref(),
        ..Default::default()
    });

    let resolved = state.documents.resolve(&doc, token.as_deref()).await?;
    Ok(Json(resolved))
}

/// POST /api/last-analyzed?patientId=&date= with an optional `{token}` body
pub async fn last_analyzed(
    State(state): State<AppState>,
    Query(params): Query<LastAnalyzedParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<MessageResponse>, AppError> {
    let (Some(patient_id), Some(date)) = (
        params.patient_id.filter(|p| !p.is_empty()),
        params.date.filter(|d| !d.is_empty()),
    ) else {
        return Err(AppError::BadRequest(
            "Missing patientId or date".to_string(),
        ));
    };
    if !is_valid_analysis_date(&date) {
        return Err(AppError::BadRequest(format!("Invalid date '{date}'")));
    }

    let body = TokenBody::from_bytes(&body)?;
    let fhir = state.fhir()?;
    let token = state.config.api_token_policy.require(&TokenCandidates {
        headers: Some(&headers),
        body: body.token.as_deref(),
        ..Default::default()
    })?;

    fhir.write_last_analyzed(&patient_id, &date, &token).await?;
    state.analysis_dates.put(&patient_id, date);

    Ok(Json(MessageResponse {
        message: "Analysis date saved to FHIR".to_string(),
    }))
}
