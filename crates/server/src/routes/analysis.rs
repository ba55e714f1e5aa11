//! Model-backed endpoints: per-item analysis, insight combination and the
//! patient insight pipeline

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
};
use insights_core::{Condition, Insights, Observation, Resource};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::ai::{AnalysisRequest, InsightSource, prompts};
use crate::auth::{TokenBody, TokenCandidates};
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeBody {
    pub item: JsonValue,
    pub resource_type: Option<String>,
    /// Instruction placed before the item's JSON
    pub prompt: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub result: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchBody {
    pub items: Vec<JsonValue>,
    pub resource_type: Option<String>,
    pub prompt: Option<String>,
    pub max_items: Option<usize>,
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchItemResult {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub results: Vec<BatchItemResult>,
}

#[derive(Debug, Deserialize)]
pub struct InsightsBody {
    pub responses: Vec<InsightSource>,
}

#[derive(Debug, Serialize)]
pub struct InsightsResponse {
    /// False when every combining attempt failed and `insights` holds defaults
    pub available: bool,
    pub insights: Insights,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientInsightsResponse {
    pub patient_id: String,
    pub conditions: usize,
    pub observations: usize,
    pub available: bool,
    pub insights: Insights,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientInsightsParams {
    pub max_items: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PredictParams {
    pub prompt: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub insights: String,
}

/// Build the queue request for one item. DocumentReferences get their
/// attachment resolved first; everything else is prompted as JSON.
fn analysis_request(
    state: &AppState,
    resource: Resource,
    resource_type: Option<&str>,
    prompt: Option<&str>,
    token: Option<String>,
) -> AnalysisRequest {
    let is_document = matches!(resource, Resource::DocumentReference(_));
    let mut request = AnalysisRequest::new(resource);

    if let Some(resource_type) = resource_type {
        request = request.with_resource_type(resource_type);
    }
    if is_document {
        request = request.with_content(state.documents.fetcher(token));
    } else if let Some(prompt) = prompt {
        let prompt = prompt.to_string();
        request = request.with_prompt(move |resource| {
            let json = serde_json::to_string_pretty(resource).unwrap_or_default();
            format!("{prompt}\n{json}")
        });
    }
    request
}

/// POST /api/analyze - analyze one item through the queue
pub async fn analyze(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AnalyzeBody>,
) -> Result<Json<AnalyzeResponse>, AppError> {
    let queue = state.queue()?;
    let resource = Resource::from_json(body.item)?;

    let token = state.config.api_token_policy.find(&TokenCandidates {
        headers: Some(&headers),
        body: body.token.as_deref(),
        ..Default::default()
    });

    let request = analysis_request(
        &state,
        resource,
        body.resource_type.as_deref(),
        body.prompt.as_deref(),
        token,
    );
    let result = queue.submit(request).await?;

    Ok(Json(AnalyzeResponse { result }))
}

/// POST /api/analyze/batch - analyze many items; failures stay per item
pub async fn analyze_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<BatchBody>,
) -> Result<Json<BatchResponse>, AppError> {
    let queue = state.queue()?.clone();
    let token = state.config.api_token_policy.find(&TokenCandidates {
        headers: Some(&headers),
        body: body.token.as_deref(),
        ..Default::default()
    });

    let mut items = body.items;
    if let Some(cap) = state.max_items(body.max_items) {
        items.truncate(cap);
    }

    let mut results = Vec::with_capacity(items.len());
    let mut tasks = JoinSet::new();

    for (index, item) in items.into_iter().enumerate() {
        let resource = match Resource::from_json(item) {
            Ok(resource) => resource,
            Err(e) => {
                results.push(BatchItemResult {
                    index,
                    id: None,
                    result: None,
                    error: Some(e.to_string()),
                });
                continue;
            }
        };

        let id = resource.id().map(str::to_string);
        let request = analysis_request(
            &state,
            resource,
            body.resource_type.as_deref(),
            body.prompt.as_deref(),
            token.clone(),
        );
        let queue = queue.clone();
        tasks.spawn(async move {
            let outcome = queue.submit(request).await;
            (index, id, outcome)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let (index, id, outcome) =
            joined.map_err(|e| AppError::Internal(format!("Analysis task failed: {e}")))?;
        let (result, error) = match outcome {
            Ok(text) => (Some(text), None),
            Err(e) => (None, Some(e.to_string())),
        };
        results.push(BatchItemResult {
            index,
            id,
            result,
            error,
        });
    }

    results.sort_by_key(|r| r.index);
    let failed = results.iter().filter(|r| r.error.is_some()).count();
    tracing::info!(items = results.len(), failed = failed, "Batch analysis finished");

    Ok(Json(BatchResponse { results }))
}

/// POST /api/insights - combine at least two raw responses
pub async fn combine(
    State(state): State<AppState>,
    Json(body): Json<InsightsBody>,
) -> Result<Json<InsightsResponse>, AppError> {
    if body.responses.len() < 2 {
        return Err(AppError::BadRequest(
            "At least two responses are required".to_string(),
        ));
    }

    let combined = state.aggregator()?.combine(&body.responses).await;
    Ok(Json(InsightsResponse {
        available: combined.is_some(),
        insights: combined.unwrap_or_default(),
    }))
}

/// POST /api/patients/{id}/insights - fetch, analyze and combine. The
/// token may come from the header or an optional `{token}` body.
pub async fn patient_insights(
    State(state): State<AppState>,
    Path(patient_id): Path<String>,
    Query(params): Query<PatientInsightsParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PatientInsightsResponse>, AppError> {
    let body = TokenBody::from_bytes(&body)?;
    let fhir = state.fhir()?;
    let queue = state.queue()?;
    let aggregator = state.aggregator()?;
    let token = state.config.api_token_policy.require(&TokenCandidates {
        headers: Some(&headers),
        body: body.token.as_deref(),
        ..Default::default()
    })?;
    let max_items = state.max_items(params.max_items);

    let (conditions, observations) = tokio::try_join!(
        fhir.fetch("Condition", &patient_id, &token, max_items),
        fhir.fetch("Observation", &patient_id, &token, max_items),
    )?;

    let conditions: Vec<Condition> = conditions
        .into_iter()
        .filter_map(|r| match r {
            Resource::Condition(c) => Some(c),
            _ => None,
        })
        .collect();
    let observations: Vec<Observation> = observations
        .into_iter()
        .filter_map(|r| match r {
            Resource::Observation(o) => Some(o),
            _ => None,
        })
        .collect();

    let condition_prompt = prompts::conditions_prompt(&conditions);
    let observation_prompt = prompts::observations_prompt(&observations);
    let (condition_text, observation_text) = tokio::try_join!(
        queue.run_prompt(&condition_prompt, CancellationToken::new()),
        queue.run_prompt(&observation_prompt, CancellationToken::new()),
    )?;

    let sources = [
        InsightSource {
            label: "Condition".to_string(),
            response: condition_text,
        },
        InsightSource {
            label: "Observation".to_string(),
            response: observation_text,
        },
    ];
    let combined = aggregator.combine(&sources).await;

    tracing::info!(
        patient_id = %patient_id,
        conditions = conditions.len(),
        observations = observations.len(),
        available = combined.is_some(),
        "Built patient insights"
    );

    Ok(Json(PatientInsightsResponse {
        patient_id,
        conditions: conditions.len(),
        observations: observations.len(),
        available: combined.is_some(),
        insights: combined.unwrap_or_default(),
    }))
}

/// GET /api/predict?prompt= - run a literal prompt through the queue
pub async fn predict(
    State(state): State<AppState>,
    Query(params): Query<PredictParams>,
) -> Result<Json<PredictResponse>, AppError> {
    let prompt = params
        .prompt
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("Prompt is required".to_string()))?;

    let insights = state
        .queue()?
        .run_prompt(&prompt, CancellationToken::new())
        .await?;

    Ok(Json(PredictResponse { insights }))
}
