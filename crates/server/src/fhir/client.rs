//! FHIR REST client: patient-scoped search with pagination, and the
//! "last analyzed" marker Observation.

use insights_core::analysis::ANALYSIS_CODE;
use insights_core::{Bundle, Resource, ResourceError, last_analyzed_observation};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use thiserror::Error;

const FHIR_JSON: &str = "application/fhir+json";

#[derive(Debug, Error)]
pub enum FhirClientError {
    #[error("FHIR request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("FHIR server rejected the access token ({status}): {body}")]
    Unauthorized { status: u16, body: String },

    #[error("FHIR server returned {status} for {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Invalid FHIR payload: {0}")]
    Decode(String),

    #[error(transparent)]
    Resource(#[from] ResourceError),
}

/// Client bound to one FHIR application endpoint (`{base}/{app_id}`)
#[derive(Clone)]
pub struct FhirClient {
    http: reqwest::Client,
    endpoint: String,
}

impl FhirClient {
    pub fn new(http: reqwest::Client, base_url: &str, app_id: &str) -> Self {
        Self {
            http,
            endpoint: format!(
                "{}/{}",
                base_url.trim_end_matches('/'),
                app_id.trim_matches('/')
            ),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fetch every `resource_type` for a patient.
    ///
    /// Follows `link[rel=next]` and resolves each entry through its
    /// `fullUrl` (the inline resource is used only when an entry has no
    /// `fullUrl`). Stops once `max_items` resources are collected. Any
    /// failing page or entry fails the whole fetch.
    pub async fn fetch(
        &self,
        resource_type: &str,
        patient_id: &str,
        token: &str,
        max_items: Option<usize>,
    ) -> Result<Vec<Resource>, FhirClientError> {
        let limit = max_items.unwrap_or(usize::MAX);
        let mut resources = Vec::new();
        let mut page = 0u32;

        let first = self
            .http
            .get(format!("{}/{}", self.endpoint, resource_type))
            .query(&[("patient", patient_id)]);
        let mut next = Some(first);

        while let Some(request) = next.take() {
            if resources.len() >= limit {
                break;
            }
            page += 1;

            let bundle: Bundle = check(request.bearer_auth(token).send().await?)
                .await?
                .json()
                .await
                .map_err(|e| FhirClientError::Decode(e.to_string()))?;

            let remaining = limit - resources.len();
            let entries: Vec<_> = bundle.entry.iter().take(remaining).cloned().collect();
            let resolved = self.resolve_entries(entries, token).await?;

            tracing::debug!(
                resource_type = resource_type,
                page = page,
                resolved = resolved.len(),
                "Fetched FHIR search page"
            );
            resources.extend(resolved);

            next = bundle
                .next_link()
                .map(|url| self.http.get(url.to_string()));
        }

        resources.truncate(limit);
        tracing::info!(
            resource_type = resource_type,
            count = resources.len(),
            pages = page,
            "Fetched FHIR resources"
        );
        Ok(resources)
    }

    /// Resolve entries concurrently, keeping bundle order
    async fn resolve_entries(
        &self,
        entries: Vec<insights_core::BundleEntry>,
        token: &str,
    ) -> Result<Vec<Resource>, FhirClientError> {
        let mut tasks = tokio::task::JoinSet::new();

        for (index, entry) in entries.into_iter().enumerate() {
            let http = self.http.clone();
            let token = token.to_string();
            tasks.spawn(async move {
                let raw = match (entry.full_url, entry.resource) {
                    (Some(url), _) => {
                        let response = check(http.get(&url).bearer_auth(&token).send().await?).await?;
                        response
                            .json::<serde_json::Value>()
                            .await
                            .map_err(|e| FhirClientError::Decode(e.to_string()))?
                    }
                    (None, Some(inline)) => inline,
                    (None, None) => {
                        return Err(FhirClientError::Decode(
                            "Bundle entry has neither fullUrl nor resource".to_string(),
                        ));
                    }
                };
                Ok((index, Resource::from_json(raw)?))
            });
        }

        let mut resolved = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.map_err(|e| FhirClientError::Decode(e.to_string()))?;
            resolved.push(outcome?);
        }
        resolved.sort_by_key(|(index, _)| *index);
        Ok(resolved.into_iter().map(|(_, r)| r).collect())
    }

    /// `valueDateTime` of the newest marker Observation for a patient
    pub async fn latest_analysis_date(
        &self,
        patient_id: &str,
        token: &str,
    ) -> Result<Option<String>, FhirClientError> {
        let subject = format!("Patient/{patient_id}");
        let response = self
            .http
            .get(format!("{}/Observation", self.endpoint))
            .query(&[
                ("subject", subject.as_str()),
                ("code", ANALYSIS_CODE),
                ("_sort", "-date"),
                ("_count", "1"),
            ])
            .bearer_auth(token)
            .header(ACCEPT, FHIR_JSON)
            .send()
            .await?;

        let text = check(response).await?.text().await?;
        if text.trim().is_empty() {
            return Ok(None);
        }

        let bundle: Bundle =
            serde_json::from_str(&text).map_err(|e| FhirClientError::Decode(e.to_string()))?;
        let Some(raw) = bundle.entry.into_iter().find_map(|e| e.resource) else {
            return Ok(None);
        };

        match Resource::from_json(raw)? {
            Resource::Observation(obs) => Ok(obs.value_date_time.filter(|d| !d.is_empty())),
            _ => Ok(None),
        }
    }

    /// POST the marker Observation recording that `patient_id` was analyzed
    pub async fn write_last_analyzed(
        &self,
        patient_id: &str,
        date: &str,
        token: &str,
    ) -> Result<(), FhirClientError> {
        let observation = last_analyzed_observation(patient_id, date);

        let response = self
            .http
            .post(format!("{}/Observation", self.endpoint))
            .bearer_auth(token)
            .header(CONTENT_TYPE, FHIR_JSON)
            .json(&observation)
            .send()
            .await?;

        check(response).await?;
        tracing::info!(patient_id = patient_id, date = date, "Recorded analysis date");
        Ok(())
    }
}

/// Turn non-2xx responses into typed errors carrying the upstream body
async fn check(response: reqwest::Response) -> Result<reqwest::Response, FhirClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    let status = status.as_u16();

    if status == 401 || status == 403 {
        Err(FhirClientError::Unauthorized { status, body })
    } else {
        Err(FhirClientError::Status { url, status, body })
    }
}
