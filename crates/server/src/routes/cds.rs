//! CDS Hooks discovery and the patient-view service

use std::collections::BTreeMap;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
};
use insights_core::cds::{
    Card, CardsResponse, DiscoveryResponse, HookRequest, Indicator, Link, LinkType,
    PATIENT_VIEW_HOOK, ServiceDefinition, Source,
};
use insights_core::{Patient, Resource};

use crate::auth::TokenCandidates;
use crate::error::AppError;
use crate::state::AppState;

pub const SERVICE_ID: &str = "0001";
const SERVICE_TITLE: &str = "Predictive AI Service";
const SERVICE_DESCRIPTION: &str =
    "Provides AI-powered queue optimization, preventive care, and cost reduction analysis.";
const SOURCE_LABEL: &str = "AI Health Insights";

/// Prefetch key → query template
const PREFETCH: &[(&str, &str)] = &[
    ("patient", "Patient/{{context.patientId}}"),
    ("conditions", "Condition?patient={{context.patientId}}"),
    ("observations", "Observation?patient={{context.patientId}}"),
    ("medications", "MedicationRequest?patient={{context.patientId}}"),
    ("procedures", "Procedure?patient={{context.patientId}}"),
    ("claims", "Claim?patient={{context.patientId}}"),
    ("documents", "DocumentReference?patient={{context.patientId}}"),
];

fn service_definition() -> ServiceDefinition {
    ServiceDefinition {
        hook: PATIENT_VIEW_HOOK.to_string(),
        title: SERVICE_TITLE.to_string(),
        description: SERVICE_DESCRIPTION.to_string(),
        id: SERVICE_ID.to_string(),
        prefetch: PREFETCH
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
    }
}

/// GET /cds-services
pub async fn discovery() -> Json<DiscoveryResponse> {
    Json(DiscoveryResponse {
        services: vec![service_definition()],
    })
}

/// POST /cds-services/{id} - one card with the patient's analysis status
pub async fn invoke(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<CardsResponse>, AppError> {
    if id != SERVICE_ID {
        return Err(AppError::NotFound("Service not found".to_string()));
    }

    let invalid = || AppError::BadRequest("Invalid request data".to_string());
    let request: HookRequest = serde_json::from_slice(&body).map_err(|_| invalid())?;
    let patient = match request.prefetch.get("patient") {
        Some(raw) if !raw.is_null() => prefetched_patient(raw.clone()).ok_or_else(invalid)?,
        _ => return Err(invalid()),
    };

    let fhir = state.fhir()?;

    let Some(patient_id) = patient.id.clone().filter(|id| !id.is_empty()) else {
        return Err(AppError::BadRequest("Invalid patient ID".to_string()));
    };

    let access_token = request
        .fhir_authorization
        .as_ref()
        .and_then(|a| a.access_token.as_deref());
    let token = state.config.cds_token_policy.resolve(&TokenCandidates {
        fhir_authorization: access_token,
        ..Default::default()
    })?;

    let mut last_analyzed = state.analysis_dates.get(&patient_id);
    if last_analyzed.is_none() {
        if let Some(token) = token.as_deref() {
            match fhir.latest_analysis_date(&patient_id, token).await {
                Ok(Some(date)) => {
                    state.analysis_dates.put(&patient_id, date.clone());
                    last_analyzed = Some(date);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    patient_id = %patient_id,
                    error = %e,
                    "Could not read last analysis date"
                ),
            }
        }
    }

    let name = patient.display_name();
    let (status, indicator) = match &last_analyzed {
        Some(date) => (format!("Last analyzed on {date}"), Indicator::Info),
        None => ("Patient not yet analyzed".to_string(), Indicator::Warning),
    };

    tracing::info!(
        patient_id = %patient_id,
        analyzed = last_analyzed.is_some(),
        "Answered patient-view hook"
    );

    Ok(Json(CardsResponse {
        cards: vec![Card {
            summary: format!("AI Insights for {name} - {status}"),
            detail: None,
            indicator,
            source: Source {
                label: SOURCE_LABEL.to_string(),
            },
            links: vec![Link {
                label: "Get AI Insights".to_string(),
                url: state.config.smart_launch_url.clone(),
                link_type: LinkType::Smart,
            }],
        }],
    }))
}

/// Prefetched patients may arrive without `resourceType`
fn prefetched_patient(mut raw: serde_json::Value) -> Option<Patient> {
    let object = raw.as_object_mut()?;
    object
        .entry("resourceType")
        .or_insert_with(|| "Patient".into());

    match Resource::from_json(raw).ok()? {
        Resource::Patient(patient) => Some(patient),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_prefetch_is_patient_scoped() {
        let service = service_definition();
        assert_eq!(service.prefetch.len(), 7);
        assert!(
            service
                .prefetch
                .values()
                .all(|q| q.ends_with("{{context.patientId}}"))
        );
    }

    #[test]
    fn prefetched_patient_tolerates_missing_type() {
        let patient = prefetched_patient(json!({"id": "p1", "name": [{"given": ["Ada"]}]})).unwrap();
        assert_eq!(patient.id.as_deref(), Some("p1"));

        assert!(prefetched_patient(json!({"resourceType": "Condition"})).is_none());
        assert!(prefetched_patient(json!("Patient/p1")).is_none());
    }
}
