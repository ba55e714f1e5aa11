//! CDS Hooks wire types (discovery, invocation, cards)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Hook this service registers for
pub const PATIENT_VIEW_HOOK: &str = "patient-view";

/// GET /cds-services response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    pub services: Vec<ServiceDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub hook: String,
    pub title: String,
    pub description: String,
    pub id: String,
    /// Prefetch key → FHIR query template
    pub prefetch: BTreeMap<String, String>,
}

/// POST /cds-services/{id} request body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookRequest {
    #[serde(default)]
    pub hook: Option<String>,
    #[serde(default)]
    pub hook_instance: Option<String>,
    #[serde(default)]
    pub fhir_server: Option<String>,
    #[serde(default)]
    pub fhir_authorization: Option<FhirAuthorization>,
    #[serde(default)]
    pub context: JsonValue,
    #[serde(default)]
    pub prefetch: BTreeMap<String, JsonValue>,
}

/// Bearer token handed over by the EHR. Field names are snake_case on
/// the wire, as in OAuth token responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FhirAuthorization {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Indicator {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Smart,
    Absolute,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub label: String,
    pub url: String,
    #[serde(rename = "type")]
    pub link_type: LinkType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub indicator: Indicator,
    pub source: Source,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardsResponse {
    pub cards: Vec<Card>,
}
