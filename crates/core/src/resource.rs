//! FHIR resources as a tagged union over the kinds this service reads.
//!
//! Resources cross into the system through [`Resource::from_json`], which
//! checks the shape once so the rest of the code can match on variants
//! instead of probing optional JSON paths. Known kinds and their nested
//! datatypes keep every field they do not model in `extra`, so
//! serializing a resource back to JSON reproduces what the FHIR server
//! sent.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};

use crate::error::ResourceError;

/// Coding within a CodeableConcept
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Coding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeableConcept {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coding: Vec<Coding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl CodeableConcept {
    fn first_coding(&self) -> Option<&Coding> {
        self.coding.first()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HumanName {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub given: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub name: Vec<HumanName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl Patient {
    /// "Given Family" from the first name, "Unknown" standing in for a
    /// missing given name.
    pub fn display_name(&self) -> String {
        let name = self.name.first();
        let given = name
            .and_then(|n| n.given.first())
            .map(String::as_str)
            .unwrap_or("Unknown");
        let family = name.and_then(|n| n.family.as_deref()).unwrap_or("");
        format!("{given} {family}").trim().to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeableConcept>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clinical_status: Option<CodeableConcept>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl Condition {
    pub fn display(&self) -> &str {
        self.code
            .as_ref()
            .and_then(CodeableConcept::first_coding)
            .and_then(|c| c.display.as_deref())
            .unwrap_or("Unknown")
    }

    pub fn clinical_status(&self) -> &str {
        self.clinical_status
            .as_ref()
            .and_then(CodeableConcept::first_coding)
            .and_then(|c| c.code.as_deref())
            .unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub category: Vec<CodeableConcept>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeableConcept>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_date_time: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl Observation {
    pub fn category_code(&self) -> &str {
        self.category
            .first()
            .and_then(CodeableConcept::first_coding)
            .and_then(|c| c.code.as_deref())
            .unwrap_or("Unknown")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Inline base64 payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentContent {
    pub attachment: Attachment,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentReference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<DocumentContent>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl DocumentReference {
    /// First attachment, which is the one clinical viewers render
    pub fn attachment(&self) -> Option<&Attachment> {
        self.content.first().map(|c| &c.attachment)
    }
}

/// Any resource kind this service does not model
#[derive(Debug, Clone, PartialEq)]
pub struct OtherResource {
    pub resource_type: String,
    pub raw: Map<String, JsonValue>,
}

/// A validated FHIR resource
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Patient(Patient),
    Condition(Condition),
    Observation(Observation),
    DocumentReference(DocumentReference),
    Other(OtherResource),
}

impl Resource {
    /// Validate raw FHIR JSON and sort it into a known variant.
    pub fn from_json(value: JsonValue) -> Result<Self, ResourceError> {
        let JsonValue::Object(mut map) = value else {
            return Err(ResourceError::NotAnObject);
        };

        let resource_type = match map.remove("resourceType") {
            Some(JsonValue::String(rt)) if !rt.is_empty() => rt,
            _ => return Err(ResourceError::MissingResourceType),
        };

        let resource = match resource_type.as_str() {
            "Patient" => Resource::Patient(parse_known(map, &resource_type)?),
            "Condition" => Resource::Condition(parse_known(map, &resource_type)?),
            "Observation" => Resource::Observation(parse_known(map, &resource_type)?),
            "DocumentReference" => {
                Resource::DocumentReference(parse_known(map, &resource_type)?)
            }
            _ => Resource::Other(OtherResource {
                resource_type: resource_type.clone(),
                raw: map,
            }),
        };

        Ok(resource)
    }

    pub fn resource_type(&self) -> &str {
        match self {
            Resource::Patient(_) => "Patient",
            Resource::Condition(_) => "Condition",
            Resource::Observation(_) => "Observation",
            Resource::DocumentReference(_) => "DocumentReference",
            Resource::Other(other) => &other.resource_type,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Resource::Patient(r) => r.id.as_deref(),
            Resource::Condition(r) => r.id.as_deref(),
            Resource::Observation(r) => r.id.as_deref(),
            Resource::DocumentReference(r) => r.id.as_deref(),
            Resource::Other(r) => r.raw.get("id").and_then(JsonValue::as_str),
        }
    }

    /// FHIR JSON including `resourceType`
    pub fn to_json(&self) -> JsonValue {
        let body = match self {
            Resource::Patient(r) => serde_json::to_value(r),
            Resource::Condition(r) => serde_json::to_value(r),
            Resource::Observation(r) => serde_json::to_value(r),
            Resource::DocumentReference(r) => serde_json::to_value(r),
            Resource::Other(r) => Ok(JsonValue::Object(r.raw.clone())),
        };

        // Serializing plain structs of strings and JSON values cannot fail.
        let mut map = match body {
            Ok(JsonValue::Object(map)) => map,
            _ => Map::new(),
        };
        map.insert(
            "resourceType".to_string(),
            JsonValue::String(self.resource_type().to_string()),
        );
        JsonValue::Object(map)
    }
}

fn parse_known<T: DeserializeOwned>(
    map: Map<String, JsonValue>,
    resource_type: &str,
) -> Result<T, ResourceError> {
    serde_json::from_value(JsonValue::Object(map)).map_err(|source| ResourceError::Malformed {
        resource_type: resource_type.to_string(),
        source,
    })
}

impl Serialize for Resource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Resource {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = JsonValue::deserialize(deserializer)?;
        Resource::from_json(value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn patient_display_name() {
        let resource = Resource::from_json(json!({
            "resourceType": "Patient",
            "id": "p1",
            "name": [{"family": "Chalmers", "given": ["Peter", "James"]}]
        }))
        .unwrap();

        let Resource::Patient(patient) = &resource else {
            panic!("expected Patient, got {resource:?}");
        };
        assert_eq!(patient.display_name(), "Peter Chalmers");
        assert_eq!(resource.id(), Some("p1"));
    }

    #[test]
    fn patient_without_name_is_unknown() {
        let patient = Patient::default();
        assert_eq!(patient.display_name(), "Unknown");
    }

    #[test]
    fn condition_and_observation_accessors() {
        let condition = Resource::from_json(json!({
            "resourceType": "Condition",
            "code": {"coding": [{"system": "http://snomed.info/sct", "code": "44054006", "display": "Diabetes"}]},
            "clinicalStatus": {"coding": [{"code": "active"}]}
        }))
        .unwrap();
        let Resource::Condition(condition) = condition else {
            panic!("expected Condition");
        };
        assert_eq!(condition.display(), "Diabetes");
        assert_eq!(condition.clinical_status(), "active");

        let observation = Resource::from_json(json!({
            "resourceType": "Observation",
            "category": [{"coding": [{"code": "vital-signs"}]}]
        }))
        .unwrap();
        let Resource::Observation(observation) = observation else {
            panic!("expected Observation");
        };
        assert_eq!(observation.category_code(), "vital-signs");
        assert_eq!(Observation::default().category_code(), "Unknown");
    }

    #[test]
    fn unknown_kind_is_kept_verbatim() {
        let raw = json!({
            "resourceType": "Claim",
            "id": "c9",
            "total": {"value": 12.5}
        });
        let resource = Resource::from_json(raw.clone()).unwrap();

        assert_eq!(resource.resource_type(), "Claim");
        assert_eq!(resource.id(), Some("c9"));
        assert_eq!(resource.to_json(), raw);
    }

    #[test]
    fn unmodelled_fields_survive_serialization() {
        let raw = json!({
            "resourceType": "Condition",
            "id": "x",
            "onsetDateTime": "2020-01-01",
            "subject": {"reference": "Patient/1"}
        });
        let resource: Resource = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&resource).unwrap(), raw);
    }

    #[test]
    fn nested_unmodelled_fields_survive_serialization() {
        let patient = json!({
            "resourceType": "Patient",
            "id": "p1",
            "name": [{"use": "official", "prefix": ["Dr"], "family": "Lovelace", "given": ["Ada"]}]
        });
        let resource = Resource::from_json(patient.clone()).unwrap();
        assert_eq!(resource.to_json(), patient);

        let observation = json!({
            "resourceType": "Observation",
            "id": "o1",
            "code": {
                "coding": [{"system": "http://loinc.org", "version": "2.74", "code": "8867-4"}],
                "text": "Heart rate",
                "extension": [{"url": "urn:x", "valueString": "y"}]
            },
            "subject": {"reference": "Patient/p1", "display": "Ada Lovelace"}
        });
        let resource = Resource::from_json(observation.clone()).unwrap();
        assert_eq!(resource.to_json(), observation);

        let document = json!({
            "resourceType": "DocumentReference",
            "content": [{
                "attachment": {"contentType": "application/pdf", "url": "Binary/1", "size": 2048, "hash": "abc=", "creation": "2024-01-01"},
                "format": {"code": "urn:ihe:iti:xds:2017:mimeTypeSufficient"}
            }]
        });
        let resource = Resource::from_json(document.clone()).unwrap();
        assert_eq!(resource.to_json(), document);
    }

    #[test]
    fn rejects_missing_resource_type() {
        let err = Resource::from_json(json!({"id": "1"})).unwrap_err();
        assert!(matches!(err, ResourceError::MissingResourceType));

        let err = Resource::from_json(json!([1, 2])).unwrap_err();
        assert!(matches!(err, ResourceError::NotAnObject));
    }

    #[test]
    fn rejects_wrongly_typed_known_fields() {
        let err = Resource::from_json(json!({
            "resourceType": "DocumentReference",
            "content": "not-a-list"
        }))
        .unwrap_err();
        assert!(matches!(err, ResourceError::Malformed { .. }));
    }

    #[test]
    fn document_attachment() {
        let resource = Resource::from_json(json!({
            "resourceType": "DocumentReference",
            "content": [{"attachment": {"contentType": "text/plain", "data": "aGVsbG8="}}]
        }))
        .unwrap();
        let Resource::DocumentReference(doc) = resource else {
            panic!("expected DocumentReference");
        };
        let attachment = doc.attachment().unwrap();
        assert_eq!(attachment.content_type.as_deref(), Some("text/plain"));
        assert_eq!(attachment.data.as_deref(), Some("aGVsbG8="));
    }
}
