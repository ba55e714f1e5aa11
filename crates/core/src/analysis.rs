//! "Last analyzed" marker Observation written back to the FHIR server

use chrono::{DateTime, NaiveDate};
use serde_json::{Value as JsonValue, json};

pub const ANALYSIS_CODE_SYSTEM: &str = "http://example.org/fhir/CodeSystem/ai-analysis";
pub const ANALYSIS_CODE: &str = "ai-last-analysis";
pub const ANALYSIS_DISPLAY: &str = "Last AI Analysis Date";

/// Accept a FHIR `dateTime` (RFC 3339) or a plain `date`.
pub fn is_valid_analysis_date(date: &str) -> bool {
    DateTime::parse_from_rfc3339(date).is_ok()
        || NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok()
}

/// Build the marker Observation for `patient_id` analyzed at `date`
pub fn last_analyzed_observation(patient_id: &str, date: &str) -> JsonValue {
    json!({
        "resourceType": "Observation",
        "status": "final",
        "code": {
            "coding": [{
                "system": ANALYSIS_CODE_SYSTEM,
                "code": ANALYSIS_CODE,
                "display": ANALYSIS_DISPLAY
            }]
        },
        "subject": {
            "reference": format!("Patient/{patient_id}")
        },
        "effectiveDateTime": date,
        "valueDateTime": date
    })
}
