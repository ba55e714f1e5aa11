use thiserror::Error;

/// Errors raised while validating FHIR JSON at the ingestion boundary
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("Invalid FHIR resource: expected an object")]
    NotAnObject,

    #[error("Missing required field: resourceType")]
    MissingResourceType,

    #[error("Malformed {resource_type} resource: {source}")]
    Malformed {
        resource_type: String,
        #[source]
        source: serde_json::Error,
    },
}
