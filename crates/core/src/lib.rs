//! insights-core: shared domain types for the clinical insights service
//!
//! FHIR resources (as a validated tagged union), search Bundles, CDS Hooks
//! wire types, the structured insight schema, and the "last analyzed"
//! marker Observation.

pub mod analysis;
pub mod bundle;
pub mod cds;
pub mod error;
pub mod insight;
pub mod resource;

pub use analysis::{is_valid_analysis_date, last_analyzed_observation};
pub use bundle::{Bundle, BundleEntry, BundleLink, BundleType};
pub use error::ResourceError;
pub use insight::{InsightError, Insights, RawInsights};
pub use resource::{
    Attachment, CodeableConcept, Coding, Condition, DocumentReference, HumanName, Observation,
    OtherResource, Patient, Reference, Resource,
};
