//! FHIR server access: resource fetching and document content

pub mod client;
pub mod document;

pub use client::{FhirClient, FhirClientError};
pub use document::{DocumentError, DocumentResolver, ResolvedContent};
