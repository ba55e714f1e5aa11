//! Bearer token resolution
//!
//! Callers hand the FHIR access token over in different places depending
//! on who they are: the dashboard sends an `Authorization` header or a
//! `token` body field, an EHR invoking a CDS service sends
//! `fhirAuthorization.access_token`. Which places an endpoint accepts, and
//! whether a token is mandatory, is a configured [`TokenPolicy`].

use std::str::FromStr;

use axum::http::{HeaderMap, header};
use serde::Deserialize;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    /// `Authorization: Bearer <token>`
    Header,
    /// `token` field of the JSON body
    Body,
    /// CDS Hooks `fhirAuthorization.access_token`
    FhirAuthorization,
}

impl FromStr for TokenSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "header" => Ok(TokenSource::Header),
            "body" => Ok(TokenSource::Body),
            "fhir-authorization" | "fhirauthorization" => Ok(TokenSource::FhirAuthorization),
            other => Err(format!("unknown token source '{other}'")),
        }
    }
}

/// Ordered list of accepted token locations; the first one present wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPolicy {
    pub sources: Vec<TokenSource>,
    pub required: bool,
}

impl TokenPolicy {
    pub fn required(sources: Vec<TokenSource>) -> Self {
        Self {
            sources,
            required: true,
        }
    }
}

/// Body of endpoints whose only JSON input is an optional `token`
#[derive(Debug, Default, Deserialize)]
pub struct TokenBody {
    pub token: Option<String>,
}

impl TokenBody {
    /// An empty body carries no token
    pub fn from_bytes(body: &[u8]) -> Result<Self, AppError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
            .map_err(|_| AppError::BadRequest("Invalid request body".to_string()))
    }
}

/// Token candidates found on one request
#[derive(Debug, Default)]
pub struct TokenCandidates<'a> {
    pub headers: Option<&'a HeaderMap>,
    pub body: Option<&'a str>,
    pub fhir_authorization: Option<&'a str>,
}

impl TokenCandidates<'_> {
    fn get(&self, source: TokenSource) -> Option<String> {
        let token = match source {
            TokenSource::Header => self.headers.and_then(bearer_from_headers),
            TokenSource::Body => self.body.map(str::to_string),
            TokenSource::FhirAuthorization => self.fhir_authorization.map(str::to_string),
        };
        token.filter(|t| !t.trim().is_empty())
    }
}

impl TokenPolicy {
    /// First token present in an accepted location, ignoring `required`
    pub fn find(&self, candidates: &TokenCandidates<'_>) -> Option<String> {
        self.sources.iter().find_map(|s| candidates.get(*s))
    }

    /// Pick the token according to the policy.
    ///
    /// Returns `Ok(None)` only for optional policies.
    pub fn resolve(&self, candidates: &TokenCandidates<'_>) -> Result<Option<String>, AppError> {
        match self.find(candidates) {
            Some(token) => Ok(Some(token)),
            None if self.required => Err(AppError::Unauthorized(
                "Missing bearer token".to_string(),
            )),
            None => Ok(None),
        }
    }

    /// Like [`resolve`](Self::resolve) for endpoints that cannot work
    /// without a token regardless of policy.
    pub fn require(&self, candidates: &TokenCandidates<'_>) -> Result<String, AppError> {
        self.resolve(candidates)?
            .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))
    }
}

fn bearer_from_headers(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .unwrap_or(value);
    Some(token.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn header_takes_precedence_in_order() {
        let policy = TokenPolicy::required(vec![TokenSource::Header, TokenSource::Body]);
        let h = headers("Bearer from-header");
        let candidates = TokenCandidates {
            headers: Some(&h),
            body: Some("from-body"),
            ..Default::default()
        };

        assert_eq!(policy.require(&candidates).unwrap(), "from-header");
    }

    #[test]
    fn falls_back_to_body() {
        let policy = TokenPolicy::required(vec![TokenSource::Header, TokenSource::Body]);
        let candidates = TokenCandidates {
            body: Some("from-body"),
            ..Default::default()
        };

        assert_eq!(policy.require(&candidates).unwrap(), "from-body");
    }

    #[test]
    fn ignores_sources_outside_policy() {
        let policy = TokenPolicy::required(vec![TokenSource::FhirAuthorization]);
        let h = headers("Bearer from-header");
        let candidates = TokenCandidates {
            headers: Some(&h),
            ..Default::default()
        };

        assert!(matches!(
            policy.resolve(&candidates),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn optional_policy_allows_absence() {
        let policy = TokenPolicy {
            sources: vec![TokenSource::FhirAuthorization],
            required: false,
        };
        let candidates = TokenCandidates {
            fhir_authorization: Some("   "),
            ..Default::default()
        };

        assert_eq!(policy.resolve(&candidates).unwrap(), None);
    }
}
