//! Server configuration

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::ai::{PromptLimits, QueueSettings};
use crate::auth::{TokenPolicy, TokenSource};
use crate::retry::{Backoff, RetryPolicy};

const DEFAULT_LLM_ENDPOINT: &str = "https://models.github.ai/inference";
const DEFAULT_LLM_MODEL: &str = "meta/Llama-3.2-11B-Vision-Instruct";
const DEFAULT_LAUNCH_URL: &str = "https://meld-rx-predictive-ai-application.vercel.app/launch";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Server configuration loaded from environment variables.
///
/// The FHIR application id, FHIR base URL and LLM token are deployment
/// secrets with no defaults; they stay `None` when unset and the endpoints
/// that need them answer with an explicit error instead.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub fhir_base_url: Option<String>,
    pub fhir_app_id: Option<String>,
    pub llm_api_token: Option<String>,
    pub llm_endpoint: String,
    pub llm_model: String,
    pub smart_launch_url: String,
    pub cors_origins: Vec<String>,
    pub rate_limit_rps: u32,
    pub queue: QueueSettings,
    pub aggregator_retry: RetryPolicy,
    /// Item cap applied to FHIR fetches when the caller gives none
    pub fhir_max_items: Option<usize>,
    pub api_token_policy: TokenPolicy,
    pub cds_token_policy: TokenPolicy,
    pub analysis_date_ttl: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let queue = QueueSettings {
            concurrency: parse_or("AI_QUEUE_CONCURRENCY", defaults.queue.concurrency)?,
            interval_cap: parse_or("AI_QUEUE_INTERVAL_CAP", defaults.queue.interval_cap)?,
            interval: millis_or("AI_QUEUE_INTERVAL_MS", defaults.queue.interval)?,
            retry: RetryPolicy {
                max_attempts: parse_or::<u32>("AI_QUEUE_RETRIES", 2)? + 1,
                attempt_timeout: Some(millis_or(
                    "AI_ATTEMPT_TIMEOUT_MS",
                    Duration::from_secs(30),
                )?),
                backoff: Backoff::Linear(millis_or("AI_BACKOFF_MS", Duration::from_secs(1))?),
            },
            limits: PromptLimits {
                max_field_chars: parse_or("AI_MAX_FIELD_CHARS", defaults.queue.limits.max_field_chars)?,
                max_content_chars: parse_or(
                    "AI_MAX_CONTENT_CHARS",
                    defaults.queue.limits.max_content_chars,
                )?,
                max_prompt_chars: parse_or("AI_MAX_PROMPT_CHARS", defaults.queue.limits.max_prompt_chars)?,
            },
        };

        let aggregator_retry = RetryPolicy {
            max_attempts: parse_or("AGGREGATOR_ATTEMPTS", defaults.aggregator_retry.max_attempts)?,
            backoff: Backoff::Fixed(millis_or("AGGREGATOR_DELAY_MS", Duration::from_millis(500))?),
            ..defaults.aggregator_retry
        };

        let api_token_policy = match std::env::var("API_TOKEN_SOURCES") {
            Ok(raw) => TokenPolicy::required(parse_sources("API_TOKEN_SOURCES", &raw)?),
            Err(_) => defaults.api_token_policy,
        };

        let cds_token_policy = TokenPolicy {
            required: parse_or("CDS_REQUIRE_AUTHORIZATION", true)?,
            ..defaults.cds_token_policy
        };

        let fhir_max_items = match std::env::var("FHIR_MAX_ITEMS") {
            Ok(raw) => Some(parse_value("FHIR_MAX_ITEMS", &raw)?),
            Err(_) => None,
        };

        Ok(Self {
            bind_address: std::env::var("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            fhir_base_url: non_empty_var("FHIR_BASE_URL"),
            fhir_app_id: non_empty_var("FHIR_APP_ID"),
            llm_api_token: non_empty_var("LLM_API_TOKEN"),
            llm_endpoint: std::env::var("LLM_ENDPOINT").unwrap_or(defaults.llm_endpoint),
            llm_model: std::env::var("LLM_MODEL").unwrap_or(defaults.llm_model),
            smart_launch_url: std::env::var("SMART_LAUNCH_URL")
                .unwrap_or(defaults.smart_launch_url),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|o| o.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            rate_limit_rps: parse_or("RATE_LIMIT_RPS", defaults.rate_limit_rps)?,
            queue,
            aggregator_retry,
            fhir_max_items,
            api_token_policy,
            cds_token_policy,
            analysis_date_ttl: Duration::from_secs(parse_or(
                "ANALYSIS_DATE_TTL_SECS",
                defaults.analysis_date_ttl.as_secs(),
            )?),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            fhir_base_url: None,
            fhir_app_id: None,
            llm_api_token: None,
            llm_endpoint: DEFAULT_LLM_ENDPOINT.to_string(),
            llm_model: DEFAULT_LLM_MODEL.to_string(),
            smart_launch_url: DEFAULT_LAUNCH_URL.to_string(),
            cors_origins: vec!["*".to_string()],
            rate_limit_rps: 100,
            queue: QueueSettings::default(),
            aggregator_retry: RetryPolicy {
                max_attempts: 10,
                attempt_timeout: None,
                backoff: Backoff::Fixed(Duration::from_millis(500)),
            },
            fhir_max_items: None,
            api_token_policy: TokenPolicy::required(vec![TokenSource::Header, TokenSource::Body]),
            cds_token_policy: TokenPolicy::required(vec![TokenSource::FhirAuthorization]),
            analysis_date_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_value<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_or<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn millis_or(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => parse_value::<u64>(name, &raw).map(Duration::from_millis),
        Err(_) => Ok(default),
    }
}

fn parse_sources(name: &'static str, raw: &str) -> Result<Vec<TokenSource>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse().map_err(|reason| ConfigError::Invalid {
                name,
                value: raw.to_string(),
                reason,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_observed_policies() {
        let config = Config::default();

        assert_eq!(config.queue.concurrency, 5);
        assert_eq!(config.queue.interval_cap, 24);
        assert_eq!(config.queue.interval, Duration::from_secs(60));
        assert_eq!(config.queue.retry.max_attempts, 3);
        assert_eq!(config.aggregator_retry.max_attempts, 10);
        assert_eq!(config.aggregator_retry.attempt_timeout, None);
        assert!(config.cds_token_policy.required);
        assert!(config.fhir_app_id.is_none());
    }

    #[test]
    fn token_sources_parse() {
        let sources = parse_sources("API_TOKEN_SOURCES", "body, header").unwrap();
        assert_eq!(sources, vec![TokenSource::Body, TokenSource::Header]);

        let err = parse_sources("API_TOKEN_SOURCES", "cookie").unwrap_err();
        assert!(err.to_string().contains("API_TOKEN_SOURCES"));
    }

    #[test]
    fn invalid_numbers_are_reported() {
        let err = parse_value::<u32>("RATE_LIMIT_RPS", "fast").unwrap_err();
        assert!(err.to_string().contains("RATE_LIMIT_RPS"));
    }
}
