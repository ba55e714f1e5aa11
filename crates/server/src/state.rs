//! Shared handler state

use std::sync::Arc;

use crate::ai::{Aggregator, AiQueue, LlmClient, SharedQueue};
use crate::config::Config;
use crate::error::AppError;
use crate::fhir::{DocumentResolver, FhirClient};
use crate::store::{AnalysisDateStore, TtlAnalysisDateStore};

/// Everything the handlers need. Collaborators whose settings are missing
/// stay `None`; the accessors turn that into a descriptive 500.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    queue: Option<SharedQueue<LlmClient>>,
    aggregator: Option<Arc<Aggregator<LlmClient>>>,
    fhir: Option<FhirClient>,
    pub documents: DocumentResolver,
    pub analysis_dates: Arc<dyn AnalysisDateStore>,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        let http = reqwest::Client::new();

        let queue = config.llm_api_token.as_ref().map(|token| {
            let client = LlmClient::new(
                http.clone(),
                &config.llm_endpoint,
                token.clone(),
                config.llm_model.clone(),
            );
            Arc::new(AiQueue::new(client, config.queue.clone()))
        });

        let aggregator = queue
            .as_ref()
            .map(|q| Arc::new(Aggregator::new(q.clone(), config.aggregator_retry.clone())));

        let fhir = match (&config.fhir_base_url, &config.fhir_app_id) {
            (Some(base), Some(app_id)) => Some(FhirClient::new(http.clone(), base, app_id)),
            _ => None,
        };

        Self {
            config: Arc::new(config.clone()),
            queue,
            aggregator,
            fhir,
            documents: DocumentResolver::new(http),
            analysis_dates: Arc::new(TtlAnalysisDateStore::new(config.analysis_date_ttl)),
        }
    }

    /// Swap the analysis-date store, e.g. for one shared between instances
    pub fn with_analysis_dates(mut self, store: Arc<dyn AnalysisDateStore>) -> Self {
        self.analysis_dates = store;
        self
    }

    pub fn queue(&self) -> Result<&SharedQueue<LlmClient>, AppError> {
        self.queue
            .as_ref()
            .ok_or_else(|| AppError::Config("LLM_API_TOKEN is not configured".to_string()))
    }

    pub fn aggregator(&self) -> Result<&Aggregator<LlmClient>, AppError> {
        self.aggregator
            .as_deref()
            .ok_or_else(|| AppError::Config("LLM_API_TOKEN is not configured".to_string()))
    }

    pub fn fhir(&self) -> Result<&FhirClient, AppError> {
        if self.config.fhir_app_id.is_none() {
            return Err(AppError::Config("FHIR_APP_ID is not configured".to_string()));
        }
        self.fhir
            .as_ref()
            .ok_or_else(|| AppError::Config("FHIR_BASE_URL is not configured".to_string()))
    }

    /// Item cap for a request, falling back to the configured default
    pub fn max_items(&self, requested: Option<usize>) -> Option<usize> {
        requested.or(self.config.fhir_max_items)
    }

    pub fn llm_configured(&self) -> bool {
        self.queue.is_some()
    }

    pub fn fhir_configured(&self) -> bool {
        self.fhir.is_some()
    }
}
