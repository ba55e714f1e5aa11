//! Structured insight schema produced by the combining LLM call

use serde::{Deserialize, Serialize};

pub const DEFAULT_RISK_SCORE: f64 = 50.0;
pub const DEFAULT_ACCURACY: f64 = 0.5;
pub const NO_EXPLANATION: &str = "No explanation provided.";

/// Insight JSON as the model returned it. Every field may be missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawInsights {
    pub risk_score: Option<f64>,
    pub risk_score_explanation: Option<String>,
    pub recommended_treatments: Option<Vec<String>>,
    pub condition_trends: Option<Vec<String>>,
    pub preventive_measures: Option<Vec<String>>,
    pub accuracy: Option<f64>,
    pub accuracy_explanation: Option<String>,
    pub normal_response: Option<String>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InsightError {
    #[error("riskScore {0} is outside 0-100")]
    RiskScoreOutOfRange(f64),

    #[error("accuracy {0} is outside 0-1")]
    AccuracyOutOfRange(f64),
}

/// Normalized insights with every field populated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insights {
    pub risk_score: f64,
    pub risk_score_explanation: String,
    pub recommended_treatments: Vec<String>,
    pub condition_trends: Vec<String>,
    pub preventive_measures: Vec<String>,
    pub accuracy: f64,
    pub accuracy_explanation: String,
    pub normal_response: String,
}

impl Default for Insights {
    fn default() -> Self {
        Self {
            risk_score: DEFAULT_RISK_SCORE,
            risk_score_explanation: NO_EXPLANATION.to_string(),
            recommended_treatments: Vec::new(),
            condition_trends: Vec::new(),
            preventive_measures: Vec::new(),
            accuracy: DEFAULT_ACCURACY,
            accuracy_explanation: NO_EXPLANATION.to_string(),
            normal_response: String::new(),
        }
    }
}

impl RawInsights {
    /// Check ranges and fill absent fields with the documented defaults.
    pub fn validate(self) -> Result<Insights, InsightError> {
        let defaults = Insights::default();

        let risk_score = self.risk_score.unwrap_or(defaults.risk_score);
        if !(0.0..=100.0).contains(&risk_score) {
            return Err(InsightError::RiskScoreOutOfRange(risk_score));
        }

        let accuracy = self.accuracy.unwrap_or(defaults.accuracy);
        if !(0.0..=1.0).contains(&accuracy) {
            return Err(InsightError::AccuracyOutOfRange(accuracy));
        }

        Ok(Insights {
            risk_score,
            risk_score_explanation: non_empty(self.risk_score_explanation)
                .unwrap_or(defaults.risk_score_explanation),
            recommended_treatments: self.recommended_treatments.unwrap_or_default(),
            condition_trends: self.condition_trends.unwrap_or_default(),
            preventive_measures: self.preventive_measures.unwrap_or_default(),
            accuracy,
            accuracy_explanation: non_empty(self.accuracy_explanation)
                .unwrap_or(defaults.accuracy_explanation),
            normal_response: self.normal_response.unwrap_or_default(),
        })
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_fields_get_defaults() {
        let raw: RawInsights = serde_json::from_value(json!({"riskScore": 72})).unwrap();
        let insights = raw.validate().unwrap();

        assert_eq!(insights.risk_score, 72.0);
        assert_eq!(insights.risk_score_explanation, NO_EXPLANATION);
        assert_eq!(insights.accuracy, DEFAULT_ACCURACY);
        assert!(insights.recommended_treatments.is_empty());
    }

    #[test]
    fn null_fields_get_defaults() {
        let raw: RawInsights =
            serde_json::from_value(json!({"riskScore": null, "accuracyExplanation": ""})).unwrap();
        let insights = raw.validate().unwrap();

        assert_eq!(insights.risk_score, DEFAULT_RISK_SCORE);
        assert_eq!(insights.accuracy_explanation, NO_EXPLANATION);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let raw = RawInsights {
            risk_score: Some(140.0),
            ..Default::default()
        };
        assert_eq!(raw.validate(), Err(InsightError::RiskScoreOutOfRange(140.0)));

        let raw = RawInsights {
            accuracy: Some(-0.1),
            ..Default::default()
        };
        assert_eq!(raw.validate(), Err(InsightError::AccuracyOutOfRange(-0.1)));
    }

    #[test]
    fn wire_names_are_camel_case() {
        let value = serde_json::to_value(Insights::default()).unwrap();
        assert_eq!(value["riskScore"], 50.0);
        assert_eq!(value["riskScoreExplanation"], NO_EXPLANATION);
        assert!(value["preventiveMeasures"].as_array().unwrap().is_empty());
    }
}
