//! Prompt templates, input bounds and model-output extraction

use insights_core::{Condition, Observation, Resource};
use serde_json::Value as JsonValue;

const TRUNCATED: &str = "...[truncated]";

/// Size bounds for per-item prompts, counted in characters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptLimits {
    /// Longest string value kept anywhere inside a resource
    pub max_field_chars: usize,
    /// Longest fetched document text
    pub max_content_chars: usize,
    /// Longest complete prompt
    pub max_prompt_chars: usize,
}

impl Default for PromptLimits {
    fn default() -> Self {
        Self {
            max_field_chars: 300,
            max_content_chars: 3000,
            max_prompt_chars: 12_000,
        }
    }
}

impl PromptLimits {
    /// Copy of `resource` with long string values cut and marked
    pub fn bound_resource(&self, resource: &Resource) -> Resource {
        let mut json = resource.to_json();
        trim_strings(&mut json, self.max_field_chars);
        if let JsonValue::Object(map) = &mut json {
            map.insert("resourceType".to_string(), resource.resource_type().into());
        }
        // Trimming keeps every value's JSON type, so re-parsing succeeds
        Resource::from_json(json).unwrap_or_else(|_| resource.clone())
    }

    /// Cap fetched text, fold line breaks and tabs into spaces and drop
    /// remaining control characters
    pub fn bound_content(&self, content: &str) -> String {
        let mut out = String::with_capacity(content.len().min(self.max_content_chars));
        let mut pending_space = false;
        for c in take_chars(content, self.max_content_chars).chars() {
            if matches!(c, '\r' | '\n' | '\t') {
                pending_space = true;
                continue;
            }
            if c.is_control() {
                continue;
            }
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        }
        out
    }

    pub fn bound_prompt(&self, prompt: String) -> String {
        if prompt.chars().count() <= self.max_prompt_chars {
            return prompt;
        }
        take_chars(&prompt, self.max_prompt_chars).to_string()
    }
}

fn trim_strings(value: &mut JsonValue, max: usize) {
    match value {
        JsonValue::String(s) if s.chars().count() > max => {
            *s = format!("{}{TRUNCATED}", take_chars(s, max));
        }
        JsonValue::Array(items) => items.iter_mut().for_each(|v| trim_strings(v, max)),
        JsonValue::Object(map) => map.values_mut().for_each(|v| trim_strings(v, max)),
        _ => {}
    }
}

/// Longest prefix of `s` holding at most `max` chars
fn take_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((end, _)) => &s[..end],
        None => s,
    }
}

/// Prompt used when the caller gives no prompt builder
pub fn default_prompt(resource_type: &str, resource: &Resource) -> String {
    let json = serde_json::to_string_pretty(resource).unwrap_or_else(|_| "{}".to_string());
    format!("Analyze the following {resource_type}:\n{json}")
}

/// Prompt used once out-of-band content has been fetched for a resource
pub fn content_prompt(resource_type: &str, content_type: &str, content: &str) -> String {
    format!("Analyze this {resource_type} content (Content-Type: {content_type}):\n{content}")
}

pub fn conditions_prompt(conditions: &[Condition]) -> String {
    let names: Vec<&str> = conditions.iter().map(Condition::display).collect();
    format!(
        "Given the conditions: {}, provide a raw response.",
        names.join(", ")
    )
}

pub fn observations_prompt(observations: &[Observation]) -> String {
    let categories: Vec<&str> = observations.iter().map(Observation::category_code).collect();
    format!(
        "Given the observations: {}, provide a raw response.",
        categories.join(", ")
    )
}

/// One free-text response to be merged by the aggregator
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InsightSource {
    pub label: String,
    pub response: String,
}

pub fn combine_prompt(sources: &[InsightSource]) -> String {
    let responses: String = sources
        .iter()
        .map(|s| format!("{} response: {}\n", s.label, s.response))
        .collect();

    format!(
        r#"Please respond ONLY with valid JSON in a single code block, like:
```json
{{ "riskScore": 70, ... }}
```

Combine the following raw responses:

{responses}
Provide a structured JSON response in the following format:

{{
  "riskScore": [0-100], // Risk prediction score (0-100). It must not be null.
  "riskScoreExplanation": string, // Reason for the given risk score.
  "recommendedTreatments": [string], // List of recommended treatments. It must not be null.
  "conditionTrends": [string], // General trends of condition severity over time. It must not be null.
  "preventiveMeasures": [string], // List of preventive measures. It must not be null.
  "accuracy": [0-1], // A value between 0 and 1 representing the model's confidence in its response, where 1 is highly accurate.
  "accuracyExplanation": string, // Explanation for the given accuracy.
  "normalResponse": string // The raw AI model response.
}}

Ensure the response is a valid JSON object and strictly follows the JSON structure.
The fields "riskScore", "riskScoreExplanation", "recommendedTreatments", "conditionTrends", and "preventiveMeasures" must not be null.
The "accuracy" value should be a number between 0 and 1, representing the model's confidence in the response.
If any of the information is unavailable or uncertain, provide a best estimate but do not return null for the above parameters."#
    )
}

/// Extract a JSON object from text that might contain markdown code blocks.
///
/// Prefers a ```json fence; otherwise takes the span from the first `{`
/// to the last `}`.
pub fn extract_json(text: &str) -> Option<&str> {
    let lower = text.to_ascii_lowercase();
    if let Some(start) = lower.find("```json") {
        let after = &text[start + 7..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if !inner.is_empty() {
                return Some(inner);
            }
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_prompt_embeds_pretty_json() {
        let resource = Resource::from_json(json!({"resourceType": "Condition", "id": "c1"})).unwrap();
        let prompt = default_prompt("Condition", &resource);

        assert!(prompt.starts_with("Analyze the following Condition:\n{"));
        assert!(prompt.contains("\"id\": \"c1\""));
    }

    #[test]
    fn content_prompt_names_the_type() {
        assert_eq!(
            content_prompt("DocumentReference", "text/plain", "BP normal"),
            "Analyze this DocumentReference content (Content-Type: text/plain):\nBP normal"
        );
    }

    #[test]
    fn list_prompts() {
        let conditions = vec![Condition::default()];
        assert_eq!(
            conditions_prompt(&conditions),
            "Given the conditions: Unknown, provide a raw response."
        );
        assert!(observations_prompt(&[]).contains("observations: ,"));
    }

    #[test]
    fn combine_prompt_lists_every_source() {
        let prompt = combine_prompt(&[
            InsightSource {
                label: "Condition".to_string(),
                response: "Hypertension, stable".to_string(),
            },
            InsightSource {
                label: "Observation".to_string(),
                response: "BP trending down".to_string(),
            },
        ]);

        assert!(prompt.contains("Condition response: Hypertension, stable"));
        assert!(prompt.contains("Observation response: BP trending down"));
        assert!(prompt.contains("\"riskScore\": [0-100]"));
    }

    #[test]
    fn long_fields_are_cut_at_every_depth() {
        let note = "x".repeat(500);
        let resource = Resource::from_json(json!({
            "resourceType": "Observation",
            "id": "o1",
            "note": [{"text": note}],
            "code": {"text": "é".repeat(301)}
        }))
        .unwrap();
        let limits = PromptLimits::default();

        let json = limits.bound_resource(&resource).to_json();

        let text = json["note"][0]["text"].as_str().unwrap();
        assert_eq!(text, format!("{}...[truncated]", "x".repeat(300)));
        let code = json["code"]["text"].as_str().unwrap();
        assert_eq!(code.chars().count(), 300 + TRUNCATED.len());
        assert_eq!(json["id"], "o1");

        let tight = PromptLimits {
            max_field_chars: 4,
            ..limits
        };
        assert_eq!(tight.bound_resource(&resource).resource_type(), "Observation");
    }

    #[test]
    fn fetched_text_is_cleaned_and_capped() {
        let limits = PromptLimits {
            max_content_chars: 20,
            ..PromptLimits::default()
        };

        assert_eq!(
            limits.bound_content("BP\r\n\t120/80\u{0}\u{7f} ok"),
            "BP 120/80 ok"
        );
        assert_eq!(limits.bound_content(&"a".repeat(50)).len(), 20);
    }

    #[test]
    fn prompt_is_capped_on_a_char_boundary() {
        let limits = PromptLimits {
            max_prompt_chars: 5,
            ..PromptLimits::default()
        };

        assert_eq!(limits.bound_prompt("ééééééé".to_string()), "ééééé");
        assert_eq!(limits.bound_prompt("short".to_string()), "short");
    }

    #[test]
    fn extracts_fenced_json() {
        let text = "Sure!\n```json\n{\"riskScore\": 40}\n```\nAnything else?";
        assert_eq!(extract_json(text), Some("{\"riskScore\": 40}"));

        let upper = "```JSON\n{\"a\": 1}\n```";
        assert_eq!(extract_json(upper), Some("{\"a\": 1}"));
    }

    #[test]
    fn falls_back_to_brace_span() {
        let text = "Here it is: {\"riskScore\": 40, \"nested\": {\"x\": 1}} hope that helps";
        assert_eq!(
            extract_json(text),
            Some("{\"riskScore\": 40, \"nested\": {\"x\": 1}}")
        );
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("} backwards {"), None);
    }
}
