//! Structured inference client for the external reasoning service.
//!
//! The request carries the extracted document text plus instruction text and
//! a fixed JSON-Schema-constrained response contract. The reply is validated
//! against the embedded schema and defensively normalized (score and
//! suggestion priorities clamped) before it reaches the pipeline, since the
//! upstream service is non-deterministic.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod http;

pub use http::HttpInferenceClient;

/// The response contract sent with every request and enforced on every reply.
pub const REPLY_SCHEMA_JSON: &str = include_str!("../../../../schema/analysis-reply-v1.json");

/// Errors from the inference client. All of these are treated as transient
/// by the worker: the upstream service may succeed on a later attempt.
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Inference request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Inference service returned HTTP {status}: {body}")]
    ServiceStatus { status: u16, body: String },

    #[error("Inference reply was empty")]
    EmptyReply,

    #[error("Failed to parse inference reply as JSON: {0}")]
    MalformedReply(String),

    #[error("Inference reply violates the response contract: {0}")]
    SchemaViolation(String),
}

/// One analysis request: extracted text plus the active instruction text.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub content: String,
    pub instructions: String,
    /// Owner reference, for request logging on the service side.
    pub owner_ref: String,
}

/// A single improvement suggestion in the reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedEdit {
    pub category: String,
    pub description: String,
    pub priority: i64,
}

/// Structured candidate attributes in the reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CandidateProfile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub experience: Vec<String>,
}

/// The validated, normalized analysis reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReply {
    pub score: f64,
    pub optimized_content: String,
    #[serde(default)]
    pub suggestions: Vec<SuggestedEdit>,
    pub candidate_info: CandidateProfile,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Sends analysis requests to the external reasoning service.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn analyze(&self, request: &InferenceRequest) -> Result<AnalysisReply, InferenceError>;
}

/// Extracts a JSON payload from free-form reply text, stripping a Markdown
/// code fence when present.
pub(crate) fn extract_json_payload(text: &str) -> Result<serde_json::Value, InferenceError> {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*(.+?)```").expect("fence pattern is valid")
    });

    let candidate = match fence.captures(text) {
        Some(caps) => caps
            .get(1)
            .map(|m| m.as_str())
            .unwrap_or_default()
            .trim()
            .to_string(),
        None => text.trim().to_string(),
    };

    if candidate.is_empty() {
        return Err(InferenceError::EmptyReply);
    }

    serde_json::from_str(&candidate).map_err(|e| InferenceError::MalformedReply(e.to_string()))
}

/// Validates a payload against the reply contract and deserializes it,
/// clamping out-of-range numeric fields.
pub(crate) fn parse_reply(payload: serde_json::Value) -> Result<AnalysisReply, InferenceError> {
    validate_against_schema(&payload)?;

    let mut reply: AnalysisReply = serde_json::from_value(payload)
        .map_err(|e| InferenceError::MalformedReply(e.to_string()))?;
    clamp_reply(&mut reply);
    Ok(reply)
}

fn validate_against_schema(payload: &serde_json::Value) -> Result<(), InferenceError> {
    let schema: serde_json::Value = serde_json::from_str(REPLY_SCHEMA_JSON)
        .map_err(|e| InferenceError::SchemaViolation(format!("Invalid embedded schema: {}", e)))?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| {
        InferenceError::SchemaViolation(format!("Failed to compile reply schema: {}", e))
    })?;

    let errors: Vec<String> = validator
        .iter_errors(payload)
        .map(|e| format!("{} at {}", e, e.instance_path()))
        .collect();
    if !errors.is_empty() {
        return Err(InferenceError::SchemaViolation(errors.join("; ")));
    }

    Ok(())
}

/// Clamps score to [0, 100] and suggestion priorities to [1, 5].
fn clamp_reply(reply: &mut AnalysisReply) {
    if !(0.0..=100.0).contains(&reply.score) {
        log::warn!("Score out of range: {}, clamping to 0-100", reply.score);
        reply.score = reply.score.clamp(0.0, 100.0);
    }

    for suggestion in &mut reply.suggestions {
        if !(1..=5).contains(&suggestion.priority) {
            log::warn!(
                "Suggestion priority out of range: {}, clamping to 1-5",
                suggestion.priority
            );
            suggestion.priority = suggestion.priority.clamp(1, 5);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_payload() -> serde_json::Value {
        json!({
            "score": 85.5,
            "optimizedContent": "Senior Software Engineer...",
            "candidateInfo": {
                "name": "Jane Doe",
                "email": "jane@example.com",
                "skills": ["Rust", "SQL"]
            },
            "suggestions": [
                {"category": "Skills", "description": "Add cloud experience", "priority": 1}
            ],
            "metadata": {"reasoning": "strong technical depth"}
        })
    }

    #[test]
    fn test_parse_valid_reply() {
        let reply = parse_reply(valid_payload()).unwrap();
        assert_eq!(reply.score, 85.5);
        assert_eq!(reply.candidate_info.name.as_deref(), Some("Jane Doe"));
        assert_eq!(reply.suggestions.len(), 1);
    }

    #[test]
    fn test_missing_required_field_is_schema_violation() {
        let mut payload = valid_payload();
        payload.as_object_mut().unwrap().remove("score");
        let err = parse_reply(payload).unwrap_err();
        assert!(matches!(err, InferenceError::SchemaViolation(_)));
    }

    #[test]
    fn test_score_and_priority_clamped() {
        let mut payload = valid_payload();
        payload["score"] = json!(150.0);
        payload["suggestions"][0]["priority"] = json!(9);

        let reply = parse_reply(payload).unwrap();
        assert_eq!(reply.score, 100.0);
        assert_eq!(reply.suggestions[0].priority, 5);

        let mut payload = valid_payload();
        payload["score"] = json!(-3.0);
        payload["suggestions"][0]["priority"] = json!(0);

        let reply = parse_reply(payload).unwrap();
        assert_eq!(reply.score, 0.0);
        assert_eq!(reply.suggestions[0].priority, 1);
    }

    #[test]
    fn test_extract_json_from_fenced_text() {
        let text = format!("Here is my analysis:\n```json\n{}\n```\nDone.", valid_payload());
        let payload = extract_json_payload(&text).unwrap();
        assert_eq!(payload["score"], json!(85.5));
    }

    #[test]
    fn test_extract_json_from_bare_fence() {
        let text = format!("```\n{}\n```", valid_payload());
        let payload = extract_json_payload(&text).unwrap();
        assert!(payload.get("optimizedContent").is_some());
    }

    #[test]
    fn test_extract_json_from_plain_text() {
        let payload = extract_json_payload(&valid_payload().to_string()).unwrap();
        assert_eq!(payload["candidateInfo"]["email"], json!("jane@example.com"));
    }

    #[test]
    fn test_non_json_text_is_malformed() {
        let err = extract_json_payload("I could not produce an analysis.").unwrap_err();
        assert!(matches!(err, InferenceError::MalformedReply(_)));
    }

    #[test]
    fn test_empty_text_is_empty_reply() {
        let err = extract_json_payload("   ").unwrap_err();
        assert!(matches!(err, InferenceError::EmptyReply));
    }
}
