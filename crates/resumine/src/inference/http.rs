//! HTTP implementation of the inference client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use super::{
    extract_json_payload, parse_reply, AnalysisReply, InferenceClient, InferenceError,
    InferenceRequest, REPLY_SCHEMA_JSON,
};

/// Maximum length for error bodies quoted in errors and logs.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Truncates an upstream error body to keep logs readable and free of
/// dumped prompt content.
fn sanitize_error_body(body: &str) -> String {
    if body.len() > MAX_ERROR_BODY_LENGTH {
        format!("{}... (truncated)", &body[..MAX_ERROR_BODY_LENGTH])
    } else {
        body.to_string()
    }
}

/// The wire shape of a service reply. `outputParsed` is present when the
/// service honored the schema-constrained contract; `outputText` is the
/// free-text fallback.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    #[serde(default)]
    output_parsed: Option<serde_json::Value>,
    #[serde(default)]
    output_text: Option<String>,
}

/// Inference client talking to the reasoning service over HTTPS.
pub struct HttpInferenceClient {
    http: Client,
    endpoint: String,
    model: String,
    api_key: SecretString,
}

impl HttpInferenceClient {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: SecretString,
        request_timeout: Duration,
    ) -> Result<Self, InferenceError> {
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
        })
    }

    fn request_body(&self, request: &InferenceRequest) -> Result<serde_json::Value, InferenceError> {
        let schema: serde_json::Value = serde_json::from_str(REPLY_SCHEMA_JSON)
            .map_err(|e| InferenceError::MalformedReply(format!("Invalid embedded schema: {}", e)))?;

        Ok(json!({
            "model": self.model,
            "instructions": request.instructions,
            "input": request.content,
            "user": request.owner_ref,
            "responseFormat": {
                "type": "json_schema",
                "name": "resume_analysis",
                "schema": schema,
            },
        }))
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn analyze(&self, request: &InferenceRequest) -> Result<AnalysisReply, InferenceError> {
        let started = Instant::now();
        log::info!(
            "Sending analysis request for {} ({} chars)",
            request.owner_ref,
            request.content.len()
        );

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&self.request_body(request)?)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::ServiceStatus {
                status: status.as_u16(),
                body: sanitize_error_body(&body),
            });
        }

        let wire: WireResponse = response.json().await?;
        let payload = match (wire.output_parsed, wire.output_text) {
            (Some(parsed), _) => parsed,
            (None, Some(text)) => extract_json_payload(&text)?,
            (None, None) => return Err(InferenceError::EmptyReply),
        };

        let mut reply = parse_reply(payload)?;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        reply
            .metadata
            .insert("processingTimeMs".to_string(), json!(elapsed_ms));
        reply.metadata.insert("model".to_string(), json!(self.model));
        reply
            .metadata
            .insert("contentLength".to_string(), json!(request.content.len()));

        log::info!(
            "Analysis complete for {}. Score: {}, Time: {}ms",
            request.owner_ref,
            reply.score,
            elapsed_ms
        );

        Ok(reply)
    }
}
