//! LLaVA API Client
//!
//! Sends the keyframe and prompt to a hosted LLaVA endpoint:
//! `POST {endpoint}` with `{"images": <base64 JPEG>, "prompt": ...}` and an
//! `x-api-key` header. The answer is read from the `response` field.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{VqaModel, VqaRequest, NO_ANSWER};
use crate::core::{CoreError, CoreResult};

#[derive(Serialize)]
struct LlavaRequest<'a> {
    images: String,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct LlavaResponse {
    #[serde(default)]
    response: Option<String>,
}

/// HTTP client for a LLaVA VQA endpoint
pub struct LlavaApiClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl LlavaApiClient {
    pub fn new(endpoint: &str, api_key: &str, timeout: Duration) -> CoreResult<Self> {
        let endpoint = endpoint.trim().to_string();
        if endpoint.is_empty() {
            return Err(CoreError::InvalidSettings(
                "VQA endpoint is empty".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.to_string(),
        })
    }
}

/// Extracts the answer text, falling back when the field is missing or blank
fn answer_from_body(body: &str) -> CoreResult<String> {
    let parsed: LlavaResponse = serde_json::from_str(body)
        .map_err(|e| CoreError::VqaRequestFailed(format!("Failed to parse response: {}", e)))?;

    Ok(parsed
        .response
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| NO_ANSWER.to_string()))
}

#[async_trait]
impl VqaModel for LlavaApiClient {
    fn name(&self) -> &str {
        "llava"
    }

    async fn generate_answer(&self, request: &VqaRequest) -> CoreResult<String> {
        let image = tokio::fs::read(&request.frame_path).await.map_err(|e| {
            CoreError::VqaRequestFailed(format!(
                "Failed to read keyframe {}: {}",
                request.frame_path.display(),
                e
            ))
        })?;

        let prompt = request.prompt();
        let body = LlavaRequest {
            images: STANDARD.encode(image),
            prompt: &prompt,
        };

        debug!(
            "Asking {} about {} ({} history turns)",
            self.name(),
            request.frame_path.display(),
            request.history.len()
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::VqaRequestFailed(format!("Request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CoreError::VqaRequestFailed(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(CoreError::VqaRequestFailed(format!(
                "VQA service error ({}): {}",
                status,
                text.chars().take(200).collect::<String>()
            )));
        }

        answer_from_body(&text)
    }
}
