//! CLIP Embedding Service Client
//!
//! Talks to a CLIP model served over HTTP:
//! - `POST {endpoint}/embed/text`  `{"model": ..., "text": ...}`
//! - `POST {endpoint}/embed/image` `{"model": ..., "image": <base64 PNG>}`
//!
//! Both answer `{"embedding": [f32, ...]}`.

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};

use super::{to_embedding, EmbeddingModel};
use crate::core::{CoreError, CoreResult, Embedding, ModelIdentity};

#[derive(Serialize)]
struct TextRequest<'a> {
    model: &'a str,
    text: &'a str,
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    image: String,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// HTTP client for a CLIP embedding service
pub struct ClipServiceModel {
    client: reqwest::Client,
    endpoint: String,
    identity: ModelIdentity,
}

impl ClipServiceModel {
    /// Creates a client; no request is made until the first embed call
    pub fn new(
        endpoint: &str,
        identity: ModelIdentity,
        timeout: Duration,
    ) -> CoreResult<Self> {
        let endpoint = endpoint.trim().trim_end_matches('/').to_string();
        if endpoint.is_empty() {
            return Err(CoreError::InvalidSettings(
                "embedding endpoint is empty".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            identity,
        })
    }

    async fn post<T: Serialize + ?Sized>(&self, route: &str, body: &T) -> CoreResult<Vec<f32>> {
        let url = format!("{}/{}", self.endpoint, route);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| CoreError::EmbeddingFailed(format!("Request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CoreError::EmbeddingFailed(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(CoreError::EmbeddingFailed(format!(
                "Embedding service error ({}): {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let parsed: EmbedResponse = serde_json::from_str(&body)
            .map_err(|e| CoreError::EmbeddingFailed(format!("Failed to parse response: {}", e)))?;
        Ok(parsed.embedding)
    }
}

#[async_trait]
impl EmbeddingModel for ClipServiceModel {
    fn identity(&self) -> &ModelIdentity {
        &self.identity
    }

    async fn embed_image(&self, image: &RgbImage) -> CoreResult<Embedding> {
        let mut png = Cursor::new(Vec::new());
        image
            .write_to(&mut png, ImageFormat::Png)
            .map_err(|e| CoreError::EmbeddingFailed(format!("Failed to encode frame: {}", e)))?;

        let request = ImageRequest {
            model: &self.identity.id,
            image: STANDARD.encode(png.into_inner()),
        };
        let raw = self.post("embed/image", &request).await?;
        to_embedding(&self.identity, raw)
    }

    async fn embed_text(&self, text: &str) -> CoreResult<Embedding> {
        let request = TextRequest {
            model: &self.identity.id,
            text,
        };
        let raw = self.post("embed/text", &request).await?;
        to_embedding(&self.identity, raw)
    }
}
