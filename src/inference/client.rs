//! Gemini REST client.
//!
//! Sends `generateContent` / `streamGenerateContent` requests to the hosted
//! model and maps transport failures onto `InferenceError`.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client as HttpClient;

use super::config::ProviderConfig;
use super::errors::InferenceError;
use super::session::{ModelBackend, ModelStream};
use super::streaming::parse_sse_stream;
use super::types::{GenerateContentRequest, GenerateContentResponse, ModelRequest, ModelResponse};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Header carrying the API credential.
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Longest error body kept in an `HttpError`.
const MAX_ERROR_BODY_BYTES: usize = 2048;

// ─── GeminiClient ────────────────────────────────────────────────────────────

/// Client for one Gemini model.
///
/// Holds separate HTTP clients for buffered and streaming calls because the
/// streaming timeout covers the entire response body.
pub struct GeminiClient {
    http: HttpClient,
    http_stream: HttpClient,
    base_url: String,
    model: String,
    api_key: String,
    request_timeout_secs: u64,
    stream_timeout_secs: u64,
}

impl GeminiClient {
    /// Create a client. Does NOT check connectivity or validate the key.
    pub fn new(config: &ProviderConfig, api_key: impl Into<String>) -> Result<Self, InferenceError> {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        let http_stream = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.stream_timeout_secs))
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build streaming HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            http_stream,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: api_key.into(),
            request_timeout_secs: config.request_timeout_secs,
            stream_timeout_secs: config.stream_timeout_secs,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/models/{}:{method}", self.base_url, self.model)
    }

    async fn post(
        &self,
        http: &HttpClient,
        url: &str,
        request: &ModelRequest,
        timeout_secs: u64,
    ) -> Result<reqwest::Response, InferenceError> {
        let body = GenerateContentRequest::from_request(request);
        let response = http
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e, timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), model = %self.model, "model request failed");
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: crate::agent_core::truncate_utf8(&body, MAX_ERROR_BODY_BYTES).to_string(),
            });
        }

        Ok(response)
    }

    fn map_transport_error(&self, e: reqwest::Error, timeout_secs: u64) -> InferenceError {
        if e.is_timeout() {
            InferenceError::Timeout {
                duration_secs: timeout_secs,
            }
        } else {
            InferenceError::ConnectionFailed {
                endpoint: self.base_url.clone(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl ModelBackend for GeminiClient {
    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse, InferenceError> {
        let url = self.endpoint("generateContent");
        let response = self
            .post(&self.http, &url, request, self.request_timeout_secs)
            .await?;

        let raw: GenerateContentResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout {
                    duration_secs: self.request_timeout_secs,
                }
            } else {
                InferenceError::InvalidResponse {
                    reason: e.to_string(),
                }
            }
        })?;

        let parsed = ModelResponse::from_wire(raw)?;
        if let Some(usage) = parsed.usage {
            tracing::debug!(
                prompt_tokens = usage.prompt_token_count,
                output_tokens = usage.candidates_token_count,
                "model usage"
            );
        }
        Ok(parsed)
    }

    async fn generate_stream(&self, request: &ModelRequest) -> Result<ModelStream, InferenceError> {
        let url = format!("{}?alt=sse", self.endpoint("streamGenerateContent"));
        let response = self
            .post(&self.http_stream, &url, request, self.stream_timeout_secs)
            .await?;

        Ok(parse_sse_stream(response.bytes_stream()).boxed())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
