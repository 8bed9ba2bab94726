use super::GenerationClient;
use crate::config::GenerationConfig;
use crate::errors::{AppError, AppResult};
use crate::redaction::Redactor;
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};

const MAX_ERROR_BODY_CHARS: usize = 512;

/// Client for the `generateContent` endpoint.
pub struct GeminiClient {
    client: Client,
    config: GenerationConfig,
    api_key: String,
    redactor: Redactor,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("model", &self.config.model)
            .field("endpoint_base", &self.config.endpoint_base)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    pub fn new(config: GenerationConfig, api_key: impl Into<String>) -> AppResult<Self> {
        config.validate()?;
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AppError::Config("generation API key is empty".to_string()));
        }

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()
            .map_err(|error| AppError::Config(format!("failed to build HTTP client: {}", error)))?;

        Ok(Self {
            client,
            redactor: Redactor::new().with_secret(api_key.clone()),
            config,
            api_key,
        })
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    fn generate_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.endpoint_base.trim_end_matches('/'),
            self.config.model
        )
    }

    fn redact(&self, message: &str) -> String {
        self.redactor.redact(message).content
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationSettings,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationSettings {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[async_trait]
impl GenerationClient for GeminiClient {
    fn model_id(&self) -> &str {
        &self.config.model
    }

    async fn generate(&self, prompt: &str) -> AppResult<String> {
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config: GenerationSettings {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
            },
        };

        let response = self
            .client
            .post(self.generate_url())
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|error| AppError::Transport(self.redact(&AppError::from(error).to_string())))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            return Err(AppError::Transport(self.redact(&format!("HTTP {}: {}", status, excerpt))));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|error| AppError::Transport(format!("unexpected response shape: {}", error.without_url())))?;

        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| AppError::EmptyResponse("response has no candidates".to_string()))?;

        if candidate.finish_reason.as_deref() == Some("MAX_TOKENS") {
            return Err(AppError::Truncated(format!(
                "generator stopped at the {} token ceiling",
                self.config.max_output_tokens
            )));
        }

        let text = candidate
            .content
            .and_then(|content| content.parts.into_iter().next())
            .and_then(|part| part.text)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(AppError::EmptyResponse(format!(
                "candidate has no text (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            )));
        }

        tracing::debug!(model = %self.config.model, chars = text.len(), "generation response received");
        Ok(text)
    }
}
