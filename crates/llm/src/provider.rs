//! `InferenceProvider` over the chat-completions HTTP API.

use async_trait::async_trait;
use pipeline::{InferenceError, InferenceProvider, InferenceRequest, InferenceResponse, ModelName, TokenUsage};
use reqwest::header::RETRY_AFTER;
use thiserror::Error;

use crate::classify::{classify_status, classify_transport, parse_retry_after};
use crate::wire::{ChatRequest, ChatResponse, Message, ResponseFormat};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// API root; `/chat/completions` is appended.
    pub base_url: String,
    pub model: ModelName,
    pub api_key: Option<String>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Error)]
pub enum ProviderConfigError {
    #[error("invalid inference base URL '{url}': {message}")]
    InvalidBaseUrl { url: String, message: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    endpoint: reqwest::Url,
    model: ModelName,
    api_key: Option<String>,
    temperature: Option<f32>,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderConfigError> {
        let endpoint = endpoint_for(&config.base_url)?;
        if config.api_key.is_none() {
            tracing::warn!(endpoint = %endpoint, "inference provider has no API key");
        }
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            endpoint,
            model: config.model,
            api_key: config.api_key,
            temperature: config.temperature,
        })
    }

    pub fn endpoint(&self) -> &reqwest::Url {
        &self.endpoint
    }

    pub fn model(&self) -> &ModelName {
        &self.model
    }

    fn body<'a>(&'a self, request: &'a InferenceRequest, system: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: self.model.as_str(),
            messages: [
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            response_format: ResponseFormat::JSON_OBJECT,
            temperature: self.temperature,
        }
    }
}

impl std::fmt::Debug for OpenAiCompatibleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleProvider")
            .field("endpoint", &self.endpoint.as_str())
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn endpoint_for(base_url: &str) -> Result<reqwest::Url, ProviderConfigError> {
    let joined = format!("{}/chat/completions", base_url.trim_end_matches('/'));
    reqwest::Url::parse(&joined).map_err(|e| ProviderConfigError::InvalidBaseUrl {
        url: base_url.to_string(),
        message: e.to_string(),
    })
}

/// System message: stage instructions followed by the expected JSON shape.
fn system_message(request: &InferenceRequest) -> String {
    format!(
        "{}\n\nRespond only with a JSON object that conforms to this schema:\n{}",
        request.system, request.schema_hint
    )
}

fn into_response(body: ChatResponse) -> Result<InferenceResponse, InferenceError> {
    let usage = body.usage.unwrap_or_default();
    let text = body
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| InferenceError::ServerError {
            status: None,
            message: "response contained no message content".into(),
        })?;
    Ok(InferenceResponse {
        text,
        usage: TokenUsage::new(usage.prompt_tokens, usage.completion_tokens),
    })
}

#[async_trait]
impl InferenceProvider for OpenAiCompatibleProvider {
    async fn complete(&self, request: &InferenceRequest) -> Result<InferenceResponse, InferenceError> {
        let system = system_message(request);
        let mut call = self
            .client
            .post(self.endpoint.clone())
            .timeout(request.timeout)
            .json(&self.body(request, &system));
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let response = call
            .send()
            .await
            .map_err(|e| classify_transport(&e, request.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body = response.text().await.unwrap_or_default();
            let error = classify_status(status, retry_after, &body, request.timeout);
            tracing::warn!(status = status.as_u16(), error_kind = %error.kind(), "inference call failed");
            return Err(error);
        }

        let body: ChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                classify_transport(&e, request.timeout)
            } else {
                InferenceError::ServerError {
                    status: Some(status.as_u16()),
                    message: format!("unreadable response body: {e}"),
                }
            }
        })?;
        let response = into_response(body)?;
        tracing::debug!(
            model = %self.model,
            prompt_tokens = response.usage.prompt.as_u64(),
            completion_tokens = response.usage.completion.as_u64(),
            "inference call succeeded"
        );
        Ok(response)
    }
}
