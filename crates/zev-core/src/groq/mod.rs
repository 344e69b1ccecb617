pub mod types;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::stream::{Stream, StreamExt};
use reqwest::{Client, Response};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::models;
use crate::pipeline::StepExecutor;
use crate::stream::{decode_fragments, Fragment};
use types::{ChatRequest, Completion, CompletionResponse, ModelsResponse, WireMessage};

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Error)]
pub enum GroqError {
    #[error("Groq API key is not configured. Set GROQ_API_KEY or press 'K' to add one.")]
    MissingApiKey,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Groq API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Groq returned a response without choices")]
    EmptyResponse,
}

pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<Fragment, GroqError>> + Send>>;

#[derive(Clone)]
pub struct GroqClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    temperature: f32,
    max_tokens: u32,
}

impl GroqClient {
    pub fn new(api_key: Option<String>, base_url: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: base_url.trim_end_matches('/').to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.api_key(), &config.base_url)
            .with_sampling(config.temperature, config.max_tokens)
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn has_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Build a request using this client's sampling settings.
    ///
    /// Reasoning output is only requested from models that produce it.
    pub fn request(&self, model: &str, messages: Vec<WireMessage>, stream: bool) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream,
            reasoning_format: models::supports_reasoning(model).then(|| "parsed".to_string()),
        }
    }

    /// Single-shot completion.
    pub async fn complete(&self, request: &ChatRequest) -> Result<Completion, GroqError> {
        let mut request = request.clone();
        request.stream = false;

        let response = self.post(&request).await?;
        let body: CompletionResponse = response.json().await?;
        body.into_completion().ok_or(GroqError::EmptyResponse)
    }

    /// Open a streamed completion and decode it into fragments.
    pub async fn stream(&self, request: &ChatRequest) -> Result<FragmentStream, GroqError> {
        let mut request = request.clone();
        request.stream = true;

        let response = self.post(&request).await?;
        let fragments = decode_fragments(response.bytes_stream()).map(|r| r.map_err(GroqError::from));
        Ok(Box::pin(fragments))
    }

    pub async fn list_models(&self) -> Result<Vec<String>, GroqError> {
        let key = self.key()?;
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(key)
            .send()
            .await?;
        let response = check_status(response).await?;

        let body: ModelsResponse = response.json().await?;
        let mut ids: Vec<String> = body.data.into_iter().map(|m| m.id).collect();
        ids.sort();
        Ok(ids)
    }

    fn key(&self) -> Result<&str, GroqError> {
        self.api_key.as_deref().ok_or(GroqError::MissingApiKey)
    }

    async fn post(&self, request: &ChatRequest) -> Result<Response, GroqError> {
        // Fails before touching the network when no key is set.
        let key = self.key()?;

        info!(
            "POST chat/completions model={} messages={} stream={}",
            request.model,
            request.messages.len(),
            request.stream
        );
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(key)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        check_status(response).await
    }
}

async fn check_status(response: Response) -> Result<Response, GroqError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    warn!("Groq API returned {}: {}", status, body);
    Err(GroqError::Api { status, body })
}

#[async_trait]
impl StepExecutor for GroqClient {
    async fn execute(&self, model: &str, prompt: &str) -> anyhow::Result<String> {
        let request = self.request(model, vec![WireMessage::user(prompt)], false);
        let completion = self.complete(&request).await?;
        debug!("step on {} returned {} chars", model, completion.content.len());
        Ok(completion.content)
    }
}
