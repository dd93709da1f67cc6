//! Answer generation with a hosted LLM.
//!
//! [`GroqClient`] speaks the OpenAI-compatible chat-completions protocol
//! that Groq exposes, so any compatible endpoint works by changing
//! `llm.base_url`. The retrieved chunks are stuffed into a single user
//! prompt (see [`build_prompt`]).

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::LlmConfig;
use crate::http::{post_json_with_retry, PostError};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM API key not configured: set the {0} environment variable")]
    MissingApiKey(String),
    #[error("LLM API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("LLM request failed: {0}")]
    Transport(String),
    #[error("invalid LLM response: {0}")]
    InvalidResponse(String),
}

impl From<PostError> for LlmError {
    fn from(err: PostError) -> Self {
        match err {
            PostError::Status { status, body } => LlmError::Api { status, body },
            PostError::Transport(msg) => LlmError::Transport(msg),
            PostError::Decode(msg) => LlmError::InvalidResponse(msg),
        }
    }
}

/// Descriptive metadata reported by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct LlmInfo {
    pub model_name: String,
    pub provider: String,
    pub device: String,
    pub is_loaded: bool,
    pub model_type: String,
}

/// Turns a question plus retrieved context into an answer.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    fn info(&self) -> LlmInfo;

    /// Whether [`generate`](AnswerGenerator::generate) can be attempted at all.
    fn is_ready(&self) -> bool;

    async fn generate(&self, question: &str, context: &str) -> Result<String, LlmError>;
}

pub fn build_prompt(question: &str, context: &str) -> String {
    format!(
        "Based on the following context, please answer the question.\n\n\
         Context: {}\n\n\
         Question: {}\n\n\
         Answer:",
        context, question
    )
}

/// Chat-completions client for Groq (or any OpenAI-compatible API).
pub struct GroqClient {
    model: String,
    endpoint: String,
    api_key: Option<String>,
    api_key_env: String,
    temperature: f64,
    max_tokens: u32,
    system_prompt: String,
    max_retries: u32,
    client: Client,
}

impl GroqClient {
    /// Build a client from configuration. The API key is read from the
    /// environment now; a missing key is not an error until
    /// [`generate`](AnswerGenerator::generate) is called.
    pub fn from_config(config: &LlmConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &LlmConfig, api_key: Option<String>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            api_key_env: config.api_key_env.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            system_prompt: config.system_prompt.clone(),
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl AnswerGenerator for GroqClient {
    fn info(&self) -> LlmInfo {
        LlmInfo {
            model_name: self.model.clone(),
            provider: "groq".to_string(),
            device: "Groq Cloud".to_string(),
            is_loaded: self.api_key.is_some(),
            model_type: format!("{} (Groq)", self.model),
        }
    }

    fn is_ready(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, question: &str, context: &str) -> Result<String, LlmError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| LlmError::MissingApiKey(self.api_key_env.clone()))?;

        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": self.system_prompt },
                { "role": "user", "content": build_prompt(question, context) },
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        debug!(model = %self.model, prompt_chars = context.len(), "requesting completion");
        let payload = post_json_with_retry(
            &self.client,
            &self.endpoint,
            Some(api_key),
            &body,
            self.max_retries,
        )
        .await?;

        parse_completion(&payload)
    }
}

fn parse_completion(payload: &serde_json::Value) -> Result<String, LlmError> {
    payload["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.trim().to_string())
        .ok_or_else(|| LlmError::InvalidResponse("missing choices[0].message.content".to_string()))
}
