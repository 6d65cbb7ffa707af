use crate::config::{GenerationConfig, ProviderConfig};
use crate::types::{Error, Result};
use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

/// Raw model output plus provider-reported metadata.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub url: String,
    pub metadata: serde_json::Value,
}

/// External text-generation capability.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        system_message: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<Generation>;

    /// Cheap provider health probe.
    async fn validate(&self) -> Result<()> {
        self.generate("You are a health check.", "Reply with OK.", 5)
            .await
            .map(|_| ())
    }
}

/// External image-generation capability.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<GeneratedImage>;
}

/// Drives a `TextGenerator` through bounded retries with exponential backoff.
/// Only errors flagged transient are retried; auth and malformed-request
/// failures surface immediately.
pub async fn generate_with_retry(
    generator: &dyn TextGenerator,
    system_message: &str,
    prompt: &str,
    max_tokens: u32,
    config: &GenerationConfig,
) -> Result<Generation> {
    let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
        current_interval: config.retry_base_delay,
        initial_interval: config.retry_base_delay,
        max_interval: config.retry_max_delay,
        multiplier: 2.0,
        max_elapsed_time: None,
        ..Default::default()
    };

    let mut attempt = 1;
    loop {
        match generator.generate(system_message, prompt, max_tokens).await {
            Ok(generation) => return Ok(generation),
            Err(e) if e.is_transient() && attempt < config.max_attempts => {
                let delay = backoff.next_backoff().unwrap_or(config.retry_max_delay);
                warn!(
                    "Generation attempt {}/{} failed ({}), retrying in {:?}",
                    attempt, config.max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Text generation against an OpenAI-style chat completion endpoint.
pub struct OpenAiTextGenerator {
    client: Client,
    config: ProviderConfig,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl OpenAiTextGenerator {
    pub fn new(config: ProviderConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }
}

#[async_trait]
impl TextGenerator for OpenAiTextGenerator {
    async fn generate(
        &self,
        system_message: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<Generation> {
        debug!(
            "Requesting completion from {} (prompt: {} chars)",
            self.config.model,
            prompt.len()
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.endpoint))
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "model": self.config.model,
                "messages": [
                    {"role": "system", "content": system_message},
                    {"role": "user", "content": prompt},
                ],
                "max_tokens": max_tokens,
            }))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(provider_error(status, &body));
        }

        let parsed: ChatResponse = response.json().await.map_err(transport_error)?;
        let choice = parsed.choices.into_iter().next().ok_or(Error::Generation {
            message: "provider returned no completion choices".to_string(),
            transient: false,
        })?;

        let mut metadata = json!({
            "provider": "openai",
            "model": parsed.model.unwrap_or_else(|| self.config.model.clone()),
        });
        if let Some(usage) = parsed.usage {
            metadata["prompt_tokens"] = usage.prompt_tokens.into();
            metadata["completion_tokens"] = usage.completion_tokens.into();
            metadata["total_tokens"] = usage.total_tokens.into();
        }

        Ok(Generation {
            text: choice.message.content,
            metadata,
        })
    }
}

/// Image generation against an OpenAI-style images endpoint.
pub struct OpenAiImageGenerator {
    client: Client,
    config: ProviderConfig,
}

#[derive(Deserialize)]
struct ImageResponse {
    data: Vec<ImageDatum>,
}

#[derive(Deserialize)]
struct ImageDatum {
    url: String,
}

impl OpenAiImageGenerator {
    pub fn new(config: ProviderConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }
}

#[async_trait]
impl ImageGenerator for OpenAiImageGenerator {
    async fn generate(&self, prompt: &str) -> Result<GeneratedImage> {
        let response = self
            .client
            .post(format!("{}/images/generations", self.config.endpoint))
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "model": self.config.model,
                "prompt": prompt,
                "n": 1,
                "size": "1024x1024",
            }))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(provider_error(status, &body));
        }

        let parsed: ImageResponse = response.json().await.map_err(transport_error)?;
        let datum = parsed.data.into_iter().next().ok_or(Error::Generation {
            message: "provider returned no image".to_string(),
            transient: false,
        })?;

        Ok(GeneratedImage {
            url: datum.url,
            metadata: json!({
                "provider": "openai",
                "model": self.config.model,
                "size": "1024x1024",
            }),
        })
    }
}

/// Rate limits, timeouts and server errors are retryable; everything else
/// (auth, malformed request) is fatal.
fn provider_error(status: StatusCode, body: &str) -> Error {
    let transient = status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error();

    let mut message = format!("provider returned {}", status);
    if !body.is_empty() {
        let preview: String = body.chars().take(200).collect();
        message.push_str(": ");
        message.push_str(&preview);
    }

    Error::Generation { message, transient }
}

fn transport_error(e: reqwest::Error) -> Error {
    Error::Generation {
        message: format!("provider request failed: {}", e),
        transient: e.is_timeout() || e.is_connect(),
    }
}
