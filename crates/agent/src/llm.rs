use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const RETRY_BACKOFF: Duration = Duration::from_millis(250);

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Client for a local Ollama server's `/api/generate` endpoint.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
    max_retries: u32,
}

impl OllamaClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client for Ollama")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            max_retries,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn generate_once(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions { temperature: 0.0 },
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(|error| {
            if error.is_connect() {
                anyhow!("failed to connect to Ollama at {}; is it running?", self.base_url)
            } else {
                anyhow!("Ollama request failed: {error}")
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!("Ollama returned {status}: {}", detail.trim()));
        }

        let parsed = response
            .json::<GenerateResponse>()
            .await
            .context("Ollama response was not valid JSON")?;
        Ok(parsed.response)
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.generate_once(prompt).await {
                Ok(text) => {
                    debug!(
                        event_name = "llm.completion_received",
                        model = %self.model,
                        attempt,
                        chars = text.len(),
                        "completion received"
                    );
                    return Ok(text);
                }
                Err(error) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        event_name = "llm.completion_retry",
                        model = %self.model,
                        attempt,
                        error = %error,
                        "retrying completion"
                    );
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Removes a surrounding Markdown code fence, with or without a language tag.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) if rest[..newline].chars().all(|c| c.is_ascii_alphanumeric()) => {
            &rest[newline + 1..]
        }
        _ => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}
