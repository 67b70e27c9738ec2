//! OpenAI-compatible chat-completions client for code generation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{CodeGenerator, GenerationRequest};
use crate::config::GeneratorConfig;

const SYSTEM_PROMPT: &str = "You rewrite Rust source files. You receive a whole file and an \
instruction, and you answer with the whole rewritten file and nothing else.";

const RETRYABLE_STATUS: &[u16] = &[429, 500, 502, 503, 504];

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct HttpCodeGenerator {
    client: Client,
    config: GeneratorConfig,
    max_retries: u32,
    initial_delay_ms: u64,
}

impl HttpCodeGenerator {
    pub fn new(config: &GeneratorConfig, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout.max(Duration::from_secs(10)))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            config: config.clone(),
            max_retries: 2,
            initial_delay_ms: 500,
        })
    }

    pub fn with_retries(mut self, max_retries: u32, initial_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.initial_delay_ms = initial_delay_ms;
        self
    }

    fn request_body(&self, request: &GenerationRequest) -> serde_json::Value {
        let user = format!(
            "File: {}\n\n{}\n\nInstruction:\n{}\n\n```rust\n{}\n```",
            request.target, request.context, request.instruction, request.original_code
        );
        serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": user},
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "stream": false,
        })
    }

    async fn send_with_retry(&self, body: &serde_json::Value) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'));
        let mut last_error: Option<anyhow::Error> = None;
        let mut delay_ms = self.initial_delay_ms;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                warn!(
                    "Retry attempt {}/{} after {}ms delay",
                    attempt, self.max_retries, delay_ms
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = delay_ms.saturating_mul(2);
            }

            debug!("Sending generation request to {} (attempt {})", url, attempt + 1);
            let mut builder = self
                .client
                .post(&url)
                .header("Content-Type", "application/json")
                .json(body);
            if let Some(key) = &self.config.api_key {
                builder = builder.bearer_auth(key);
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let text = response
                            .text()
                            .await
                            .context("Failed to read response body")?;
                        return serde_json::from_str(&text).context("Failed to parse response JSON");
                    }

                    let error_text = response.text().await.unwrap_or_default();
                    if RETRYABLE_STATUS.contains(&status.as_u16()) {
                        warn!("Retryable error ({}): {}", status, error_text);
                        last_error = Some(anyhow::anyhow!("API error {}: {}", status, error_text));
                        if status == StatusCode::TOO_MANY_REQUESTS {
                            delay_ms = delay_ms.max(2_000);
                        }
                        continue;
                    }
                    anyhow::bail!("API error {}: {}", status, error_text);
                }
                Err(e) => {
                    if e.is_timeout() || e.is_connect() {
                        warn!("Network error (retrying): {}", e);
                        last_error = Some(e.into());
                        continue;
                    }
                    return Err(e).context("Failed to send request");
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
    }
}

#[async_trait]
impl CodeGenerator for HttpCodeGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        let body = self.request_body(&request);
        let response = self.send_with_retry(&body).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("Response contained no message content"))
    }
}
