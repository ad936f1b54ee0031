use super::models::{Model, Usage};
use crate::util::truncate_str;
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// OpenRouter direct API URL (BYOK mode)
const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";

/// Rate limit retry configuration
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000;
const BACKOFF_MULTIPLIER: u64 = 2;

/// Response from the model including content and usage stats
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub usage: Option<Usage>,
    pub model: String,
}

/// One system + user exchange with a chat model
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        model: Model,
        json_mode: bool,
    ) -> anyhow::Result<LlmResponse>;
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
    model: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: String,
}

#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    http: reqwest::Client,
    api_key: String,
    url: String,
}

impl OpenRouterClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            url: OPENROUTER_URL.to_string(),
        }
    }

    /// Build from `OPENROUTER_API_KEY`
    pub fn from_env() -> anyhow::Result<Self> {
        let key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .with_context(|| format!("No API key configured. Set {} to get started.", API_KEY_ENV))?;
        Ok(Self::new(key))
    }

    /// Point at a different OpenRouter-compatible endpoint
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

/// Extract retry-after hint from OpenRouter response (if present)
fn parse_retry_after(text: &str) -> Option<u64> {
    // Look for "retry after X seconds" and similar
    let text_lower = text.to_lowercase();
    let pos = text_lower.find("retry")?;
    text_lower[pos..]
        .split_whitespace()
        .skip(1)
        .take(5)
        .filter_map(|word| {
            word.trim_matches(|c: char| !c.is_numeric())
                .parse::<u64>()
                .ok()
        })
        .find(|secs| *secs > 0 && *secs < 300)
}

fn backoff_secs(retry_count: u32) -> u64 {
    (INITIAL_BACKOFF_MS * BACKOFF_MULTIPLIER.pow(retry_count.saturating_sub(1))) / 1000
}

#[async_trait]
impl ChatCompletion for OpenRouterClient {
    /// Includes automatic retry with exponential backoff for rate limits
    async fn complete(
        &self,
        system: &str,
        user: &str,
        model: Model,
        json_mode: bool,
    ) -> anyhow::Result<LlmResponse> {
        let response_format = (json_mode && model.supports_json_mode()).then(|| ResponseFormat {
            format_type: "json_object".to_string(),
        });

        let request = ChatRequest {
            model: model.id().to_string(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            max_tokens: model.max_tokens(),
            stream: false,
            response_format,
        };

        let mut retry_count = 0;

        loop {
            let response = self
                .http
                .post(&self.url)
                .header("Content-Type", "application/json")
                .header("X-Title", "fixsweep")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&request)
                .send()
                .await
                .context("OpenRouter request failed")?;

            let status = response.status();
            let text = response.text().await?;

            if status.is_success() {
                let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
                    anyhow::anyhow!(
                        "Failed to parse OpenRouter response: {}\n{}",
                        e,
                        truncate_str(&text, 500)
                    )
                })?;

                let content = parsed
                    .choices
                    .first()
                    .map(|c| c.message.content.clone())
                    .unwrap_or_default();

                return Ok(LlmResponse {
                    content,
                    usage: parsed.usage,
                    model: parsed.model.unwrap_or_default(),
                });
            }

            if status.as_u16() == 429 && retry_count < MAX_RETRIES {
                retry_count += 1;
                let retry_after = parse_retry_after(&text).unwrap_or_else(|| backoff_secs(retry_count));
                warn!(
                    "OpenRouter rate limited. Retrying in {}s (attempt {}/{})",
                    retry_after, retry_count, MAX_RETRIES
                );
                tokio::time::sleep(std::time::Duration::from_secs(retry_after)).await;
                continue;
            }

            let error_msg = match status.as_u16() {
                401 => format!("Invalid API key. Check {}.", API_KEY_ENV),
                429 => format!(
                    "Rate limited by OpenRouter after {} retries. Try again in a few minutes.",
                    retry_count
                ),
                500..=599 => format!(
                    "OpenRouter server error ({}). The service may be temporarily unavailable.",
                    status
                ),
                _ => format!("API error {}: {}", status, truncate_str(&text, 200)),
            };
            return Err(anyhow::anyhow!("{}", error_msg));
        }
    }
}
