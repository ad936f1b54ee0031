//! OpenRouter-backed suggestion service
//!
//! Representatives are split into chunks of `batch_size`; at most
//! `max_concurrency` chunk requests are in flight. A failed chunk fails the
//! whole batch so the pipeline sees one outcome per batch call.

pub mod client;
pub mod models;
pub mod parse;
pub mod prompts;

pub use client::{ChatCompletion, LlmResponse, OpenRouterClient};
pub use models::{Model, Usage};

use super::{FixSuggestion, SuggestionService};
use crate::config::Settings;
use crate::failure::Failure;
use anyhow::Context;
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

pub struct OpenRouterService<C = OpenRouterClient> {
    chat: Arc<C>,
    model: Model,
    batch_size: usize,
    max_concurrency: usize,
    usage: Mutex<Usage>,
}

impl OpenRouterService<OpenRouterClient> {
    /// Client from `OPENROUTER_API_KEY`, limits from `settings`
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        Ok(Self::new(OpenRouterClient::from_env()?, settings))
    }
}

impl<C: ChatCompletion> OpenRouterService<C> {
    pub fn new(chat: C, settings: &Settings) -> Self {
        Self {
            chat: Arc::new(chat),
            model: settings.model,
            batch_size: settings.batch_size.max(1),
            max_concurrency: settings.max_concurrency.max(1),
            usage: Mutex::new(Usage::default()),
        }
    }

    /// Token usage accumulated over every call made so far
    pub fn usage(&self) -> Usage {
        self.usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn suggest_chunk(
        &self,
        index: usize,
        chunk: &[Failure],
    ) -> anyhow::Result<HashMap<String, Vec<FixSuggestion>>> {
        let user = prompts::batch_fix_user_prompt(chunk);
        let response = self
            .chat
            .complete(prompts::BATCH_FIX_SYSTEM, &user, self.model, true)
            .await
            .with_context(|| format!("Model request for chunk {} failed", index))?;

        if let Some(usage) = &response.usage {
            self.usage
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .accumulate(usage);
        }

        let parsed = parse::parse_batch_response(&response.content, chunk)
            .with_context(|| format!("Model response for chunk {} was unusable", index))?;
        debug!(
            chunk = index,
            failures = chunk.len(),
            answered = parsed.len(),
            "model chunk complete"
        );
        Ok(parsed)
    }
}

#[async_trait]
impl<C: ChatCompletion> SuggestionService for OpenRouterService<C> {
    async fn batch_suggest_fixes(
        &self,
        representatives: &[Failure],
    ) -> anyhow::Result<HashMap<String, Vec<FixSuggestion>>> {
        if representatives.is_empty() {
            return Ok(HashMap::new());
        }

        let requests: Vec<_> = representatives
            .chunks(self.batch_size)
            .enumerate()
            .map(|(index, chunk)| self.suggest_chunk(index, chunk))
            .collect();
        let results: Vec<HashMap<String, Vec<FixSuggestion>>> = stream::iter(requests)
        .buffer_unordered(self.max_concurrency)
        .try_collect()
        .await?;

        let mut merged = HashMap::new();
        for partial in results {
            merged.extend(partial);
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Answers every test id found in the prompt, tracking peak concurrency
    #[derive(Default)]
    struct EchoChat {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        fail_on_call: Option<usize>,
    }

    #[async_trait]
    impl ChatCompletion for EchoChat {
        async fn complete(
            &self,
            _system: &str,
            user: &str,
            _model: Model,
            _json_mode: bool,
        ) -> anyhow::Result<LlmResponse> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_on_call == Some(call) {
                anyhow::bail!("upstream exploded");
            }

            let ids: Vec<&str> = user
                .lines()
                .filter_map(|l| l.trim().strip_prefix("\"test_id\": \""))
                .filter_map(|l| l.strip_suffix("\","))
                .collect();
            let suggestions: Vec<serde_json::Value> = ids
                .iter()
                .map(|id| serde_json::json!({"test_id": id, "suggestion": format!("fix {}", id), "confidence": 0.6}))
                .collect();
            Ok(LlmResponse {
                content: serde_json::json!({ "suggestions": suggestions }).to_string(),
                usage: Some(Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                    cost: None,
                }),
                model: "echo".to_string(),
            })
        }
    }

    fn failures(n: usize) -> Vec<Failure> {
        (0..n)
            .map(|i| Failure::new(format!("t::test_{}", i), "tests/t.py", "KeyError", "'k'"))
            .collect()
    }

    fn settings(batch_size: usize, max_concurrency: usize) -> Settings {
        Settings {
            batch_size,
            max_concurrency,
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn test_chunks_are_bounded_and_merged() {
        let service = OpenRouterService::new(EchoChat::default(), &settings(2, 2));
        let input = failures(7);
        let result = service.batch_suggest_fixes(&input).await.unwrap();

        assert_eq!(result.len(), 7);
        assert_eq!(result["t::test_6"][0].suggestion_text, "fix t::test_6");
        assert_eq!(service.chat.calls.load(Ordering::SeqCst), 4);
        assert!(service.chat.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(service.usage().total_tokens, 60);
    }

    #[tokio::test]
    async fn test_one_failed_chunk_fails_the_batch() {
        let chat = EchoChat {
            fail_on_call: Some(1),
            ..EchoChat::default()
        };
        let service = OpenRouterService::new(chat, &settings(1, 1));
        let err = service.batch_suggest_fixes(&failures(3)).await.unwrap_err();
        assert!(format!("{:#}", err).contains("upstream exploded"));
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_calls() {
        let service = OpenRouterService::new(EchoChat::default(), &settings(2, 2));
        assert!(service.batch_suggest_fixes(&[]).await.unwrap().is_empty());
        assert_eq!(service.chat.calls.load(Ordering::SeqCst), 0);
    }
}
