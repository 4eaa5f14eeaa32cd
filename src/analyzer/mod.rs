pub mod gemini;
pub mod image;
pub mod prompt;
pub mod response;

use futures::StreamExt;
use futures::stream;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::types::{AnalysisMeta, AnalysisResult, EconomicEvent, ForumPost};

pub use gemini::{GeminiClient, LlmProvider};
pub use image::{ImageAttachment, ImageFetcher, is_image_url};
pub use prompt::{EventFields, ImageDisposition};

/// Turns events and posts into [`AnalysisResult`]s. Per-item failures never
/// escape: the caller always gets a result, with the failure recorded in
/// its metadata.
pub struct SentimentAnalyzer {
    provider: Arc<dyn LlmProvider>,
    images: ImageFetcher,
    config: LlmConfig,
    cancel: CancellationToken,
}

impl SentimentAnalyzer {
    /// Construction is the one fallible step: a missing API key surfaces
    /// here, per-item analysis never raises.
    pub fn new(config: &LlmConfig, cancel: CancellationToken) -> Result<Self, LlmError> {
        let provider = Arc::new(GeminiClient::new(config)?);
        Ok(Self::with_provider(provider, config.clone(), cancel))
    }

    pub fn with_provider(
        provider: Arc<dyn LlmProvider>,
        config: LlmConfig,
        cancel: CancellationToken,
    ) -> Self {
        let images = ImageFetcher::new(
            config.image_timeout_secs,
            config.image_max_attempts,
            cancel.clone(),
        );
        Self {
            provider,
            images,
            config,
            cancel,
        }
    }

    pub async fn analyze_event(&self, event: &EconomicEvent) -> AnalysisResult {
        let prompt = prompt::event_prompt(event);
        match self.call_with_retry(&prompt, None).await {
            Ok((text, retries)) => {
                let parsed = response::parse_response(&text);
                if parsed.used_fallback {
                    debug!(event = %event.name, "Scored via keyword heuristic");
                }
                AnalysisResult {
                    score: parsed.score,
                    reasoning: parsed.reasoning,
                    symbols: Vec::new(),
                    symbol_sentiments: Default::default(),
                    raw_response: Some(parsed.raw),
                    meta: AnalysisMeta {
                        model: self.provider.model().to_string(),
                        retries,
                        image_download_failed: false,
                        failure_reason: None,
                    },
                }
                .normalized()
            }
            Err((e, retries)) => {
                AnalysisResult::failed(self.provider.model(), retries, e.to_string())
            }
        }
    }

    pub async fn analyze_post(&self, post: &ForumPost) -> AnalysisResult {
        // The image path is decided before prompting: a download failure
        // switches templates rather than silently shrinking the input.
        let image_url = post.url.as_deref().filter(|u| image::is_image_url(u));
        let (attachment, disposition) = match image_url {
            None => (None, ImageDisposition::None),
            Some(url) => match self.images.fetch(url).await {
                Ok(att) => (Some(att), ImageDisposition::Attached),
                Err(e) => {
                    warn!(url, "Image unavailable, using text-only prompt: {e}");
                    (
                        None,
                        ImageDisposition::Unavailable {
                            url: url.to_string(),
                            reason: e.to_string(),
                        },
                    )
                }
            },
        };
        let image_failed = matches!(disposition, ImageDisposition::Unavailable { .. });
        let image_reason = match &disposition {
            ImageDisposition::Unavailable { reason, .. } => Some(reason.clone()),
            _ => None,
        };

        let prompt = prompt::post_prompt(post, &disposition);
        match self.call_with_retry(&prompt, attachment.as_ref()).await {
            Ok((text, retries)) => {
                let parsed = response::parse_response(&text);
                if parsed.used_fallback {
                    debug!(post = %post.external_id, "Scored via keyword heuristic");
                }
                let from_text = response::extract_symbols_from_text(&post.full_text());
                // Model list scores; the union is what gets stored
                let symbols = response::union_symbols(&parsed.symbols, &from_text);
                AnalysisResult {
                    score: parsed.score,
                    reasoning: parsed.reasoning,
                    symbols,
                    symbol_sentiments: parsed.symbol_sentiments,
                    raw_response: Some(parsed.raw),
                    meta: AnalysisMeta {
                        model: self.provider.model().to_string(),
                        retries,
                        image_download_failed: image_failed,
                        failure_reason: image_reason,
                    },
                }
                .normalized()
            }
            Err((e, retries)) => {
                let mut result =
                    AnalysisResult::failed(self.provider.model(), retries, e.to_string());
                result.meta.image_download_failed = image_failed;
                result
            }
        }
    }

    /// Analyze a slice of events with a bounded worker pool. Output order
    /// matches input order; individual failures yield neutral results.
    pub async fn analyze_events(&self, events: &[EconomicEvent]) -> Vec<AnalysisResult> {
        stream::iter(events)
            .map(|e| self.analyze_event(e))
            .buffered(self.config.batch_size.max(1))
            .collect()
            .await
    }

    pub async fn analyze_posts(&self, posts: &[ForumPost]) -> Vec<AnalysisResult> {
        stream::iter(posts)
            .map(|p| self.analyze_post(p))
            .buffered(self.config.batch_size.max(1))
            .collect()
            .await
    }

    /// Call the provider, retrying quota-style failures with exponential
    /// backoff. Returns the reply and how many retries it took, or the
    /// final error with the same count.
    async fn call_with_retry(
        &self,
        prompt: &str,
        image: Option<&ImageAttachment>,
    ) -> Result<(String, u32), (LlmError, u32)> {
        let mut retries = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Err((LlmError::Cancelled, retries));
            }

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return Err((LlmError::Cancelled, retries)),
                r = self.provider.generate(prompt, image) => r,
            };

            match outcome {
                Ok(text) => return Ok((text, retries)),
                Err(e) if e.is_retryable() && retries < self.config.max_retries => {
                    let delay =
                        Duration::from_millis(self.config.base_delay_ms * 2u64.pow(retries));
                    warn!(retries, "LLM call failed ({e}), retrying in {delay:?}");
                    retries += 1;
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err((LlmError::Cancelled, retries)),
                        _ = sleep(delay) => {}
                    }
                }
                Err(e) => return Err((e, retries)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    use crate::types::Impact;

    fn test_config() -> LlmConfig {
        LlmConfig {
            api_key: Some("test-key".into()),
            model: "scripted".into(),
            max_retries: 3,
            base_delay_ms: 1,
            image_timeout_secs: 1,
            image_max_attempts: 1,
            batch_size: 4,
        }
    }

    fn event(name: &str) -> EconomicEvent {
        let mut e = EconomicEvent::scraped(
            Utc.with_ymd_and_hms(2024, 6, 7, 12, 30, 0).unwrap(),
            "USD",
            name,
            Impact::High,
        );
        e.actual = Some("272K".into());
        e.forecast = Some("180K".into());
        e
    }

    fn post(title: &str, url: Option<&str>) -> ForumPost {
        ForumPost {
            id: None,
            external_id: "p1".into(),
            channel: "wallstreetbets".into(),
            title: title.into(),
            body: None,
            url: url.map(String::from),
            score: 1,
            num_comments: 0,
            flair: None,
            timestamp: Utc.with_ymd_and_hms(2024, 6, 7, 15, 0, 0).unwrap(),
            fetched_at: Utc.with_ymd_and_hms(2024, 6, 7, 15, 30, 0).unwrap(),
            symbols: vec![],
            symbol_sentiments: Default::default(),
            sentiment_score: None,
            raw_response: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Provider that replays a scripted sequence of outcomes.
    struct ScriptedProvider {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn generate(
            &self,
            _prompt: &str,
            _image: Option<&ImageAttachment>,
        ) -> Result<String, LlmError> {
            self.replies
                .lock()
                .await
                .pop_front()
                .unwrap_or(Err(LlmError::Api("script exhausted".into())))
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    /// Provider whose reply depends on the prompt, for order checks.
    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        async fn generate(
            &self,
            prompt: &str,
            _image: Option<&ImageAttachment>,
        ) -> Result<String, LlmError> {
            let score = if prompt.contains("Alpha") {
                0.1
            } else if prompt.contains("Beta") {
                0.2
            } else {
                0.3
            };
            Ok(format!("{{\"score\": {score}, \"reasoning\": \"echo\"}}"))
        }

        fn model(&self) -> &str {
            "echo"
        }
    }

    fn analyzer(provider: Arc<dyn LlmProvider>) -> SentimentAnalyzer {
        SentimentAnalyzer::with_provider(provider, test_config(), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_out_of_range_score_clamps() {
        let provider = ScriptedProvider::new(vec![Ok(
            "```json\n{\"score\": 2.5, \"reasoning\": \"strong beat\"}\n```".into(),
        )]);
        let result = analyzer(provider).analyze_event(&event("CPI m/m")).await;
        assert_eq!(result.score, 1.0);
        assert_eq!(result.reasoning, "strong beat");
        assert_eq!(result.meta.retries, 0);
    }

    #[tokio::test]
    async fn test_rate_limit_retries_then_succeeds() {
        let provider = ScriptedProvider::new(vec![
            Err(LlmError::RateLimited),
            Err(LlmError::RateLimited),
            Ok(r#"{"score": 0.5, "reasoning": "ok"}"#.into()),
        ]);
        let result = analyzer(provider).analyze_event(&event("CPI m/m")).await;
        assert_eq!(result.score, 0.5);
        assert_eq!(result.meta.retries, 2);
        assert!(result.meta.failure_reason.is_none());
    }

    #[tokio::test]
    async fn test_api_error_is_not_retried() {
        let provider = ScriptedProvider::new(vec![
            Err(LlmError::Api("400 bad request".into())),
            Ok(r#"{"score": 0.5}"#.into()),
        ]);
        let result = analyzer(provider).analyze_event(&event("CPI m/m")).await;
        assert_eq!(result.score, 0.0);
        assert_eq!(result.meta.retries, 0);
        assert!(
            result
                .meta
                .failure_reason
                .as_deref()
                .unwrap()
                .contains("400 bad request")
        );
        assert!(result.raw_response.as_ref().unwrap().get("error").is_some());
    }

    #[tokio::test]
    async fn test_post_symbols_come_from_model_and_text() {
        let provider = ScriptedProvider::new(vec![Ok(r#"{
            "score": 0.7, "reasoning": "yolo",
            "symbols": ["NVDA", "AAPL", "BTC"],
            "symbol_sentiments": {"NVDA": 0.9, "AAPL": -0.7, "BTC": 0.3}
        }"#
        .into())]);
        let p = post("Bought $NVDA calls, sold $AAPL, watching BTC", None);
        let result = analyzer(provider).analyze_post(&p).await;
        assert_eq!(result.score, 0.7);
        assert_eq!(result.symbols, vec!["NVDA", "AAPL", "BTC"]);
        for key in result.symbol_sentiments.keys() {
            assert!(result.symbols.contains(key));
        }
        assert_eq!(result.symbol_sentiments["AAPL"], -0.7);
    }

    #[tokio::test]
    async fn test_image_failure_uses_fallback_and_records_metadata() {
        // .test never resolves, so the download fails without real traffic
        let provider =
            ScriptedProvider::new(vec![Ok(r#"{"score": -0.2, "reasoning": "chartless"}"#.into())]);
        let p = post("Look at this chart", Some("http://unreachable.test/x.png"));
        let result = analyzer(provider).analyze_post(&p).await;
        assert!(result.score.is_finite());
        assert_eq!(result.score, -0.2);
        assert!(result.meta.image_download_failed);
        assert!(result.meta.failure_reason.is_some());
    }

    #[tokio::test]
    async fn test_batch_preserves_input_order() {
        let analyzer = analyzer(Arc::new(EchoProvider));
        let events = vec![event("Alpha Index"), event("Beta Index"), event("Gamma Index")];
        let results = analyzer.analyze_events(&events).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].score, 0.1);
        assert_eq!(results[1].score, 0.2);
        assert_eq!(results[2].score, 0.3);
    }

    #[tokio::test]
    async fn test_cancelled_analyzer_returns_neutral_failure() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let provider = ScriptedProvider::new(vec![Ok(r#"{"score": 1.0}"#.into())]);
        let analyzer = SentimentAnalyzer::with_provider(provider, test_config(), cancel);
        let result = analyzer.analyze_event(&event("CPI m/m")).await;
        assert_eq!(result.score, 0.0);
        assert!(
            result
                .meta
                .failure_reason
                .as_deref()
                .unwrap()
                .contains("cancelled")
        );
    }
}
