//! Scoring and summary ports backed by a chat-completion model.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::traits::{
    Score, ScoreFailure, ScoreOutcome, ScoringError, ScoringPort, SummaryOutcome, SummaryPort,
};
use crate::config::{ConfigError, ProviderKind, ScoringSettings};
use crate::domain::{Category, Message, MessageId, MessageSummary, Sentiment};
use crate::providers::ai::{
    ChatMessage, CompletionRequest, CompletionResponse, LlmError, LlmProvider, LlmResult,
    OllamaProvider, OpenAiCompatibleProvider,
};

/// Longest excerpt sent to the model for scoring, in characters.
const EXCERPT_LIMIT: usize = 1000;

/// Longest excerpt sent to the model for summarizing, in characters.
const SUMMARY_EXCERPT_LIMIT: usize = 2000;

const SYSTEM_PROMPT: &str = "You rate how important an email is to its recipient so that \
disposable mail can be cleaned up. Score on a scale where 8 or more is critical, 5 to 8 is \
important, 0 to 5 is ordinary, and anything below 0 is disposable (marketing, newsletters, \
social notifications, deal alerts). Security alerts, banking and payment notices, medical \
communications and direct personal mail are important. Respond with a single JSON object: \
{\"score\": <number>, \"category\": \"<category>\", \"rationale\": \"<one sentence>\"}.";

const SUMMARY_PROMPT: &str = "Summarize the email concisely in one or two sentences and \
extract its key points. Respond with a single JSON object: {\"summary\": \"<1-2 sentences>\", \
\"key_points\": [\"<point>\"], \"sentiment\": \"<positive|negative|neutral|urgent>\", \
\"urgency_indicators\": [\"<indicator>\"]}.";

/// Raw reply shape; the score may come back as a number or a string.
#[derive(Debug, Deserialize)]
struct Reply {
    score: serde_json::Value,
    #[serde(default)]
    category: Option<String>,
    #[serde(default, alias = "reasoning", alias = "reason")]
    rationale: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SummaryReply {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    key_points: Vec<String>,
    #[serde(default)]
    sentiment: Option<String>,
    #[serde(default)]
    urgency_indicators: Vec<String>,
}

/// Result of one model call, before batch-level classification.
enum Attempt<T> {
    Done(T),
    Failed(ScoreFailure),
    Unreachable(LlmError),
}

/// Scores and summarizes messages by asking an [`LlmProvider`] one message
/// at a time.
///
/// Calls within a batch run concurrently up to the configured limit and
/// each call is bounded by a timeout. A call that hits a transient service
/// error is retried once.
pub struct LlmScorer {
    provider: Arc<dyn LlmProvider>,
    label: String,
    concurrency: usize,
    message_timeout: Duration,
    retry_delay: Duration,
    temperature: f32,
    max_tokens: Option<usize>,
}

impl LlmScorer {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        let label = format!("{}:{}", provider.name(), provider.model());
        Self {
            provider,
            label,
            concurrency: 4,
            message_timeout: Duration::from_secs(120),
            retry_delay: Duration::from_millis(500),
            temperature: 0.1,
            max_tokens: Some(300),
        }
    }

    /// Builds the provider named in the settings and wraps it.
    pub fn from_settings(settings: &ScoringSettings) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(settings.message_timeout())
            .build()
            .map_err(|e| ConfigError::invalid("scoring", format!("cannot build HTTP client: {e}")))?;

        let provider: Arc<dyn LlmProvider> = match settings.provider {
            ProviderKind::Ollama => {
                let provider = match &settings.base_url {
                    Some(url) => OllamaProvider::with_url(url.clone(), settings.model.clone()),
                    None => OllamaProvider::new(settings.model.clone()),
                };
                Arc::new(provider.with_client(client))
            }
            ProviderKind::OpenAi => {
                let key = settings.api_key()?;
                let provider = match (&settings.base_url, key) {
                    (Some(url), key) => {
                        OpenAiCompatibleProvider::custom(url.clone(), key, settings.model.clone())
                            .with_json_mode(true)
                    }
                    (None, Some(key)) => {
                        OpenAiCompatibleProvider::openai(key, settings.model.clone())
                    }
                    (None, None) => {
                        return Err(ConfigError::invalid(
                            "scoring.api_key_env",
                            "required for the openai provider without a base_url",
                        ))
                    }
                };
                Arc::new(provider.with_client(client))
            }
        };

        Ok(Self::new(provider)
            .with_concurrency(settings.concurrency)
            .with_message_timeout(settings.message_timeout())
            .with_retry_delay(settings.retry_delay())
            .with_sampling(settings.temperature, settings.max_tokens))
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: Option<usize>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    fn build_request(&self, message: &Message) -> CompletionRequest {
        let categories: Vec<&str> = Category::ALL.iter().map(|c| c.as_str()).collect();
        let excerpt: String = message.excerpt.chars().take(EXCERPT_LIMIT).collect();
        let body = format!(
            "From: {}\nSubject: {}\nDate: {}\nExcerpt: {}\n\nAllowed categories: {}",
            message.sender,
            message.subject,
            message.received_at.to_rfc3339(),
            excerpt,
            categories.join(", "),
        );

        CompletionRequest::new(vec![ChatMessage::user(body)])
            .with_system_prompt(SYSTEM_PROMPT)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
    }

    fn build_summary_request(&self, message: &Message) -> CompletionRequest {
        let excerpt: String = message.excerpt.chars().take(SUMMARY_EXCERPT_LIMIT).collect();
        let body = format!(
            "From: {}\nSubject: {}\nContent: {}",
            message.sender, message.subject, excerpt,
        );

        CompletionRequest::new(vec![ChatMessage::user(body)])
            .with_system_prompt(SUMMARY_PROMPT)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
    }

    /// One provider call with a single retry on transient service errors.
    async fn complete(&self, request: &CompletionRequest) -> LlmResult<CompletionResponse> {
        match self.provider.complete(request).await {
            Err(e) if e.is_transport() && !e.is_rejection() => {
                debug!(scorer = %self.label, error = %e, "Retrying after transient failure");
                tokio::time::sleep(self.retry_delay).await;
                self.provider.complete(request).await
            }
            other => other,
        }
    }

    async fn ask<T>(
        &self,
        request: CompletionRequest,
        parse: fn(&str) -> Result<T, ScoreFailure>,
    ) -> Attempt<T> {
        let reply = tokio::time::timeout(self.message_timeout, self.complete(&request));

        match reply.await {
            Err(_) => Attempt::Failed(ScoreFailure::Timeout(self.message_timeout)),
            Ok(Err(e)) if e.is_transport() => Attempt::Unreachable(e),
            Ok(Err(LlmError::HttpError(e))) if e.is_timeout() => {
                Attempt::Failed(ScoreFailure::Timeout(self.message_timeout))
            }
            Ok(Err(LlmError::InvalidResponse(reason))) => {
                Attempt::Failed(ScoreFailure::InvalidResponse(reason))
            }
            Ok(Err(e)) => Attempt::Failed(ScoreFailure::Rejected(e.to_string())),
            Ok(Ok(response)) => match parse(&response.text) {
                Ok(value) => Attempt::Done(value),
                Err(failure) => Attempt::Failed(failure),
            },
        }
    }
}

/// The span from the first `{` to the last `}`.
///
/// Models often wrap the object in prose or code fences.
fn json_object(text: &str) -> Result<&str, ScoreFailure> {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => Ok(&text[start..=end]),
        _ => Err(ScoreFailure::InvalidResponse(
            "no JSON object in reply".to_string(),
        )),
    }
}

/// Extracts `{score, category, rationale}` from a model reply.
pub fn parse_reply(text: &str) -> Result<Score, ScoreFailure> {
    let reply: Reply = serde_json::from_str(json_object(text)?)
        .map_err(|e| ScoreFailure::InvalidResponse(e.to_string()))?;

    let score = match &reply.score {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| ScoreFailure::InvalidResponse(format!("score is not a number: {}", reply.score)))?;

    if !score.is_finite() {
        return Err(ScoreFailure::NonFiniteScore);
    }

    Ok(Score {
        score,
        rationale: reply.rationale.unwrap_or_default().trim().to_string(),
        category: reply
            .category
            .as_deref()
            .map(Category::parse_lenient)
            .unwrap_or(Category::Other),
    })
}

/// Extracts `{summary, key_points, sentiment, urgency_indicators}` from a
/// model reply. An empty summary is an invalid reply.
pub fn parse_summary(text: &str) -> Result<MessageSummary, ScoreFailure> {
    let reply: SummaryReply = serde_json::from_str(json_object(text)?)
        .map_err(|e| ScoreFailure::InvalidResponse(e.to_string()))?;

    let summary = reply.summary.unwrap_or_default().trim().to_string();
    if summary.is_empty() {
        return Err(ScoreFailure::InvalidResponse("summary is empty".to_string()));
    }

    let clean = |items: Vec<String>| -> Vec<String> {
        items
            .into_iter()
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()
    };

    Ok(MessageSummary {
        summary,
        key_points: clean(reply.key_points),
        sentiment: reply.sentiment.as_deref().and_then(Sentiment::parse_lenient),
        urgency_indicators: clean(reply.urgency_indicators),
    })
}

#[async_trait]
impl ScoringPort for LlmScorer {
    fn name(&self) -> &str {
        &self.label
    }

    async fn score_batch(
        &self,
        batch: &[Message],
    ) -> Result<Vec<(MessageId, ScoreOutcome)>, ScoringError> {
        let attempts: Vec<Attempt<Score>> = stream::iter(
            batch
                .iter()
                .map(|m| self.build_request(m))
                .collect::<Vec<_>>()
                .into_iter()
                .map(|request| self.ask(request, parse_reply)),
        )
        .buffered(self.concurrency)
        .collect()
        .await;

        let unreachable: Vec<&LlmError> = attempts
            .iter()
            .filter_map(|a| match a {
                Attempt::Unreachable(e) => Some(e),
                _ => None,
            })
            .collect();
        if !batch.is_empty() && unreachable.len() == batch.len() {
            let cause = unreachable
                .first()
                .map(|e| e.to_string())
                .unwrap_or_default();
            warn!(scorer = %self.label, %cause, "Every scoring call in the batch failed");
            return Err(if unreachable.iter().all(|e| e.is_rejection()) {
                ScoringError::Rejected(cause)
            } else {
                ScoringError::Unreachable(cause)
            });
        }

        let outcomes = batch
            .iter()
            .zip(attempts)
            .map(|(message, attempt)| {
                let outcome = match attempt {
                    Attempt::Done(score) => Ok(score),
                    Attempt::Failed(failure) => Err(failure),
                    Attempt::Unreachable(e) => Err(ScoreFailure::Rejected(e.to_string())),
                };
                (message.id.clone(), outcome)
            })
            .collect::<Vec<_>>();

        debug!(
            scorer = %self.label,
            batch_len = batch.len(),
            failed = outcomes.iter().filter(|(_, o)| o.is_err()).count(),
            "Scored batch"
        );
        Ok(outcomes)
    }
}

#[async_trait]
impl SummaryPort for LlmScorer {
    async fn summarize_batch(&self, batch: &[Message]) -> Vec<(MessageId, SummaryOutcome)> {
        let attempts: Vec<Attempt<MessageSummary>> = stream::iter(
            batch
                .iter()
                .map(|m| self.build_summary_request(m))
                .collect::<Vec<_>>()
                .into_iter()
                .map(|request| self.ask(request, parse_summary)),
        )
        .buffered(self.concurrency)
        .collect()
        .await;

        batch
            .iter()
            .zip(attempts)
            .map(|(message, attempt)| {
                let outcome = match attempt {
                    Attempt::Done(summary) => Ok(summary),
                    Attempt::Failed(failure) => Err(failure),
                    Attempt::Unreachable(e) => Err(ScoreFailure::Rejected(e.to_string())),
                };
                (message.id.clone(), outcome)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ai::{FinishReason, TokenUsage};
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replies based on the subject line found in the prompt.
    #[derive(Default)]
    struct ScriptedProvider {
        flaky_calls: AtomicUsize,
    }

    fn reply(text: impl Into<String>) -> LlmResult<CompletionResponse> {
        Ok(CompletionResponse {
            text: text.into(),
            tokens_used: TokenUsage::default(),
            finish_reason: FinishReason::Stop,
        })
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "test-model"
        }

        async fn complete(&self, request: &CompletionRequest) -> LlmResult<CompletionResponse> {
            let prompt = &request.messages[0].content;
            if prompt.contains("Subject: down") {
                return Err(LlmError::Unavailable("connection refused".to_string()));
            }
            if prompt.contains("Subject: locked") {
                return Err(LlmError::AuthenticationError("invalid api key".to_string()));
            }
            if prompt.contains("Subject: flaky") && self.flaky_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(LlmError::ApiError {
                    status: 503,
                    message: "overloaded".to_string(),
                });
            }
            if prompt.contains("Subject: slow") {
                tokio::time::sleep(Duration::from_secs(5)).await;
                return reply("{}");
            }
            if prompt.contains("Subject: garbled") {
                return reply("I cannot help with that");
            }

            let summarizing = request.system_prompt.as_deref() == Some(SUMMARY_PROMPT);
            if summarizing {
                return reply(
                    r#"{"summary": " Your order shipped. ", "key_points": ["Arrives Friday", " "], "sentiment": "Positive"}"#,
                );
            }
            if prompt.contains("Subject: sale") {
                reply("Sure! ```json\n{\"score\": -3.5, \"category\": \"promotional\", \"rationale\": \"Bulk marketing\"}\n```")
            } else {
                reply(r#"{"score": "6", "category": "personal", "reasoning": "Direct mail"}"#)
            }
        }
    }

    fn message(id: &str, subject: &str) -> Message {
        Message::new(
            id,
            "someone@example.com",
            subject,
            Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
        )
    }

    fn scorer() -> LlmScorer {
        LlmScorer::new(Arc::new(ScriptedProvider::default()))
            .with_concurrency(2)
            .with_message_timeout(Duration::from_millis(50))
            .with_retry_delay(Duration::ZERO)
    }

    #[test]
    fn parse_reply_extracts_embedded_object() {
        let score = parse_reply("Here you go: {\"score\": 2, \"category\": \"Newsletter\"} thanks").unwrap();
        assert_eq!(score.score, 2.0);
        assert_eq!(score.category, Category::Newsletter);
        assert_eq!(score.rationale, "");
    }

    #[test]
    fn parse_reply_maps_unknown_category_to_other() {
        let score = parse_reply(r#"{"score": 1, "category": "travel"}"#).unwrap();
        assert_eq!(score.category, Category::Other);
    }

    #[test]
    fn parse_reply_rejects_non_finite_and_missing_scores() {
        assert_eq!(
            parse_reply(r#"{"score": "NaN"}"#),
            Err(ScoreFailure::NonFiniteScore)
        );
        assert!(matches!(
            parse_reply(r#"{"score": null}"#),
            Err(ScoreFailure::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_reply("no json here"),
            Err(ScoreFailure::InvalidResponse(_))
        ));
    }

    #[test]
    fn parse_summary_reads_optional_fields() {
        let summary = parse_summary(
            r#"{"summary": "Rent is due Monday.", "key_points": ["Pay $1200"], "sentiment": "urgent", "urgency_indicators": ["due Monday"]}"#,
        )
        .unwrap();
        assert_eq!(summary.summary, "Rent is due Monday.");
        assert_eq!(summary.key_points, vec!["Pay $1200"]);
        assert_eq!(summary.sentiment, Some(Sentiment::Urgent));
        assert_eq!(summary.urgency_indicators, vec!["due Monday"]);

        let bare = parse_summary(r#"{"summary": "Hello", "sentiment": "meh"}"#).unwrap();
        assert!(bare.key_points.is_empty());
        assert_eq!(bare.sentiment, None);
    }

    #[test]
    fn parse_summary_requires_summary_text() {
        assert!(matches!(
            parse_summary(r#"{"summary": "  ", "key_points": []}"#),
            Err(ScoreFailure::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_summary(r#"{"key_points": ["a"]}"#),
            Err(ScoreFailure::InvalidResponse(_))
        ));
    }

    #[test]
    fn request_includes_message_fields() {
        let msg = message("1", "Quarterly report").with_excerpt("Numbers attached");
        let request = scorer().build_request(&msg);
        let body = &request.messages[0].content;
        assert!(body.contains("From: someone@example.com"));
        assert!(body.contains("Subject: Quarterly report"));
        assert!(body.contains("Excerpt: Numbers attached"));
        assert!(request.system_prompt.is_some());
        assert_eq!(request.max_tokens, Some(300));
    }

    #[test]
    fn summary_request_carries_longer_content() {
        let long = "z".repeat(3000);
        let msg = message("1", "Report").with_excerpt(long);
        let request = scorer().build_summary_request(&msg);
        let body = &request.messages[0].content;
        assert!(body.contains("Content: "));
        assert_eq!(body.matches('z').count(), SUMMARY_EXCERPT_LIMIT);
        assert_eq!(request.system_prompt.as_deref(), Some(SUMMARY_PROMPT));
    }

    #[tokio::test]
    async fn batch_outcomes_follow_input_order() {
        let batch = vec![
            message("1", "sale"),
            message("2", "slow"),
            message("3", "hello"),
            message("4", "garbled"),
        ];

        let outcomes = scorer().score_batch(&batch).await.unwrap();
        let ids: Vec<&str> = outcomes.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4"]);

        let first = outcomes[0].1.as_ref().unwrap();
        assert_eq!(first.score, -3.5);
        assert_eq!(first.category, Category::Promotional);
        assert_eq!(
            outcomes[1].1,
            Err(ScoreFailure::Timeout(Duration::from_millis(50)))
        );
        assert_eq!(outcomes[2].1.as_ref().unwrap().score, 6.0);
        assert_eq!(outcomes[2].1.as_ref().unwrap().rationale, "Direct mail");
        assert!(matches!(outcomes[3].1, Err(ScoreFailure::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn unreachable_service_fails_the_whole_batch() {
        let batch = vec![message("1", "down"), message("2", "down")];
        let err = scorer().score_batch(&batch).await.unwrap_err();
        assert!(matches!(err, ScoringError::Unreachable(_)));
    }

    #[tokio::test]
    async fn refused_credentials_reject_the_whole_batch() {
        let batch = vec![message("1", "locked"), message("2", "locked")];
        let err = scorer().score_batch(&batch).await.unwrap_err();
        assert!(matches!(err, ScoringError::Rejected(_)));
    }

    #[tokio::test]
    async fn transient_failure_is_retried_once() {
        let provider = Arc::new(ScriptedProvider::default());
        let scorer = LlmScorer::new(provider.clone()).with_retry_delay(Duration::ZERO);

        let outcomes = scorer.score_batch(&[message("1", "flaky")]).await.unwrap();

        assert_eq!(outcomes[0].1.as_ref().unwrap().score, 6.0);
        assert_eq!(provider.flaky_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn partial_outage_is_per_message() {
        let batch = vec![message("1", "down"), message("2", "hello")];
        let outcomes = scorer().score_batch(&batch).await.unwrap();
        assert!(matches!(outcomes[0].1, Err(ScoreFailure::Rejected(_))));
        assert!(outcomes[1].1.is_ok());
    }

    #[tokio::test]
    async fn summaries_are_per_message_and_never_fail_the_batch() {
        let batch = vec![message("1", "shipping"), message("2", "down"), message("3", "garbled")];
        let outcomes = scorer().summarize_batch(&batch).await;

        let ids: Vec<&str> = outcomes.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        let summary = outcomes[0].1.as_ref().unwrap();
        assert_eq!(summary.summary, "Your order shipped.");
        assert_eq!(summary.key_points, vec!["Arrives Friday"]);
        assert_eq!(summary.sentiment, Some(Sentiment::Positive));
        assert!(matches!(outcomes[1].1, Err(ScoreFailure::Rejected(_))));
        assert!(matches!(outcomes[2].1, Err(ScoreFailure::InvalidResponse(_))));
    }

    #[test]
    fn scorer_label_names_provider_and_model() {
        assert_eq!(scorer().name(), "scripted:test-model");
    }

    #[test]
    fn ollama_settings_build_a_scorer() {
        let settings = ScoringSettings {
            model: "qwen2.5:7b".to_string(),
            ..ScoringSettings::default()
        };
        let scorer = LlmScorer::from_settings(&settings).unwrap();
        assert_eq!(scorer.name(), "ollama:qwen2.5:7b");
        assert_eq!(scorer.retry_delay, settings.retry_delay());
    }

    #[test]
    fn openai_without_key_or_url_is_a_config_error() {
        let settings = ScoringSettings {
            provider: ProviderKind::OpenAi,
            ..ScoringSettings::default()
        };
        assert!(matches!(
            LlmScorer::from_settings(&settings),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
