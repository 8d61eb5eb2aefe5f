//! Request/response log for every generation call.
//!
//! One immutable record per call, success or failure, for cost tracking and
//! debugging. Writing the record must never change the outcome of the call.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use kotoba_core::LogId;

use crate::generator::{GenerationError, GenerationRequest, TextGenerator};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationLog {
    pub id: LogId,
    pub prompt: String,
    /// Raw response text, or `ERROR: <message>` for failed calls.
    pub response: String,
    /// `None` for failed calls.
    pub approx_tokens: Option<u32>,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl GenerationLog {
    pub fn success(prompt: &str, response: &str, latency_ms: u64) -> Self {
        Self {
            id: LogId::new(),
            prompt: prompt.to_string(),
            response: response.to_string(),
            approx_tokens: Some(estimate_tokens(prompt, response)),
            latency_ms,
            created_at: Utc::now(),
        }
    }

    pub fn failure(prompt: &str, error: &GenerationError, latency_ms: u64) -> Self {
        Self {
            id: LogId::new(),
            prompt: prompt.to_string(),
            response: format!("ERROR: {error}"),
            approx_tokens: None,
            latency_ms,
            created_at: Utc::now(),
        }
    }
}

/// Rough token count: about four characters per token, at least one.
///
/// This is a cost heuristic, not a tokenizer.
pub fn estimate_tokens(prompt: &str, response: &str) -> u32 {
    let chars = prompt.chars().count() + response.chars().count();
    u32::try_from(chars / 4).unwrap_or(u32::MAX).max(1)
}

#[derive(Debug, Clone, Error)]
#[error("failed to record generation log: {0}")]
pub struct LogSinkError(pub String);

/// Destination for generation logs.
#[async_trait::async_trait]
pub trait GenerationLogSink: Send + Sync {
    async fn record(&self, log: GenerationLog) -> Result<(), LogSinkError>;
}

#[async_trait::async_trait]
impl<T: GenerationLogSink + ?Sized> GenerationLogSink for Arc<T> {
    async fn record(&self, log: GenerationLog) -> Result<(), LogSinkError> {
        (**self).record(log).await
    }
}

/// In-memory sink for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryGenerationLogSink {
    inner: Mutex<Vec<GenerationLog>>,
}

impl InMemoryGenerationLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<GenerationLog> {
        self.inner
            .lock()
            .map(|logs| logs.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl GenerationLogSink for InMemoryGenerationLogSink {
    async fn record(&self, log: GenerationLog) -> Result<(), LogSinkError> {
        self.inner
            .lock()
            .map_err(|_| LogSinkError("log buffer poisoned".to_string()))?
            .push(log);
        Ok(())
    }
}

/// Wraps a generator and records one [`GenerationLog`] per call.
///
/// Sink failures are reported through `tracing` and otherwise ignored; the
/// caller always sees the generator's own result.
#[derive(Debug, Clone)]
pub struct LoggedGenerator<G, S> {
    inner: G,
    sink: S,
}

impl<G, S> LoggedGenerator<G, S> {
    pub fn new(inner: G, sink: S) -> Self {
        Self { inner, sink }
    }
}

#[async_trait::async_trait]
impl<G, S> TextGenerator for LoggedGenerator<G, S>
where
    G: TextGenerator,
    S: GenerationLogSink,
{
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let started = Instant::now();
        let result = self.inner.generate(request).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let log = match &result {
            Ok(text) => {
                info!(latency_ms, response_len = text.len(), "generation call succeeded");
                GenerationLog::success(&request.prompt, text, latency_ms)
            }
            Err(e) => {
                warn!(latency_ms, error = %e, "generation call failed");
                GenerationLog::failure(&request.prompt, e, latency_ms)
            }
        };

        if let Err(e) = self.sink.record(log).await {
            error!(error = %e, "generation log dropped");
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Fixed(Result<String, GenerationError>);

    #[async_trait::async_trait]
    impl TextGenerator for Fixed {
        async fn generate(&self, _: &GenerationRequest) -> Result<String, GenerationError> {
            self.0.clone()
        }
    }

    struct BrokenSink;

    #[async_trait::async_trait]
    impl GenerationLogSink for BrokenSink {
        async fn record(&self, _: GenerationLog) -> Result<(), LogSinkError> {
            Err(LogSinkError("disk full".to_string()))
        }
    }

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest {
            prompt: prompt.to_string(),
            max_tokens: 10,
            temperature: 0.7,
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn token_estimate_is_a_quarter_of_the_characters() {
        assert_eq!(estimate_tokens("abcd", "efghijkl"), 3);
        assert_eq!(estimate_tokens("", ""), 1);
        assert_eq!(estimate_tokens("ab", "c"), 1);
    }

    #[tokio::test]
    async fn success_is_logged_with_token_estimate() {
        let sink = Arc::new(InMemoryGenerationLogSink::new());
        let generator = LoggedGenerator::new(Fixed(Ok("12345678".into())), sink.clone());

        let out = generator.generate(&request("abcd")).await.unwrap();
        assert_eq!(out, "12345678");

        let logs = sink.all();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].prompt, "abcd");
        assert_eq!(logs[0].response, "12345678");
        assert_eq!(logs[0].approx_tokens, Some(3));
    }

    #[tokio::test]
    async fn failure_is_logged_with_error_marker() {
        let sink = Arc::new(InMemoryGenerationLogSink::new());
        let generator = LoggedGenerator::new(
            Fixed(Err(GenerationError::Transport("connection reset".into()))),
            sink.clone(),
        );

        let err = generator.generate(&request("p")).await.unwrap_err();
        assert_eq!(err, GenerationError::Transport("connection reset".into()));

        let logs = sink.all();
        assert_eq!(logs[0].response, "ERROR: transport error: connection reset");
        assert_eq!(logs[0].approx_tokens, None);
    }

    #[tokio::test]
    async fn sink_failure_does_not_mask_the_result() {
        let generator = LoggedGenerator::new(Fixed(Ok("fine".into())), BrokenSink);
        assert_eq!(generator.generate(&request("p")).await.unwrap(), "fine");

        let generator = LoggedGenerator::new(
            Fixed(Err(GenerationError::EmptyResponse)),
            BrokenSink,
        );
        assert_eq!(
            generator.generate(&request("p")).await.unwrap_err(),
            GenerationError::EmptyResponse
        );
    }
}
