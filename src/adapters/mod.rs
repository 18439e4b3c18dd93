//! Adapters for the two external model capabilities.
//!
//! The service depends on exactly two abstract operations:
//! `Analyze(text) -> [Chunk]` and `Embed(text) -> vec[D]`. Both are modeled
//! as traits with a Gemini HTTP implementation for production and
//! deterministic implementations for development and tests. Each adapter is
//! treated as a bounded-concurrency resource behind a semaphore, and callers
//! inside ingest jobs retry transient failures with exponential backoff.

pub mod analyzer;
pub mod embedder;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use tokio::sync::Semaphore;

use crate::constants::{ADAPTER_BACKOFF_BASE_MS, ADAPTER_MAX_ATTEMPTS, ADAPTER_MAX_IN_FLIGHT};

pub use analyzer::{
    Analysis, AnalyzeHints, Analyzer, Chunk, EvidenceSnippet, GeminiAnalyzer, HeuristicAnalyzer,
    Synthesis,
};
pub use embedder::{Embedder, GeminiEmbedder, HashingEmbedder};

/// The pair of model adapters plus their concurrency limits.
#[derive(Clone)]
pub struct Adapters {
    pub analyzer: Arc<dyn Analyzer>,
    pub embedder: Arc<dyn Embedder>,
    analyzer_permits: Arc<Semaphore>,
    embedder_permits: Arc<Semaphore>,
}

impl Adapters {
    pub fn new(analyzer: Arc<dyn Analyzer>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            analyzer,
            embedder,
            analyzer_permits: Arc::new(Semaphore::new(ADAPTER_MAX_IN_FLIGHT)),
            embedder_permits: Arc::new(Semaphore::new(ADAPTER_MAX_IN_FLIGHT)),
        }
    }

    /// Analyze with bounded concurrency.
    pub async fn analyze(&self, text: &str, hints: &AnalyzeHints) -> Result<Analysis> {
        let _permit = self.analyzer_permits.acquire().await?;
        self.analyzer.analyze(text, hints).await
    }

    /// Summarize with bounded concurrency.
    pub async fn summarize(
        &self,
        query: &str,
        app_context: Option<&serde_json::Value>,
        evidence: &[EvidenceSnippet],
    ) -> Result<Synthesis> {
        let _permit = self.analyzer_permits.acquire().await?;
        self.analyzer.summarize(query, app_context, evidence).await
    }

    /// Embed with bounded concurrency.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let _permit = self.embedder_permits.acquire().await?;
        self.embedder.embed(texts).await
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedder.dimension()
    }

    /// Embed a single text.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let mut vectors = self.embed(&texts).await?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("embedder returned no vector for one input"))
    }
}

/// Retry a transient-failure-prone operation with exponential backoff.
///
/// Bounded to [`ADAPTER_MAX_ATTEMPTS`]; the last error surfaces after
/// exhaustion. Jitter spreads concurrent retries apart.
pub async fn with_retry<T, F, Fut>(label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 < ADAPTER_MAX_ATTEMPTS => {
                attempt += 1;
                let base = ADAPTER_BACKOFF_BASE_MS * (1u64 << attempt);
                let jitter = rand::thread_rng().gen_range(0..ADAPTER_BACKOFF_BASE_MS);
                let delay = Duration::from_millis(base + jitter);
                tracing::warn!(
                    adapter = label,
                    attempt,
                    error = %err,
                    "transient adapter failure, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(anyhow::anyhow!("transient"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::anyhow!("always down")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), ADAPTER_MAX_ATTEMPTS);
    }
}
