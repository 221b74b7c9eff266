//! Relevance scoring boundary.
//!
//! Curation needs two judgments it cannot make locally: how similar two
//! memories are (deduplication) and how relevant a memory is to the
//! user's recent queries (reranking). Both come from a
//! `RelevanceProvider`, which in production fronts a potentially slow
//! embedding service. Callers are responsible for timeout-guarding every
//! call; this module only bounds the individual HTTP request.

use crate::memory::error::{CuratorError, Result};
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

#[async_trait]
pub trait RelevanceProvider: Send + Sync {
    /// Pairwise similarity of two texts, in [0,1].
    async fn similarity(&self, text_a: &str, text_b: &str) -> Result<f32>;

    /// Relevance of a text to a set of recent query strings, in [0,1].
    async fn score_relevance(&self, text: &str, query_context: &[String]) -> Result<f32>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScorerBackend {
    Ollama,
    Mock,
}

/// Embedding-backed relevance scorer.
///
/// The Ollama backend embeds texts over HTTP and compares with cosine
/// similarity; transient failures are retried with exponential backoff.
/// The Mock backend is deterministic and network-free: token-overlap
/// containment, which is enough to make near-duplicate phrasings score
/// high and unrelated texts score zero.
#[derive(Debug, Clone)]
pub struct EmbeddingRelevanceScorer {
    client: Client,
    model: String,
    base_url: String,
    backend: ScorerBackend,
}

#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

impl EmbeddingRelevanceScorer {
    pub fn new_ollama(base_url: String, model: String, timeout_seconds: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| CuratorError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            model,
            base_url,
            backend: ScorerBackend::Ollama,
        })
    }

    pub fn new_mock() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(1))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            model: "mock-model".to_string(),
            base_url: "http://mock:11434".to_string(),
            backend: ScorerBackend::Mock,
        }
    }

    /// Fetch an embedding with automatic retry on transient errors.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let operation = || async {
            match self.embed_once(text).await {
                Ok(embedding) => Ok(embedding),
                Err(CuratorError::ProviderUnavailable(msg)) if msg.contains("retryable") => {
                    Err(backoff::Error::transient(CuratorError::ProviderUnavailable(msg)))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        };

        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        retry(backoff, operation).await
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>> {
        let request = OllamaEmbeddingRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| CuratorError::ProviderUnavailable(format!("embedding request: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            if status.is_server_error() || status.as_u16() == 429 {
                warn!(%status, "embedding service returned retryable error");
                return Err(CuratorError::ProviderUnavailable(format!(
                    "retryable {status}: {body}"
                )));
            }
            return Err(CuratorError::ProviderUnavailable(format!(
                "{status}: {body}"
            )));
        }

        let parsed: OllamaEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| CuratorError::ProviderUnavailable(format!("embedding response: {e}")))?;

        debug!(dims = parsed.embedding.len(), "embedding generated");
        Ok(parsed.embedding)
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        // Clamp negatives: callers expect [0,1]
        (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
    }

    /// Token-overlap containment: |A ∩ B| / min(|A|, |B|).
    ///
    /// With containment rather than Jaccard, a short phrase wholly
    /// contained in a longer restatement scores 1.0, which is the
    /// near-duplicate shape dedup cares about.
    fn token_containment(text_a: &str, text_b: &str) -> f32 {
        let tokens_a: HashSet<String> = Self::tokenize(text_a);
        let tokens_b: HashSet<String> = Self::tokenize(text_b);
        if tokens_a.is_empty() || tokens_b.is_empty() {
            return 0.0;
        }
        let intersection = tokens_a.intersection(&tokens_b).count();
        intersection as f32 / tokens_a.len().min(tokens_b.len()) as f32
    }

    fn tokenize(text: &str) -> HashSet<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect()
    }
}

#[async_trait]
impl RelevanceProvider for EmbeddingRelevanceScorer {
    async fn similarity(&self, text_a: &str, text_b: &str) -> Result<f32> {
        match self.backend {
            ScorerBackend::Ollama => {
                let a = self.embed(text_a).await?;
                let b = self.embed(text_b).await?;
                Ok(Self::cosine_similarity(&a, &b))
            }
            ScorerBackend::Mock => Ok(Self::token_containment(text_a, text_b)),
        }
    }

    async fn score_relevance(&self, text: &str, query_context: &[String]) -> Result<f32> {
        if query_context.is_empty() {
            return Ok(0.0);
        }
        match self.backend {
            ScorerBackend::Ollama => {
                let text_embedding = self.embed(text).await?;
                let mut best: f32 = 0.0;
                for query in query_context {
                    let query_embedding = self.embed(query).await?;
                    best = best.max(Self::cosine_similarity(&text_embedding, &query_embedding));
                }
                Ok(best)
            }
            ScorerBackend::Mock => Ok(query_context
                .iter()
                .map(|q| Self::token_containment(text, q))
                .fold(0.0, f32::max)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let v = vec![0.5, 0.5, 0.7];
        let sim = EmbeddingRelevanceScorer::cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert_eq!(EmbeddingRelevanceScorer::cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_cosine_similarity_mismatched_dims() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0];
        assert_eq!(EmbeddingRelevanceScorer::cosine_similarity(&a, &b), 0.0);
    }

    #[tokio::test]
    async fn test_mock_similarity_contained_phrase() {
        let scorer = EmbeddingRelevanceScorer::new_mock();
        let sim = scorer
            .similarity("I like cats", "I like cats very much")
            .await
            .unwrap();
        assert!(sim >= 0.9, "contained phrase should be near-duplicate, got {sim}");
    }

    #[tokio::test]
    async fn test_mock_similarity_unrelated() {
        let scorer = EmbeddingRelevanceScorer::new_mock();
        let sim = scorer
            .similarity("I like cats", "My favorite color is blue")
            .await
            .unwrap();
        assert!(sim < 0.2, "unrelated texts should score low, got {sim}");
    }

    #[tokio::test]
    async fn test_mock_relevance_empty_context_is_zero() {
        let scorer = EmbeddingRelevanceScorer::new_mock();
        let score = scorer.score_relevance("anything", &[]).await.unwrap();
        assert_eq!(score, 0.0);
    }

    #[tokio::test]
    async fn test_mock_relevance_tracks_best_query() {
        let scorer = EmbeddingRelevanceScorer::new_mock();
        let context = vec!["tell me about cats".to_string(), "weather".to_string()];
        let cats = scorer.score_relevance("I like cats", &context).await.unwrap();
        let blue = scorer
            .score_relevance("My favorite color is blue", &context)
            .await
            .unwrap();
        assert!(cats > blue);
    }
}
