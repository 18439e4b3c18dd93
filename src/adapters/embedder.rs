//! Embedder adapter: text to fixed-dimensional dense vectors.
//!
//! Order and cardinality of outputs always match the inputs. The dimension
//! is a configuration constant; changing it means re-embedding the store.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::Value;

/// The embedding capability.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch. `result.len() == texts.len()`, same order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Fixed output dimension D.
    fn dimension(&self) -> usize;

    /// Label for metrics ("gemini" / "hashing").
    fn mode(&self) -> &'static str;
}

// ============================================================================
// Gemini implementation
// ============================================================================

/// Gemini-backed embedder using `batchEmbedContents`.
pub struct GeminiEmbedder {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    dimension: usize,
}

impl GeminiEmbedder {
    pub fn new(api_key: String, model: &str, dimension: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{model}:batchEmbedContents"
            ),
            api_key,
            model: model.to_string(),
            dimension,
        }
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let requests: Vec<Value> = texts
            .iter()
            .map(|text| {
                serde_json::json!({
                    "model": format!("models/{}", self.model),
                    "content": {"parts": [{"text": text}]},
                    "taskType": "RETRIEVAL_DOCUMENT",
                })
            })
            .collect();

        let response = self
            .client
            .post(&self.api_url)
            .query(&[("key", self.api_key.as_str())])
            .json(&serde_json::json!({ "requests": requests }))
            .send()
            .await
            .context("embedder request failed")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("embedder returned HTTP {status}"));
        }

        let payload: Value = response.json().await.context("embedder response body")?;
        let embeddings = payload["embeddings"]
            .as_array()
            .ok_or_else(|| anyhow!("embedder response missing embeddings array"))?;

        if embeddings.len() != texts.len() {
            return Err(anyhow!(
                "embedder returned {} vectors for {} inputs",
                embeddings.len(),
                texts.len()
            ));
        }

        embeddings
            .iter()
            .map(|entry| {
                let values = entry["values"]
                    .as_array()
                    .ok_or_else(|| anyhow!("embedding entry missing values"))?;
                let vector: Vec<f32> = values
                    .iter()
                    .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                    .collect();
                if vector.len() != self.dimension {
                    return Err(anyhow!(
                        "embedding dimension {} != configured {}",
                        vector.len(),
                        self.dimension
                    ));
                }
                Ok(vector)
            })
            .collect()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn mode(&self) -> &'static str {
        "gemini"
    }
}

// ============================================================================
// Hashing implementation (development mode + tests)
// ============================================================================

/// Deterministic token feature-hashing embedder.
///
/// Each lowercased token and adjacent bigram is FNV-1a hashed into a bucket;
/// the bucket's sign comes from a second hash bit and the vector is
/// L2-normalized. Restatements with shared vocabulary land near each other,
/// which is enough for offline development and for exercising the retrieval
/// path in tests.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn fnv1a(bytes: &[u8]) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for &b in bytes {
            hash ^= b as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        hash
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let tokens: Vec<String> = text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();

        let mut features = tokens.clone();
        for pair in tokens.windows(2) {
            features.push(format!("{} {}", pair[0], pair[1]));
        }

        for feature in &features {
            let hash = Self::fnv1a(feature.as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn mode(&self) -> &'static str {
        "hashing"
    }
}
