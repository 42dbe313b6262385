// src/embedder.rs
//
// Turns text into fixed-dimension embedding vectors through the LLM client,
// with an in-process LRU cache in front keyed by a fast content hash.

use lru::LruCache;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::EmbeddingError;
use crate::services::LlmClient;

/// Rough chars-per-token ratio used to bound input length before invoking
/// the embedding model.
const CHARS_PER_TOKEN: usize = 4;

pub struct EmbeddingClient {
    llm: Arc<dyn LlmClient>,
    model_id: String,
    dimensions: usize,
    max_input_tokens: usize,
    cache: Mutex<LruCache<u64, Vec<f32>>>,
}

impl EmbeddingClient {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        model_id: &str,
        dimensions: usize,
        max_input_tokens: usize,
        cache_size: usize,
    ) -> Self {
        let cache_size = NonZeroUsize::new(cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            llm,
            model_id: model_id.to_string(),
            dimensions,
            max_input_tokens,
            cache: Mutex::new(LruCache::new(cache_size)),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embed a single text. Whitespace-only input is rejected before any
    /// model call; oversized input is truncated at the token budget.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let prepared = self.truncate(text);
        let cache_key = seahash::hash(prepared.as_bytes());

        if let Some(vector) = self.cache.lock().get(&cache_key) {
            debug!(cache_key, "Embedding cache hit");
            return Ok(vector.clone());
        }

        let request = json!({
            "inputText": prepared,
            "dimensions": self.dimensions,
            "normalize": true,
        });

        let response = self
            .llm
            .invoke(&self.model_id, request)
            .await
            .map_err(|e| EmbeddingError::Inference(e.to_string()))?;

        let vector = parse_embedding(&response)?;
        if vector.len() != self.dimensions {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimensions,
                got: vector.len(),
            });
        }

        self.cache.lock().put(cache_key, vector.clone());
        Ok(vector)
    }

    /// Embed a batch in order. Fails fast on the first error so callers can
    /// decide how to handle partial progress.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        info!(count = vectors.len(), "Embedded batch");
        Ok(vectors)
    }

    fn truncate(&self, text: &str) -> String {
        let max_chars = self.max_input_tokens * CHARS_PER_TOKEN;
        if text.chars().count() <= max_chars {
            return text.to_string();
        }
        warn!(
            max_chars,
            "Input exceeds embedding token budget, truncating"
        );
        text.chars().take(max_chars).collect()
    }
}

fn parse_embedding(response: &Value) -> Result<Vec<f32>, EmbeddingError> {
    let values = response
        .get("embedding")
        .and_then(Value::as_array)
        .ok_or_else(|| EmbeddingError::Inference("response missing embedding array".into()))?;

    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| EmbeddingError::Inference("non-numeric embedding value".into()))
        })
        .collect()
}
