// src/pipeline/extractor.rs
//
// Insight extraction: answer a prompt about one document. Checks the cache,
// embeds the prompt, retrieves the nearest chunks and hands them to the
// generator. A document with no indexed content short-circuits without
// touching the cache.

use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::embedder::EmbeddingClient;
use crate::error::PipelineError;
use crate::generator::{InsightGenerator, Insights};
use crate::insight_cache::{CacheEntry, InsightCache};
use crate::vector_store::VectorStore;

#[derive(Debug)]
pub enum ExtractOutcome {
    /// Served from the cache without a model call.
    Cached(CacheEntry),
    /// Freshly generated from retrieved chunks.
    Generated {
        insights: Insights,
        chunk_count: usize,
        elapsed_ms: u128,
    },
    /// The document has no indexed vectors to answer from.
    NoContent,
}

pub struct InsightExtractor {
    pub cache: Arc<InsightCache>,
    pub embedder: Arc<EmbeddingClient>,
    pub vectors: Arc<VectorStore>,
    pub generator: Arc<InsightGenerator>,
    pub top_k: usize,
}

impl InsightExtractor {
    pub async fn extract(
        &self,
        doc_id: &str,
        prompt: &str,
    ) -> Result<ExtractOutcome, PipelineError> {
        if prompt.trim().is_empty() {
            return Err(PipelineError::Validation("prompt must not be empty".to_string()));
        }

        let started = Instant::now();

        // A cache read failure is a miss, never an error for the caller.
        match self.cache.check(doc_id, prompt).await {
            Ok(Some(entry)) => {
                info!(doc_id, "Serving insights from cache");
                return Ok(ExtractOutcome::Cached(entry));
            }
            Ok(None) => {}
            Err(e) => warn!(doc_id, error = %e, "Cache check failed, treating as miss"),
        }

        let query_vector = self.embedder.embed(prompt).await?;
        let chunks = self
            .vectors
            .query(&query_vector, self.top_k, Some(doc_id))
            .await?;

        if chunks.is_empty() {
            // Nothing indexed for this document. Not cached: the document
            // may simply still be processing.
            warn!(doc_id, "No indexed chunks for document");
            return Ok(ExtractOutcome::NoContent);
        }

        let insights = self.generator.generate(prompt, &chunks).await?;
        let chunk_count = chunks.len();

        // Best effort; a failed write never blocks the response.
        self.cache
            .store(
                doc_id,
                prompt,
                &serde_json::json!(insights),
                self.generator.model_id(),
                chunk_count,
            )
            .await;

        let elapsed_ms = started.elapsed().as_millis();
        info!(doc_id, chunk_count, elapsed_ms, "Generated insights");

        Ok(ExtractOutcome::Generated {
            insights,
            chunk_count,
            elapsed_ms,
        })
    }
}
