// src/vector_store.rs
//
// Document-aware facade over the vector index: builds "{docId}#chunk-{n}"
// keys, batches writes, converts index distances into similarity scores,
// and removes a document's vectors by key prefix.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::services::{
    DistanceMetric, MetadataFilter, StoreError, VectorIndex, VectorItem, VectorMatch,
};

/// Index-side write and delete batch ceiling.
const MAX_BATCH: usize = 500;

/// Index-side limit on how many matches one query may request.
const MAX_TOP_K: usize = 30;

/// One chunk ready for indexing.
pub struct VectorEntry {
    pub vector: Vec<f32>,
    pub text_chunk: String,
    pub page_range: String,
    pub chunk_index: usize,
}

/// One scored match returned to callers, with the indexed metadata lifted
/// out of the raw map.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub key: String,
    pub similarity: f32,
    pub distance: f32,
    pub text_chunk: String,
    pub page_range: String,
    pub doc_id: String,
    pub upload_timestamp: String,
}

pub struct VectorStore {
    index: Arc<dyn VectorIndex>,
}

impl VectorStore {
    pub fn new(index: Arc<dyn VectorIndex>) -> Self {
        Self { index }
    }

    pub fn vector_key(doc_id: &str, chunk_index: usize) -> String {
        format!("{}#chunk-{}", doc_id, chunk_index)
    }

    pub async fn put(
        &self,
        doc_id: &str,
        entry: VectorEntry,
        upload_timestamp: &str,
    ) -> Result<(), StoreError> {
        let items = Self::to_items(doc_id, vec![entry], upload_timestamp);
        self.index.put_vectors(items).await
    }

    /// Index a document's chunk vectors, splitting into index-sized write
    /// batches. A failed write batch is logged and skipped rather than
    /// aborting the rest; the return value is how many vectors actually
    /// landed, so callers can record any shortfall.
    pub async fn put_batch(
        &self,
        doc_id: &str,
        entries: Vec<VectorEntry>,
        upload_timestamp: &str,
    ) -> usize {
        if entries.is_empty() {
            return 0;
        }

        let items = Self::to_items(doc_id, entries, upload_timestamp);
        let total = items.len();
        let mut stored = 0usize;
        for batch in items.chunks(MAX_BATCH) {
            match self.index.put_vectors(batch.to_vec()).await {
                Ok(()) => stored += batch.len(),
                Err(e) => {
                    warn!(doc_id, batch_size = batch.len(), error = %e, "Vector write batch failed");
                }
            }
        }

        info!(doc_id, stored, total, "Stored document vectors");
        stored
    }

    fn to_items(doc_id: &str, entries: Vec<VectorEntry>, upload_timestamp: &str) -> Vec<VectorItem> {
        entries
            .into_iter()
            .map(|entry| {
                let mut metadata = serde_json::Map::new();
                metadata.insert("docId".to_string(), json!(doc_id));
                metadata.insert("textChunk".to_string(), json!(entry.text_chunk));
                metadata.insert("pageRange".to_string(), json!(entry.page_range));
                metadata.insert("chunkIndex".to_string(), json!(entry.chunk_index));
                metadata.insert("uploadTimestamp".to_string(), json!(upload_timestamp));
                VectorItem {
                    key: Self::vector_key(doc_id, entry.chunk_index),
                    vector: entry.vector,
                    metadata,
                }
            })
            .collect()
    }

    /// Query the index for the nearest chunks, optionally restricted to one
    /// document. `top_k` is clamped to the index ceiling.
    pub async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        doc_id: Option<&str>,
    ) -> Result<Vec<QueryResult>, StoreError> {
        let requested = top_k;
        let top_k = top_k.min(MAX_TOP_K);
        if requested > top_k {
            warn!(requested, clamped = top_k, "Clamped top_k to index limit");
        }

        let filter = doc_id.map(|id| MetadataFilter {
            field: "docId".to_string(),
            equals: json!(id),
        });

        let output = self
            .index
            .query_vectors(vector, top_k, filter.as_ref())
            .await?;

        let metric = output.metric;
        let results: Vec<QueryResult> = output
            .matches
            .into_iter()
            .map(|m| to_result(m, metric))
            .collect();

        debug!(returned = results.len(), ?metric, "Vector query completed");
        Ok(results)
    }

    /// Remove every vector whose key starts with the document's prefix.
    /// Returns the number of deleted vectors; a document with no vectors
    /// deletes zero and is not an error.
    pub async fn delete_by_doc_id(&self, doc_id: &str) -> Result<usize, StoreError> {
        let prefix = format!("{}#chunk-", doc_id);
        let mut deleted = 0usize;
        let mut page_token: Option<String> = None;

        loop {
            let page = self.index.list_vectors(page_token.as_deref()).await?;
            let matching: Vec<String> = page
                .keys
                .into_iter()
                .filter(|key| key.starts_with(&prefix))
                .collect();

            for batch in matching.chunks(MAX_BATCH) {
                self.index.delete_vectors(batch).await?;
                deleted += batch.len();
            }

            match page.next_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        info!(doc_id, deleted, "Deleted document vectors");
        Ok(deleted)
    }
}

fn to_result(m: VectorMatch, metric: DistanceMetric) -> QueryResult {
    let similarity = similarity_from_distance(m.distance, metric);
    QueryResult {
        similarity,
        distance: m.distance,
        text_chunk: string_field(&m.metadata, "textChunk"),
        page_range: string_field(&m.metadata, "pageRange"),
        doc_id: string_field(&m.metadata, "docId"),
        upload_timestamp: string_field(&m.metadata, "uploadTimestamp"),
        key: m.key,
    }
}

fn string_field(metadata: &serde_json::Map<String, Value>, field: &str) -> String {
    metadata
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Map an index distance to a similarity in [0, 1]. Cosine distance ranges
/// over [0, 2]; euclidean is unbounded so it gets a reciprocal mapping.
pub(crate) fn similarity_from_distance(distance: f32, metric: DistanceMetric) -> f32 {
    match metric {
        DistanceMetric::Cosine => (1.0 - distance / 2.0).clamp(0.0, 1.0),
        DistanceMetric::Euclidean => 1.0 / (1.0 + distance.max(0.0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{InMemoryVectorIndex, VectorPage, VectorQueryOutput};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entry(chunk_index: usize, vector: Vec<f32>) -> VectorEntry {
        VectorEntry {
            vector,
            text_chunk: format!("chunk text {}", chunk_index),
            page_range: "1-10".to_string(),
            chunk_index,
        }
    }

    #[tokio::test]
    async fn put_batch_keys_and_counts() {
        let index = Arc::new(InMemoryVectorIndex::new());
        let store = VectorStore::new(index.clone());

        let stored = store
            .put_batch(
                "doc-1",
                vec![entry(0, vec![1.0, 0.0]), entry(1, vec![0.0, 1.0])],
                "2026-08-23T00:00:00Z",
            )
            .await;

        assert_eq!(stored, 2);
        assert_eq!(index.len(), 2);
    }

    #[tokio::test]
    async fn writes_and_deletes_span_multiple_index_batches() {
        let index = Arc::new(InMemoryVectorIndex::new());
        let store = VectorStore::new(index.clone());

        // Well past the 500-item write ceiling and the listing page size.
        let entries: Vec<VectorEntry> = (0..1203).map(|i| entry(i, vec![1.0, 0.0])).collect();
        let stored = store.put_batch("doc-big", entries, "ts").await;
        assert_eq!(stored, 1203);
        assert_eq!(index.len(), 1203);

        let deleted = store.delete_by_doc_id("doc-big").await.unwrap();
        assert_eq!(deleted, 1203);
        assert_eq!(index.len(), 0);
    }

    /// Accepts the first write batch and rejects every later one.
    struct FirstWriteOnlyIndex {
        inner: InMemoryVectorIndex,
        writes: AtomicUsize,
    }

    impl FirstWriteOnlyIndex {
        fn new() -> Self {
            Self {
                inner: InMemoryVectorIndex::new(),
                writes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl VectorIndex for FirstWriteOnlyIndex {
        async fn put_vectors(&self, items: Vec<VectorItem>) -> Result<(), StoreError> {
            if self.writes.fetch_add(1, Ordering::SeqCst) > 0 {
                return Err(StoreError::Backend("write rejected".to_string()));
            }
            self.inner.put_vectors(items).await
        }

        async fn query_vectors(
            &self,
            vector: &[f32],
            top_k: usize,
            filter: Option<&MetadataFilter>,
        ) -> Result<VectorQueryOutput, StoreError> {
            self.inner.query_vectors(vector, top_k, filter).await
        }

        async fn delete_vectors(&self, keys: &[String]) -> Result<(), StoreError> {
            self.inner.delete_vectors(keys).await
        }

        async fn list_vectors(&self, page_token: Option<&str>) -> Result<VectorPage, StoreError> {
            self.inner.list_vectors(page_token).await
        }
    }

    #[tokio::test]
    async fn failed_write_batch_yields_partial_count() {
        let index = Arc::new(FirstWriteOnlyIndex::new());
        let store = VectorStore::new(index.clone());

        // 800 entries split into a 500 batch that lands and a 300 batch
        // that the index rejects.
        let entries: Vec<VectorEntry> = (0..800).map(|i| entry(i, vec![1.0, 0.0])).collect();
        let stored = store.put_batch("doc-1", entries, "ts").await;

        assert_eq!(stored, 500);
        assert_eq!(index.inner.len(), 500);
    }

    #[tokio::test]
    async fn query_converts_distance_to_similarity() {
        let index = Arc::new(InMemoryVectorIndex::new());
        let store = VectorStore::new(index);

        store
            .put_batch(
                "doc-1",
                vec![entry(0, vec![1.0, 0.0]), entry(1, vec![-1.0, 0.0])],
                "ts",
            )
            .await;

        let results = store.query(&[1.0, 0.0], 10, Some("doc-1")).await.unwrap();
        assert_eq!(results.len(), 2);
        // Identical vector: distance 0, similarity 1.
        assert!((results[0].similarity - 1.0).abs() < 1e-5);
        assert_eq!(results[0].key, "doc-1#chunk-0");
        assert_eq!(results[0].text_chunk, "chunk text 0");
        // Opposite vector: distance 2, similarity 0.
        assert!(results[1].similarity < 1e-5);
    }

    #[tokio::test]
    async fn query_filters_by_doc_id() {
        let index = Arc::new(InMemoryVectorIndex::new());
        let store = VectorStore::new(index);

        store
            .put_batch("doc-a", vec![entry(0, vec![1.0, 0.0])], "ts")
            .await;
        store
            .put_batch("doc-b", vec![entry(0, vec![1.0, 0.0])], "ts")
            .await;

        let results = store.query(&[1.0, 0.0], 10, Some("doc-a")).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].doc_id, "doc-a");
    }

    #[tokio::test]
    async fn delete_removes_only_target_document() {
        let index = Arc::new(InMemoryVectorIndex::new());
        let store = VectorStore::new(index.clone());

        let entries: Vec<VectorEntry> = (0..7).map(|i| entry(i, vec![1.0, 0.0])).collect();
        store.put_batch("doc-a", entries, "ts").await;
        store
            .put_batch("doc-b", vec![entry(0, vec![0.0, 1.0])], "ts")
            .await;

        let deleted = store.delete_by_doc_id("doc-a").await.unwrap();
        assert_eq!(deleted, 7);
        assert_eq!(index.len(), 1);

        let again = store.delete_by_doc_id("doc-a").await.unwrap();
        assert_eq!(again, 0);
    }

    #[test]
    fn similarity_mapping_bounds() {
        assert_eq!(similarity_from_distance(0.0, DistanceMetric::Cosine), 1.0);
        assert_eq!(similarity_from_distance(2.0, DistanceMetric::Cosine), 0.0);
        // Out-of-range distances clamp instead of escaping [0, 1].
        assert_eq!(similarity_from_distance(3.0, DistanceMetric::Cosine), 0.0);
        assert_eq!(
            similarity_from_distance(0.0, DistanceMetric::Euclidean),
            1.0
        );
        assert!((similarity_from_distance(4.0, DistanceMetric::Euclidean) - 0.2).abs() < 1e-6);
    }
}
