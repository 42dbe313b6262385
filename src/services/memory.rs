// src/services/memory.rs
//
// In-memory backends: an exact-scan cosine vector index and a recording
// push channel. The index is the bundled local backend (the remote vector
// service implements the same trait in deployment); the push channel backs
// local runs and lets tests assert on delivered frames.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use super::{
    DistanceMetric, MetadataFilter, PushChannel, PushError, StoreError, VectorIndex, VectorItem,
    VectorMatch, VectorPage, VectorQueryOutput,
};

const LIST_PAGE_SIZE: usize = 1000;

#[derive(Default)]
pub struct InMemoryVectorIndex {
    // BTreeMap keeps keys ordered, which makes list pagination a range scan.
    vectors: RwLock<BTreeMap<String, (Vec<f32>, serde_json::Map<String, Value>)>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.vectors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.read().is_empty()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn put_vectors(&self, items: Vec<VectorItem>) -> Result<(), StoreError> {
        let mut vectors = self.vectors.write();
        for item in items {
            vectors.insert(item.key, (item.vector, item.metadata));
        }
        Ok(())
    }

    async fn query_vectors(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<VectorQueryOutput, StoreError> {
        let vectors = self.vectors.read();

        let mut matches: Vec<VectorMatch> = vectors
            .iter()
            .filter(|(_, (_, metadata))| match filter {
                Some(f) => metadata.get(&f.field) == Some(&f.equals),
                None => true,
            })
            .map(|(key, (stored, metadata))| VectorMatch {
                key: key.clone(),
                distance: cosine_distance(vector, stored),
                metadata: metadata.clone(),
            })
            .collect();

        matches.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(top_k);

        debug!(returned = matches.len(), top_k, "In-memory vector query");

        Ok(VectorQueryOutput {
            metric: DistanceMetric::Cosine,
            matches,
        })
    }

    async fn delete_vectors(&self, keys: &[String]) -> Result<(), StoreError> {
        let mut vectors = self.vectors.write();
        for key in keys {
            vectors.remove(key);
        }
        Ok(())
    }

    async fn list_vectors(&self, page_token: Option<&str>) -> Result<VectorPage, StoreError> {
        let vectors = self.vectors.read();

        let keys: Vec<String> = match page_token {
            Some(token) => vectors
                .range(token.to_string()..)
                .skip(1)
                .take(LIST_PAGE_SIZE)
                .map(|(k, _)| k.clone())
                .collect(),
            None => vectors.keys().take(LIST_PAGE_SIZE).cloned().collect(),
        };

        let next_token = if keys.len() == LIST_PAGE_SIZE {
            keys.last().cloned()
        } else {
            None
        };

        Ok(VectorPage { keys, next_token })
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 2.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 2.0;
    }
    1.0 - dot / (mag_a * mag_b)
}

/// Push channel that records frames per connection. Connections can be
/// closed to simulate clients that went away mid-run.
#[derive(Default)]
pub struct InMemoryPushChannel {
    frames: RwLock<HashMap<String, Vec<Vec<u8>>>>,
    closed: RwLock<Vec<String>>,
}

impl InMemoryPushChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, connection_id: &str) {
        self.frames
            .write()
            .entry(connection_id.to_string())
            .or_default();
    }

    pub fn close(&self, connection_id: &str) {
        self.closed.write().push(connection_id.to_string());
    }

    /// Frames delivered to a connection, decoded as JSON.
    pub fn sent(&self, connection_id: &str) -> Vec<Value> {
        self.frames
            .read()
            .get(connection_id)
            .map(|frames| {
                frames
                    .iter()
                    .filter_map(|f| serde_json::from_slice(f).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl PushChannel for InMemoryPushChannel {
    async fn post_to_connection(&self, connection_id: &str, data: &[u8]) -> Result<(), PushError> {
        if self.closed.read().iter().any(|c| c == connection_id) {
            return Err(PushError::Gone);
        }
        self.frames
            .write()
            .entry(connection_id.to_string())
            .or_default()
            .push(data.to_vec());
        Ok(())
    }
}
