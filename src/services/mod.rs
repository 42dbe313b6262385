// src/services/mod.rs
//
// Traits for the external collaborators the pipelines are built on:
// object storage, a vector index, a TTL key-value store, LLM inference and
// a push-channel transport. The concrete cloud services sit behind these
// seams; the bundled backends (filesystem, sqlite, in-memory, HTTP) are
// enough to run the whole service locally and to substitute fakes in tests.

pub mod fs_store;
pub mod http_llm;
pub mod memory;
pub mod sqlite_kv;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use fs_store::FsObjectStore;
pub use http_llm::HttpLlmClient;
pub use memory::{InMemoryPushChannel, InMemoryVectorIndex};
pub use sqlite_kv::SqliteKvStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("bad response: {0}")]
    BadResponse(String),
}

#[derive(Debug, Error)]
pub enum PushError {
    /// The connection is closed on the remote end. Routine; callers drop
    /// the channel and move on.
    #[error("connection is gone")]
    Gone,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Listing entry returned by [`ObjectStore::list`].
#[derive(Debug, Clone, Serialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub modified: i64,
}

/// Blob storage with per-object string metadata.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError>;
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
        metadata: &HashMap<String, String>,
    ) -> Result<(), StoreError>;
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError>;
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>, StoreError>;
    async fn head_metadata(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<HashMap<String, String>, StoreError>;
    /// Upload URL handed to clients so the service never proxies file bytes.
    async fn presigned_put_url(
        &self,
        bucket: &str,
        key: &str,
        expires_secs: u64,
    ) -> Result<String, StoreError>;
}

/// Distance metric reported by a vector index alongside query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    Cosine,
    Euclidean,
}

#[derive(Debug, Clone)]
pub struct VectorItem {
    pub key: String,
    pub vector: Vec<f32>,
    pub metadata: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub key: String,
    pub distance: f32,
    pub metadata: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct VectorQueryOutput {
    pub metric: DistanceMetric,
    pub matches: Vec<VectorMatch>,
}

#[derive(Debug, Clone)]
pub struct VectorPage {
    pub keys: Vec<String>,
    pub next_token: Option<String>,
}

/// Exact-match metadata filter applied server-side during a query.
#[derive(Debug, Clone)]
pub struct MetadataFilter {
    pub field: String,
    pub equals: Value,
}

/// Nearest-neighbour index over embedding vectors with attached metadata.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn put_vectors(&self, items: Vec<VectorItem>) -> Result<(), StoreError>;
    async fn query_vectors(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<VectorQueryOutput, StoreError>;
    async fn delete_vectors(&self, keys: &[String]) -> Result<(), StoreError>;
    async fn list_vectors(&self, page_token: Option<&str>) -> Result<VectorPage, StoreError>;
}

/// One row in the key-value store. `expires_at` is plain data here: reads
/// return expired rows and each component applies its own TTL filter, the
/// same way a lazily-expiring table behaves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvItem {
    pub pk: String,
    pub sk: String,
    pub body: Value,
    pub expires_at: Option<i64>,
}

/// Composite-keyed store with per-key atomic writes.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_item(&self, pk: &str, sk: &str) -> Result<Option<KvItem>, StoreError>;
    async fn put_item(&self, item: KvItem) -> Result<(), StoreError>;
    async fn delete_item(&self, pk: &str, sk: &str) -> Result<(), StoreError>;
    /// All items under a partition key, sort-key descending.
    async fn query(&self, pk: &str) -> Result<Vec<KvItem>, StoreError>;
}

/// Model inference for embedding, generation and vision models. The
/// request/response shape is model-family specific; callers build it.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn invoke(&self, model_id: &str, request: Value) -> Result<Value, LlmError>;
}

/// Push-to-connection messaging for live progress updates.
#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn post_to_connection(&self, connection_id: &str, data: &[u8]) -> Result<(), PushError>;
}
