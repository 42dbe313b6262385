// tests/common/mod.rs
//
// Shared harness: a scripted model endpoint and a full service wiring over
// the bundled local backends, so the pipelines run end to end without any
// network dependency.

// Not every test binary uses every helper.
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

use doclake::api::AppState;
use doclake::extract::{DocumentExtractor, PageText};
use doclake::error::PipelineError;
use doclake::pipeline::{DocumentProcessor, InsightExtractor};
use doclake::services::{
    FsObjectStore, InMemoryPushChannel, InMemoryVectorIndex, LlmClient, LlmError, SqliteKvStore,
};
use doclake::ws::WsGateway;
use doclake::{
    ConnectionRegistry, EmbeddingClient, InsightCache, InsightGenerator, ProcessingStatusTracker,
    ProgressNotifier, TextChunker, VectorStore,
};

pub const DIMENSIONS: usize = 8;

/// Stands in for the model endpoint. Embedding requests get a vector
/// derived from the input text so different texts land in different places;
/// vision requests get fixed OCR text; everything else gets a canned JSON
/// insight.
pub struct ScriptedLlm;

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn invoke(&self, model_id: &str, request: Value) -> Result<Value, LlmError> {
        if model_id.contains("embed") {
            let input = request["inputText"].as_str().unwrap_or_default();
            return Ok(json!({ "embedding": embedding_for(input) }));
        }

        let is_vision = request["messages"][0]["content"][0]["type"] == json!("image");
        if is_vision {
            return Ok(json!({
                "content": [{ "type": "text", "text": "scanned figure caption" }]
            }));
        }

        Ok(json!({
            "content": [{
                "type": "text",
                "text": "{\"summary\": \"test summary\", \"answer\": \"test answer\", \"confidence\": 0.9}"
            }]
        }))
    }
}

/// Deterministic unit-norm vector from the text's bytes.
pub fn embedding_for(text: &str) -> Vec<f64> {
    let mut raw: Vec<f64> = (0..DIMENSIONS)
        .map(|i| {
            let byte = text.as_bytes().get(i * 7 % text.len().max(1)).copied().unwrap_or(1);
            (byte as f64 + i as f64) / 255.0
        })
        .collect();
    let norm: f64 = raw.iter().map(|v| v * v).sum::<f64>().sqrt().max(1e-9);
    for v in &mut raw {
        *v /= norm;
    }
    raw
}

/// Replays a fixed page list regardless of the document bytes.
pub struct ScriptedExtractor {
    pub pages: Vec<PageText>,
}

#[async_trait]
impl DocumentExtractor for ScriptedExtractor {
    async fn extract_pages(&self, _data: &[u8]) -> Result<Vec<PageText>, PipelineError> {
        Ok(self.pages.clone())
    }
}

/// A page of readable prose, long enough to produce several chunks.
pub fn prose_page(page: usize) -> PageText {
    let text = format!(
        "Page {} of the quarterly report. Revenue grew steadily across all \
         regions. Operating costs were held flat while headcount expanded. \
         The board approved the new product line after reviewing the market \
         analysis prepared by the strategy team. ",
        page
    )
    .repeat(3);
    PageText {
        page,
        text,
        images: Vec::new(),
    }
}

pub struct Harness {
    pub state: AppState,
    pub channel: Arc<InMemoryPushChannel>,
    pub registry: Arc<ConnectionRegistry>,
    pub index: Arc<InMemoryVectorIndex>,
    // Held so the object store's directory outlives the test.
    _dir: TempDir,
}

/// Wire the whole service over local backends with a scripted extractor.
pub fn harness(pages: Vec<PageText>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlm);

    let objects: Arc<dyn doclake::services::ObjectStore> =
        Arc::new(FsObjectStore::new(dir.path()).unwrap());
    let index = Arc::new(InMemoryVectorIndex::new());
    let vectors = Arc::new(VectorStore::new(index.clone()));
    let status = Arc::new(ProcessingStatusTracker::new(
        Arc::new(SqliteKvStore::open_in_memory("processing_status").unwrap()),
        7,
    ));
    let cache = Arc::new(InsightCache::new(
        Arc::new(SqliteKvStore::open_in_memory("insight_cache").unwrap()),
        24,
        380 * 1024,
    ));
    let registry = Arc::new(ConnectionRegistry::new(
        Arc::new(SqliteKvStore::open_in_memory("connections").unwrap()),
        3,
        24,
    ));
    let channel = Arc::new(InMemoryPushChannel::new());
    let notifier = Arc::new(ProgressNotifier::new(channel.clone(), registry.clone()));

    let embedder = Arc::new(EmbeddingClient::new(
        llm.clone(),
        "test-embed",
        DIMENSIONS,
        8192,
        256,
    ));
    let generator = Arc::new(InsightGenerator::new(
        llm.clone(),
        "anthropic.claude-3-sonnet",
        4096,
    ));

    let processor = Arc::new(DocumentProcessor {
        objects: objects.clone(),
        extractor: Arc::new(ScriptedExtractor { pages }),
        ocr: Arc::new(doclake::extract::OcrProcessor::new(generator.clone())),
        chunker: Arc::new(TextChunker::new(400, 40)),
        embedder: embedder.clone(),
        vectors: vectors.clone(),
        status: status.clone(),
        cache: cache.clone(),
        notifier,
        bucket: "documents".to_string(),
        batch_pages: 10,
    });

    let extractor = Arc::new(InsightExtractor {
        cache: cache.clone(),
        embedder,
        vectors,
        generator,
        top_k: 5,
    });

    let state = AppState {
        objects,
        processor,
        extractor,
        status,
        cache,
        gateway: Arc::new(WsGateway::new(registry.clone())),
        bucket: "documents".to_string(),
    };

    Harness {
        state,
        channel,
        registry,
        index,
        _dir: dir,
    }
}

/// Upload a document object with owner metadata, returning its key.
pub async fn upload_document(harness: &Harness, user_id: &str, doc_id: &str) -> String {
    let key = format!("{}/{}_report.pdf", user_id, doc_id);
    let mut metadata = std::collections::HashMap::new();
    metadata.insert("user-id".to_string(), user_id.to_string());
    harness
        .state
        .objects
        .put("documents", &key, b"%PDF-1.4 test bytes", &metadata)
        .await
        .unwrap();
    key
}
