// src/main.rs
//
// Wires the bundled local backends (filesystem objects, sqlite key-value
// tables, in-memory vector index, HTTP model endpoint) into the pipelines
// and serves the API.

use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use doclake::api::{start_api_server, AppState};
use doclake::config::AppConfig;
use doclake::extract::{OcrProcessor, PdfTextExtractor};
use doclake::pipeline::{DocumentProcessor, InsightExtractor};
use doclake::services::{
    FsObjectStore, HttpLlmClient, InMemoryPushChannel, InMemoryVectorIndex, SqliteKvStore,
};
use doclake::ws::WsGateway;
use doclake::{
    ConnectionRegistry, EmbeddingClient, InsightCache, InsightGenerator, ProcessingStatusTracker,
    ProgressNotifier, TextChunker, VectorStore,
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();
    info!(?config, "Loaded configuration");

    std::fs::create_dir_all(&config.data_dir)?;

    let objects: Arc<dyn doclake::services::ObjectStore> =
        Arc::new(FsObjectStore::new(config.data_dir.join("objects")).map_err(to_io)?);
    let status_kv = Arc::new(
        SqliteKvStore::open(config.data_dir.join("status.db"), "processing_status")
            .map_err(to_io)?,
    );
    let cache_kv = Arc::new(
        SqliteKvStore::open(config.data_dir.join("cache.db"), "insight_cache").map_err(to_io)?,
    );
    let connections_kv = Arc::new(
        SqliteKvStore::open(config.data_dir.join("connections.db"), "connections")
            .map_err(to_io)?,
    );

    let llm: Arc<dyn doclake::services::LlmClient> = Arc::new(
        HttpLlmClient::new(&config.llm_endpoint, 120)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?,
    );

    let vectors = Arc::new(VectorStore::new(Arc::new(InMemoryVectorIndex::new())));
    let status = Arc::new(ProcessingStatusTracker::new(
        status_kv,
        config.status_ttl_days,
    ));
    let cache = Arc::new(InsightCache::new(
        cache_kv,
        config.cache_ttl_hours,
        config.cache_max_item_bytes,
    ));
    let registry = Arc::new(ConnectionRegistry::new(
        connections_kv,
        config.max_connections,
        config.connection_ttl_hours,
    ));
    let notifier = Arc::new(ProgressNotifier::new(
        Arc::new(InMemoryPushChannel::new()),
        registry.clone(),
    ));

    let embedder = Arc::new(EmbeddingClient::new(
        llm.clone(),
        &config.embed_model_id,
        config.embedding_dimensions,
        config.max_input_tokens,
        config.embedding_cache_size,
    ));
    let generator = Arc::new(InsightGenerator::new(
        llm.clone(),
        &config.insight_model_id,
        config.max_tokens,
    ));
    let ocr_generator = Arc::new(InsightGenerator::new(
        llm,
        &config.ocr_model_id,
        config.max_tokens,
    ));

    let processor = Arc::new(DocumentProcessor {
        objects: objects.clone(),
        extractor: Arc::new(PdfTextExtractor::new()),
        ocr: Arc::new(OcrProcessor::new(ocr_generator)),
        chunker: Arc::new(TextChunker::new(config.chunk_size, config.chunk_overlap)),
        embedder: embedder.clone(),
        vectors: vectors.clone(),
        status: status.clone(),
        cache: cache.clone(),
        notifier,
        bucket: config.upload_bucket.clone(),
        batch_pages: config.page_batch_size,
    });

    let extractor = Arc::new(InsightExtractor {
        cache: cache.clone(),
        embedder,
        vectors,
        generator,
        top_k: config.top_k_results,
    });

    let state = AppState {
        objects,
        processor,
        extractor,
        status,
        cache,
        gateway: Arc::new(WsGateway::new(registry)),
        bucket: config.upload_bucket.clone(),
    };

    start_api_server(&config, state)?.await
}

fn to_io(err: doclake::services::StoreError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, err.to_string())
}
