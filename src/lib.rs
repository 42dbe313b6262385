pub mod config;
pub mod error;
pub mod services;
pub mod chunker;
pub mod embedder;
pub mod vector_store;
pub mod status;
pub mod connections;
pub mod notifier;
pub mod insight_cache;
pub mod generator;
pub mod extract;
pub mod ws;
pub mod pipeline;
pub mod api;

pub use chunker::TextChunker;
pub use embedder::EmbeddingClient;
pub use vector_store::VectorStore;
pub use status::ProcessingStatusTracker;
pub use connections::ConnectionRegistry;
pub use notifier::ProgressNotifier;
pub use insight_cache::InsightCache;
pub use generator::InsightGenerator;
