// src/config.rs
use std::env;
use std::path::PathBuf;

/// Runtime configuration, loaded once at startup and passed into the
/// service constructors. Every knob carries the reference default so the
/// binary starts with nothing but a data directory.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub upload_bucket: String,

    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub page_batch_size: usize,

    pub embed_model_id: String,
    pub embedding_dimensions: usize,
    pub max_input_tokens: usize,
    pub embedding_cache_size: usize,

    pub insight_model_id: String,
    pub ocr_model_id: String,
    pub max_tokens: usize,
    pub top_k_results: usize,

    pub llm_endpoint: String,

    pub status_ttl_days: i64,
    pub connection_ttl_hours: i64,
    pub max_connections: usize,
    pub cache_ttl_hours: i64,
    pub cache_max_item_bytes: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            host: env_or("DOCLAKE_HOST", "127.0.0.1"),
            port: env_parse("DOCLAKE_PORT", 3020),
            data_dir: PathBuf::from(env_or("DOCLAKE_DATA_DIR", "./doclake-data")),
            upload_bucket: env_or("UPLOAD_BUCKET", "documents"),

            chunk_size: env_parse("CHUNK_SIZE", 2048),
            chunk_overlap: env_parse("CHUNK_OVERLAP", 204),
            page_batch_size: env_parse("PAGE_BATCH_SIZE", 10),

            embed_model_id: env_or("EMBED_MODEL_ID", "amazon.titan-embed-text-v2:0"),
            embedding_dimensions: env_parse("EMBEDDING_DIMENSIONS", 1024),
            max_input_tokens: env_parse("MAX_INPUT_TOKENS", 8192),
            embedding_cache_size: env_parse("EMBEDDING_CACHE_SIZE", 10_000),

            insight_model_id: env_or(
                "INSIGHT_MODEL_ID",
                "anthropic.claude-3-sonnet-20240229-v1:0",
            ),
            ocr_model_id: env_or("OCR_MODEL_ID", "anthropic.claude-3-sonnet-20240229-v1:0"),
            max_tokens: env_parse("MAX_TOKENS", 8192),
            top_k_results: env_parse("TOP_K_RESULTS", 5),

            llm_endpoint: env_or("LLM_ENDPOINT", "http://127.0.0.1:8601/invoke"),

            status_ttl_days: env_parse("STATUS_TTL_DAYS", 7),
            connection_ttl_hours: env_parse("CONNECTION_TTL_HOURS", 24),
            max_connections: env_parse("MAX_CONNECTIONS_PER_USER", 3),
            cache_ttl_hours: env_parse("CACHE_TTL_HOURS", 24),
            cache_max_item_bytes: env_parse("CACHE_MAX_ITEM_BYTES", 380 * 1024),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
