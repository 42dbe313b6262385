// src/pipeline/mod.rs
//
// The two pipelines the service runs: document ingestion (extract, chunk,
// embed, index) and insight extraction (cache, retrieve, generate).

pub mod extractor;
pub mod processor;

pub use extractor::{ExtractOutcome, InsightExtractor};
pub use processor::{DocumentProcessor, IngestSummary};
