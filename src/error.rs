// src/error.rs
use thiserror::Error;

use crate::services::{LlmError, StoreError};

/// Errors raised by the embedding client. No retry policy lives at this
/// layer; callers decide whether a failure is fatal or page-local.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("text cannot be empty")]
    EmptyInput,
    #[error("expected {expected} dimensions, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("embedding inference failed: {0}")]
    Inference(String),
}

/// Top-level error taxonomy for the ingest and insight pipelines.
///
/// Validation errors surface as 4xx; dependency errors at page granularity
/// are recorded on the status record and processing continues; anything
/// escaping an orchestrator is converted into a terminal failed status
/// before propagating.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Validation(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("{0}")]
    NotFound(String),
    #[error("dependency call failed: {0}")]
    Dependency(String),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error("model invocation failed: {0}")]
    Llm(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        PipelineError::Storage(err.to_string())
    }
}

impl From<LlmError> for PipelineError {
    fn from(err: LlmError) -> Self {
        PipelineError::Llm(err.to_string())
    }
}
