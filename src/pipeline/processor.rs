// src/pipeline/processor.rs
//
// Document ingestion. Triggered when an object lands in the upload bucket:
// extract the pages, process them in batches (chunk, embed, index), keep
// the status record current and push progress to the uploader's live
// connections. Page-level problems are recorded and skipped; only a
// failure that stops the whole run marks the document failed.

use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::chunker::TextChunker;
use crate::embedder::EmbeddingClient;
use crate::error::PipelineError;
use crate::extract::{DocumentExtractor, OcrProcessor, PageText};
use crate::insight_cache::InsightCache;
use crate::notifier::{ProgressEvent, ProgressNotifier};
use crate::services::ObjectStore;
use crate::status::ProcessingStatusTracker;
use crate::vector_store::{VectorEntry, VectorStore};

#[derive(Debug, Clone)]
pub struct IngestSummary {
    pub doc_id: String,
    pub total_pages: usize,
    pub total_chunks: usize,
    pub batches: usize,
    pub error_count: usize,
}

pub struct DocumentProcessor {
    pub objects: Arc<dyn ObjectStore>,
    pub extractor: Arc<dyn DocumentExtractor>,
    pub ocr: Arc<OcrProcessor>,
    pub chunker: Arc<TextChunker>,
    pub embedder: Arc<EmbeddingClient>,
    pub vectors: Arc<VectorStore>,
    pub status: Arc<ProcessingStatusTracker>,
    pub cache: Arc<InsightCache>,
    pub notifier: Arc<ProgressNotifier>,
    pub bucket: String,
    pub batch_pages: usize,
}

impl DocumentProcessor {
    /// Ingest the object that just landed at `key`.
    pub async fn handle_object_created(&self, key: &str) -> Result<IngestSummary, PipelineError> {
        let doc_id = doc_id_from_key(key);
        let file_name = file_name_from_key(key);
        let user_id = self.owner_of(key).await?;

        info!(key, doc_id = %doc_id, user_id = %user_id, "Processing uploaded document");

        match self.run(key, &doc_id, &user_id, &file_name).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                error!(doc_id = %doc_id, error = %e, "Document processing failed");
                if let Err(status_err) = self
                    .status
                    .mark_failed(&user_id, &doc_id, &e.to_string())
                    .await
                {
                    warn!(doc_id = %doc_id, error = %status_err, "Could not mark failure");
                }
                self.notifier
                    .notify_all(
                        &user_id,
                        &ProgressEvent::Error {
                            doc_id: doc_id.clone(),
                            code: "PROCESSING_FAILED".to_string(),
                            message: e.to_string(),
                            recoverable: false,
                        },
                    )
                    .await;
                Err(e)
            }
        }
    }

    /// Remove everything derived from a deleted object: vectors, the
    /// status record and cached insights. Returns (deleted vectors,
    /// invalidated cache entries).
    pub async fn handle_object_removed(
        &self,
        key: &str,
        user_id: &str,
    ) -> Result<(usize, usize), PipelineError> {
        let doc_id = doc_id_from_key(key);
        info!(key, doc_id = %doc_id, "Cleaning up removed document");

        let deleted = self.vectors.delete_by_doc_id(&doc_id).await?;
        self.status.delete(user_id, &doc_id).await?;
        let invalidated = self.cache.invalidate(&doc_id).await?;

        info!(doc_id = %doc_id, deleted, invalidated, "Document cleanup finished");
        Ok((deleted, invalidated))
    }

    async fn run(
        &self,
        key: &str,
        doc_id: &str,
        user_id: &str,
        file_name: &str,
    ) -> Result<IngestSummary, PipelineError> {
        let data = self.objects.get(&self.bucket, key).await?;
        let pages = self.extractor.extract_pages(&data).await?;
        let total_pages = pages.len();

        if total_pages == 0 {
            return Err(PipelineError::Validation(
                "document has no pages".to_string(),
            ));
        }

        self.status
            .create(user_id, doc_id, file_name, total_pages)
            .await?;
        self.notifier
            .notify_all(
                user_id,
                &ProgressEvent::Started {
                    doc_id: doc_id.to_string(),
                    total_pages,
                },
            )
            .await;

        let upload_timestamp = Utc::now().to_rfc3339();
        let mut total_chunks = 0usize;
        let mut error_count = 0usize;
        let mut batches = 0usize;

        for batch in pages.chunks(self.batch_pages.max(1)) {
            batches += 1;
            let first = batch[0].page;
            let last = batch[batch.len() - 1].page;
            let page_range = format!("{}-{}", first, last);

            match self
                .process_batch(doc_id, user_id, batch, &page_range, &upload_timestamp)
                .await
            {
                Ok((chunks, errors)) => {
                    total_chunks += chunks;
                    error_count += errors;
                }
                Err(e) => return Err(e),
            }

            self.status
                .update_progress(user_id, doc_id, last, total_chunks)
                .await?;
            self.notifier
                .notify_all(
                    user_id,
                    &ProgressEvent::Progress {
                        doc_id: doc_id.to_string(),
                        pages_processed: last,
                        total_pages,
                        message: format!("Processed pages {}", page_range),
                    },
                )
                .await;
        }

        self.status
            .mark_completed(user_id, doc_id, total_chunks)
            .await?;
        self.notifier
            .notify_all(
                user_id,
                &ProgressEvent::Complete {
                    doc_id: doc_id.to_string(),
                    total_chunks: Some(total_chunks),
                },
            )
            .await;

        info!(
            doc_id = %doc_id,
            total_pages,
            total_chunks,
            batches,
            error_count,
            "Document processing complete"
        );

        Ok(IngestSummary {
            doc_id: doc_id.to_string(),
            total_pages,
            total_chunks,
            batches,
            error_count,
        })
    }

    /// Chunk, embed and index one batch of pages. Returns the number of
    /// chunks stored and the number of page-level errors recorded.
    async fn process_batch(
        &self,
        doc_id: &str,
        user_id: &str,
        pages: &[PageText],
        page_range: &str,
        upload_timestamp: &str,
    ) -> Result<(usize, usize), PipelineError> {
        let mut texts = Vec::new();
        let mut errors = 0usize;

        for page in pages {
            let mut text = page.text.trim().to_string();

            if !page.images.is_empty() {
                let ocr_text = self.ocr.process_images(&page.images).await;
                if !ocr_text.is_empty() {
                    if !text.is_empty() {
                        text.push_str("\n\n");
                    }
                    text.push_str(&ocr_text);
                }
            }

            if text.is_empty() {
                errors += 1;
                self.status
                    .add_error(user_id, doc_id, page.page, "no extractable text")
                    .await?;
                continue;
            }
            texts.push(text);
        }

        if texts.is_empty() {
            warn!(doc_id = %doc_id, page_range, "Batch produced no text");
            return Ok((0, errors));
        }

        let combined = texts.join("\n\n");
        let chunks = self.chunker.chunk(&combined, page_range, doc_id);
        if chunks.is_empty() {
            return Ok((0, errors));
        }

        let mut entries = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            match self.embedder.embed(&chunk.text).await {
                Ok(vector) => entries.push(VectorEntry {
                    vector,
                    text_chunk: chunk.text.clone(),
                    page_range: chunk.page_range.clone(),
                    chunk_index: chunk.chunk_index,
                }),
                Err(e) => {
                    errors += 1;
                    warn!(doc_id = %doc_id, chunk = chunk.chunk_index, error = %e, "Embedding failed, skipping chunk");
                    self.status
                        .add_range_error(
                            user_id,
                            doc_id,
                            &chunk.page_range,
                            &format!("embedding: {}", e),
                        )
                        .await?;
                }
            }
        }

        let expected = entries.len();
        let stored = self
            .vectors
            .put_batch(doc_id, entries, upload_timestamp)
            .await;
        if stored < expected {
            errors += 1;
            self.status
                .add_range_error(
                    user_id,
                    doc_id,
                    page_range,
                    &format!("stored {} of {} vectors", stored, expected),
                )
                .await?;
        }
        Ok((stored, errors))
    }

    async fn owner_of(&self, key: &str) -> Result<String, PipelineError> {
        let metadata = self.objects.head_metadata(&self.bucket, key).await?;
        metadata
            .get("user-id")
            .cloned()
            .ok_or_else(|| PipelineError::Validation("object has no user-id metadata".to_string()))
    }
}

/// Document id derived from the object key. Uploads are named
/// "{uuid}_{filename}"; keys without that prefix fall back to the file
/// name without its extension.
pub fn doc_id_from_key(key: &str) -> String {
    let file = key.rsplit('/').next().unwrap_or(key);
    if let Some((prefix, _)) = file.split_once('_') {
        if prefix.len() == 36 && prefix.matches('-').count() == 4 {
            return prefix.to_string();
        }
    }
    file.rsplit_once('.')
        .map(|(stem, _)| stem.to_string())
        .unwrap_or_else(|| file.to_string())
}

fn file_name_from_key(key: &str) -> String {
    let file = key.rsplit('/').next().unwrap_or(key);
    if let Some((prefix, rest)) = file.split_once('_') {
        if prefix.len() == 36 && prefix.matches('-').count() == 4 {
            return rest.to_string();
        }
    }
    file.to_string()
}
