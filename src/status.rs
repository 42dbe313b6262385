// src/status.rs
//
// Per-document processing status records. One record per (userId, docId),
// written through the key-value store with a rolling TTL so abandoned runs
// age out on their own.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::services::{KeyValueStore, KvItem, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingStatus {
    #[serde(rename = "in-progress")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStatusRecord {
    pub doc_id: String,
    pub user_id: String,
    pub filename: String,
    pub status: ProcessingStatus,
    pub total_pages: usize,
    pub current_page: usize,
    pub total_chunks: usize,
    /// "Page {n}: {message}" lines, append-only.
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub error_count: usize,
    pub start_time: String,
    pub last_updated: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

pub struct ProcessingStatusTracker {
    kv: Arc<dyn KeyValueStore>,
    ttl_days: i64,
}

impl ProcessingStatusTracker {
    pub fn new(kv: Arc<dyn KeyValueStore>, ttl_days: i64) -> Self {
        Self { kv, ttl_days }
    }

    /// Create a fresh in-progress record, replacing any earlier run for the
    /// same document.
    pub async fn create(
        &self,
        user_id: &str,
        doc_id: &str,
        filename: &str,
        total_pages: usize,
    ) -> Result<ProcessingStatusRecord, StoreError> {
        let now = Utc::now().to_rfc3339();
        let record = ProcessingStatusRecord {
            doc_id: doc_id.to_string(),
            user_id: user_id.to_string(),
            filename: filename.to_string(),
            status: ProcessingStatus::InProgress,
            total_pages,
            current_page: 0,
            total_chunks: 0,
            errors: Vec::new(),
            error_count: 0,
            start_time: now.clone(),
            last_updated: now,
            completed_at: None,
            failed_at: None,
            error_message: None,
        };
        self.write(&record).await?;
        info!(user_id, doc_id, total_pages, "Created processing status");
        Ok(record)
    }

    pub async fn update_progress(
        &self,
        user_id: &str,
        doc_id: &str,
        current_page: usize,
        total_chunks: usize,
    ) -> Result<(), StoreError> {
        self.mutate(user_id, doc_id, |record| {
            record.current_page = current_page;
            record.total_chunks = total_chunks;
        })
        .await
    }

    /// Record a page-level error without changing the run's status. Page
    /// errors are non-fatal; the run continues.
    pub async fn add_error(
        &self,
        user_id: &str,
        doc_id: &str,
        page: usize,
        message: &str,
    ) -> Result<(), StoreError> {
        warn!(user_id, doc_id, page, message, "Recording page error");
        self.mutate(user_id, doc_id, |record| {
            record.errors.push(format!("Page {}: {}", page, message));
            record.error_count += 1;
        })
        .await
    }

    /// Record an error that spans a page range, for failures tied to a
    /// batch rather than one page. Non-fatal, like `add_error`.
    pub async fn add_range_error(
        &self,
        user_id: &str,
        doc_id: &str,
        page_range: &str,
        message: &str,
    ) -> Result<(), StoreError> {
        warn!(user_id, doc_id, page_range, message, "Recording page range error");
        self.mutate(user_id, doc_id, |record| {
            record.errors.push(format!("Pages {}: {}", page_range, message));
            record.error_count += 1;
        })
        .await
    }

    pub async fn mark_completed(
        &self,
        user_id: &str,
        doc_id: &str,
        total_chunks: usize,
    ) -> Result<(), StoreError> {
        self.mutate(user_id, doc_id, |record| {
            record.status = ProcessingStatus::Completed;
            record.total_chunks = total_chunks;
            record.current_page = record.total_pages;
            record.completed_at = Some(Utc::now().to_rfc3339());
        })
        .await
    }

    pub async fn mark_failed(
        &self,
        user_id: &str,
        doc_id: &str,
        reason: &str,
    ) -> Result<(), StoreError> {
        self.mutate(user_id, doc_id, |record| {
            record.status = ProcessingStatus::Failed;
            record.failed_at = Some(Utc::now().to_rfc3339());
            record.error_message = Some(reason.to_string());
        })
        .await
    }

    pub async fn get(
        &self,
        user_id: &str,
        doc_id: &str,
    ) -> Result<Option<ProcessingStatusRecord>, StoreError> {
        let item = self.kv.get_item(user_id, doc_id).await?;
        match item {
            Some(item) if !is_expired(&item) => {
                Ok(Some(serde_json::from_value(item.body)?))
            }
            _ => Ok(None),
        }
    }

    /// All live status records for a user, most recently started first.
    pub async fn list_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<ProcessingStatusRecord>, StoreError> {
        let items = self.kv.query(user_id).await?;
        let mut records: Vec<ProcessingStatusRecord> = Vec::with_capacity(items.len());
        for item in items {
            if is_expired(&item) {
                continue;
            }
            records.push(serde_json::from_value(item.body)?);
        }
        records.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(records)
    }

    pub async fn delete(&self, user_id: &str, doc_id: &str) -> Result<(), StoreError> {
        self.kv.delete_item(user_id, doc_id).await
    }

    async fn mutate<F>(&self, user_id: &str, doc_id: &str, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut ProcessingStatusRecord),
    {
        let Some(mut record) = self.get(user_id, doc_id).await? else {
            warn!(user_id, doc_id, "Status update for unknown document");
            return Ok(());
        };
        apply(&mut record);
        record.last_updated = Utc::now().to_rfc3339();
        self.write(&record).await
    }

    async fn write(&self, record: &ProcessingStatusRecord) -> Result<(), StoreError> {
        let expires_at = Utc::now().timestamp() + self.ttl_days * 24 * 3600;
        self.kv
            .put_item(KvItem {
                pk: record.user_id.clone(),
                sk: record.doc_id.clone(),
                body: json!(record),
                expires_at: Some(expires_at),
            })
            .await
    }
}

fn is_expired(item: &KvItem) -> bool {
    match item.expires_at {
        Some(deadline) => deadline <= Utc::now().timestamp(),
        None => false,
    }
}
