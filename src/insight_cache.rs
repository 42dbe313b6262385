// src/insight_cache.rs
//
// Caches generated insights per (document, normalized prompt) so repeated
// questions skip the model. Entries live under the document's partition key
// with a timestamp sort key, newest first, and age out by TTL.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::services::{KeyValueStore, KvItem, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub doc_id: String,
    pub prompt_hash: String,
    pub prompt: String,
    pub insights: Value,
    pub model_id: String,
    pub chunk_count: usize,
    pub created_at: String,
}

/// Outcome of a store attempt. Oversized entries and backend failures are
/// skipped rather than surfaced; caching is advisory.
#[derive(Debug, PartialEq, Eq)]
pub enum CacheOutcome {
    Stored,
    Skipped,
}

pub struct InsightCache {
    kv: Arc<dyn KeyValueStore>,
    ttl_hours: i64,
    max_item_bytes: usize,
}

impl InsightCache {
    pub fn new(kv: Arc<dyn KeyValueStore>, ttl_hours: i64, max_item_bytes: usize) -> Self {
        Self {
            kv,
            ttl_hours,
            max_item_bytes,
        }
    }

    /// Normalized prompt digest: lowercase, whitespace collapsed to single
    /// spaces, then SHA-256 hex. "What is X?" and "  what IS x? " hash the
    /// same.
    pub fn hash_prompt(prompt: &str) -> String {
        let normalized = prompt
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let digest = Sha256::digest(normalized.as_bytes());
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Find a live cached entry for this document and prompt, newest first.
    pub async fn check(
        &self,
        doc_id: &str,
        prompt: &str,
    ) -> Result<Option<CacheEntry>, StoreError> {
        let prompt_hash = Self::hash_prompt(prompt);
        let now = Utc::now().timestamp();

        for item in self.kv.query(doc_id).await? {
            if matches!(item.expires_at, Some(deadline) if deadline <= now) {
                continue;
            }
            let entry: CacheEntry = match serde_json::from_value(item.body) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(doc_id, sk = %item.sk, error = %e, "Skipping unreadable cache entry");
                    continue;
                }
            };
            if entry.prompt_hash == prompt_hash {
                info!(doc_id, prompt_hash = %prompt_hash, "Insight cache hit");
                return Ok(Some(entry));
            }
        }

        debug!(doc_id, prompt_hash = %prompt_hash, "Insight cache miss");
        Ok(None)
    }

    /// Store a generated result. Entries over the size ceiling are skipped,
    /// as are backend failures; neither blocks returning the insights.
    pub async fn store(
        &self,
        doc_id: &str,
        prompt: &str,
        insights: &Value,
        model_id: &str,
        chunk_count: usize,
    ) -> CacheOutcome {
        let now = Utc::now();
        let entry = CacheEntry {
            doc_id: doc_id.to_string(),
            prompt_hash: Self::hash_prompt(prompt),
            prompt: prompt.to_string(),
            insights: insights.clone(),
            model_id: model_id.to_string(),
            chunk_count,
            created_at: now.to_rfc3339(),
        };

        let body = json!(entry);
        let size = body.to_string().len();
        if size > self.max_item_bytes {
            warn!(doc_id, size, ceiling = self.max_item_bytes, "Insights too large to cache");
            return CacheOutcome::Skipped;
        }

        let item = KvItem {
            pk: doc_id.to_string(),
            // Zero-padded timestamp so lexicographic descending order is
            // newest first; the hash suffix keeps same-second prompts apart.
            sk: format!("{:010}#{}", now.timestamp(), entry.prompt_hash),
            body,
            expires_at: Some(now.timestamp() + self.ttl_hours * 3600),
        };

        match self.kv.put_item(item).await {
            Ok(()) => {
                info!(doc_id, size, "Cached insights");
                CacheOutcome::Stored
            }
            Err(e) => {
                warn!(doc_id, error = %e, "Failed to cache insights");
                CacheOutcome::Skipped
            }
        }
    }

    /// Every live entry for a document, newest first.
    pub async fn list_all(&self, doc_id: &str) -> Result<Vec<CacheEntry>, StoreError> {
        let now = Utc::now().timestamp();
        let mut entries = Vec::new();
        for item in self.kv.query(doc_id).await? {
            if matches!(item.expires_at, Some(deadline) if deadline <= now) {
                continue;
            }
            if let Ok(entry) = serde_json::from_value::<CacheEntry>(item.body) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Remove every entry for a document, expired ones included. Returns
    /// the number removed.
    pub async fn invalidate(&self, doc_id: &str) -> Result<usize, StoreError> {
        let items = self.kv.query(doc_id).await?;
        let count = items.len();
        for item in items {
            self.kv.delete_item(doc_id, &item.sk).await?;
        }
        if count > 0 {
            info!(doc_id, count, "Invalidated cached insights");
        }
        Ok(count)
    }
}
