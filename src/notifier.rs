// src/notifier.rs
//
// Pushes processing lifecycle events to a user's live connections. Delivery
// is best effort: a dead connection is logged and skipped, and the batch
// variant reports how many sends landed instead of failing.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::connections::ConnectionRegistry;
use crate::services::{PushChannel, PushError};

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Started {
        doc_id: String,
        total_pages: usize,
    },
    Progress {
        doc_id: String,
        pages_processed: usize,
        total_pages: usize,
        message: String,
    },
    Complete {
        doc_id: String,
        total_chunks: Option<usize>,
    },
    Error {
        doc_id: String,
        code: String,
        message: String,
        recoverable: bool,
    },
}

impl ProgressEvent {
    /// Wire representation pushed to clients.
    pub fn to_message(&self, now: DateTime<Utc>) -> Value {
        let timestamp = now.to_rfc3339();
        match self {
            ProgressEvent::Started { doc_id, total_pages } => json!({
                "status": "processing_started",
                "docId": doc_id,
                "totalPages": total_pages,
                "timestamp": timestamp,
            }),
            ProgressEvent::Progress {
                doc_id,
                pages_processed,
                total_pages,
                message,
            } => json!({
                "status": "progress",
                "docId": doc_id,
                "pagesProcessed": pages_processed,
                "totalPages": total_pages,
                "percentComplete": percent_complete(*pages_processed, *total_pages),
                "message": message,
                "timestamp": timestamp,
            }),
            ProgressEvent::Complete { doc_id, total_chunks } => {
                let mut message = json!({
                    "status": "processing_complete",
                    "docId": doc_id,
                    "timestamp": timestamp,
                });
                if let Some(chunks) = total_chunks {
                    message["totalChunks"] = json!(chunks);
                }
                message
            }
            ProgressEvent::Error {
                doc_id,
                code,
                message,
                recoverable,
            } => json!({
                "status": "error",
                "docId": doc_id,
                "errorCode": code,
                "errorMessage": message,
                "recoverable": recoverable,
                "timestamp": timestamp,
            }),
        }
    }
}

/// Completion fraction rounded to one decimal place.
fn percent_complete(pages_processed: usize, total_pages: usize) -> f64 {
    if total_pages == 0 {
        return 0.0;
    }
    let percent = pages_processed as f64 / total_pages as f64 * 100.0;
    (percent * 10.0).round() / 10.0
}

pub struct ProgressNotifier {
    channel: Arc<dyn PushChannel>,
    registry: Arc<ConnectionRegistry>,
}

impl ProgressNotifier {
    pub fn new(channel: Arc<dyn PushChannel>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { channel, registry }
    }

    /// Send one event to one connection. Returns whether it was delivered;
    /// a gone connection is unregistered as a side effect.
    pub async fn notify(
        &self,
        user_id: &str,
        connection_id: &str,
        event: &ProgressEvent,
    ) -> bool {
        let payload = event.to_message(Utc::now()).to_string();
        match self
            .channel
            .post_to_connection(connection_id, payload.as_bytes())
            .await
        {
            Ok(()) => {
                debug!(user_id, connection_id, "Delivered progress event");
                true
            }
            Err(PushError::Gone) => {
                info!(user_id, connection_id, "Connection gone, unregistering");
                if let Err(e) = self.registry.unregister(user_id, connection_id).await {
                    warn!(user_id, connection_id, error = %e, "Failed to unregister");
                }
                false
            }
            Err(e) => {
                warn!(user_id, connection_id, error = %e, "Failed to push event");
                false
            }
        }
    }

    /// Send one event to every live connection of a user. Never fails;
    /// returns how many deliveries succeeded.
    pub async fn notify_all(&self, user_id: &str, event: &ProgressEvent) -> usize {
        let connection_ids = match self.registry.list(user_id).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(user_id, error = %e, "Could not list connections");
                return 0;
            }
        };

        if connection_ids.is_empty() {
            debug!(user_id, "No live connections for user");
            return 0;
        }

        let mut delivered = 0usize;
        for connection_id in &connection_ids {
            if self.notify(user_id, connection_id, event).await {
                delivered += 1;
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{InMemoryPushChannel, SqliteKvStore};

    fn setup() -> (Arc<InMemoryPushChannel>, Arc<ConnectionRegistry>, ProgressNotifier) {
        let kv = Arc::new(SqliteKvStore::open_in_memory("connections").unwrap());
        let registry = Arc::new(ConnectionRegistry::new(kv, 3, 24));
        let channel = Arc::new(InMemoryPushChannel::new());
        let notifier = ProgressNotifier::new(channel.clone(), registry.clone());
        (channel, registry, notifier)
    }

    #[test]
    fn progress_message_shape() {
        let event = ProgressEvent::Progress {
            doc_id: "doc-1".to_string(),
            pages_processed: 10,
            total_pages: 30,
            message: "Processed pages 1-10".to_string(),
        };
        let message = event.to_message(Utc::now());
        assert_eq!(message["status"], "progress");
        assert_eq!(message["docId"], "doc-1");
        assert_eq!(message["percentComplete"], 33.3);
        assert_eq!(message["message"], "Processed pages 1-10");
    }

    #[test]
    fn percent_complete_handles_zero_pages() {
        assert_eq!(percent_complete(5, 0), 0.0);
        assert_eq!(percent_complete(1, 3), 33.3);
        assert_eq!(percent_complete(3, 3), 100.0);
    }

    #[test]
    fn complete_message_omits_missing_chunk_count() {
        let event = ProgressEvent::Complete {
            doc_id: "doc-1".to_string(),
            total_chunks: None,
        };
        let message = event.to_message(Utc::now());
        assert_eq!(message["status"], "processing_complete");
        assert!(message.get("totalChunks").is_none());

        let event = ProgressEvent::Complete {
            doc_id: "doc-1".to_string(),
            total_chunks: Some(42),
        };
        assert_eq!(event.to_message(Utc::now())["totalChunks"], 42);
    }

    #[tokio::test]
    async fn notify_all_counts_deliveries_and_prunes_gone() {
        let (channel, registry, notifier) = setup();
        registry.register("user-1", "conn-live").await.unwrap();
        registry.register("user-1", "conn-dead").await.unwrap();
        channel.open("conn-live");
        channel.close("conn-dead");

        let event = ProgressEvent::Started {
            doc_id: "doc-1".to_string(),
            total_pages: 5,
        };
        let delivered = notifier.notify_all("user-1", &event).await;
        assert_eq!(delivered, 1);
        assert_eq!(channel.sent("conn-live").len(), 1);

        // The dead connection was unregistered on failure.
        assert_eq!(registry.list("user-1").await.unwrap(), vec!["conn-live"]);
    }

    #[tokio::test]
    async fn notify_all_without_connections_returns_zero() {
        let (_, _, notifier) = setup();
        let event = ProgressEvent::Error {
            doc_id: "doc-1".to_string(),
            code: "EXTRACTION_FAILED".to_string(),
            message: "boom".to_string(),
            recoverable: false,
        };
        assert_eq!(notifier.notify_all("nobody", &event).await, 0);
    }
}
