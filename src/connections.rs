// src/connections.rs
//
// Registry of live push connections per user. One record per user under a
// fixed partition key, holding the newest connection ids first. Identity
// comes from the token's payload claims; signature verification happens at
// the gateway in front of this service, so the payload is decoded as-is.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::services::{KeyValueStore, KvItem, StoreError};

const CONNECTIONS_PK: &str = "websocket_connections";

pub struct ConnectionRegistry {
    kv: Arc<dyn KeyValueStore>,
    max_connections: usize,
    ttl_hours: i64,
}

impl ConnectionRegistry {
    pub fn new(kv: Arc<dyn KeyValueStore>, max_connections: usize, ttl_hours: i64) -> Self {
        Self {
            kv,
            max_connections,
            ttl_hours,
        }
    }

    /// Record a connection for a user. The id moves to the front if already
    /// known, the list is capped at the configured maximum (oldest dropped),
    /// and the record's TTL is refreshed.
    pub async fn register(&self, user_id: &str, connection_id: &str) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut ids = self.stored_ids(user_id).await?;

        ids.retain(|id| id != connection_id);
        ids.insert(0, connection_id.to_string());
        ids.truncate(self.max_connections);
        let count = ids.len();

        let body = json!({
            "connectionIds": ids,
            "connectedAt": now.to_rfc3339(),
            "lastUpdated": now.to_rfc3339(),
        });

        self.kv
            .put_item(KvItem {
                pk: CONNECTIONS_PK.to_string(),
                sk: user_id.to_string(),
                body,
                expires_at: Some(now.timestamp() + self.ttl_hours * 3600),
            })
            .await?;

        info!(user_id, connection_id, count, "Registered connection");
        Ok(())
    }

    /// Live connection ids for a user, most recent first. An expired record
    /// reads as no connections.
    pub async fn list(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let item = self.kv.get_item(CONNECTIONS_PK, user_id).await?;
        let Some(item) = item else {
            return Ok(Vec::new());
        };
        if let Some(deadline) = item.expires_at {
            if deadline <= Utc::now().timestamp() {
                debug!(user_id, "Connection record expired");
                return Ok(Vec::new());
            }
        }
        Ok(ids_from_body(&item.body))
    }

    /// Drop one connection id. Deletes the whole record when it was the
    /// last one.
    pub async fn unregister(&self, user_id: &str, connection_id: &str) -> Result<(), StoreError> {
        let Some(item) = self.kv.get_item(CONNECTIONS_PK, user_id).await? else {
            return Ok(());
        };

        let mut ids = ids_from_body(&item.body);
        ids.retain(|id| id != connection_id);

        if ids.is_empty() {
            self.kv.delete_item(CONNECTIONS_PK, user_id).await?;
            info!(user_id, "Removed last connection, deleted record");
            return Ok(());
        }

        let mut body = item.body;
        body["connectionIds"] = json!(ids);
        body["lastUpdated"] = json!(Utc::now().to_rfc3339());

        self.kv
            .put_item(KvItem {
                pk: CONNECTIONS_PK.to_string(),
                sk: user_id.to_string(),
                body,
                expires_at: item.expires_at,
            })
            .await
    }

    async fn stored_ids(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .kv
            .get_item(CONNECTIONS_PK, user_id)
            .await?
            .map(|item| ids_from_body(&item.body))
            .unwrap_or_default())
    }
}

fn ids_from_body(body: &Value) -> Vec<String> {
    body.get("connectionIds")
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Extract the user identity from a bearer token's payload. Checks the
/// usual subject claims in order. Returns None on any malformed token
/// rather than erroring; callers treat that as unauthenticated.
pub fn decode_identity(token: &str) -> Option<String> {
    let payload_part = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload_part.as_bytes()).ok()?;
    let claims: Value = serde_json::from_slice(&decoded).ok()?;

    for claim in ["sub", "cognito:username", "username"] {
        if let Some(user_id) = claims.get(claim).and_then(Value::as_str) {
            if !user_id.is_empty() {
                return Some(user_id.to_string());
            }
        }
    }
    warn!("Token payload carries no subject claim");
    None
}
