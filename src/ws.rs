// src/ws.rs
//
// Route handling for the push gateway's lifecycle events. Connect must
// carry a token that decodes to a user; disconnect is logged and left to
// the registry's TTL, since the gateway does not say whose connection
// closed.

use std::sync::Arc;
use tracing::{info, warn};

use crate::connections::{decode_identity, ConnectionRegistry};

#[derive(Debug, PartialEq, Eq)]
pub struct WsResponse {
    pub status: u16,
    pub body: String,
}

impl WsResponse {
    fn ok(body: &str) -> Self {
        Self {
            status: 200,
            body: body.to_string(),
        }
    }

    fn unauthorized(body: &str) -> Self {
        Self {
            status: 401,
            body: body.to_string(),
        }
    }
}

pub struct WsGateway {
    registry: Arc<ConnectionRegistry>,
}

impl WsGateway {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub async fn handle(
        &self,
        route_key: &str,
        connection_id: &str,
        token: Option<&str>,
    ) -> WsResponse {
        match route_key {
            "$connect" => self.connect(connection_id, token).await,
            "$disconnect" => {
                // No identity on disconnect; stale ids age out via TTL and
                // are pruned when a push to them fails.
                info!(connection_id, "Connection closed");
                WsResponse::ok("Disconnected")
            }
            other => {
                info!(connection_id, route = other, "Ignoring message route");
                WsResponse::ok("OK")
            }
        }
    }

    async fn connect(&self, connection_id: &str, token: Option<&str>) -> WsResponse {
        let Some(token) = token else {
            warn!(connection_id, "Connect without token");
            return WsResponse::unauthorized("Missing authorization token");
        };

        let Some(user_id) = decode_identity(token) else {
            warn!(connection_id, "Connect with undecodable token");
            return WsResponse::unauthorized("Invalid authorization token");
        };

        match self.registry.register(&user_id, connection_id).await {
            Ok(()) => {
                info!(user_id, connection_id, "Connection registered");
                WsResponse::ok("Connected")
            }
            Err(e) => {
                warn!(user_id, connection_id, error = %e, "Failed to register");
                WsResponse {
                    status: 500,
                    body: "Failed to register connection".to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::SqliteKvStore;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use serde_json::json;

    fn gateway() -> (Arc<ConnectionRegistry>, WsGateway) {
        let kv = Arc::new(SqliteKvStore::open_in_memory("connections").unwrap());
        let registry = Arc::new(ConnectionRegistry::new(kv, 3, 24));
        (registry.clone(), WsGateway::new(registry))
    }

    fn token(sub: &str) -> String {
        let payload = URL_SAFE_NO_PAD.encode(json!({ "sub": sub }).to_string());
        format!("header.{}.sig", payload)
    }

    #[tokio::test]
    async fn connect_registers_the_connection() {
        let (registry, gateway) = gateway();
        let response = gateway
            .handle("$connect", "conn-1", Some(&token("user-1")))
            .await;
        assert_eq!(response.status, 200);
        assert_eq!(registry.list("user-1").await.unwrap(), vec!["conn-1"]);
    }

    #[tokio::test]
    async fn connect_without_token_is_unauthorized() {
        let (_, gateway) = gateway();
        assert_eq!(gateway.handle("$connect", "conn-1", None).await.status, 401);
        assert_eq!(
            gateway
                .handle("$connect", "conn-1", Some("garbage"))
                .await
                .status,
            401
        );
    }

    #[tokio::test]
    async fn disconnect_and_default_routes_are_accepted() {
        let (_, gateway) = gateway();
        assert_eq!(
            gateway.handle("$disconnect", "conn-1", None).await.status,
            200
        );
        assert_eq!(
            gateway.handle("$default", "conn-1", None).await.status,
            200
        );
    }
}
