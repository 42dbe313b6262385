// src/api/mod.rs
//
// HTTP surface. Authentication is a verified-identity header injected by
// the gateway in front of this service; requests without it are rejected.
// Event webhooks at /events mirror the storage and gateway notifications
// that drive the pipelines.

use actix_cors::Cors;
use actix_web::dev::Server;
use actix_web::{web, App, Error, HttpRequest, HttpResponse, HttpServer};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::insight_cache::InsightCache;
use crate::pipeline::{DocumentProcessor, ExtractOutcome, InsightExtractor};
use crate::services::ObjectStore;
use crate::status::ProcessingStatusTracker;
use crate::ws::WsGateway;

const USER_HEADER: &str = "x-user-id";
const PRESIGN_EXPIRY_SECS: u64 = 3600;

#[derive(Clone)]
pub struct AppState {
    pub objects: Arc<dyn ObjectStore>,
    pub processor: Arc<DocumentProcessor>,
    pub extractor: Arc<InsightExtractor>,
    pub status: Arc<ProcessingStatusTracker>,
    pub cache: Arc<InsightCache>,
    pub gateway: Arc<WsGateway>,
    pub bucket: String,
}

fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Verified user identity from the gateway header, or a 401.
fn require_user(req: &HttpRequest) -> Result<String, HttpResponse> {
    req.headers()
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .ok_or_else(|| {
            HttpResponse::Unauthorized().json(json!({
                "error": "Missing user identity",
            }))
        })
}

fn error_response(err: &PipelineError) -> HttpResponse {
    let body = json!({ "error": err.to_string() });
    match err {
        PipelineError::Validation(_) => HttpResponse::BadRequest().json(body),
        PipelineError::Unauthorized => HttpResponse::Unauthorized().json(body),
        PipelineError::NotFound(_) => HttpResponse::NotFound().json(body),
        _ => HttpResponse::InternalServerError().json(body),
    }
}

pub async fn health_check() -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "doclake",
    })))
}

#[derive(Deserialize)]
pub struct PresignRequest {
    #[serde(rename = "fileName")]
    pub file_name: String,
}

/// Issue an upload URL under the caller's prefix, named "{uuid}_{file}".
pub async fn presigned_url(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<PresignRequest>,
) -> Result<HttpResponse, Error> {
    let request_id = generate_request_id();
    let user_id = match require_user(&req) {
        Ok(user_id) => user_id,
        Err(response) => return Ok(response),
    };

    let file_name = body.file_name.trim();
    if file_name.is_empty() || file_name.contains('/') {
        return Ok(HttpResponse::BadRequest().json(json!({
            "error": "fileName must be a plain file name",
            "requestId": request_id,
        })));
    }

    let doc_id = Uuid::new_v4().to_string();
    let key = format!("{}/{}_{}", user_id, doc_id, file_name);

    match state
        .objects
        .presigned_put_url(&state.bucket, &key, PRESIGN_EXPIRY_SECS)
        .await
    {
        Ok(url) => {
            info!(user_id = %user_id, key = %key, request_id = %request_id, "Issued upload URL");
            Ok(HttpResponse::Ok().json(json!({
                "uploadUrl": url,
                "docId": doc_id,
                "key": key,
                "requestId": request_id,
            })))
        }
        Err(e) => {
            error!(error = %e, request_id = %request_id, "Failed to presign upload");
            Ok(HttpResponse::InternalServerError().json(json!({
                "error": "Could not create upload URL",
                "requestId": request_id,
            })))
        }
    }
}

/// The caller's documents with their processing status.
pub async fn list_documents(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let user_id = match require_user(&req) {
        Ok(user_id) => user_id,
        Err(response) => return Ok(response),
    };

    match state.status.list_for_user(&user_id).await {
        Ok(records) => {
            let count = records.len();
            Ok(HttpResponse::Ok().json(json!({
                "documents": records,
                "count": count,
            })))
        }
        Err(e) => {
            error!(user_id = %user_id, error = %e, "Failed to list documents");
            Ok(HttpResponse::InternalServerError().json(json!({
                "error": "Could not list documents",
            })))
        }
    }
}

pub async fn document_status(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, Error> {
    let user_id = match require_user(&req) {
        Ok(user_id) => user_id,
        Err(response) => return Ok(response),
    };
    let doc_id = path.into_inner();

    match state.status.get(&user_id, &doc_id).await {
        Ok(Some(record)) => Ok(HttpResponse::Ok().json(record)),
        Ok(None) => Ok(HttpResponse::NotFound().json(json!({
            "error": "Document not found",
        }))),
        Err(e) => {
            error!(doc_id = %doc_id, error = %e, "Failed to read status");
            Ok(HttpResponse::InternalServerError().json(json!({
                "error": "Could not read document status",
            })))
        }
    }
}

/// Delete a document: the stored object plus everything derived from it.
pub async fn delete_document(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, Error> {
    let user_id = match require_user(&req) {
        Ok(user_id) => user_id,
        Err(response) => return Ok(response),
    };
    let doc_id = path.into_inner();

    // The object key carries the uuid prefix; find it under the user's
    // prefix so callers only ever delete their own documents.
    let keys = match state.objects.list(&state.bucket, &format!("{}/", user_id)).await {
        Ok(objects) => objects,
        Err(e) => {
            error!(error = %e, "Failed to list objects for delete");
            return Ok(HttpResponse::InternalServerError().json(json!({
                "error": "Could not delete document",
            })));
        }
    };

    for object in keys {
        let matches_doc = object
            .key
            .rsplit('/')
            .next()
            .map(|file| file.starts_with(&format!("{}_", doc_id)))
            .unwrap_or(false);
        if matches_doc {
            if let Err(e) = state.objects.delete(&state.bucket, &object.key).await {
                error!(key = %object.key, error = %e, "Failed to delete object");
            }
        }
    }

    match state.processor.handle_object_removed(&doc_id, &user_id).await {
        Ok((vectors_deleted, cache_invalidated)) => Ok(HttpResponse::Ok().json(json!({
            "message": format!("Deleted document {}", doc_id),
            "docId": doc_id,
            "vectorsDeleted": vectors_deleted,
            "cacheEntriesInvalidated": cache_invalidated,
        }))),
        Err(e) => Ok(error_response(&e)),
    }
}

#[derive(Deserialize)]
pub struct ExtractRequest {
    #[serde(rename = "docId")]
    pub doc_id: String,
    pub prompt: String,
}

pub async fn extract_insights(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<ExtractRequest>,
) -> Result<HttpResponse, Error> {
    let user_id = match require_user(&req) {
        Ok(user_id) => user_id,
        Err(response) => return Ok(response),
    };

    if body.doc_id.trim().is_empty() {
        return Ok(HttpResponse::BadRequest().json(json!({
            "error": "docId must not be empty",
        })));
    }

    info!(user_id = %user_id, doc_id = %body.doc_id, "Insight extraction requested");

    match state.extractor.extract(&body.doc_id, &body.prompt).await {
        Ok(ExtractOutcome::Cached(entry)) => Ok(HttpResponse::Ok().json(json!({
            "docId": body.doc_id,
            "insights": entry.insights,
            "cached": true,
            "chunkCount": entry.chunk_count,
        }))),
        Ok(ExtractOutcome::Generated {
            insights,
            chunk_count,
            elapsed_ms,
        }) => Ok(HttpResponse::Ok().json(json!({
            "docId": body.doc_id,
            "insights": insights,
            "cached": false,
            "chunkCount": chunk_count,
            "elapsedMs": elapsed_ms,
        }))),
        Ok(ExtractOutcome::NoContent) => Ok(HttpResponse::NotFound().json(json!({
            "error": "No content found for document. It may still be processing.",
            "docId": body.doc_id,
        }))),
        Err(e) => Ok(error_response(&e)),
    }
}

/// Previously generated insights for a document, newest first.
pub async fn list_insights(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, Error> {
    if let Err(response) = require_user(&req) {
        return Ok(response);
    }
    let doc_id = path.into_inner();

    match state.cache.list_all(&doc_id).await {
        Ok(entries) => {
            let count = entries.len();
            Ok(HttpResponse::Ok().json(json!({
                "docId": doc_id,
                "insights": entries,
                "count": count,
            })))
        }
        Err(e) => {
            error!(doc_id = %doc_id, error = %e, "Failed to list insights");
            Ok(HttpResponse::InternalServerError().json(json!({
                "error": "Could not list insights",
            })))
        }
    }
}

#[derive(Deserialize)]
pub struct ImageAnalyzeRequest {
    #[serde(rename = "imageBase64")]
    pub image_base64: String,
    #[serde(rename = "mediaType", default = "default_media_type")]
    pub media_type: String,
    #[serde(default = "default_instruction")]
    pub instruction: String,
}

fn default_media_type() -> String {
    "image/png".to_string()
}

fn default_instruction() -> String {
    "Describe this image and extract any readable text.".to_string()
}

pub async fn analyze_image(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<ImageAnalyzeRequest>,
) -> Result<HttpResponse, Error> {
    if let Err(response) = require_user(&req) {
        return Ok(response);
    }

    if body.image_base64.trim().is_empty() {
        return Ok(HttpResponse::BadRequest().json(json!({
            "error": "imageBase64 must not be empty",
        })));
    }

    match state
        .extractor
        .generator
        .analyze_image(&body.image_base64, &body.media_type, &body.instruction)
        .await
    {
        Ok(text) => Ok(HttpResponse::Ok().json(json!({
            "analysis": text,
        }))),
        Err(e) => Ok(error_response(&e)),
    }
}

#[derive(Deserialize)]
pub struct ObjectCreatedEvent {
    pub key: String,
}

/// Storage notification: an object finished uploading. Kicks off ingestion.
pub async fn object_created(
    state: web::Data<AppState>,
    body: web::Json<ObjectCreatedEvent>,
) -> Result<HttpResponse, Error> {
    match state.processor.handle_object_created(&body.key).await {
        Ok(summary) => Ok(HttpResponse::Ok().json(json!({
            "docId": summary.doc_id,
            "totalPages": summary.total_pages,
            "totalChunks": summary.total_chunks,
            "batches": summary.batches,
            "errorCount": summary.error_count,
        }))),
        Err(e) => Ok(error_response(&e)),
    }
}

#[derive(Deserialize)]
pub struct WsEvent {
    #[serde(rename = "routeKey")]
    pub route_key: String,
    #[serde(rename = "connectionId")]
    pub connection_id: String,
    pub token: Option<String>,
}

/// Gateway notification: a connection lifecycle event.
pub async fn websocket_event(
    state: web::Data<AppState>,
    body: web::Json<WsEvent>,
) -> Result<HttpResponse, Error> {
    let response = state
        .gateway
        .handle(&body.route_key, &body.connection_id, body.token.as_deref())
        .await;

    let body = json!({ "message": response.body });
    Ok(match response.status {
        200 => HttpResponse::Ok().json(body),
        401 => HttpResponse::Unauthorized().json(body),
        _ => HttpResponse::InternalServerError().json(body),
    })
}

/// Route table, shared between the server and the test harness.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/documents/presigned-url", web::post().to(presigned_url))
        .route("/documents", web::get().to(list_documents))
        .route("/documents/{docId}/status", web::get().to(document_status))
        .route("/documents/{docId}", web::delete().to(delete_document))
        .route("/insights/extract", web::post().to(extract_insights))
        .route("/insights/{docId}", web::get().to(list_insights))
        .route("/image-insights/analyze", web::post().to(analyze_image))
        .route("/events/object-created", web::post().to(object_created))
        .route("/events/websocket", web::post().to(websocket_event));
}

pub fn start_api_server(config: &AppConfig, state: AppState) -> std::io::Result<Server> {
    let bind_addr = config.bind_addr();
    info!(bind_addr = %bind_addr, "Starting API server");

    let state_data = web::Data::new(state);
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_header()
            .allowed_methods(vec!["GET", "POST", "DELETE"])
            .max_age(3600);

        App::new()
            .app_data(state_data.clone())
            .wrap(cors)
            .configure(configure)
    })
    .bind(&bind_addr)?
    .run();

    Ok(server)
}
