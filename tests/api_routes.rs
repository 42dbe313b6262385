// tests/api_routes.rs
//
// HTTP surface tests over the full local wiring: auth enforcement,
// validation, the insight extraction flow and the event webhooks.

mod common;

use actix_web::{test, web, App};
use common::{harness, prose_page, upload_document};
use serde_json::{json, Value};

use doclake::api;

const DOC: &str = "7a9c2f00-1111-4abc-8def-222233334444";

macro_rules! service {
    ($harness:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($harness.state.clone()))
                .configure(api::configure),
        )
        .await
    };
}

#[actix_web::test]
async fn health_endpoint_is_open() {
    let harness = harness(vec![]);
    let app = service!(harness);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert!(resp.status().is_success());
}

#[actix_web::test]
async fn requests_without_identity_are_unauthorized() {
    let harness = harness(vec![]);
    let app = service!(harness);

    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri("/documents").to_request(),
    )
    .await;
    assert_eq!(resp.status(), 401);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/insights/extract")
            .set_json(json!({ "docId": DOC, "prompt": "summarize" }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 401);
}

#[actix_web::test]
async fn extract_validates_input() {
    let harness = harness(vec![]);
    let app = service!(harness);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/insights/extract")
            .insert_header(("x-user-id", "user-1"))
            .set_json(json!({ "docId": "", "prompt": "summarize" }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 400);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/insights/extract")
            .insert_header(("x-user-id", "user-1"))
            .set_json(json!({ "docId": DOC, "prompt": "   " }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn extract_on_unindexed_document_is_not_found_and_not_cached() {
    let harness = harness(vec![]);
    let app = service!(harness);

    let request = || {
        test::TestRequest::post()
            .uri("/insights/extract")
            .insert_header(("x-user-id", "user-1"))
            .set_json(json!({ "docId": DOC, "prompt": "what is this?" }))
            .to_request()
    };

    let resp = test::call_service(&app, request()).await;
    assert_eq!(resp.status(), 404);

    // Still 404 on retry: the miss was not cached.
    let resp = test::call_service(&app, request()).await;
    assert_eq!(resp.status(), 404);
    assert!(harness.state.cache.list_all(DOC).await.unwrap().is_empty());
}

#[actix_web::test]
async fn presigned_url_issues_uuid_prefixed_key() {
    let harness = harness(vec![]);
    let app = service!(harness);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/documents/presigned-url")
            .insert_header(("x-user-id", "user-1"))
            .set_json(json!({ "fileName": "report.pdf" }))
            .to_request(),
    )
    .await;
    assert!(resp.status().is_success());

    let body: Value = test::read_body_json(resp).await;
    let doc_id = body["docId"].as_str().unwrap();
    assert_eq!(doc_id.len(), 36);
    assert_eq!(
        body["key"].as_str().unwrap(),
        format!("user-1/{}_report.pdf", doc_id)
    );
    assert!(body["uploadUrl"].as_str().unwrap().contains("report.pdf"));

    // Path separators in the file name are rejected.
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/documents/presigned-url")
            .insert_header(("x-user-id", "user-1"))
            .set_json(json!({ "fileName": "../escape.pdf" }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn ingest_then_extract_through_the_api() {
    let harness = harness((1..=5).map(prose_page).collect());
    let app = service!(harness);

    let key = upload_document(&harness, "user-1", DOC).await;

    // Storage notification kicks off ingestion.
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/events/object-created")
            .set_json(json!({ "key": key }))
            .to_request(),
    )
    .await;
    assert!(resp.status().is_success());
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["docId"], DOC);
    assert_eq!(body["totalPages"], 5);

    // Status is visible to the owner.
    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri(&format!("/documents/{}/status", DOC))
            .insert_header(("x-user-id", "user-1"))
            .to_request(),
    )
    .await;
    assert!(resp.status().is_success());
    let record: Value = test::read_body_json(resp).await;
    assert_eq!(record["status"], "completed");

    // First extraction generates, second is served from cache.
    let extract = || {
        test::TestRequest::post()
            .uri("/insights/extract")
            .insert_header(("x-user-id", "user-1"))
            .set_json(json!({ "docId": DOC, "prompt": "What are the findings?" }))
            .to_request()
    };

    let resp = test::call_service(&app, extract()).await;
    assert!(resp.status().is_success());
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["cached"], false);
    assert_eq!(body["insights"]["payload"]["answer"], "test answer");

    let resp = test::call_service(&app, extract()).await;
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["cached"], true);

    // The cache listing shows the entry.
    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri(&format!("/insights/{}", DOC))
            .insert_header(("x-user-id", "user-1"))
            .to_request(),
    )
    .await;
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["count"], 1);
}

#[actix_web::test]
async fn delete_document_removes_object_and_derived_data() {
    let harness = harness((1..=3).map(prose_page).collect());
    let app = service!(harness);

    let key = upload_document(&harness, "user-1", DOC).await;
    test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/events/object-created")
            .set_json(json!({ "key": key }))
            .to_request(),
    )
    .await;
    assert!(harness.index.len() > 0);

    let resp = test::call_service(
        &app,
        test::TestRequest::delete()
            .uri(&format!("/documents/{}", DOC))
            .insert_header(("x-user-id", "user-1"))
            .to_request(),
    )
    .await;
    assert!(resp.status().is_success());

    assert_eq!(harness.index.len(), 0);
    assert!(harness
        .state
        .objects
        .get("documents", &key)
        .await
        .is_err());
}

#[actix_web::test]
async fn websocket_event_routes() {
    let harness = harness(vec![]);
    let app = service!(harness);

    // Connect without a token is rejected.
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/events/websocket")
            .set_json(json!({ "routeKey": "$connect", "connectionId": "c1" }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 401);

    // Connect with a decodable token registers the connection.
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    let payload = URL_SAFE_NO_PAD.encode(json!({ "sub": "user-1" }).to_string());
    let token = format!("h.{}.s", payload);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/events/websocket")
            .set_json(json!({ "routeKey": "$connect", "connectionId": "c1", "token": token }))
            .to_request(),
    )
    .await;
    assert!(resp.status().is_success());
    assert_eq!(harness.registry.list("user-1").await.unwrap(), vec!["c1"]);
}
