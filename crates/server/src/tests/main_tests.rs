use super::*;
use axum::{
    body::{self, Body},
    http::{header, Request},
    response::Response,
};
use serde_json::{json, Value};
use tower::ServiceExt;

async fn test_app_with_limit(max_body_bytes: usize) -> Router {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    build_router(Arc::new(AppState {
        api: ApiContext::new(storage),
        http: HttpSettings {
            cors_allow_origin: "*".to_string(),
            max_body_bytes,
        },
    }))
}

async fn test_app() -> Router {
    test_app_with_limit(config::DEFAULT_MAX_BODY_BYTES).await
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> Response {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request");
    app.clone().oneshot(request).await.expect("response")
}

async fn json_body(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

async fn create_page_via_http(app: &Router, name: &str, route: &str, is_home: bool) -> String {
    let response = send(
        app,
        "POST",
        "/pages",
        Some(json!({ "name": name, "route": route, "is_home": is_home })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    json_body(response).await["id"]
        .as_str()
        .expect("page id")
        .to_string()
}

async fn create_widget_via_http(app: &Router, page_id: &str, widget_type: &str) -> String {
    let response = send(
        app,
        "POST",
        &format!("/pages/{page_id}/widgets"),
        Some(json!({ "type": widget_type })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    json_body(response).await["id"]
        .as_str()
        .expect("widget id")
        .to_string()
}

#[tokio::test]
async fn healthz_reports_ok_when_storage_is_ready() {
    let app = test_app().await;
    let response = send(&app, "GET", "/healthz", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn health_reports_service_details() {
    let app = test_app().await;
    let response = send(&app, "GET", "/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let report = json_body(response).await;
    assert_eq!(report["status"], "healthy");
    assert_eq!(report["service"], "server");
}

#[tokio::test]
async fn cors_preflight_is_answered() {
    let app = test_app().await;
    let request = Request::builder()
        .method("OPTIONS")
        .uri("/pages")
        .header(header::ORIGIN, "https://admin.example.com")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .expect("allow origin"),
        "*"
    );
}

#[tokio::test]
async fn page_lifecycle_over_http() {
    let app = test_app().await;
    let page_id = create_page_via_http(&app, "Landing", "/", true).await;

    let response = send(&app, "GET", &format!("/pages/{page_id}"), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let detail = json_body(response).await;
    assert_eq!(detail["route"], "/");
    assert_eq!(detail["is_home"], true);
    assert_eq!(detail["widgets"], json!([]));

    let response = send(
        &app,
        "PUT",
        &format!("/pages/{page_id}"),
        Some(json!({ "name": "Welcome" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let updated = json_body(response).await;
    assert_eq!(updated["name"], "Welcome");
    assert_eq!(updated["route"], "/");

    let response = send(&app, "GET", "/pages?page=1&per_page=5", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let listing = json_body(response).await;
    assert_eq!(listing["total"], 1);
    assert_eq!(listing["per_page"], 5);
    assert_eq!(listing["total_pages"], 1);

    let response = send(&app, "DELETE", &format!("/pages/{page_id}"), None).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["code"], "conflict");

    let other_id = create_page_via_http(&app, "Other", "/other", false).await;
    let response = send(&app, "DELETE", &format!("/pages/{other_id}"), None).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = send(&app, "GET", &format!("/pages/{other_id}"), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["code"], "not_found");
}

#[tokio::test]
async fn duplicate_route_maps_to_conflict() {
    let app = test_app().await;
    create_page_via_http(&app, "Shop", "/shop", false).await;

    let response = send(
        &app,
        "POST",
        "/pages",
        Some(json!({ "name": "Shop 2", "route": "/shop" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn malformed_ids_are_bad_requests() {
    let app = test_app().await;

    let response = send(&app, "GET", "/pages/not-a-uuid", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error = json_body(response).await;
    assert_eq!(error["code"], "bad_request");
    assert_eq!(error["message"], "invalid page ID format");

    let response = send(
        &app,
        "PUT",
        "/widgets/42",
        Some(json!({ "position": 1 })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["message"], "invalid widget ID format");
}

#[tokio::test]
async fn malformed_bodies_are_validation_errors() {
    let app = test_app().await;
    let request = Request::post("/pages")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"name\": "))
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error = json_body(response).await;
    assert_eq!(error["code"], "validation");
    assert!(error["message"]
        .as_str()
        .expect("message")
        .starts_with("invalid request body: "));

    let response = send(&app, "POST", "/pages", Some(json!({ "name": "", "route": "/x" }))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "validation");
}

#[tokio::test]
async fn oversized_bodies_are_rejected() {
    let app = test_app_with_limit(64).await;
    let response = send(
        &app,
        "POST",
        "/pages",
        Some(json!({ "name": "x".repeat(200), "route": "/big" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn widget_routes_create_filter_update_and_delete() {
    let app = test_app().await;
    let page_id = create_page_via_http(&app, "Catalog", "/catalog", false).await;
    let banner_id = create_widget_via_http(&app, &page_id, "banner").await;
    create_widget_via_http(&app, &page_id, "text").await;

    let response = send(&app, "GET", &format!("/pages/{page_id}/widgets?type=banner"), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let listing = json_body(response).await;
    assert_eq!(listing["total"], 1);
    assert_eq!(listing["widgets"][0]["id"], banner_id.as_str());
    assert_eq!(listing["widgets"][0]["type"], "banner");

    let response = send(&app, "GET", &format!("/pages/{page_id}/widgets?type="), None).await;
    assert_eq!(json_body(response).await["total"], 2);

    let response = send(&app, "GET", &format!("/pages/{page_id}/widgets?type=video"), None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &app,
        "PUT",
        &format!("/widgets/{banner_id}"),
        Some(json!({ "config": { "title": "Summer sale" } })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let updated = json_body(response).await;
    assert_eq!(updated["config"]["title"], "Summer sale");
    assert_eq!(updated["position"], 1);

    let response = send(&app, "DELETE", &format!("/widgets/{banner_id}"), None).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = send(&app, "DELETE", &format!("/widgets/{banner_id}"), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reorder_route_returns_dense_positions() {
    let app = test_app().await;
    let page_id = create_page_via_http(&app, "Catalog", "/catalog", false).await;
    let first = create_widget_via_http(&app, &page_id, "banner").await;
    let second = create_widget_via_http(&app, &page_id, "product_grid").await;
    let third = create_widget_via_http(&app, &page_id, "spacer").await;

    let response = send(
        &app,
        "POST",
        &format!("/pages/{page_id}/widgets/reorder"),
        Some(json!({ "widget_ids": [&third, &first, &second] })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let reordered = json_body(response).await;
    let order: Vec<(String, i64)> = reordered["widgets"]
        .as_array()
        .expect("widgets")
        .iter()
        .map(|widget| {
            (
                widget["id"].as_str().expect("id").to_string(),
                widget["position"].as_i64().expect("position"),
            )
        })
        .collect();
    assert_eq!(order, vec![(third, 1), (first.clone(), 2), (second, 3)]);

    let response = send(
        &app,
        "POST",
        &format!("/pages/{page_id}/widgets/reorder"),
        Some(json!({ "widget_ids": [first] })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "validation");
}

#[tokio::test]
async fn missing_page_routes_are_not_found() {
    let app = test_app().await;
    let missing = PageId::generate();

    let response = send(&app, "GET", &format!("/pages/{missing}/widgets"), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(
        &app,
        "POST",
        &format!("/pages/{missing}/widgets"),
        Some(json!({ "type": "text" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
