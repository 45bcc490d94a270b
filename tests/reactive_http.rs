//! HTTP fallback routing through the reactive middleware.

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header::CONTENT_TYPE},
    middleware,
    response::Response,
    routing::{get, post},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tessera::{
    infra::http::reactive_layer,
    presentation::components::Counter,
    reactive::{ComponentRegistry, ReactiveConfig, ReactiveHandler},
};
use tower::ServiceExt;

const ACTIONS: &str = "/_reactive/actions";

fn router_with(config: ReactiveConfig) -> Router {
    let registry = Arc::new(ComponentRegistry::new());
    registry
        .register_component(Counter::new("counter-1", "Clicks"))
        .expect("register counter");
    let handler = Arc::new(ReactiveHandler::new(config, registry));

    Router::new()
        .route("/", get(|| async { "downstream" }))
        .route(ACTIONS, post(|| async { "downstream post" }))
        .route(&format!("{ACTIONS}/status"), get(|| async { "downstream get" }))
        .layer(middleware::from_fn_with_state(handler, reactive_layer))
}

fn router() -> Router {
    router_with(ReactiveConfig::default())
}

fn action(body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(ACTIONS)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn json_body(response: Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

async fn text_body(response: Response) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

fn increment() -> Value {
    json!({"componentId": "counter-1", "method": "increment", "event": {}})
}

#[tokio::test]
async fn increments_across_requests() {
    let app = router();

    let response = app.clone().oneshot(action(increment())).await.expect("respond");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["componentId"], "counter-1");
    assert!(body["html"].as_str().expect("html").contains("<output>1</output>"));

    let response = app.oneshot(action(increment())).await.expect("respond");
    let body = json_body(response).await;
    assert!(body["html"].as_str().expect("html").contains("<output>2</output>"));
}

#[tokio::test]
async fn unknown_component_is_404_and_mutates_nothing() {
    let app = router();

    let response = app
        .clone()
        .oneshot(action(
            json!({"componentId": "missing", "method": "increment", "event": {}}),
        ))
        .await
        .expect("respond");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        json_body(response).await,
        json!({"success": false, "error": "Component not found"})
    );

    let response = app.oneshot(action(increment())).await.expect("respond");
    let body = json_body(response).await;
    assert!(body["html"].as_str().expect("html").contains("<output>1</output>"));
}

#[tokio::test]
async fn malformed_payload_is_400() {
    let response = router()
        .oneshot(action(json!({"method": "increment"})))
        .await
        .expect("respond");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().expect("error").starts_with("Invalid action payload"));
}

#[tokio::test]
async fn failing_invocation_is_422() {
    let app = router();

    for body in [
        json!({"componentId": "counter-1", "method": "explode", "event": {}}),
        json!({"componentId": "counter-1", "method": "increment", "event": {"by": "x"}}),
    ] {
        let response = app.clone().oneshot(action(body)).await.expect("respond");
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json_body(response).await["success"], false);
    }
}

#[tokio::test]
async fn oversized_payload_is_rejected() {
    let app = router_with(ReactiveConfig {
        max_payload_bytes: 16,
        ..ReactiveConfig::default()
    });

    let response = app.oneshot(action(increment())).await.expect("respond");
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn unrelated_requests_pass_through() {
    let app = router();

    let response = app
        .clone()
        .oneshot(Request::get("/").body(Body::empty()).expect("request"))
        .await
        .expect("respond");
    assert_eq!(text_body(response).await, "downstream");

    let response = app
        .oneshot(
            Request::get(format!("{ACTIONS}/status"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("respond");
    assert_eq!(text_body(response).await, "downstream get");
}

#[tokio::test]
async fn disabled_fallback_passes_actions_through() {
    let app = router_with(ReactiveConfig {
        enable_http_fallback: false,
        ..ReactiveConfig::default()
    });

    let response = app.oneshot(action(increment())).await.expect("respond");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(text_body(response).await, "downstream post");
}

#[tokio::test]
async fn plain_get_on_websocket_path_is_not_upgraded() {
    let response = router()
        .oneshot(Request::get("/_reactive/ws").body(Body::empty()).expect("request"))
        .await
        .expect("respond");
    assert!(response.status().is_client_error());
}
