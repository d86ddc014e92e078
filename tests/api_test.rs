//! HTTP surface tests: the axum router driven in-process against a real
//! store, covering the documented response-code mapping end to end.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use tally::coordinator::http::router;
use tally::{AppState, AuthManager, CoordinatorConfig, Store};

async fn test_app() -> (Router, Store, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("tally.sqlite");
    let store = Store::connect(path.to_str().expect("utf-8 path"))
        .await
        .expect("connect");

    let config = CoordinatorConfig {
        log_level: "info".into(),
        mgmt_addr: "127.0.0.1:0".parse().unwrap(),
        grpc_addr: "127.0.0.1:0".parse().unwrap(),
        http_addr: "127.0.0.1:0".parse().unwrap(),
        db_sqlite_path: path.to_string_lossy().into_owned(),
        auth_jwt_secret: "test-secret".into(),
        auth_jwt_expiration: Duration::from_secs(3600),
        time_addition_ms: 0,
        time_subtraction_ms: 0,
        time_multiplication_ms: 0,
        time_division_ms: 0,
    };
    let state = AppState {
        store: store.clone(),
        auth: Arc::new(AuthManager::new(
            config.auth_jwt_secret.clone(),
            config.auth_jwt_expiration,
        )),
        config: Arc::new(config),
    };
    (router(state), store, dir)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.expect("request");
    let status = response.status();
    let bytes = response.into_body().collect().await.expect("body").to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, body)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_authed(uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_authed(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn register_and_login(app: &Router, login: &str) -> String {
    let (status, _) = send(
        app,
        post("/api/v1/register", json!({"login": login, "password": "pw"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        app,
        post("/api/v1/login", json!({"login": login, "password": "pw"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["access_token"].as_str().expect("token").to_string()
}

#[tokio::test]
async fn register_conflicts_on_duplicate_login() {
    let (app, _store, _dir) = test_app().await;
    let _ = register_and_login(&app, "alice").await;

    let (status, _) = send(
        &app,
        post("/api/v1/register", json!({"login": "alice", "password": "other"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn login_with_bad_credentials_is_precondition_failed() {
    let (app, _store, _dir) = test_app().await;
    let _ = register_and_login(&app, "alice").await;

    let (status, _) = send(
        &app,
        post("/api/v1/login", json!({"login": "alice", "password": "nope"})),
    )
    .await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn calculator_routes_require_a_token() {
    let (app, _store, _dir) = test_app().await;

    let (status, _) = send(&app, post("/api/v1/calculate", json!({"expression": "1+2"}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .method("GET")
        .uri("/api/v1/expressions")
        .header(header::AUTHORIZATION, "Bearer garbage")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn invalid_expression_is_unprocessable() {
    let (app, _store, _dir) = test_app().await;
    let token = register_and_login(&app, "alice").await;

    for expression in ["1++2", "", "(1+2", "1)"] {
        let (status, _) = send(
            &app,
            post_authed("/api/v1/calculate", &token, json!({"expression": expression})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{expression:?}");
    }

    // Nothing was persisted for the rejected submissions.
    let (status, body) = send(&app, get_authed("/api/v1/expressions", &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["expressions"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn submit_fetch_and_complete_round_trip() {
    let (app, _store, _dir) = test_app().await;
    let token = register_and_login(&app, "alice").await;

    let (status, body) = send(
        &app,
        post_authed("/api/v1/calculate", &token, json!({"expression": "1+2"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["id"].as_str().expect("id").to_string();

    let (status, body) = send(&app, get_authed(&format!("/api/v1/expressions/{id}"), &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Pending");

    let (status, body) = send(
        &app,
        get_authed(&format!("/api/v1/expressions/{id}/tasks"), &token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let tasks = body["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["operation"], "+");
    assert_eq!(tasks[0]["status"], "Pending");

    // Worker surface: claim the task and submit its result.
    let (status, body) = send(&app, get("/internal/v1/task")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["arg1"], json!(1.0));
    assert_eq!(body["arg2"], json!(2.0));
    let task_id = body["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        post("/internal/v1/task", json!({"id": task_id, "result": 3.0})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, get_authed(&format!("/api/v1/expressions/{id}"), &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Completed");
    assert_eq!(body["result"], json!(3.0));
}

#[tokio::test]
async fn null_result_marks_the_expression_failed() {
    let (app, _store, _dir) = test_app().await;
    let token = register_and_login(&app, "alice").await;

    let (status, body) = send(
        &app,
        post_authed("/api/v1/calculate", &token, json!({"expression": "1/0"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["id"].as_str().unwrap().to_string();

    let (_, body) = send(&app, get("/internal/v1/task")).await;
    let task_id = body["id"].as_str().unwrap().to_string();

    // JSON cannot carry NaN; the sentinel travels as null.
    let (status, _) = send(
        &app,
        post("/internal/v1/task", json!({"id": task_id, "result": null})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app, get_authed(&format!("/api/v1/expressions/{id}"), &token)).await;
    assert_eq!(body["status"], "Failed");
    assert!(body["error"].is_string());
    assert!(body["result"].is_null());
}

#[tokio::test]
async fn empty_queue_and_unknown_task_are_not_found() {
    let (app, _store, _dir) = test_app().await;

    let (status, _) = send(&app, get("/internal/v1/task")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        post("/internal/v1/task", json!({"id": "no-such-task", "result": 1.0})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn users_cannot_see_each_others_expressions() {
    let (app, _store, _dir) = test_app().await;
    let alice = register_and_login(&app, "alice").await;
    let bob = register_and_login(&app, "bob").await;

    let (_, body) = send(
        &app,
        post_authed("/api/v1/calculate", &alice, json!({"expression": "1+2"})),
    )
    .await;
    let id = body["id"].as_str().unwrap().to_string();

    let (status, _) = send(&app, get_authed(&format!("/api/v1/expressions/{id}"), &bob)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(
        &app,
        get_authed(&format!("/api/v1/expressions/{id}/tasks"), &bob),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = send(&app, get_authed("/api/v1/expressions", &bob)).await;
    assert_eq!(body["expressions"].as_array().unwrap().len(), 0);
}
