//! HTTP 接口集成测试
//!
//! 通过 `tower::ServiceExt::oneshot` 直接驱动完整的中间件栈。

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use validate_service::{build_router, AppState};
use ve_shared::config::{AppConfig, AuthConfig, AuthMethod, EngineConfig};

fn test_config() -> AppConfig {
    AppConfig {
        service_name: "validate-service".to_string(),
        environment: "test".to_string(),
        ..Default::default()
    }
}

fn app(config: AppConfig) -> Router {
    let state = AppState::from_config(&config).unwrap();
    build_router(state, &config)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    send_with_token(app, method, uri, body, None).await
}

async fn send_with_token(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    token: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let body = match body {
        Some(v) => Body::from(v.to_string()),
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn item_dsl() -> Value {
    json!({
        "validations": [
            {
                "id": "item",
                "cels": ["price > 0", "size(image) < 360"],
                "variables": [
                    {"name": "price", "type": "int"},
                    {"name": "image", "type": "bytes"}
                ]
            },
            {
                "id": "user",
                "cels": ["size(name) < 20"],
                "variables": [{"name": "name", "type": "string"}]
            }
        ]
    })
}

#[tokio::test]
async fn test_health_check() {
    let app = app(test_config());
    let (status, body) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_register_and_check() {
    let app = app(test_config());

    let (status, body) = send(&app, "POST", "/v1/dsl", Some(item_dsl())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["registered"], json!(["item", "user"]));
    assert_eq!(body["generation"], 1);

    let (status, body) = send(
        &app,
        "POST",
        "/v1/check",
        Some(json!({
            "validations": [
                {"id": "item", "variables": {"price": -100, "image": "aGVsbG8="}},
                {"id": "user", "variables": {"name": "aaaaaaaaaaaaaaaaaaaa"}},
                {"id": "ghost", "variables": {}}
            ]
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let results = body["validations"].as_array().unwrap();
    assert_eq!(results.len(), 3);

    assert_eq!(results[0]["passed"], false);
    assert_eq!(results[0]["message"], "failed validations: price > 0");
    assert_eq!(results[0]["diagnostics"][0]["passed"], false);
    assert_eq!(results[0]["diagnostics"][1]["passed"], true);

    assert_eq!(results[1]["passed"], false);
    assert_eq!(results[2]["diagnostics"][0]["error"]["kind"], "NotFound");
}

#[tokio::test]
async fn test_read_registered_dsl() {
    let app = app(test_config());
    send(&app, "POST", "/v1/dsl", Some(item_dsl())).await;

    let (status, body) = send(&app, "GET", "/v1/dsl", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["validations"][0]["id"], "item");
    assert_eq!(body["validations"][0]["cels"][1], "size(image) < 360");
    assert_eq!(body["validations"][1]["id"], "user");
}

#[tokio::test]
async fn test_rejected_registration() {
    let app = app(test_config());

    let (status, body) = send(
        &app,
        "POST",
        "/v1/dsl",
        Some(json!({
            "validations": [{
                "id": "item",
                "cels": ["price > limit"],
                "variables": [{"name": "price", "type": "int"}]
            }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "UNKNOWN_VARIABLE");

    let (status, body) = send(
        &app,
        "POST",
        "/v1/dsl",
        Some(json!({
            "validations": [{
                "id": "item",
                "cels": ["price >"],
                "variables": [{"name": "price", "type": "int"}]
            }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "COMPILE_FAILED");

    let (_, body) = send(&app, "GET", "/v1/dsl", None).await;
    assert_eq!(body["validations"], json!([]));
}

#[tokio::test]
async fn test_malformed_requests_are_bad_request() {
    let app = app(test_config());

    // 缺少必填字段
    let (status, body) = send(&app, "POST", "/v1/check", Some(json!({"items": []}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");

    // DTO 校验失败
    let (status, _) = send(&app, "POST", "/v1/dsl", Some(json!({"validations": []}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // 非法 JSON
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/check")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_batch_too_large() {
    let app = app(AppConfig {
        engine: EngineConfig {
            max_batch_size: 2,
            ..Default::default()
        },
        ..test_config()
    });
    send(&app, "POST", "/v1/dsl", Some(item_dsl())).await;

    let item = json!({"id": "user", "variables": {"name": "a"}});
    let (status, body) = send(
        &app,
        "POST",
        "/v1/check",
        Some(json!({"validations": [item.clone(), item.clone(), item]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_dry_run_does_not_commit() {
    let app = app(test_config());

    let (status, body) = send(
        &app,
        "POST",
        "/v1/dsl/test",
        Some(json!({
            "validations": [{
                "id": "user",
                "cels": ["size(name) < 20"],
                "variables": [{"name": "name", "type": "string"}],
                "testCases": [
                    {"name": "short", "variables": [{"name": "name", "value": "bob"}], "expected": true},
                    {"name": "wrong", "variables": [{"name": "name", "value": "bob"}], "expected": false}
                ]
            }]
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["validations"][0]["failedTestCases"], json!(["wrong"]));
    assert_eq!(body["validations"][0]["testCaseNotFound"], false);

    let (_, body) = send(&app, "GET", "/v1/dsl", None).await;
    assert_eq!(body["validations"], json!([]));
}

#[tokio::test]
async fn test_preshared_key_auth() {
    let app = app(AppConfig {
        auth: AuthConfig {
            method: AuthMethod::Preshared,
            preshared_key: Some("s3cret".to_string()),
        },
        ..test_config()
    });

    let (status, body) = send(&app, "GET", "/v1/dsl", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let (status, _) = send_with_token(&app, "GET", "/v1/dsl", None, Some("wrong")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send_with_token(&app, "GET", "/v1/dsl", None, Some("s3cret")).await;
    assert_eq!(status, StatusCode::OK);

    // 健康检查不需要认证
    let (status, _) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let app = app(test_config());
    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-request-id", "req-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.headers()["x-request-id"], "req-42");
}
