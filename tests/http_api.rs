mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use cloudwright::auth::StaticTokenAuthenticator;
use cloudwright::config::settings::{AuthConfig, TokenEntry};
use cloudwright::http::{create_router, AppState};

use common::Harness;

const TOKEN: &str = "alice-token";

fn router(h: &Harness) -> Router {
    let authenticator = Arc::new(StaticTokenAuthenticator::new(&AuthConfig {
        tokens: vec![TokenEntry {
            token: TOKEN.to_string(),
            principal: "alice".to_string(),
        }],
        allow_anonymous: false,
    }));
    create_router(AppState::new(h.orchestrator.clone(), authenticator))
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<&str>,
    authorized: bool,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if authorized {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", TOKEN));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

const WEBSITE: &str = r#"{
    "conversation_context": [
        {"role": "user", "content": "I'm launching a website for my bakery"},
        {"role": "user", "content": "It needs a database and 50GB storage"}
    ]
}"#;

#[tokio::test]
async fn test_health_needs_no_credential() {
    let h = Harness::new();
    let app = router(&h);

    let (status, body) = send(&app, Method::GET, "/health", None, false).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["in_flight"], 0);
}

#[tokio::test]
async fn test_missing_credential_is_401() {
    let h = Harness::new();
    let app = router(&h);

    let (status, body) = send(&app, Method::POST, "/api/analyze", Some(WEBSITE), false).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["kind"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_full_lifecycle_over_http() {
    let h = Harness::new();
    let app = router(&h);

    let (status, analysis) = send(&app, Method::POST, "/api/analyze", Some(WEBSITE), true).await;
    assert_eq!(status, StatusCode::OK);
    let request_id = analysis["request_id"].as_str().unwrap().to_string();
    let recommendations = analysis["recommendations"].clone();
    let count = recommendations.as_array().unwrap().len();

    let body = json!({"request_id": request_id, "confirmed_resources": recommendations}).to_string();
    let (status, accepted) = send(&app, Method::POST, "/api/provision", Some(&body), true).await;
    assert_eq!(status, StatusCode::OK, "{}", accepted);
    assert_eq!(accepted["accepted"], true);
    assert_eq!(accepted["resources"].as_array().unwrap().len(), count);

    let uri = format!("/api/status/{}", request_id);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let (status, report) = send(&app, Method::GET, &uri, None, true).await;
        assert_eq!(status, StatusCode::OK);
        if report["status"] == "completed" {
            assert_eq!(report["progress"], 100);
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "never completed: {}", report);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/teardown/{}", request_id),
        None,
        true,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["kind"], "INVALID_STATE");
    assert_eq!(body["error"]["request_id"], request_id.as_str());

    let (status, deleted) = send(
        &app,
        Method::DELETE,
        &format!("/api/requests/{}", request_id),
        None,
        true,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["deleted"], true);

    let (status, _) = send(&app, Method::GET, &uri, None, true).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_error_statuses() {
    let h = Harness::new();
    let app = router(&h);

    let (status, body) = send(&app, Method::GET, "/api/status/missing-request", None, true).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["kind"], "NOT_FOUND");

    let vague = r#"{"conversation_context": [{"role": "user", "content": "hello"}]}"#;
    let (status, body) = send(&app, Method::POST, "/api/analyze", Some(vague), true).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["kind"], "INSUFFICIENT_CONTEXT");

    let (status, body) = send(&app, Method::POST, "/api/analyze", Some("{ nope"), true).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "INVALID_REQUEST");

    let (_, analysis) = send(&app, Method::POST, "/api/analyze", Some(WEBSITE), true).await;
    let request_id = analysis["request_id"].as_str().unwrap();
    let body = json!({"request_id": request_id, "confirmed_resources": ["Mainframe"]}).to_string();
    let (status, body) = send(&app, Method::POST, "/api/provision", Some(&body), true).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "UNKNOWN_RESOURCE");

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/retry/{}", request_id),
        None,
        true,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, cancelled) = send(
        &app,
        Method::POST,
        &format!("/api/cancel/{}", request_id),
        None,
        true,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "failed");
    assert_eq!(cancelled["failure"]["reason"], "cancelled");
}

#[tokio::test]
async fn test_echoed_recommendation_must_match_stored_type() {
    let h = Harness::new();
    let app = router(&h);

    let (_, analysis) = send(&app, Method::POST, "/api/analyze", Some(WEBSITE), true).await;
    let request_id = analysis["request_id"].as_str().unwrap();
    let mut first = analysis["recommendations"][0].clone();
    first["resource_type"] = json!("kubernetes");

    let body = json!({"request_id": request_id, "confirmed_resources": [first]}).to_string();
    let (status, body) = send(&app, Method::POST, "/api/provision", Some(&body), true).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "UNKNOWN_RESOURCE");

    let (_, report) = send(
        &app,
        Method::GET,
        &format!("/api/status/{}", request_id),
        None,
        true,
    )
    .await;
    assert_eq!(report["status"], "awaiting_confirmation");
    assert!(report["resources"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_catalog_routes() {
    let h = Harness::new();
    let app = router(&h);

    let (status, body) = send(&app, Method::GET, "/api/resource-types", None, true).await;
    assert_eq!(status, StatusCode::OK);
    let types: Vec<&str> = body["resource_types"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["resource_type"].as_str().unwrap())
        .collect();
    assert!(types.contains(&"compute"));
    assert!(types.contains(&"database"));

    let (status, body) = send(&app, Method::GET, "/api/compute-shapes", None, true).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["shapes"].as_array().unwrap().is_empty());
}
