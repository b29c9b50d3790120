// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP surface integration tests.
//!
//! Drives the axum router directly (no socket) through the end-to-end
//! scenarios: webhook registration → initial state, state callbacks, auth
//! rejection, workflow triggers, and the error-body shape.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use ops_core::application::{LifecycleManager, TaskQueue, WorkflowEngine};
use ops_core::domain::repository::StateStore;
use ops_core::domain::workflow::{TaskDescriptor, WorkflowDefinition};
use ops_core::infrastructure::event_bus::EventBus;
use ops_core::infrastructure::memory_store::InMemoryStateStore;
use ops_core::presentation::api::{router, AppState};

const API_KEY: &str = "test-api-key";

struct TestApp {
    app: Router,
    store: Arc<dyn StateStore>,
    queue: Arc<TaskQueue>,
}

fn test_app() -> TestApp {
    let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
    let events = EventBus::with_default_capacity();
    let lifecycle = Arc::new(LifecycleManager::new(store.clone(), events));
    let queue = Arc::new(TaskQueue::new());
    let engine = Arc::new(WorkflowEngine::new(
        store.clone(),
        lifecycle.clone(),
        queue.clone(),
    ));
    let state = Arc::new(AppState {
        lifecycle,
        engine,
        api_key: API_KEY.to_string(),
    });
    TestApp {
        app: router(state),
        store,
        queue,
    }
}

fn request(method: &str, uri: &str, body: Option<Value>, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    match body {
        Some(value) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn register_payload(agent_id: &str) -> Value {
    json!({
        "event_type": "REGISTER",
        "agent_details": {
            "agentId": agent_id,
            "agentName": "Agent One",
            "version": "1",
            "capabilities": ["t"],
            "contactEndpoint": "http://h/run",
            "metadata": {},
            "registrationTime": "2025-01-01T00:00:00Z"
        }
    })
}

async fn register_agent(app: &Router, agent_id: &str) {
    let (status, _) = send(
        app,
        request(
            "POST",
            "/v1/opscore/internal/agent/notify",
            Some(register_payload(agent_id)),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

async fn save_definition(store: &Arc<dyn StateStore>, id: &str, tasks: &[&str]) {
    store
        .save_workflow_definition(&WorkflowDefinition {
            id: id.to_string(),
            name: id.to_string(),
            version: "1.0".to_string(),
            description: None,
            tasks: tasks
                .iter()
                .map(|name| TaskDescriptor {
                    task_name: name.to_string(),
                    parameters: serde_json::Map::new(),
                    max_retries: None,
                })
                .collect(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn health_needs_no_auth() {
    let test = test_app();
    let (status, body) = send(&test.app, request("GET", "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn registration_creates_initial_unknown_state() {
    let test = test_app();
    register_agent(&test.app, "a1").await;

    let (status, body) = send(
        &test.app,
        request("GET", "/v1/opscore/agent/a1/state", None, Some(API_KEY)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["agentId"], "a1");
    assert_eq!(body["state"], "UNKNOWN");
}

#[tokio::test]
async fn duplicate_registration_returns_conflict() {
    let test = test_app();
    register_agent(&test.app, "a1").await;

    let (status, body) = send(
        &test.app,
        request(
            "POST",
            "/v1/opscore/internal/agent/notify",
            Some(register_payload("a1")),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn state_callback_updates_latest_state() {
    let test = test_app();
    register_agent(&test.app, "a1").await;

    // Newer than the initial UNKNOWN record, so it becomes `latest`.
    let timestamp = (chrono::Utc::now() + chrono::Duration::seconds(1)).to_rfc3339();
    let (status, body) = send(
        &test.app,
        request(
            "POST",
            "/v1/opscore/agent/a1/state",
            Some(json!({
                "agentId": "a1",
                "timestamp": timestamp,
                "state": "idle",
                "details": {}
            })),
            Some(API_KEY),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");

    let (status, body) = send(
        &test.app,
        request("GET", "/v1/opscore/agent/a1/state", None, Some(API_KEY)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "idle");
}

#[tokio::test]
async fn missing_bearer_token_is_unauthorized() {
    let test = test_app();
    let (status, body) = send(
        &test.app,
        request("GET", "/v1/opscore/agent/a1/state", None, None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn wrong_bearer_token_is_unauthorized() {
    let test = test_app();
    let (status, _) = send(
        &test.app,
        request("GET", "/v1/opscore/agent/a1/state", None, Some("wrong-key")),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn mismatched_agent_id_in_body_is_rejected() {
    let test = test_app();
    register_agent(&test.app, "a1").await;

    let (status, _) = send(
        &test.app,
        request(
            "POST",
            "/v1/opscore/agent/a1/state",
            Some(json!({
                "agentId": "a2",
                "timestamp": "2025-01-01T00:00:01Z",
                "state": "idle"
            })),
            Some(API_KEY),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn state_outside_allowed_set_is_rejected() {
    let test = test_app();
    register_agent(&test.app, "a1").await;

    let (status, body) = send(
        &test.app,
        request(
            "POST",
            "/v1/opscore/agent/a1/state",
            Some(json!({
                "agentId": "a1",
                "timestamp": "2025-01-01T00:00:01Z",
                "state": "dancing"
            })),
            Some(API_KEY),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("Invalid state"));
}

#[tokio::test]
async fn state_callback_for_unknown_agent_is_not_found() {
    let test = test_app();
    let (status, _) = send(
        &test.app,
        request(
            "POST",
            "/v1/opscore/agent/ghost/state",
            Some(json!({
                "agentId": "ghost",
                "timestamp": "2025-01-01T00:00:01Z",
                "state": "idle"
            })),
            Some(API_KEY),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn trigger_enqueues_all_definition_tasks() {
    let test = test_app();
    register_agent(&test.app, "a1").await;
    save_definition(&test.store, "w1", &["T1", "T2"]).await;

    let (status, body) = send(
        &test.app,
        request(
            "POST",
            "/v1/opscore/agent/a1/workflow",
            Some(json!({ "workflowDefinitionId": "w1" })),
            Some(API_KEY),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["workflowId"], "w1");
    assert_eq!(body["enqueuedTaskCount"], 2);
    assert!(body["sessionId"].as_str().unwrap().starts_with("session_"));
    assert_eq!(test.queue.len(), 2);

    // The session is readable over HTTP for progress reporting.
    let session_id = body["sessionId"].as_str().unwrap();
    let (status, session) = send(
        &test.app,
        request(
            "GET",
            &format!("/v1/opscore/session/{session_id}"),
            None,
            Some(API_KEY),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["status"], "started");
    assert_eq!(session["workflowId"], "w1");
}

#[tokio::test]
async fn trigger_for_unknown_agent_is_not_found() {
    let test = test_app();
    save_definition(&test.store, "w1", &["T1"]).await;

    let (status, body) = send(
        &test.app,
        request(
            "POST",
            "/v1/opscore/agent/unknown/workflow",
            Some(json!({ "workflowDefinitionId": "w1" })),
            Some(API_KEY),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["detail"].as_str().unwrap().contains("Agent not found"));
}

#[tokio::test]
async fn trigger_with_unknown_definition_is_not_found() {
    let test = test_app();
    register_agent(&test.app, "a1").await;

    let (status, _) = send(
        &test.app,
        request(
            "POST",
            "/v1/opscore/agent/a1/workflow",
            Some(json!({ "workflowDefinitionId": "missing" })),
            Some(API_KEY),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn trigger_requires_exactly_one_definition_reference() {
    let test = test_app();
    register_agent(&test.app, "a1").await;
    save_definition(&test.store, "w1", &["T1"]).await;

    let (status, _) = send(
        &test.app,
        request(
            "POST",
            "/v1/opscore/agent/a1/workflow",
            Some(json!({})),
            Some(API_KEY),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &test.app,
        request(
            "POST",
            "/v1/opscore/agent/a1/workflow",
            Some(json!({
                "workflowDefinitionId": "w1",
                "workflowDefinition": {"name": "inline", "tasks": [{"taskName": "t"}]}
            })),
            Some(API_KEY),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn inline_definition_conflict_is_reported() {
    let test = test_app();
    register_agent(&test.app, "a1").await;

    let inline = json!({
        "id": "wf_inline",
        "name": "inline",
        "tasks": [{"taskName": "t1"}]
    });
    let (status, _) = send(
        &test.app,
        request(
            "POST",
            "/v1/opscore/agent/a1/workflow",
            Some(json!({ "workflowDefinition": inline })),
            Some(API_KEY),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let changed = json!({
        "id": "wf_inline",
        "name": "inline",
        "tasks": [{"taskName": "t1"}, {"taskName": "t2"}]
    });
    let (status, _) = send(
        &test.app,
        request(
            "POST",
            "/v1/opscore/agent/a1/workflow",
            Some(json!({ "workflowDefinition": changed })),
            Some(API_KEY),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn empty_task_list_in_inline_definition_is_rejected() {
    let test = test_app();
    register_agent(&test.app, "a1").await;

    let (status, _) = send(
        &test.app,
        request(
            "POST",
            "/v1/opscore/agent/a1/workflow",
            Some(json!({
                "workflowDefinition": {"name": "empty", "tasks": []}
            })),
            Some(API_KEY),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn state_history_is_newest_first() {
    let test = test_app();
    register_agent(&test.app, "a1").await;

    for (i, state) in ["idle", "active"].iter().enumerate() {
        let (status, _) = send(
            &test.app,
            request(
                "POST",
                "/v1/opscore/agent/a1/state",
                Some(json!({
                    "agentId": "a1",
                    "timestamp": format!("2025-01-01T00:00:0{}Z", i + 1),
                    "state": state
                })),
                Some(API_KEY),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(
        &test.app,
        request(
            "GET",
            "/v1/opscore/agent/a1/state/history?limit=2",
            None,
            Some(API_KEY),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let history = body.as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["state"], "active");
    assert_eq!(history[1]["state"], "idle");
}

#[tokio::test]
async fn agents_listing_returns_registrations() {
    let test = test_app();
    register_agent(&test.app, "a1").await;
    register_agent(&test.app, "a2").await;

    let (status, body) = send(
        &test.app,
        request("GET", "/v1/opscore/agents", None, Some(API_KEY)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let agents = body.as_array().unwrap();
    assert_eq!(agents.len(), 2);
    assert_eq!(agents[0]["agentId"], "a1");
}

#[tokio::test]
async fn unknown_notify_event_type_is_rejected() {
    let test = test_app();
    let (status, _) = send(
        &test.app,
        request(
            "POST",
            "/v1/opscore/internal/agent/notify",
            Some(json!({
                "event_type": "EXPLODE",
                "agent_details": {}
            })),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn deregister_notification_is_acknowledged() {
    let test = test_app();
    register_agent(&test.app, "a1").await;

    let mut payload = register_payload("a1");
    payload["event_type"] = json!("DEREGISTER");
    let (status, body) = send(
        &test.app,
        request("POST", "/v1/opscore/internal/agent/notify", Some(payload), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
}

#[tokio::test]
async fn unknown_session_read_is_not_found() {
    let test = test_app();
    let (status, _) = send(
        &test.app,
        request(
            "GET",
            "/v1/opscore/session/session_ghost",
            None,
            Some(API_KEY),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
