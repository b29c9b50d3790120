// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP surface.
//!
//! Fixed paths, versioned under `/v1`:
//!
//! - `GET  /health` — liveness, no auth
//! - `POST /v1/opscore/agent/{agentId}/state` — state callback (bearer)
//! - `GET  /v1/opscore/agent/{agentId}/state` — latest state (bearer)
//! - `GET  /v1/opscore/agent/{agentId}/state/history` — history (bearer)
//! - `POST /v1/opscore/agent/{agentId}/workflow` — trigger (bearer)
//! - `GET  /v1/opscore/agents` — registrations (bearer)
//! - `GET  /v1/opscore/session/{sessionId}` — session progress (bearer)
//! - `POST /v1/opscore/internal/agent/notify` — registration webhook
//!   (no bearer auth; intended for trusted network ingress)
//!
//! Request bodies are parsed from raw JSON so schema violations map to the
//! `InvalidRequest` error shape instead of the framework default.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};

use crate::application::lifecycle::LifecycleManager;
use crate::application::workflow_engine::{WorkflowEngine, WorkflowReference};
use crate::domain::agent::{AgentRegistration, AgentState};
use crate::domain::error::OpsCoreError;
use crate::domain::workflow::WorkflowSession;
use crate::infrastructure::template_parser::TemplateParser;
use crate::presentation::middleware::{log_requests, require_bearer};

/// Wall-clock budget for a single request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct AppState {
    pub lifecycle: Arc<LifecycleManager>,
    pub engine: Arc<WorkflowEngine>,
    pub api_key: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route(
            "/v1/opscore/agent/:agent_id/state",
            post(update_agent_state).get(get_agent_state),
        )
        .route(
            "/v1/opscore/agent/:agent_id/state/history",
            get(get_agent_state_history),
        )
        .route("/v1/opscore/agent/:agent_id/workflow", post(trigger_workflow))
        .route("/v1/opscore/agents", get(list_agents))
        .route("/v1/opscore/session/:session_id", get(get_session))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_bearer,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/v1/opscore/internal/agent/notify", post(agent_notification))
        .merge(protected)
        .layer(middleware::from_fn(log_requests))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}

// ============================================================================
// Request / Response Shapes
// ============================================================================

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl StatusResponse {
    fn success(message: impl Into<String>) -> Self {
        Self {
            status: "success",
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateUpdatePayload {
    agent_id: String,
    timestamp: String,
    state: String,
    #[serde(default)]
    details: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkflowTriggerRequest {
    #[serde(default)]
    workflow_definition_id: Option<String>,
    #[serde(default)]
    workflow_definition: Option<serde_json::Value>,
    #[serde(default)]
    initial_payload: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkflowTriggerResponse {
    session_id: String,
    workflow_id: String,
    enqueued_task_count: usize,
}

/// Webhook body from the routing service. These field names are snake_case
/// on the wire, unlike the camelCase agent records they carry.
#[derive(Debug, Deserialize)]
struct AgentNotificationPayload {
    event_type: String,
    agent_details: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    limit: Option<usize>,
}

fn parse_body<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, OpsCoreError> {
    serde_json::from_value(value).map_err(|e| OpsCoreError::InvalidRequest(e.to_string()))
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Agent state callback. The body's `agentId` must match the path.
async fn update_agent_state(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<StatusResponse>, OpsCoreError> {
    let payload: StateUpdatePayload = parse_body(body)?;

    if payload.agent_id != agent_id {
        warn!(
            path_agent_id = %agent_id,
            body_agent_id = %payload.agent_id,
            "agent id mismatch in state callback"
        );
        return Err(OpsCoreError::InvalidRequest(
            "agentId in body does not match path".to_string(),
        ));
    }

    let timestamp: DateTime<Utc> = payload
        .timestamp
        .parse()
        .map_err(|_| OpsCoreError::InvalidRequest(format!("invalid timestamp: {}", payload.timestamp)))?;

    state
        .lifecycle
        .set_state(&agent_id, &payload.state, timestamp, payload.details)
        .await?;
    Ok(Json(StatusResponse::success("State update accepted")))
}

async fn get_agent_state(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Result<Json<AgentState>, OpsCoreError> {
    match state.lifecycle.get_state(&agent_id).await? {
        Some(record) => Ok(Json(record)),
        None => Err(OpsCoreError::AgentNotFound(agent_id)),
    }
}

async fn get_agent_state_history(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<AgentState>>, OpsCoreError> {
    let history = state
        .lifecycle
        .get_state_history(&agent_id, query.limit)
        .await?;
    Ok(Json(history))
}

/// Trigger a workflow for an agent. Exactly one of `workflowDefinitionId`
/// and `workflowDefinition` must be present.
async fn trigger_workflow(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<WorkflowTriggerResponse>, OpsCoreError> {
    let request: WorkflowTriggerRequest = parse_body(body)?;

    let reference = match (request.workflow_definition_id, request.workflow_definition) {
        (Some(id), None) => WorkflowReference::Stored(id),
        (None, Some(inline)) => WorkflowReference::Inline(TemplateParser::from_value(inline)?),
        _ => {
            return Err(OpsCoreError::InvalidRequest(
                "exactly one of workflowDefinitionId and workflowDefinition is required"
                    .to_string(),
            ));
        }
    };

    let outcome = state
        .engine
        .trigger(&agent_id, reference, request.initial_payload)
        .await?;
    Ok(Json(WorkflowTriggerResponse {
        session_id: outcome.session_id,
        workflow_id: outcome.workflow_id,
        enqueued_task_count: outcome.enqueued_task_count,
    }))
}

async fn list_agents(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AgentRegistration>>, OpsCoreError> {
    Ok(Json(state.lifecycle.list_agents().await?))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<WorkflowSession>, OpsCoreError> {
    match state.lifecycle.get_session(&session_id).await? {
        Some(session) => Ok(Json(session)),
        None => Err(OpsCoreError::SessionNotFound(session_id)),
    }
}

/// Registration/deregistration webhook from the routing service.
async fn agent_notification(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<StatusResponse>, OpsCoreError> {
    let payload: AgentNotificationPayload = parse_body(body)?;

    match payload.event_type.to_uppercase().as_str() {
        "REGISTER" => {
            let registration: AgentRegistration = parse_body(payload.agent_details)?;
            let agent_id = registration.agent_id.clone();
            state.lifecycle.register_agent(registration).await?;
            Ok(Json(StatusResponse::success(format!(
                "Agent {agent_id} registered successfully"
            ))))
        }
        "DEREGISTER" => {
            // Acknowledged but not acted upon; registrations are immutable
            // and deregistration is an operator concern.
            info!("DEREGISTER notification received; no action taken");
            Ok(Json(StatusResponse::success(
                "DEREGISTER notification received",
            )))
        }
        other => Err(OpsCoreError::InvalidRequest(format!(
            "unknown event type: {other}"
        ))),
    }
}
