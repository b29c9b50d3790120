// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Outbound client for the agent-routing service.
//!
//! Ops-Core treats the routing service as an opaque
//! `POST {base}/v1/agents/{agentId}/run` endpoint. A 2xx answer means
//! "accepted for dispatch" — actual progress is observed later through the
//! agent's own state callbacks. This layer never retries; retry policy
//! belongs to the workflow engine.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::domain::error::OpsCoreError;
use crate::domain::workflow::Task;

/// Sender id stamped on every outbound dispatch payload.
const SENDER_ID: &str = "opscore";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("routing service returned status {status}")]
    Status { status: u16 },

    #[error("routing request failed: {0}")]
    Transport(String),
}

impl DispatchError {
    /// 5xx and transport failures may heal; 4xx will not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status } => *status >= 500,
            Self::Transport(_) => true,
        }
    }
}

/// Seam between the dispatch loop and the routing service; tests substitute
/// a recording implementation.
#[async_trait]
pub trait AgentRouter: Send + Sync {
    async fn dispatch(&self, agent_id: &str, task: &Task) -> Result<(), DispatchError>;
}

pub struct RoutingClient {
    base_url: String,
    client: Client,
    authorization: Option<String>,
}

impl RoutingClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        authorization: Option<String>,
    ) -> Result<Self, OpsCoreError> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            OpsCoreError::Configuration(format!("failed to build routing client: {e}"))
        })?;
        let base_url: String = base_url.into();
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            authorization,
        })
    }

    fn run_url(&self, agent_id: &str) -> String {
        format!("{}/v1/agents/{}/run", self.base_url, agent_id)
    }

    fn build_payload(task: &Task) -> serde_json::Value {
        json!({
            "senderId": SENDER_ID,
            "messageType": "workflow_task",
            "payload": task.payload,
            "opscore_session_id": task.session_id,
            "opscore_task_id": task.task_id,
        })
    }
}

#[async_trait]
impl AgentRouter for RoutingClient {
    async fn dispatch(&self, agent_id: &str, task: &Task) -> Result<(), DispatchError> {
        let url = self.run_url(agent_id);
        debug!(%agent_id, task_id = %task.task_id, %url, "dispatching task");

        let mut request = self.client.post(&url).json(&Self::build_payload(task));
        if let Some(auth) = &self.authorization {
            request = request.header("Authorization", auth);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(%agent_id, task_id = %task.task_id, "dispatch accepted");
            Ok(())
        } else {
            Err(DispatchError::Status {
                status: status.as_u16(),
            })
        }
    }
}
