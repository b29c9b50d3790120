// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Workflow domain records: definitions, sessions and task instances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Default retry budget for a task whose descriptor does not override it.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

fn default_version() -> String {
    "1.0".to_string()
}

/// One entry in a workflow definition's ordered task list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDescriptor {
    pub task_name: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

/// A declarative, named, versioned, ordered list of task descriptors.
/// Immutable once saved under an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tasks: Vec<TaskDescriptor>,
}

/// Terminal and non-terminal session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Started,
    Running,
    Completed,
    Failed,
}

/// A runtime instance of a workflow for a specific agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSession {
    pub session_id: String,
    pub agent_id: String,
    pub workflow_id: String,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    pub last_updated_time: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl WorkflowSession {
    pub fn new(
        agent_id: impl Into<String>,
        workflow_id: impl Into<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: format!("session_{}", Uuid::new_v4()),
            agent_id: agent_id.into(),
            workflow_id: workflow_id.into(),
            status: SessionStatus::Started,
            start_time: now,
            last_updated_time: now,
            metadata,
        }
    }
}

/// A queued unit of work emitted from a workflow trigger.
///
/// Tasks are transient: they live in the queue and in in-flight dispatch
/// state, never in the state store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: String,
    pub session_id: String,
    pub agent_id: String,
    pub workflow_id: String,
    pub task_name: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub retry_count: u32,
    pub max_retries: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Earliest-dispatch gate for scheduled/backed-off tasks. Process-local.
    #[serde(skip)]
    pub not_before: Option<DateTime<Utc>>,
    /// Consecutive contention re-queues. Distinct from `retry_count`:
    /// contention is not failure. Process-local.
    #[serde(skip)]
    pub contention_requeues: u32,
}

impl Task {
    pub fn new(
        session: &WorkflowSession,
        descriptor: &TaskDescriptor,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            task_id: format!("task_{}", Uuid::new_v4()),
            session_id: session.session_id.clone(),
            agent_id: session.agent_id.clone(),
            workflow_id: session.workflow_id.clone(),
            task_name: descriptor.task_name.clone(),
            payload,
            retry_count: 0,
            max_retries: descriptor.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            enqueued_at: Utc::now(),
            not_before: None,
            contention_requeues: 0,
        }
    }
}
