// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Error taxonomy with a stable mapping to HTTP status codes.
//!
//! The lifecycle and workflow layers raise these typed values; the HTTP
//! middleware maps them to responses. `TaskDispatch` and `Configuration`
//! never reach HTTP clients.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpsCoreError {
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Agent {0} already exists")]
    AgentAlreadyExists(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Workflow definition not found: {0}")]
    WorkflowDefinitionNotFound(String),

    #[error("Workflow definition {0} conflicts with the stored definition")]
    WorkflowDefinitionConflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Task dispatch error for task '{task_id}' to agent '{agent_id}': {message}")]
    TaskDispatch {
        agent_id: String,
        task_id: String,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl OpsCoreError {
    /// Short constructor for storage failures. The backend cause must be
    /// logged at the call site; it is not carried here and never leaks to
    /// external clients.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// HTTP status for this error kind.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::AgentNotFound(_)
            | Self::SessionNotFound(_)
            | Self::WorkflowDefinitionNotFound(_) => 404,
            Self::AgentAlreadyExists(_) | Self::WorkflowDefinitionConflict(_) => 409,
            Self::InvalidState(_) | Self::InvalidRequest(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::Storage(_) => 503,
            Self::TaskDispatch { .. } | Self::Configuration(_) => 500,
        }
    }

    /// Safe summary for the `detail` field of an error response. Storage and
    /// internal kinds are collapsed to generic text.
    pub fn public_detail(&self) -> String {
        match self {
            Self::Storage(_) => "Storage backend unavailable".to_string(),
            Self::TaskDispatch { .. } | Self::Configuration(_) => {
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        }
    }
}
