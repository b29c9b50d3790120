// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Workflow template parsing.
//!
//! Templates arrive as serialized text (JSON or YAML, autodetected) or as
//! already-parsed JSON values (inline definitions on a trigger). Both paths
//! go through the same validation: a name, a version, and a non-empty task
//! list where every descriptor names its task. Missing ids are assigned from
//! the template name.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::domain::error::OpsCoreError;
use crate::domain::workflow::{TaskDescriptor, WorkflowDefinition};

#[derive(Debug, Error)]
pub enum TemplateParseError {
    #[error("failed to read {path}: {error}")]
    Io { path: String, error: String },

    #[error("template syntax error: {0}")]
    Syntax(String),

    #[error("invalid template: {0}")]
    Validation(String),
}

impl From<TemplateParseError> for OpsCoreError {
    fn from(err: TemplateParseError) -> Self {
        match err {
            TemplateParseError::Io { .. } => OpsCoreError::Configuration(err.to_string()),
            other => OpsCoreError::InvalidRequest(other.to_string()),
        }
    }
}

/// External template shape before validation. Field names are camelCase on
/// the wire, matching the stored definition records.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDefinition {
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tasks: Vec<RawTask>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTask {
    task_name: String,
    #[serde(default)]
    parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    max_retries: Option<u32>,
}

pub struct TemplateParser;

impl TemplateParser {
    /// Parse a template string. JSON is detected by its leading delimiter;
    /// anything else is treated as YAML.
    pub fn parse_str(content: &str) -> Result<WorkflowDefinition, TemplateParseError> {
        let trimmed = content.trim_start();
        let raw: RawDefinition = if trimmed.starts_with('{') || trimmed.starts_with('[') {
            serde_json::from_str(content)
                .map_err(|e| TemplateParseError::Syntax(format!("json: {e}")))?
        } else {
            serde_yaml::from_str(content)
                .map_err(|e| TemplateParseError::Syntax(format!("yaml: {e}")))?
        };
        Self::validate(raw)
    }

    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<WorkflowDefinition, TemplateParseError> {
        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|e| TemplateParseError::Io {
                path: path.as_ref().display().to_string(),
                error: e.to_string(),
            })?;
        Self::parse_str(&content)
    }

    /// Validate an already-parsed JSON value (inline trigger definitions).
    pub fn from_value(value: serde_json::Value) -> Result<WorkflowDefinition, TemplateParseError> {
        let raw: RawDefinition = serde_json::from_value(value)
            .map_err(|e| TemplateParseError::Syntax(e.to_string()))?;
        Self::validate(raw)
    }

    fn validate(raw: RawDefinition) -> Result<WorkflowDefinition, TemplateParseError> {
        if raw.name.trim().is_empty() {
            return Err(TemplateParseError::Validation(
                "workflow name must not be empty".to_string(),
            ));
        }
        if raw.tasks.is_empty() {
            return Err(TemplateParseError::Validation(
                "workflow must declare at least one task".to_string(),
            ));
        }

        let mut tasks = Vec::with_capacity(raw.tasks.len());
        for (index, task) in raw.tasks.into_iter().enumerate() {
            if task.task_name.trim().is_empty() {
                return Err(TemplateParseError::Validation(format!(
                    "task #{index} is missing taskName"
                )));
            }
            tasks.push(TaskDescriptor {
                task_name: task.task_name,
                parameters: task.parameters,
                max_retries: task.max_retries,
            });
        }

        let id = match raw.id {
            Some(id) if !id.trim().is_empty() => id,
            _ => Self::generate_id(&raw.name),
        };

        let definition = WorkflowDefinition {
            id,
            name: raw.name,
            version: raw.version.unwrap_or_else(|| "1.0".to_string()),
            description: raw.description,
            tasks,
        };
        debug!(workflow_id = %definition.id, name = %definition.name, "template parsed");
        Ok(definition)
    }

    fn generate_id(name: &str) -> String {
        format!("wf_{}", name.trim().replace(' ', "_"))
    }
}
