// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Workflow Engine Application Service
//!
//! Loads and persists workflow templates, resolves trigger requests against
//! stored definitions, opens a session, and fans the definition's task list
//! out onto the pending-task queue. Dispatch happens elsewhere (see
//! `dispatcher`); by the time a trigger returns, every task of the workflow
//! is queued and the session is `started`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::application::lifecycle::LifecycleManager;
use crate::application::task_queue::TaskQueue;
use crate::domain::error::OpsCoreError;
use crate::domain::repository::StateStore;
use crate::domain::workflow::{Task, WorkflowDefinition};
use crate::infrastructure::template_parser::TemplateParser;

/// How a trigger names its workflow: by stored id, or with an inline
/// definition that is persisted on first use.
#[derive(Debug, Clone)]
pub enum WorkflowReference {
    Stored(String),
    Inline(WorkflowDefinition),
}

/// What a successful trigger reports back.
#[derive(Debug, Clone)]
pub struct TriggerOutcome {
    pub session_id: String,
    pub workflow_id: String,
    pub enqueued_task_count: usize,
}

pub struct WorkflowEngine {
    store: Arc<dyn StateStore>,
    lifecycle: Arc<LifecycleManager>,
    queue: Arc<TaskQueue>,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn StateStore>,
        lifecycle: Arc<LifecycleManager>,
        queue: Arc<TaskQueue>,
    ) -> Self {
        Self {
            store,
            lifecycle,
            queue,
        }
    }

    /// Persist a validated definition and return its id.
    pub async fn create_workflow(
        &self,
        definition: WorkflowDefinition,
    ) -> Result<String, OpsCoreError> {
        self.store.save_workflow_definition(&definition).await?;
        info!(workflow_id = %definition.id, name = %definition.name, "workflow definition saved");
        Ok(definition.id)
    }

    /// Parse a serialized template (JSON or YAML) and persist it.
    pub async fn create_workflow_from_str(&self, content: &str) -> Result<String, OpsCoreError> {
        let definition = TemplateParser::parse_str(content)?;
        self.create_workflow(definition).await
    }

    pub async fn get_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowDefinition>, OpsCoreError> {
        self.store.read_workflow_definition(workflow_id).await
    }

    /// Load every definition file from a directory at startup. Any file that
    /// fails to parse fails the whole seed pass.
    pub async fn seed_from_dir<P: AsRef<Path>>(&self, dir: P) -> Result<usize, OpsCoreError> {
        let entries = std::fs::read_dir(dir.as_ref()).map_err(|e| {
            OpsCoreError::Configuration(format!(
                "cannot read seed directory {}: {e}",
                dir.as_ref().display()
            ))
        })?;

        let mut count = 0;
        for entry in entries {
            let path = entry
                .map_err(|e| OpsCoreError::Configuration(format!("seed directory: {e}")))?
                .path();
            let matches = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| matches!(ext, "json" | "yaml" | "yml"))
                .unwrap_or(false);
            if !matches {
                continue;
            }

            let definition = TemplateParser::parse_file(&path).map_err(|e| {
                OpsCoreError::Configuration(format!("seed file {}: {e}", path.display()))
            })?;
            let id = self.create_workflow(definition).await?;
            info!(workflow_id = %id, path = %path.display(), "seeded workflow definition");
            count += 1;
        }
        Ok(count)
    }

    /// Trigger a workflow for an agent: resolve the definition, open a
    /// session, and enqueue every task in declared order.
    pub async fn trigger(
        &self,
        agent_id: &str,
        reference: WorkflowReference,
        initial_payload: Option<serde_json::Value>,
    ) -> Result<TriggerOutcome, OpsCoreError> {
        let definition = self.resolve_definition(reference).await?;

        let session = self
            .lifecycle
            .start_session(agent_id, &definition.id, HashMap::new())
            .await?;

        let mut enqueued = 0;
        for (index, descriptor) in definition.tasks.iter().enumerate() {
            let payload = match (&initial_payload, index) {
                (Some(payload), 0) => payload.clone(),
                _ => serde_json::Value::Object(descriptor.parameters.clone()),
            };
            let task = Task::new(&session, descriptor, payload);
            self.queue.enqueue(task);
            enqueued += 1;
        }

        info!(
            session_id = %session.session_id,
            workflow_id = %definition.id,
            %agent_id,
            task_count = enqueued,
            "workflow triggered"
        );
        Ok(TriggerOutcome {
            session_id: session.session_id,
            workflow_id: definition.id,
            enqueued_task_count: enqueued,
        })
    }

    /// Resolve a trigger's workflow reference.
    ///
    /// Stored ids must exist. Inline definitions are persisted on first use;
    /// when the id is already taken, the payloads must be structurally equal
    /// or the trigger is rejected with a conflict.
    async fn resolve_definition(
        &self,
        reference: WorkflowReference,
    ) -> Result<WorkflowDefinition, OpsCoreError> {
        match reference {
            WorkflowReference::Stored(id) => self
                .store
                .read_workflow_definition(&id)
                .await?
                .ok_or(OpsCoreError::WorkflowDefinitionNotFound(id)),
            WorkflowReference::Inline(definition) => {
                match self.store.read_workflow_definition(&definition.id).await? {
                    Some(existing) if existing != definition => {
                        warn!(workflow_id = %definition.id, "inline definition conflicts with stored one");
                        Err(OpsCoreError::WorkflowDefinitionConflict(definition.id))
                    }
                    Some(existing) => Ok(existing),
                    None => {
                        self.store.save_workflow_definition(&definition).await?;
                        info!(workflow_id = %definition.id, "inline workflow definition saved");
                        Ok(definition)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::AgentRegistration;
    use crate::domain::workflow::TaskDescriptor;
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::memory_store::InMemoryStateStore;
    use chrono::Utc;

    struct Fixture {
        engine: WorkflowEngine,
        queue: Arc<TaskQueue>,
    }

    async fn fixture() -> Fixture {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let events = EventBus::with_default_capacity();
        let lifecycle = Arc::new(LifecycleManager::new(store.clone(), events));
        let queue = Arc::new(TaskQueue::new());
        let engine = WorkflowEngine::new(store, lifecycle.clone(), queue.clone());

        lifecycle
            .register_agent(AgentRegistration {
                agent_id: "a1".to_string(),
                agent_name: "Agent One".to_string(),
                version: "1.0".to_string(),
                capabilities: vec![],
                contact_endpoint: "http://a1:9000/run".to_string(),
                metadata: HashMap::new(),
                registration_time: Utc::now(),
            })
            .await
            .unwrap();

        Fixture { engine, queue }
    }

    fn definition(id: &str, tasks: &[&str]) -> WorkflowDefinition {
        WorkflowDefinition {
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
        }
    }

    #[tokio::test]
    async fn trigger_enqueues_every_task_in_order() {
        let fx = fixture().await;
        fx.engine
            .create_workflow(definition("wf_two", &["t1", "t2"]))
            .await
            .unwrap();

        let outcome = fx
            .engine
            .trigger("a1", WorkflowReference::Stored("wf_two".to_string()), None)
            .await
            .unwrap();

        assert_eq!(outcome.workflow_id, "wf_two");
        assert_eq!(outcome.enqueued_task_count, 2);
        assert_eq!(fx.queue.len(), 2);
        assert_eq!(fx.queue.try_dequeue().unwrap().task_name, "t1");
        assert_eq!(fx.queue.try_dequeue().unwrap().task_name, "t2");
    }

    #[tokio::test]
    async fn trigger_unknown_definition_fails() {
        let fx = fixture().await;
        let err = fx
            .engine
            .trigger("a1", WorkflowReference::Stored("wf_ghost".to_string()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, OpsCoreError::WorkflowDefinitionNotFound(_)));
    }

    #[tokio::test]
    async fn trigger_unknown_agent_fails_before_enqueue() {
        let fx = fixture().await;
        fx.engine
            .create_workflow(definition("wf_one", &["t1"]))
            .await
            .unwrap();

        let err = fx
            .engine
            .trigger(
                "ghost",
                WorkflowReference::Stored("wf_one".to_string()),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OpsCoreError::AgentNotFound(_)));
        assert!(fx.queue.is_empty());
    }

    #[tokio::test]
    async fn inline_definition_is_saved_then_conflicts_on_change() {
        let fx = fixture().await;

        let inline = definition("wf_inline", &["t1"]);
        fx.engine
            .trigger("a1", WorkflowReference::Inline(inline.clone()), None)
            .await
            .unwrap();

        // Identical payload triggers again fine.
        fx.engine
            .trigger("a1", WorkflowReference::Inline(inline), None)
            .await
            .unwrap();

        // Same id, different tasks: conflict.
        let changed = definition("wf_inline", &["t1", "t2"]);
        let err = fx
            .engine
            .trigger("a1", WorkflowReference::Inline(changed), None)
            .await
            .unwrap_err();
        assert!(matches!(err, OpsCoreError::WorkflowDefinitionConflict(_)));
    }

    #[tokio::test]
    async fn seed_loads_json_and_yaml_files() {
        let fx = fixture().await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("sync.yaml"),
            "name: data-sync\ntasks:\n  - taskName: extract\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("report.json"),
            r#"{"id": "wf_report", "name": "report", "tasks": [{"taskName": "render"}]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let count = fx.engine.seed_from_dir(dir.path()).await.unwrap();
        assert_eq!(count, 2);
        assert!(fx.engine.get_workflow("wf_data-sync").await.unwrap().is_some());
        assert!(fx.engine.get_workflow("wf_report").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn seed_fails_on_unparsable_file() {
        let fx = fixture().await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();

        let err = fx.engine.seed_from_dir(dir.path()).await.unwrap_err();
        assert!(matches!(err, OpsCoreError::Configuration(_)));
    }

    #[tokio::test]
    async fn initial_payload_overrides_first_task_only() {
        let fx = fixture().await;
        let mut def = definition("wf_payload", &["t1", "t2"]);
        def.tasks[0]
            .parameters
            .insert("declared".to_string(), serde_json::json!(true));
        def.tasks[1]
            .parameters
            .insert("declared".to_string(), serde_json::json!(true));
        fx.engine.create_workflow(def).await.unwrap();

        fx.engine
            .trigger(
                "a1",
                WorkflowReference::Stored("wf_payload".to_string()),
                Some(serde_json::json!({"override": true})),
            )
            .await
            .unwrap();

        let first = fx.queue.try_dequeue().unwrap();
        let second = fx.queue.try_dequeue().unwrap();
        assert_eq!(first.payload["override"], true);
        assert!(first.payload.get("declared").is_none());
        assert_eq!(second.payload["declared"], true);
    }
}
