// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! State-store contract tests against the in-memory backend.
//!
//! Both backends promise the same semantics; these tests pin the contract
//! where it can run without external services: save-then-read equality,
//! duplicate rejection, the monotone-latest rule, bounded newest-first
//! history, and session patch merging.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use ops_core::domain::agent::{AgentRegistration, AgentState, LifecycleState};
use ops_core::domain::error::OpsCoreError;
use ops_core::domain::repository::{SessionPatch, StateStore};
use ops_core::domain::workflow::{
    SessionStatus, TaskDescriptor, WorkflowDefinition, WorkflowSession,
};
use ops_core::infrastructure::memory_store::InMemoryStateStore;

fn store() -> Arc<dyn StateStore> {
    Arc::new(InMemoryStateStore::new())
}

fn registration(agent_id: &str) -> AgentRegistration {
    AgentRegistration {
        agent_id: agent_id.to_string(),
        agent_name: format!("Agent {agent_id}"),
        version: "1.0".to_string(),
        capabilities: vec!["translate".to_string()],
        contact_endpoint: "http://agent:9000/run".to_string(),
        metadata: HashMap::new(),
        registration_time: Utc::now(),
    }
}

fn state(agent_id: &str, state: LifecycleState, offset_secs: i64) -> AgentState {
    AgentState {
        agent_id: agent_id.to_string(),
        timestamp: Utc::now() + Duration::seconds(offset_secs),
        state,
        details: None,
    }
}

fn definition(id: &str) -> WorkflowDefinition {
    WorkflowDefinition {
        id: id.to_string(),
        name: id.to_string(),
        version: "1.0".to_string(),
        description: Some("test definition".to_string()),
        tasks: vec![TaskDescriptor {
            task_name: "t1".to_string(),
            parameters: serde_json::Map::new(),
            max_retries: None,
        }],
    }
}

#[tokio::test]
async fn registration_roundtrip_is_structurally_equal() {
    let store = store();
    let reg = registration("a1");
    store.save_agent_registration(&reg).await.unwrap();

    let read = store.read_agent_registration("a1").await.unwrap().unwrap();
    assert_eq!(read, reg);
    assert!(store.agent_exists("a1").await.unwrap());
    assert!(!store.agent_exists("a2").await.unwrap());
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let store = store();
    store
        .save_agent_registration(&registration("a1"))
        .await
        .unwrap();
    let err = store
        .save_agent_registration(&registration("a1"))
        .await
        .unwrap_err();
    assert!(matches!(err, OpsCoreError::AgentAlreadyExists(_)));
}

#[tokio::test]
async fn latest_state_is_monotone_in_timestamp() {
    let store = store();
    let newer = state("a1", LifecycleState::Active, 10);
    let older = state("a1", LifecycleState::Idle, -10);

    store.save_agent_state(&newer).await.unwrap();
    store.save_agent_state(&older).await.unwrap();

    let latest = store.read_latest_agent_state("a1").await.unwrap().unwrap();
    assert_eq!(latest.state, LifecycleState::Active);

    // The stale observation still landed in history.
    let history = store.read_agent_state_history("a1", None).await.unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn equal_timestamp_save_is_idempotent_on_latest() {
    let store = store();
    let first = state("a1", LifecycleState::Idle, 0);
    let mut second = first.clone();
    second.state = LifecycleState::Active;

    store.save_agent_state(&first).await.unwrap();
    store.save_agent_state(&second).await.unwrap();

    // Equal timestamps: the later write wins latest, and history holds both.
    let latest = store.read_latest_agent_state("a1").await.unwrap().unwrap();
    assert_eq!(latest.state, LifecycleState::Active);
    let history = store.read_agent_state_history("a1", None).await.unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn history_is_newest_first_and_limited() {
    let store = store();
    for i in 0..5 {
        store
            .save_agent_state(&state("a1", LifecycleState::Active, i))
            .await
            .unwrap();
    }

    let history = store.read_agent_state_history("a1", Some(2)).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].timestamp > history[1].timestamp);

    let full = store.read_agent_state_history("a1", None).await.unwrap();
    assert_eq!(full.len(), 5);
}

#[tokio::test]
async fn session_create_read_update_delete() {
    let store = store();
    let session = WorkflowSession::new("a1", "wf_test", HashMap::new());
    store.create_session(&session).await.unwrap();

    let read = store
        .read_session(&session.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read, session);

    // Duplicate id is a storage error.
    let err = store.create_session(&session).await.unwrap_err();
    assert!(matches!(err, OpsCoreError::Storage(_)));

    let mut metadata = HashMap::new();
    metadata.insert("progress".to_string(), serde_json::json!(0.5));
    let updated = store
        .update_session_data(
            &session.session_id,
            SessionPatch {
                status: Some(SessionStatus::Running),
                metadata: Some(metadata),
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.status, SessionStatus::Running);
    assert_eq!(updated.metadata["progress"], 0.5);
    assert!(updated.last_updated_time >= session.last_updated_time);

    assert!(store.delete_session(&session.session_id).await.unwrap());
    assert!(!store.delete_session(&session.session_id).await.unwrap());
    assert!(store
        .read_session(&session.session_id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn update_unknown_session_is_not_found() {
    let store = store();
    let err = store
        .update_session_data("session_ghost", SessionPatch::default())
        .await
        .unwrap_err();
    assert!(matches!(err, OpsCoreError::SessionNotFound(_)));
}

#[tokio::test]
async fn workflow_definition_roundtrip() {
    let store = store();
    let def = definition("wf_roundtrip");
    store.save_workflow_definition(&def).await.unwrap();

    let read = store
        .read_workflow_definition("wf_roundtrip")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read, def);
    assert!(store
        .read_workflow_definition("wf_ghost")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn clear_all_wipes_every_collection() {
    let store = store();
    store
        .save_agent_registration(&registration("a1"))
        .await
        .unwrap();
    store
        .save_agent_state(&state("a1", LifecycleState::Idle, 0))
        .await
        .unwrap();
    store
        .create_session(&WorkflowSession::new("a1", "wf_test", HashMap::new()))
        .await
        .unwrap();
    store
        .save_workflow_definition(&definition("wf_test"))
        .await
        .unwrap();

    store.clear_all().await.unwrap();

    assert!(!store.agent_exists("a1").await.unwrap());
    assert!(store
        .read_latest_agent_state("a1")
        .await
        .unwrap()
        .is_none());
    assert!(store
        .read_workflow_definition("wf_test")
        .await
        .unwrap()
        .is_none());
    assert!(store.list_agent_registrations().await.unwrap().is_empty());
}
