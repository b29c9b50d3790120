// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-memory state store.
//!
//! Process-local mappings guarded by one mutex per collection. Used by tests
//! and single-node development; semantics match the Redis backend.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::domain::agent::{AgentRegistration, AgentState};
use crate::domain::error::OpsCoreError;
use crate::domain::repository::{SessionPatch, StateStore};
use crate::domain::workflow::{WorkflowDefinition, WorkflowSession};

/// Bounded per-agent history retention.
const MAX_STATE_HISTORY: usize = 256;

#[derive(Default)]
pub struct InMemoryStateStore {
    registrations: Mutex<HashMap<String, AgentRegistration>>,
    latest_states: Mutex<HashMap<String, AgentState>>,
    state_histories: Mutex<HashMap<String, Vec<AgentState>>>,
    sessions: Mutex<HashMap<String, WorkflowSession>>,
    definitions: Mutex<HashMap<String, WorkflowDefinition>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock<'a, T>(mutex: &'a Mutex<T>) -> Result<MutexGuard<'a, T>, OpsCoreError> {
        mutex
            .lock()
            .map_err(|_| OpsCoreError::storage("state store mutex poisoned"))
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn save_agent_registration(&self, reg: &AgentRegistration) -> Result<(), OpsCoreError> {
        let mut registrations = Self::lock(&self.registrations)?;
        if registrations.contains_key(&reg.agent_id) {
            return Err(OpsCoreError::AgentAlreadyExists(reg.agent_id.clone()));
        }
        registrations.insert(reg.agent_id.clone(), reg.clone());
        debug!(agent_id = %reg.agent_id, "registration saved");
        Ok(())
    }

    async fn read_agent_registration(
        &self,
        agent_id: &str,
    ) -> Result<Option<AgentRegistration>, OpsCoreError> {
        let registrations = Self::lock(&self.registrations)?;
        Ok(registrations.get(agent_id).cloned())
    }

    async fn agent_exists(&self, agent_id: &str) -> Result<bool, OpsCoreError> {
        let registrations = Self::lock(&self.registrations)?;
        Ok(registrations.contains_key(agent_id))
    }

    async fn list_agent_registrations(&self) -> Result<Vec<AgentRegistration>, OpsCoreError> {
        let registrations = Self::lock(&self.registrations)?;
        let mut all: Vec<_> = registrations.values().cloned().collect();
        all.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        Ok(all)
    }

    async fn save_agent_state(&self, state: &AgentState) -> Result<(), OpsCoreError> {
        {
            let mut histories = Self::lock(&self.state_histories)?;
            let history = histories.entry(state.agent_id.clone()).or_default();
            history.push(state.clone());
            if history.len() > MAX_STATE_HISTORY {
                let excess = history.len() - MAX_STATE_HISTORY;
                history.drain(..excess);
            }
        }

        let mut latest = Self::lock(&self.latest_states)?;
        match latest.get(&state.agent_id) {
            Some(current) if state.timestamp < current.timestamp => {
                // Late-arriving observation: history only.
                debug!(agent_id = %state.agent_id, "stale state kept out of latest");
            }
            _ => {
                latest.insert(state.agent_id.clone(), state.clone());
            }
        }
        Ok(())
    }

    async fn read_latest_agent_state(
        &self,
        agent_id: &str,
    ) -> Result<Option<AgentState>, OpsCoreError> {
        let latest = Self::lock(&self.latest_states)?;
        Ok(latest.get(agent_id).cloned())
    }

    async fn read_agent_state_history(
        &self,
        agent_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<AgentState>, OpsCoreError> {
        let histories = Self::lock(&self.state_histories)?;
        let history = histories.get(agent_id).map(Vec::as_slice).unwrap_or(&[]);
        let take = limit.unwrap_or(history.len());
        Ok(history.iter().rev().take(take).cloned().collect())
    }

    async fn create_session(&self, session: &WorkflowSession) -> Result<(), OpsCoreError> {
        let mut sessions = Self::lock(&self.sessions)?;
        if sessions.contains_key(&session.session_id) {
            return Err(OpsCoreError::storage(format!(
                "session {} already exists",
                session.session_id
            )));
        }
        sessions.insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn read_session(
        &self,
        session_id: &str,
    ) -> Result<Option<WorkflowSession>, OpsCoreError> {
        let sessions = Self::lock(&self.sessions)?;
        Ok(sessions.get(session_id).cloned())
    }

    async fn update_session_data(
        &self,
        session_id: &str,
        patch: SessionPatch,
    ) -> Result<WorkflowSession, OpsCoreError> {
        let mut sessions = Self::lock(&self.sessions)?;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| OpsCoreError::SessionNotFound(session_id.to_string()))?;

        if let Some(status) = patch.status {
            session.status = status;
        }
        if let Some(metadata) = patch.metadata {
            session.metadata.extend(metadata);
        }
        session.last_updated_time = Utc::now();
        Ok(session.clone())
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool, OpsCoreError> {
        let mut sessions = Self::lock(&self.sessions)?;
        Ok(sessions.remove(session_id).is_some())
    }

    async fn save_workflow_definition(
        &self,
        def: &WorkflowDefinition,
    ) -> Result<(), OpsCoreError> {
        let mut definitions = Self::lock(&self.definitions)?;
        definitions.insert(def.id.clone(), def.clone());
        Ok(())
    }

    async fn read_workflow_definition(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowDefinition>, OpsCoreError> {
        let definitions = Self::lock(&self.definitions)?;
        Ok(definitions.get(workflow_id).cloned())
    }

    async fn clear_all(&self) -> Result<(), OpsCoreError> {
        Self::lock(&self.registrations)?.clear();
        Self::lock(&self.latest_states)?.clear();
        Self::lock(&self.state_histories)?.clear();
        Self::lock(&self.sessions)?.clear();
        Self::lock(&self.definitions)?.clear();
        Ok(())
    }
}
