//! Lifecycle management: agent registration, state transitions, sessions.
//!
//! Operates exclusively through the state store; every other component that
//! needs lifecycle data goes through this service.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::domain::agent::{AgentRegistration, AgentState, LifecycleState};
use crate::domain::error::OpsCoreError;
use crate::domain::repository::{SessionPatch, StateStore};
use crate::domain::workflow::WorkflowSession;
use crate::infrastructure::event_bus::{EventBus, OrchestrationEvent};

pub struct LifecycleManager {
    store: Arc<dyn StateStore>,
    events: EventBus,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn StateStore>, events: EventBus) -> Self {
        Self { store, events }
    }

    /// Register a new agent and record its initial `UNKNOWN` state.
    ///
    /// The two writes are not transactional: if the initial state write
    /// fails, the registration stays behind and is logged as orphaned.
    pub async fn register_agent(
        &self,
        registration: AgentRegistration,
    ) -> Result<AgentRegistration, OpsCoreError> {
        self.store.save_agent_registration(&registration).await?;

        let initial = AgentState::initial(&registration.agent_id);
        if let Err(e) = self.store.save_agent_state(&initial).await {
            error!(
                agent_id = %registration.agent_id,
                error = %e,
                "initial state write failed; registration left orphaned"
            );
            return Err(e);
        }

        info!(
            agent_id = %registration.agent_id,
            agent_name = %registration.agent_name,
            "agent registered"
        );
        self.events.publish(OrchestrationEvent::AgentRegistered {
            agent_id: registration.agent_id.clone(),
            agent_name: registration.agent_name.clone(),
        });
        Ok(registration)
    }

    /// Record a state callback for a registered agent.
    pub async fn set_state(
        &self,
        agent_id: &str,
        new_state: &str,
        timestamp: DateTime<Utc>,
        details: Option<HashMap<String, serde_json::Value>>,
    ) -> Result<AgentState, OpsCoreError> {
        if !self.store.agent_exists(agent_id).await? {
            warn!(%agent_id, "state callback for unknown agent");
            return Err(OpsCoreError::AgentNotFound(agent_id.to_string()));
        }

        let state = LifecycleState::parse(new_state)
            .ok_or_else(|| OpsCoreError::InvalidState(new_state.to_string()))?;

        let record = AgentState {
            agent_id: agent_id.to_string(),
            timestamp,
            state,
            details,
        };
        self.store.save_agent_state(&record).await?;

        info!(%agent_id, state = %state, "agent state updated");
        self.events.publish(OrchestrationEvent::StateChanged {
            agent_id: agent_id.to_string(),
            state,
            timestamp,
        });
        Ok(record)
    }

    pub async fn get_state(&self, agent_id: &str) -> Result<Option<AgentState>, OpsCoreError> {
        self.store.read_latest_agent_state(agent_id).await
    }

    pub async fn get_state_history(
        &self,
        agent_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<AgentState>, OpsCoreError> {
        if !self.store.agent_exists(agent_id).await? {
            return Err(OpsCoreError::AgentNotFound(agent_id.to_string()));
        }
        self.store.read_agent_state_history(agent_id, limit).await
    }

    pub async fn get_registration(
        &self,
        agent_id: &str,
    ) -> Result<Option<AgentRegistration>, OpsCoreError> {
        self.store.read_agent_registration(agent_id).await
    }

    pub async fn list_agents(&self) -> Result<Vec<AgentRegistration>, OpsCoreError> {
        self.store.list_agent_registrations().await
    }

    /// Open a session after verifying both the agent and the workflow exist.
    pub async fn start_session(
        &self,
        agent_id: &str,
        workflow_id: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<WorkflowSession, OpsCoreError> {
        if !self.store.agent_exists(agent_id).await? {
            return Err(OpsCoreError::AgentNotFound(agent_id.to_string()));
        }
        if self
            .store
            .read_workflow_definition(workflow_id)
            .await?
            .is_none()
        {
            return Err(OpsCoreError::WorkflowDefinitionNotFound(
                workflow_id.to_string(),
            ));
        }

        let session = WorkflowSession::new(agent_id, workflow_id, metadata);
        self.store.create_session(&session).await?;
        info!(
            session_id = %session.session_id,
            %agent_id,
            %workflow_id,
            "session started"
        );
        Ok(session)
    }

    pub async fn update_session(
        &self,
        session_id: &str,
        patch: SessionPatch,
    ) -> Result<WorkflowSession, OpsCoreError> {
        let session = self.store.update_session_data(session_id, patch).await?;
        self.events.publish(OrchestrationEvent::SessionUpdated {
            session_id: session.session_id.clone(),
            status: session.status,
        });
        Ok(session)
    }

    pub async fn get_session(
        &self,
        session_id: &str,
    ) -> Result<Option<WorkflowSession>, OpsCoreError> {
        self.store.read_session(session_id).await
    }
}
