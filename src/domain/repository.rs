// State Store - Storage Backend Abstraction
//
// Defines the pluggable persistence contract for agent registrations,
// agent states (latest + bounded history), workflow sessions and workflow
// definitions, enabling:
// - In-memory storage for development/testing
// - Redis for production persistence
//
// The store is chosen once at startup; there is no runtime swapping.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::agent::{AgentRegistration, AgentState};
use crate::domain::error::OpsCoreError;
use crate::domain::workflow::{SessionStatus, WorkflowDefinition, WorkflowSession};

/// Storage backend selection for the process-wide state store.
#[derive(Debug, Clone)]
pub enum StorageBackend {
    Memory,
    Redis(RedisConfig),
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
}

/// Partial update applied to an existing workflow session. Absent fields are
/// left untouched; `metadata` entries are merged key-by-key.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub status: Option<SessionStatus>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// Persistence contract shared by every backend.
///
/// All operations are asynchronous; backends performing network I/O surface
/// transient failures as `OpsCoreError::Storage`. Retry policy belongs to the
/// caller.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Save a registration. Fails with `AgentAlreadyExists` on duplicate id.
    async fn save_agent_registration(&self, reg: &AgentRegistration) -> Result<(), OpsCoreError>;

    async fn read_agent_registration(
        &self,
        agent_id: &str,
    ) -> Result<Option<AgentRegistration>, OpsCoreError>;

    async fn agent_exists(&self, agent_id: &str) -> Result<bool, OpsCoreError>;

    async fn list_agent_registrations(&self) -> Result<Vec<AgentRegistration>, OpsCoreError>;

    /// Unconditional append to the agent's history. The `latest` record is
    /// replaced iff `state.timestamp` is greater than or equal to the stored
    /// latest timestamp; a late-arriving older observation stays in history
    /// only.
    async fn save_agent_state(&self, state: &AgentState) -> Result<(), OpsCoreError>;

    async fn read_latest_agent_state(
        &self,
        agent_id: &str,
    ) -> Result<Option<AgentState>, OpsCoreError>;

    /// History, newest first. `limit` bounds the returned slice.
    async fn read_agent_state_history(
        &self,
        agent_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<AgentState>, OpsCoreError>;

    /// Create a session. Duplicate session ids fail with a storage error.
    async fn create_session(&self, session: &WorkflowSession) -> Result<(), OpsCoreError>;

    async fn read_session(&self, session_id: &str)
        -> Result<Option<WorkflowSession>, OpsCoreError>;

    /// Merge a patch into an existing session, stamping `lastUpdatedTime`.
    async fn update_session_data(
        &self,
        session_id: &str,
        patch: SessionPatch,
    ) -> Result<WorkflowSession, OpsCoreError>;

    /// Returns whether a session was actually removed.
    async fn delete_session(&self, session_id: &str) -> Result<bool, OpsCoreError>;

    async fn save_workflow_definition(&self, def: &WorkflowDefinition)
        -> Result<(), OpsCoreError>;

    async fn read_workflow_definition(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowDefinition>, OpsCoreError>;

    /// Wipe everything. Test/setup only.
    async fn clear_all(&self) -> Result<(), OpsCoreError>;
}

/// Factory for the process-wide state store.
pub async fn create_state_store(
    backend: &StorageBackend,
) -> Result<Arc<dyn StateStore>, OpsCoreError> {
    match backend {
        StorageBackend::Memory => Ok(Arc::new(
            crate::infrastructure::memory_store::InMemoryStateStore::new(),
        )),
        StorageBackend::Redis(config) => {
            let store =
                crate::infrastructure::redis_store::RedisStateStore::connect(config).await?;
            Ok(Arc::new(store))
        }
    }
}
