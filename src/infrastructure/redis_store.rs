// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Redis-backed state store.
//!
//! # Key layout
//!
//! - `agent:{id}:registration` — JSON registration record
//! - `agent:{id}:state:latest` — JSON latest state record
//! - `agent:{id}:state:latest_ts` — epoch-microsecond timestamp of `latest`
//! - `agent:{id}:state:history` — list, LPUSH on append (newest first)
//! - `session:{id}` — JSON session record
//! - `workflow:{id}` — JSON definition record
//!
//! The latest-state write is a server-side compare-and-set on the stored
//! timestamp (Lua), so concurrent callbacks for the same agent cannot
//! regress `latest`. Backend causes are logged here and surfaced to callers
//! as opaque `Storage` errors.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, error, warn};

use crate::domain::agent::{AgentRegistration, AgentState};
use crate::domain::error::OpsCoreError;
use crate::domain::repository::{RedisConfig, SessionPatch, StateStore};
use crate::domain::workflow::{WorkflowDefinition, WorkflowSession};

/// Bounded per-agent history retention (LTRIM after every append).
const MAX_STATE_HISTORY: isize = 256;

/// KEYS[1] = latest JSON, KEYS[2] = latest timestamp (epoch micros).
/// ARGV[1] = new timestamp, ARGV[2] = new JSON. Writes iff newer-or-equal.
const LATEST_STATE_CAS: &str = r#"
local ts = tonumber(ARGV[1])
local cur = redis.call('GET', KEYS[2])
if (not cur) or ts >= tonumber(cur) then
    redis.call('SET', KEYS[1], ARGV[2])
    redis.call('SET', KEYS[2], ARGV[1])
    return 1
end
return 0
"#;

pub struct RedisStateStore {
    conn: ConnectionManager,
}

impl RedisStateStore {
    /// Connect to Redis. Fails fast when the server is unreachable, so
    /// startup can exit with the backend-unreachable code.
    pub async fn connect(config: &RedisConfig) -> Result<Self, OpsCoreError> {
        let url = format!("redis://{}:{}/{}", config.host, config.port, config.db);
        let client = redis::Client::open(url.clone()).map_err(|e| {
            error!(error = %e, "invalid redis connection parameters");
            OpsCoreError::storage("invalid redis connection parameters")
        })?;
        let conn = client.get_connection_manager().await.map_err(|e| {
            error!(host = %config.host, port = config.port, error = %e, "redis unreachable");
            OpsCoreError::storage("redis unreachable")
        })?;
        debug!(host = %config.host, port = config.port, db = config.db, "redis store connected");
        Ok(Self { conn })
    }

    pub async fn ping(&self) -> Result<(), OpsCoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::storage_err("redis ping failed", &e))?;
        Ok(())
    }

    fn storage_err(context: &str, cause: &dyn std::fmt::Display) -> OpsCoreError {
        error!(error = %cause, "{context}");
        OpsCoreError::storage(context)
    }

    fn decode<T: serde::de::DeserializeOwned>(raw: &str, what: &str) -> Result<T, OpsCoreError> {
        serde_json::from_str(raw).map_err(|e| {
            error!(error = %e, "corrupt {what} record in redis");
            OpsCoreError::storage(format!("corrupt {what} record"))
        })
    }

    fn encode<T: serde::Serialize>(value: &T, what: &str) -> Result<String, OpsCoreError> {
        serde_json::to_string(value).map_err(|e| {
            error!(error = %e, "failed to serialize {what} record");
            OpsCoreError::storage(format!("failed to serialize {what} record"))
        })
    }

    fn registration_key(agent_id: &str) -> String {
        format!("agent:{agent_id}:registration")
    }

    fn latest_state_key(agent_id: &str) -> String {
        format!("agent:{agent_id}:state:latest")
    }

    fn latest_ts_key(agent_id: &str) -> String {
        format!("agent:{agent_id}:state:latest_ts")
    }

    fn history_key(agent_id: &str) -> String {
        format!("agent:{agent_id}:state:history")
    }

    fn session_key(session_id: &str) -> String {
        format!("session:{session_id}")
    }

    fn workflow_key(workflow_id: &str) -> String {
        format!("workflow:{workflow_id}")
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn save_agent_registration(&self, reg: &AgentRegistration) -> Result<(), OpsCoreError> {
        let mut conn = self.conn.clone();
        let json = Self::encode(reg, "registration")?;
        let created: bool = conn
            .set_nx(Self::registration_key(&reg.agent_id), json)
            .await
            .map_err(|e| Self::storage_err("failed to save registration", &e))?;
        if !created {
            return Err(OpsCoreError::AgentAlreadyExists(reg.agent_id.clone()));
        }
        debug!(agent_id = %reg.agent_id, "registration saved");
        Ok(())
    }

    async fn read_agent_registration(
        &self,
        agent_id: &str,
    ) -> Result<Option<AgentRegistration>, OpsCoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(Self::registration_key(agent_id))
            .await
            .map_err(|e| Self::storage_err("failed to read registration", &e))?;
        raw.map(|r| Self::decode(&r, "registration")).transpose()
    }

    async fn agent_exists(&self, agent_id: &str) -> Result<bool, OpsCoreError> {
        let mut conn = self.conn.clone();
        conn.exists(Self::registration_key(agent_id))
            .await
            .map_err(|e| Self::storage_err("failed to check registration", &e))
    }

    async fn list_agent_registrations(&self) -> Result<Vec<AgentRegistration>, OpsCoreError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = {
            let mut iter = conn
                .scan_match::<_, String>("agent:*:registration")
                .await
                .map_err(|e| Self::storage_err("failed to scan registrations", &e))?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        let mut agents = Vec::with_capacity(keys.len());
        for key in keys {
            let raw: Option<String> = conn
                .get(&key)
                .await
                .map_err(|e| Self::storage_err("failed to read registration", &e))?;
            if let Some(raw) = raw {
                match Self::decode::<AgentRegistration>(&raw, "registration") {
                    Ok(reg) => agents.push(reg),
                    // Skip records that no longer parse; listing should not
                    // fail wholesale on one corrupt entry.
                    Err(_) => warn!(%key, "skipping unparsable registration"),
                }
            }
        }
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        Ok(agents)
    }

    async fn save_agent_state(&self, state: &AgentState) -> Result<(), OpsCoreError> {
        let mut conn = self.conn.clone();
        let json = Self::encode(state, "state")?;

        let history_key = Self::history_key(&state.agent_id);
        let _: () = conn
            .lpush(&history_key, &json)
            .await
            .map_err(|e| Self::storage_err("failed to append state history", &e))?;
        let _: () = conn
            .ltrim(&history_key, 0, MAX_STATE_HISTORY - 1)
            .await
            .map_err(|e| Self::storage_err("failed to trim state history", &e))?;

        let updated: i64 = redis::Script::new(LATEST_STATE_CAS)
            .key(Self::latest_state_key(&state.agent_id))
            .key(Self::latest_ts_key(&state.agent_id))
            .arg(state.timestamp.timestamp_micros())
            .arg(&json)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Self::storage_err("failed to write latest state", &e))?;
        if updated == 0 {
            debug!(agent_id = %state.agent_id, "stale state kept out of latest");
        }
        Ok(())
    }

    async fn read_latest_agent_state(
        &self,
        agent_id: &str,
    ) -> Result<Option<AgentState>, OpsCoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(Self::latest_state_key(agent_id))
            .await
            .map_err(|e| Self::storage_err("failed to read latest state", &e))?;
        raw.map(|r| Self::decode(&r, "state")).transpose()
    }

    async fn read_agent_state_history(
        &self,
        agent_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<AgentState>, OpsCoreError> {
        let mut conn = self.conn.clone();
        let stop = limit.map(|l| l as isize - 1).unwrap_or(-1);
        let raw: Vec<String> = conn
            .lrange(Self::history_key(agent_id), 0, stop)
            .await
            .map_err(|e| Self::storage_err("failed to read state history", &e))?;
        raw.iter()
            .map(|entry| Self::decode(entry, "state"))
            .collect()
    }

    async fn create_session(&self, session: &WorkflowSession) -> Result<(), OpsCoreError> {
        let mut conn = self.conn.clone();
        let json = Self::encode(session, "session")?;
        let created: bool = conn
            .set_nx(Self::session_key(&session.session_id), json)
            .await
            .map_err(|e| Self::storage_err("failed to create session", &e))?;
        if !created {
            return Err(OpsCoreError::storage(format!(
                "session {} already exists",
                session.session_id
            )));
        }
        Ok(())
    }

    async fn read_session(
        &self,
        session_id: &str,
    ) -> Result<Option<WorkflowSession>, OpsCoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(Self::session_key(session_id))
            .await
            .map_err(|e| Self::storage_err("failed to read session", &e))?;
        raw.map(|r| Self::decode(&r, "session")).transpose()
    }

    async fn update_session_data(
        &self,
        session_id: &str,
        patch: SessionPatch,
    ) -> Result<WorkflowSession, OpsCoreError> {
        // Read-modify-write; session writes are serialized through the
        // lifecycle manager, so no CAS is needed here.
        let mut session = self
            .read_session(session_id)
            .await?
            .ok_or_else(|| OpsCoreError::SessionNotFound(session_id.to_string()))?;

        if let Some(status) = patch.status {
            session.status = status;
        }
        if let Some(metadata) = patch.metadata {
            session.metadata.extend(metadata);
        }
        session.last_updated_time = Utc::now();

        let mut conn = self.conn.clone();
        let json = Self::encode(&session, "session")?;
        let _: () = conn
            .set(Self::session_key(session_id), json)
            .await
            .map_err(|e| Self::storage_err("failed to update session", &e))?;
        Ok(session)
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool, OpsCoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .del(Self::session_key(session_id))
            .await
            .map_err(|e| Self::storage_err("failed to delete session", &e))?;
        Ok(removed > 0)
    }

    async fn save_workflow_definition(
        &self,
        def: &WorkflowDefinition,
    ) -> Result<(), OpsCoreError> {
        let mut conn = self.conn.clone();
        let json = Self::encode(def, "workflow definition")?;
        let _: () = conn
            .set(Self::workflow_key(&def.id), json)
            .await
            .map_err(|e| Self::storage_err("failed to save workflow definition", &e))?;
        Ok(())
    }

    async fn read_workflow_definition(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowDefinition>, OpsCoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(Self::workflow_key(workflow_id))
            .await
            .map_err(|e| Self::storage_err("failed to read workflow definition", &e))?;
        raw.map(|r| Self::decode(&r, "workflow definition"))
            .transpose()
    }

    async fn clear_all(&self) -> Result<(), OpsCoreError> {
        warn!("clearing entire redis database");
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("FLUSHDB")
            .query_async(&mut conn)
            .await
            .map_err(|e| Self::storage_err("failed to clear redis database", &e))?;
        Ok(())
    }
}
