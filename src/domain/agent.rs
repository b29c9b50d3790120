use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Lifecycle state reported by an agent (or assigned at registration).
///
/// `Unknown` is the state every agent starts in; everything else arrives
/// through state callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    #[serde(rename = "UNKNOWN")]
    Unknown,
    #[serde(rename = "initializing")]
    Initializing,
    #[serde(rename = "idle")]
    Idle,
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "finished")]
    Finished,
    #[serde(rename = "error")]
    Error,
}

impl LifecycleState {
    /// Parse a state name as received on the wire. Returns `None` for names
    /// outside the allowed set.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "UNKNOWN" => Some(Self::Unknown),
            "initializing" => Some(Self::Initializing),
            "idle" => Some(Self::Idle),
            "active" => Some(Self::Active),
            "finished" => Some(Self::Finished),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Initializing => "initializing",
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Finished => "finished",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration record for an agent, created by webhook ingestion.
///
/// Immutable once stored; re-registration of the same `agentId` is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRegistration {
    pub agent_id: String,
    pub agent_name: String,
    pub version: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub contact_endpoint: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default = "Utc::now")]
    pub registration_time: DateTime<Utc>,
}

/// A single agent state observation. One `latest` record per agent plus an
/// append-only, bounded history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub state: LifecycleState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, serde_json::Value>>,
}

impl AgentState {
    /// The state appended right after a successful registration.
    pub fn initial(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            timestamp: Utc::now(),
            state: LifecycleState::Unknown,
            details: None,
        }
    }
}
