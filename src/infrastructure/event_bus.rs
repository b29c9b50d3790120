// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus - Pub/Sub for Orchestration Events
//
// In-memory event streaming using tokio broadcast channels. The core emits
// structured events here; transport (log shipper, SSE, metrics bridge) is
// pluggable by subscribing. Events are lost on restart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::domain::agent::LifecycleState;
use crate::domain::workflow::SessionStatus;

/// Structured orchestration events emitted by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    AgentRegistered {
        agent_id: String,
        agent_name: String,
    },
    StateChanged {
        agent_id: String,
        state: LifecycleState,
        timestamp: DateTime<Utc>,
    },
    SessionUpdated {
        session_id: String,
        status: SessionStatus,
    },
    TaskDispatched {
        task_id: String,
        agent_id: String,
        session_id: String,
    },
    TaskRequeued {
        task_id: String,
        agent_id: String,
        observed_state: Option<LifecycleState>,
    },
    TaskRetried {
        task_id: String,
        agent_id: String,
        retry_count: u32,
        reason: String,
    },
    TaskFailed {
        task_id: String,
        agent_id: String,
        session_id: String,
        reason: String,
    },
}

#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<OrchestrationEvent>>,
}

impl EventBus {
    /// Capacity bounds how many events can be buffered per subscriber before
    /// old ones are dropped.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1024)
    }

    /// Fire-and-forget publish; having no subscribers is not an error.
    pub fn publish(&self, event: OrchestrationEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestrationEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
