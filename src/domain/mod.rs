// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod agent;
pub mod error;
pub mod repository;
pub mod workflow;

pub use agent::{AgentRegistration, AgentState, LifecycleState};
pub use error::OpsCoreError;
pub use repository::{create_state_store, RedisConfig, SessionPatch, StateStore, StorageBackend};
pub use workflow::{SessionStatus, Task, TaskDescriptor, WorkflowDefinition, WorkflowSession};
