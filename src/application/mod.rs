// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod dispatcher;
pub mod lifecycle;
pub mod task_queue;
pub mod workflow_engine;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use lifecycle::LifecycleManager;
pub use task_queue::TaskQueue;
pub use workflow_engine::{TriggerOutcome, WorkflowEngine, WorkflowReference};
