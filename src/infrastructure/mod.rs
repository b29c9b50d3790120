// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod event_bus;
pub mod memory_store;
pub mod redis_store;
pub mod routing_client;
pub mod template_parser;

pub use event_bus::{EventBus, OrchestrationEvent};
pub use memory_store::InMemoryStateStore;
pub use redis_store::RedisStateStore;
pub use routing_client::{AgentRouter, DispatchError, RoutingClient};
pub use template_parser::{TemplateParseError, TemplateParser};
