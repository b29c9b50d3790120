// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Dispatch loop.
//!
//! A long-running worker drains the pending-task queue. For each task it
//! reads the target agent's latest state and gates on readiness:
//!
//! - `idle` — dispatch through the routing client; the task is then
//!   considered in-flight and progress is observed via state callbacks.
//! - `initializing` / `active` / `UNKNOWN` — contention: re-queue at the
//!   tail after a short backoff, without touching the retry budget.
//! - `error`, `finished`, or no state at all — failure handling.
//!
//! A successful dispatch records the timestamp of the idle observation that
//! backed it; further tasks for the same agent are held as contention until
//! a strictly newer state callback arrives. One dispatch per observed idle,
//! so a stale `latest` cannot flood an agent with the whole queue.
//!
//! Dispatch failures run through `handle_task_failure`: counted retries with
//! backoff until the budget is spent, then a terminal fallback that marks
//! the session failed. The loop blocks on the queue when idle and stops at
//! the next task boundary when shutdown is signalled.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::application::lifecycle::LifecycleManager;
use crate::application::task_queue::TaskQueue;
use crate::domain::agent::LifecycleState;
use crate::domain::repository::SessionPatch;
use crate::domain::workflow::{SessionStatus, Task};
use crate::infrastructure::event_bus::{EventBus, OrchestrationEvent};
use crate::infrastructure::routing_client::AgentRouter;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Budget for the latest-state read; timing out counts as contention.
    pub state_read_timeout: Duration,
    /// Linear backoff step per consecutive contention re-queue.
    pub contention_backoff: Duration,
    pub contention_backoff_cap: Duration,
    /// Linear backoff step per retry attempt.
    pub retry_backoff: Duration,
    pub retry_backoff_cap: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            state_read_timeout: Duration::from_secs(5),
            contention_backoff: Duration::from_millis(200),
            contention_backoff_cap: Duration::from_secs(2),
            retry_backoff: Duration::from_millis(500),
            retry_backoff_cap: Duration::from_secs(5),
        }
    }
}

pub struct Dispatcher {
    queue: Arc<TaskQueue>,
    lifecycle: Arc<LifecycleManager>,
    router: Arc<dyn AgentRouter>,
    events: EventBus,
    config: DispatcherConfig,
    /// Per-agent timestamp of the idle observation behind the last
    /// successful dispatch. Gate opens again on any newer callback.
    in_flight: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<TaskQueue>,
        lifecycle: Arc<LifecycleManager>,
        router: Arc<dyn AgentRouter>,
        events: EventBus,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            queue,
            lifecycle,
            router,
            events,
            config,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Drain the queue until shutdown is signalled. The current task is
    /// always finished before the worker exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("dispatch worker started");
        loop {
            let task = tokio::select! {
                task = self.queue.dequeue() => task,
                _ = shutdown.changed() => break,
            };
            self.process(task).await;
            tokio::task::yield_now().await;
        }
        info!("dispatch worker stopped");
    }

    async fn process(&self, task: Task) {
        let state_read = tokio::time::timeout(
            self.config.state_read_timeout,
            self.lifecycle.get_state(&task.agent_id),
        )
        .await;

        let latest = match state_read {
            Err(_) => {
                // Slow store read is contention, not failure.
                warn!(task_id = %task.task_id, agent_id = %task.agent_id, "state read timed out");
                self.requeue_contended(task, None);
                return;
            }
            Ok(Err(e)) => {
                warn!(
                    task_id = %task.task_id,
                    agent_id = %task.agent_id,
                    error = %e,
                    "state read failed; re-queueing"
                );
                self.requeue_contended(task, None);
                return;
            }
            Ok(Ok(latest)) => latest,
        };

        let Some(observed) = latest else {
            self.handle_task_failure(task, "agent state unavailable".to_string())
                .await;
            return;
        };
        self.release_gate_if_newer(&observed.agent_id, observed.timestamp);

        match observed.state {
            LifecycleState::Idle => {
                if self.gate_closed(&task.agent_id, observed.timestamp) {
                    // A task is already with this agent and no fresh callback
                    // has arrived since.
                    self.requeue_contended(task, Some(LifecycleState::Idle));
                } else {
                    self.dispatch(task, observed.timestamp).await;
                }
            }
            contended @ (LifecycleState::Initializing
            | LifecycleState::Active
            | LifecycleState::Unknown) => {
                self.requeue_contended(task, Some(contended));
            }
            LifecycleState::Error => {
                self.handle_task_failure(task, "agent reported error state".to_string())
                    .await;
            }
            LifecycleState::Finished => {
                self.handle_task_failure(task, "agent no longer available".to_string())
                    .await;
            }
        }
    }

    /// Drop the in-flight record once the agent has reported anything newer
    /// than the observation that backed the last dispatch.
    fn release_gate_if_newer(&self, agent_id: &str, observed_at: DateTime<Utc>) {
        let mut in_flight = self.in_flight.lock().expect("in-flight mutex poisoned");
        if let Some(&dispatched_at) = in_flight.get(agent_id) {
            if observed_at > dispatched_at {
                debug!(%agent_id, "in-flight gate released by fresh callback");
                in_flight.remove(agent_id);
            }
        }
    }

    fn gate_closed(&self, agent_id: &str, observed_at: DateTime<Utc>) -> bool {
        let in_flight = self.in_flight.lock().expect("in-flight mutex poisoned");
        in_flight
            .get(agent_id)
            .map(|&dispatched_at| observed_at <= dispatched_at)
            .unwrap_or(false)
    }

    async fn dispatch(&self, task: Task, observed_at: DateTime<Utc>) {
        match self.router.dispatch(&task.agent_id, &task).await {
            Ok(()) => {
                info!(
                    task_id = %task.task_id,
                    agent_id = %task.agent_id,
                    session_id = %task.session_id,
                    "task dispatched"
                );
                self.in_flight
                    .lock()
                    .expect("in-flight mutex poisoned")
                    .insert(task.agent_id.clone(), observed_at);
                self.events.publish(OrchestrationEvent::TaskDispatched {
                    task_id: task.task_id,
                    agent_id: task.agent_id,
                    session_id: task.session_id,
                });
            }
            Err(e) => {
                let reason = if e.is_retryable() {
                    format!("routing service unavailable: {e}")
                } else {
                    format!("routing service rejected dispatch: {e}")
                };
                self.handle_task_failure(task, reason).await;
            }
        }
    }

    /// Contention re-queue: back to the tail after a linear backoff. Does
    /// not consume the retry budget.
    fn requeue_contended(&self, mut task: Task, observed: Option<LifecycleState>) {
        task.contention_requeues = task.contention_requeues.saturating_add(1);
        let delay = self
            .config
            .contention_backoff
            .saturating_mul(task.contention_requeues)
            .min(self.config.contention_backoff_cap);

        self.events.publish(OrchestrationEvent::TaskRequeued {
            task_id: task.task_id.clone(),
            agent_id: task.agent_id.clone(),
            observed_state: observed,
        });
        self.queue.enqueue_after(task, delay);
    }

    /// Counted retry with backoff while budget remains; terminal fallback
    /// afterwards.
    async fn handle_task_failure(&self, mut task: Task, reason: String) {
        if task.retry_count < task.max_retries {
            task.retry_count += 1;
            task.contention_requeues = 0;
            let delay = self
                .config
                .retry_backoff
                .saturating_mul(task.retry_count)
                .min(self.config.retry_backoff_cap);

            warn!(
                task_id = %task.task_id,
                agent_id = %task.agent_id,
                retry_count = task.retry_count,
                max_retries = task.max_retries,
                %reason,
                "task failed; retrying"
            );
            self.events.publish(OrchestrationEvent::TaskRetried {
                task_id: task.task_id.clone(),
                agent_id: task.agent_id.clone(),
                retry_count: task.retry_count,
                reason,
            });
            self.queue.enqueue_after(task, delay);
        } else {
            self.fallback(task, reason).await;
        }
    }

    /// Terminal failure: log, emit the event, and mark the session failed.
    async fn fallback(&self, task: Task, reason: String) {
        error!(
            task_id = %task.task_id,
            agent_id = %task.agent_id,
            session_id = %task.session_id,
            %reason,
            "task failed terminally"
        );
        self.events.publish(OrchestrationEvent::TaskFailed {
            task_id: task.task_id.clone(),
            agent_id: task.agent_id.clone(),
            session_id: task.session_id.clone(),
            reason: reason.clone(),
        });

        let mut metadata = std::collections::HashMap::new();
        metadata.insert("lastError".to_string(), serde_json::json!(reason));
        let patch = SessionPatch {
            status: Some(SessionStatus::Failed),
            metadata: Some(metadata),
        };
        if let Err(e) = self.lifecycle.update_session(&task.session_id, patch).await {
            error!(
                session_id = %task.session_id,
                error = %e,
                "failed to mark session as failed"
            );
        }
    }
}
