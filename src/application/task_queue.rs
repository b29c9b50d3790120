// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Pending-task queue.
//!
//! A single process-wide FIFO with a side list for deferred tasks (scheduled
//! dispatch and backoff re-queues). Dispatch workers block on `dequeue` when
//! the queue is empty; enqueues wake exactly one waiter. Deferred tasks are
//! promoted to the ready queue once their earliest-dispatch time has passed,
//! so workers never see a task before it is due.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

use crate::domain::workflow::Task;

#[derive(Default)]
struct QueueInner {
    ready: VecDeque<Task>,
    deferred: Vec<Task>,
}

impl QueueInner {
    /// Move due deferred tasks to the tail of the ready queue, oldest
    /// deadline first.
    fn promote_due(&mut self, now: DateTime<Utc>) {
        if self.deferred.is_empty() {
            return;
        }
        self.deferred
            .sort_by_key(|t| t.not_before.unwrap_or(now));
        while let Some(first) = self.deferred.first() {
            match first.not_before {
                Some(due) if due > now => break,
                _ => {
                    let mut task = self.deferred.remove(0);
                    task.not_before = None;
                    self.ready.push_back(task);
                }
            }
        }
    }

    /// Time until the next deferred task becomes due, if any.
    fn next_wakeup(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.deferred
            .iter()
            .filter_map(|t| t.not_before)
            .min()
            .map(|due| (due - now).to_std().unwrap_or(Duration::ZERO))
    }
}

#[derive(Default)]
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task to the tail of the ready queue.
    pub fn enqueue(&self, task: Task) {
        let mut inner = self.inner.lock().expect("task queue mutex poisoned");
        debug!(task_id = %task.task_id, agent_id = %task.agent_id, "task enqueued");
        inner.ready.push_back(task);
        drop(inner);
        self.notify.notify_one();
    }

    /// Defer a task until `delay` has elapsed.
    pub fn enqueue_after(&self, mut task: Task, delay: Duration) {
        let due = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        task.not_before = Some(due);
        let mut inner = self.inner.lock().expect("task queue mutex poisoned");
        debug!(
            task_id = %task.task_id,
            delay_ms = delay.as_millis() as u64,
            "task deferred"
        );
        inner.deferred.push(task);
        drop(inner);
        self.notify.notify_one();
    }

    /// Non-blocking dequeue of the next due task.
    pub fn try_dequeue(&self) -> Option<Task> {
        let mut inner = self.inner.lock().expect("task queue mutex poisoned");
        inner.promote_due(Utc::now());
        inner.ready.pop_front()
    }

    /// Await the next due task. Blocks on an enqueue signal when empty and
    /// on a timer when only deferred tasks remain.
    pub async fn dequeue(&self) -> Task {
        loop {
            let wait = {
                let mut inner = self.inner.lock().expect("task queue mutex poisoned");
                let now = Utc::now();
                inner.promote_due(now);
                if let Some(task) = inner.ready.pop_front() {
                    return task;
                }
                inner.next_wakeup(now)
            };

            match wait {
                Some(delay) => {
                    let _ = tokio::time::timeout(delay, self.notify.notified()).await;
                }
                None => self.notify.notified().await,
            }
        }
    }

    /// Ready + deferred task count.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("task queue mutex poisoned");
        inner.ready.len() + inner.deferred.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
