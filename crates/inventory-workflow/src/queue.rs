//! Worker-task queue: task-type keyed dispatch to attached workers, with
//! bounded backlog, in-flight deadline tracking, and at-most-one
//! in-flight delivery per task.
//!
//! Grounded in the division of responsibilities between a gate admitting
//! work up to a capacity and a pool tracking claims, adapted from
//! poll-a-database semantics to direct in-process delivery, since workers
//! here are attached callers rather than remote pollers.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use inventory_core::Error;
use serde_json::Value as Json;
use tokio::sync::oneshot;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Outcome of a worker task, delivered to whoever called [`WorkerTaskQueue::offer`].
pub type TaskResult = Result<Json, TaskFailure>;

/// A worker task's failure, distinguishing a normal `nack` from a
/// deadline miss.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskFailure {
    Nacked(String),
    TimedOut,
    Cancelled,
}

/// A unit of work routed by `task_type` to an attached worker.
#[derive(Debug, Clone)]
pub struct WorkerTask {
    pub task_id: String,
    pub task_type: String,
    pub attrs: Json,
    pub payload: Json,
}

struct InFlight {
    worker_id: String,
    deadline: DateTime<Utc>,
    attempts: u32,
    reply: oneshot::Sender<TaskResult>,
    task: WorkerTask,
}

/// Configuration for one task type's backlog.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    pub max_backlog: usize,
    pub max_attempts: u32,
    pub in_flight_timeout: chrono::Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_backlog: 1000,
            max_attempts: 3,
            in_flight_timeout: chrono::Duration::seconds(60),
        }
    }
}

/// Task-type keyed dispatch queue.
///
/// `in_flight` is a [`DashMap`] keyed by `task_id`, enforcing "at most one
/// worker per task in flight" by construction — a task_id present there
/// is, by definition, claimed by exactly one worker.
pub struct WorkerTaskQueue {
    config: QueueConfig,
    backlog: std::sync::Mutex<HashMap<String, VecDeque<(WorkerTask, oneshot::Sender<TaskResult>)>>>,
    workers: std::sync::Mutex<HashMap<String, VecDeque<String>>>,
    in_flight: DashMap<String, InFlight>,
}

impl WorkerTaskQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            backlog: std::sync::Mutex::new(HashMap::new()),
            workers: std::sync::Mutex::new(HashMap::new()),
            in_flight: DashMap::new(),
        }
    }

    /// Attach a worker as willing to receive tasks of `task_type`.
    pub fn attach(&self, worker_id: &str, task_type: &str) {
        self.workers
            .lock()
            .unwrap()
            .entry(task_type.to_string())
            .or_default()
            .push_back(worker_id.to_string());
    }

    /// Detach `worker_id`; any task it currently holds in flight is
    /// re-queued at the front of its task type's backlog.
    #[instrument(skip(self))]
    pub fn detach(&self, worker_id: &str) {
        for workers in self.workers.lock().unwrap().values_mut() {
            workers.retain(|w| w != worker_id);
        }
        let stuck: Vec<String> = self
            .in_flight
            .iter()
            .filter(|entry| entry.value().worker_id == worker_id)
            .map(|entry| entry.key().clone())
            .collect();
        for task_id in stuck {
            if let Some((_, entry)) = self.in_flight.remove(&task_id) {
                self.requeue_front(entry.task, entry.reply);
            }
        }
    }

    /// Offer a task for dispatch. Delivers immediately to a round-robin
    /// chosen attached worker of `task.task_type`, or enqueues (bounded;
    /// rejecting the oldest backlog entry when full).
    #[instrument(skip(self, task), fields(task_id = %task.task_id, task_type = %task.task_type))]
    pub fn offer(&self, task: WorkerTask) -> oneshot::Receiver<TaskResult> {
        let (tx, rx) = oneshot::channel();
        if let Some(worker_id) = self.pick_worker(&task.task_type) {
            self.dispatch(worker_id, task, tx, 1);
        } else {
            self.enqueue(task, tx);
        }
        rx
    }

    fn pick_worker(&self, task_type: &str) -> Option<String> {
        let mut workers = self.workers.lock().unwrap();
        let pool = workers.get_mut(task_type)?;
        let worker_id = pool.pop_front()?;
        pool.push_back(worker_id.clone());
        Some(worker_id)
    }

    fn dispatch(&self, worker_id: String, task: WorkerTask, reply: oneshot::Sender<TaskResult>, attempts: u32) {
        let deadline = Utc::now() + self.config.in_flight_timeout;
        self.in_flight.insert(
            task.task_id.clone(),
            InFlight {
                worker_id,
                deadline,
                attempts,
                reply,
                task,
            },
        );
    }

    fn enqueue(&self, task: WorkerTask, reply: oneshot::Sender<TaskResult>) {
        let mut backlog = self.backlog.lock().unwrap();
        let queue = backlog.entry(task.task_type.clone()).or_default();
        if queue.len() >= self.config.max_backlog {
            if let Some((rejected, rejected_reply)) = queue.pop_front() {
                warn!(task_id = %rejected.task_id, "backlog full, rejecting oldest task");
                let _ = rejected_reply.send(Err(TaskFailure::Cancelled));
            }
        }
        queue.push_back((task, reply));
    }

    fn requeue_front(&self, task: WorkerTask, reply: oneshot::Sender<TaskResult>) {
        let mut backlog = self.backlog.lock().unwrap();
        backlog
            .entry(task.task_type.clone())
            .or_default()
            .push_front((task, reply));
    }

    /// Claim the next queued task for a worker that just became available
    /// (called after `attach`, or after `ack`/`nack` frees a worker up).
    pub fn claim_next(&self, worker_id: &str, task_type: &str) -> Option<WorkerTask> {
        let next = {
            let mut backlog = self.backlog.lock().unwrap();
            backlog.get_mut(task_type).and_then(VecDeque::pop_front)
        };
        let (task, reply) = next?;
        let claimed = task.clone();
        self.dispatch(worker_id.to_string(), task, reply, 1);
        Some(claimed)
    }

    /// Acknowledge successful completion.
    #[instrument(skip(self, result))]
    pub fn ack(&self, task_id: &str, result: Json) -> Result<(), Error> {
        let (_, entry) = self
            .in_flight
            .remove(task_id)
            .ok_or_else(|| Error::NotFound(format!("in-flight task '{task_id}'")))?;
        let _ = entry.reply.send(Ok(result));
        Ok(())
    }

    /// Report failure; re-offers automatically if attempts remain.
    #[instrument(skip(self))]
    pub fn nack(&self, task_id: &str, error: String) -> Result<(), Error> {
        let (_, entry) = self
            .in_flight
            .remove(task_id)
            .ok_or_else(|| Error::NotFound(format!("in-flight task '{task_id}'")))?;
        if entry.attempts < self.config.max_attempts {
            if let Some(worker_id) = self.pick_worker(&entry.task.task_type) {
                self.dispatch(worker_id, entry.task, entry.reply, entry.attempts + 1);
                return Ok(());
            }
            self.enqueue(entry.task, entry.reply);
            return Ok(());
        }
        let _ = entry.reply.send(Err(TaskFailure::Nacked(error)));
        Ok(())
    }

    /// Sweep in-flight entries past their deadline, nacking them with
    /// [`TaskFailure::TimedOut`] (retried per the same attempts policy as
    /// a normal nack).
    #[instrument(skip(self))]
    pub fn reclaim_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|e| e.value().deadline <= now)
            .map(|e| e.key().clone())
            .collect();
        let count = expired.len();
        for task_id in expired {
            if let Some((_, entry)) = self.in_flight.remove(&task_id) {
                if entry.attempts < self.config.max_attempts {
                    if let Some(worker_id) = self.pick_worker(&entry.task.task_type) {
                        self.dispatch(worker_id, entry.task, entry.reply, entry.attempts + 1);
                        continue;
                    }
                    self.enqueue(entry.task, entry.reply);
                } else {
                    let _ = entry.reply.send(Err(TaskFailure::TimedOut));
                }
            }
        }
        count
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Cancel every in-flight task named in `task_ids`, used when a
    /// workflow instance moves to `failed` and must cancel the tasks it
    /// started.
    pub fn cancel_all(&self, task_ids: &[String]) {
        for task_id in task_ids {
            if let Some((_, entry)) = self.in_flight.remove(task_id) {
                let _ = entry.reply.send(Err(TaskFailure::Cancelled));
            }
        }
    }

    /// A fresh task id for a caller that doesn't want to mint its own.
    pub fn next_task_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", Uuid::now_v7())
    }
}
