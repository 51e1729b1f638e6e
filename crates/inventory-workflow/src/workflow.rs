//! Workflow engine: a linear per-instance state machine —
//! `start → wait? → act → (next step | done | failed)` — driven by the
//! message bus and durable via [`EntityStore`].
//!
//! A crash recovery scenario — listing pending actions against a frozen
//! snapshot of awaited subscribers taken when the instance entered its
//! wait step — is reproduced as a test below.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use inventory_bus::prelude::{Action, ActionDone, Event, Message, MessageBus};
use inventory_core::{EntityStore, Error, Json};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::subscription::SubscriptionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePolicy {
    Fail,
    Continue,
}

/// Whether a step emits its `Action` immediately on entry, or first waits
/// for an external trigger (e.g. a scheduler tick) before acting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepKind {
    Wait,
    Act,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub action: String,
    pub kind: StepKind,
    pub timeout: StdDuration,
    pub failure_policy: FailurePolicy,
}

impl Step {
    pub fn act(name: impl Into<String>, action: impl Into<String>, timeout: StdDuration) -> Self {
        Self {
            name: name.into(),
            action: action.into(),
            kind: StepKind::Act,
            timeout,
            failure_policy: FailurePolicy::Fail,
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}

/// Ordered sequence of steps plus the terminal events a run completes with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDescriptor {
    pub name: String,
    pub steps: Vec<Step>,
    pub on_success: String,
    pub on_failure: String,
}

/// The fixed set of workflow kinds the engine drives out of the box —
/// `collect`, `cleanup`, `metrics` — each a linear sequence of one or two
/// `act` steps, matching the control flow traced through the message bus
/// and worker-task queue (scheduler → `start_*` → worker fan-out →
/// terminal event).
pub fn builtin_descriptors(step_timeout: StdDuration) -> Vec<WorkflowDescriptor> {
    vec![
        WorkflowDescriptor {
            name: "collect".into(),
            steps: vec![
                Step::act("start_collect", "start_collect", step_timeout),
                Step::act("collect", "collect", step_timeout),
            ],
            on_success: "collect_workflow_end".into(),
            on_failure: "collect_workflow_failed".into(),
        },
        WorkflowDescriptor {
            name: "cleanup".into(),
            steps: vec![Step::act("cleanup", "cleanup", step_timeout)],
            on_success: "cleanup_workflow_end".into(),
            on_failure: "cleanup_workflow_failed".into(),
        },
        WorkflowDescriptor {
            name: "metrics".into(),
            steps: vec![Step::act("metrics", "metrics", step_timeout)
                .with_failure_policy(FailurePolicy::Continue)],
            on_success: "metrics_workflow_end".into(),
            on_failure: "metrics_workflow_failed".into(),
        },
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    Start,
    Wait,
    Act,
    Done,
    Failed,
}

/// A running (or just-finished) workflow instance. Persisted after every
/// transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub instance_id: String,
    pub workflow_name: String,
    pub current_step_index: usize,
    pub state: InstanceState,
    pub started_at: DateTime<Utc>,
    pub step_started_at: DateTime<Utc>,
    /// Snapshot of subscribers awaited for the current `act` step, frozen
    /// at entry — never recomputed against later registry changes, so a
    /// subscriber added mid-wait doesn't retroactively gain a pending
    /// action for a step it wasn't registered for when the step started.
    pub awaited_subscribers: Vec<String>,
    pub received_done: HashSet<String>,
    pub payload: Json,
}

impl WorkflowInstance {
    /// `Action`s this instance is currently waiting on that `subscriber_id`
    /// has not yet acknowledged.
    fn pending_action_for(&self, subscriber_id: &str, step: &Step) -> Option<Action> {
        if self.state != InstanceState::Act {
            return None;
        }
        if !self.awaited_subscribers.iter().any(|s| s == subscriber_id) {
            return None;
        }
        if self.received_done.contains(subscriber_id) {
            return None;
        }
        Some(Action {
            message_type: step.action.clone(),
            task_id: self.instance_id.clone(),
            step_name: step.name.clone(),
            data: self.payload.clone(),
        })
    }
}

fn store_err(e: inventory_core::StoreError) -> Error {
    Error::Internal(e.to_string())
}

/// Drives workflow instances through their descriptor's steps.
pub struct WorkflowEngine {
    store: Arc<dyn EntityStore<WorkflowInstance>>,
    bus: Arc<MessageBus>,
    subscriptions: Arc<SubscriptionRegistry>,
    descriptors: HashMap<String, WorkflowDescriptor>,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn EntityStore<WorkflowInstance>>,
        bus: Arc<MessageBus>,
        subscriptions: Arc<SubscriptionRegistry>,
        descriptors: Vec<WorkflowDescriptor>,
    ) -> Self {
        Self {
            store,
            bus,
            subscriptions,
            descriptors: descriptors.into_iter().map(|d| (d.name.clone(), d)).collect(),
        }
    }

    fn descriptor(&self, workflow_name: &str) -> Result<&WorkflowDescriptor, Error> {
        self.descriptors
            .get(workflow_name)
            .ok_or_else(|| Error::NotFound(format!("workflow descriptor '{workflow_name}'")))
    }

    /// Start a new instance of `workflow_name`, entering its first step.
    #[instrument(skip(self, payload))]
    pub async fn start(&self, workflow_name: &str, instance_id: &str, payload: Json) -> Result<WorkflowInstance, Error> {
        let descriptor = self.descriptor(workflow_name)?;
        if descriptor.steps.is_empty() {
            return Err(Error::InvalidQuery(format!("workflow '{workflow_name}' has no steps")));
        }
        let now = Utc::now();
        let instance = WorkflowInstance {
            instance_id: instance_id.to_string(),
            workflow_name: workflow_name.to_string(),
            current_step_index: 0,
            state: InstanceState::Start,
            started_at: now,
            step_started_at: now,
            awaited_subscribers: Vec::new(),
            received_done: HashSet::new(),
            payload,
        };
        self.enter_step(instance).await
    }

    /// Move an instance waiting at `wait` for the current step into `act`.
    #[instrument(skip(self))]
    pub async fn signal_wait(&self, instance_id: &str) -> Result<WorkflowInstance, Error> {
        let instance = self.load(instance_id).await?;
        if instance.state != InstanceState::Wait {
            return Err(Error::Conflict(format!(
                "instance '{instance_id}' is not waiting (state is {:?})",
                instance.state
            )));
        }
        self.enter_act(instance).await
    }

    /// Apply an incoming `ActionDone`; advances the instance if every
    /// awaited subscriber has now acknowledged.
    #[instrument(skip(self, done), fields(instance_id = %done.task_id, subscriber_id = %done.subscriber_id))]
    pub async fn receive_action_done(&self, done: ActionDone) -> Result<(), Error> {
        let mut instance = self.load(&done.task_id).await?;
        if instance.state != InstanceState::Act {
            return Ok(());
        }
        let descriptor = self.descriptor(&instance.workflow_name)?;
        let step = &descriptor.steps[instance.current_step_index];
        if step.name != done.step_name {
            return Ok(());
        }
        if !instance.awaited_subscribers.iter().any(|s| s == &done.subscriber_id) {
            // Not in the frozen snapshot for this step — ignore.
            return Ok(());
        }
        instance.received_done.insert(done.subscriber_id.clone());
        let complete = instance
            .awaited_subscribers
            .iter()
            .all(|s| instance.received_done.contains(s));
        if !complete {
            self.store.put(&instance.instance_id, instance).await.map_err(store_err)?;
            return Ok(());
        }
        self.advance(instance).await?;
        Ok(())
    }

    /// Every `Action` this instance set is currently waiting on that
    /// `subscriber_id` has not yet acknowledged, across all running
    /// instances.
    pub async fn list_all_pending_actions_for(&self, subscriber_id: &str) -> Result<Vec<Action>, Error> {
        let instances = self.store.list().await.map_err(store_err)?;
        let mut actions = Vec::new();
        for instance in instances {
            let Ok(descriptor) = self.descriptor(&instance.workflow_name) else {
                continue;
            };
            let Some(step) = descriptor.steps.get(instance.current_step_index) else {
                continue;
            };
            if let Some(action) = instance.pending_action_for(subscriber_id, step) {
                actions.push(action);
            }
        }
        Ok(actions)
    }

    /// Sweep instances whose current step has exceeded its timeout,
    /// applying the step's failure policy.
    #[instrument(skip(self))]
    pub async fn check_timeouts(&self) -> Result<usize, Error> {
        let now = Utc::now();
        let instances = self.store.list().await.map_err(store_err)?;
        let mut handled = 0;
        for instance in instances {
            if !matches!(instance.state, InstanceState::Wait | InstanceState::Act) {
                continue;
            }
            let Ok(descriptor) = self.descriptor(&instance.workflow_name) else {
                continue;
            };
            let Some(step) = descriptor.steps.get(instance.current_step_index) else {
                continue;
            };
            let Ok(timeout) = chrono::Duration::from_std(step.timeout) else {
                continue;
            };
            if instance.step_started_at + timeout <= now {
                self.apply_timeout(instance, step.failure_policy).await?;
                handled += 1;
            }
        }
        Ok(handled)
    }

    /// Reload unfinished instances at process start and apply
    /// already-elapsed timeouts immediately.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<Vec<String>, Error> {
        let recovered: Vec<String> = self
            .store
            .list()
            .await
            .map_err(store_err)?
            .into_iter()
            .filter(|i| matches!(i.state, InstanceState::Wait | InstanceState::Act | InstanceState::Start))
            .map(|i| i.instance_id)
            .collect();
        info!(count = recovered.len(), "recovered workflow instances");
        self.check_timeouts().await?;
        Ok(recovered)
    }

    async fn load(&self, instance_id: &str) -> Result<WorkflowInstance, Error> {
        self.store
            .get(instance_id)
            .await
            .map_err(store_err)?
            .ok_or_else(|| Error::NotFound(format!("workflow instance '{instance_id}'")))
    }

    async fn enter_step(&self, mut instance: WorkflowInstance) -> Result<WorkflowInstance, Error> {
        let descriptor = self.descriptor(&instance.workflow_name)?.clone();
        let step = descriptor.steps[instance.current_step_index].clone();
        instance.step_started_at = Utc::now();
        match step.kind {
            StepKind::Wait => {
                instance.state = InstanceState::Wait;
                instance.awaited_subscribers = Vec::new();
                instance.received_done = HashSet::new();
                self.store.put(&instance.instance_id, instance.clone()).await.map_err(store_err)?;
                Ok(instance)
            }
            StepKind::Act => self.enter_act(instance).await,
        }
    }

    async fn enter_act(&self, mut instance: WorkflowInstance) -> Result<WorkflowInstance, Error> {
        let descriptor = self.descriptor(&instance.workflow_name)?.clone();
        let step = descriptor.steps[instance.current_step_index].clone();

        let awaited: Vec<String> = self
            .subscriptions
            .list_subscriber_for(&step.action)
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect();

        instance.state = InstanceState::Act;
        instance.step_started_at = Utc::now();
        instance.awaited_subscribers = awaited;
        instance.received_done = HashSet::new();
        self.store.put(&instance.instance_id, instance.clone()).await.map_err(store_err)?;

        self.bus
            .emit(Action {
                message_type: step.action.clone(),
                task_id: instance.instance_id.clone(),
                step_name: step.name.clone(),
                data: instance.payload.clone(),
            })
            .await;

        Ok(instance)
    }

    async fn advance(&self, mut instance: WorkflowInstance) -> Result<(), Error> {
        let descriptor = self.descriptor(&instance.workflow_name)?.clone();
        instance.current_step_index += 1;
        if instance.current_step_index >= descriptor.steps.len() {
            self.finish(instance, InstanceState::Done, &descriptor.on_success).await
        } else {
            self.enter_step(instance).await.map(|_| ())
        }
    }

    async fn apply_timeout(&self, instance: WorkflowInstance, policy: FailurePolicy) -> Result<(), Error> {
        match policy {
            FailurePolicy::Fail => {
                let descriptor = self.descriptor(&instance.workflow_name)?.clone();
                warn!(instance_id = %instance.instance_id, "step timed out, failing instance");
                self.finish(instance, InstanceState::Failed, &descriptor.on_failure).await
            }
            FailurePolicy::Continue => {
                info!(instance_id = %instance.instance_id, "step timed out, forcing advance");
                self.advance(instance).await
            }
        }
    }

    async fn finish(&self, instance: WorkflowInstance, state: InstanceState, event_type: &str) -> Result<(), Error> {
        let instance_id = instance.instance_id.clone();
        let mut finished = instance;
        finished.state = state;
        self.bus
            .emit(Event::new(event_type).with_data(serde_json::json!({"instance_id": instance_id})))
            .await;
        self.store.delete(&instance_id).await.map_err(store_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inventory_core::MemoryEntityStore;
    use std::time::Duration;

    fn two_step_descriptor() -> WorkflowDescriptor {
        WorkflowDescriptor {
            name: "collect".into(),
            steps: vec![
                Step::act("start_collect", "start_collect", Duration::from_secs(30)),
                Step::act("collect", "collect", Duration::from_secs(30)),
            ],
            on_success: "workflow_end".into(),
            on_failure: "workflow_failed".into(),
        }
    }

    async fn engine_with(
        descriptor: WorkflowDescriptor,
    ) -> (WorkflowEngine, Arc<dyn EntityStore<WorkflowInstance>>, Arc<MessageBus>) {
        let store: Arc<dyn EntityStore<WorkflowInstance>> = Arc::new(MemoryEntityStore::new());
        let bus = Arc::new(MessageBus::new());
        let subs = Arc::new(SubscriptionRegistry::new(Arc::new(MemoryEntityStore::new()), Arc::clone(&bus)));
        let engine = WorkflowEngine::new(Arc::clone(&store), Arc::clone(&bus), subs, vec![descriptor]);
        (engine, store, bus)
    }

    #[tokio::test]
    async fn full_run_advances_through_every_step_then_emits_success_event() {
        let (engine, subs_store, bus) = {
            let store: Arc<dyn EntityStore<WorkflowInstance>> = Arc::new(MemoryEntityStore::new());
            let bus = Arc::new(MessageBus::new());
            let subs_store: Arc<dyn EntityStore<crate::subscription::Subscriber>> =
                Arc::new(MemoryEntityStore::new());
            let subs = Arc::new(SubscriptionRegistry::new(Arc::clone(&subs_store), Arc::clone(&bus)));
            subs.add_subscription("sub_1", "start_collect", true, Duration::from_secs(30))
                .await
                .unwrap();
            subs.add_subscription("sub_1", "collect", true, Duration::from_secs(30))
                .await
                .unwrap();
            let engine = WorkflowEngine::new(store, Arc::clone(&bus), subs, vec![two_step_descriptor()]);
            (engine, subs_store, bus)
        };
        let _ = subs_store;

        let waiter = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move { bus.wait_for("workflow_end", |_| true).await })
        };
        tokio::task::yield_now().await;

        engine.start("collect", "inst-1", serde_json::json!({})).await.unwrap();
        engine
            .receive_action_done(ActionDone::new("start_collect", "inst-1", "start_collect", "sub_1"))
            .await
            .unwrap();
        engine
            .receive_action_done(ActionDone::new("collect", "inst-1", "collect", "sub_1"))
            .await
            .unwrap();

        let msg = waiter.await.unwrap();
        assert!(matches!(msg, Message::Event(_)));
    }

    /// `list_all_pending_actions_for` respects the frozen awaited snapshot
    /// taken when the instance entered its wait step, even after a new
    /// subscriber is added mid-wait.
    #[tokio::test]
    async fn pending_actions_respect_frozen_snapshot() {
        let (engine, _store, _bus) = engine_with(two_step_descriptor()).await;
        // Build a registry with two subscribers for "collect" manually via a
        // fresh instance rather than the engine's internal registry, since
        // `enter_act` snapshots whatever `list_subscriber_for` returns at
        // that moment.
        let store: Arc<dyn EntityStore<WorkflowInstance>> = Arc::new(MemoryEntityStore::new());
        let bus = Arc::new(MessageBus::new());
        let subs_store: Arc<dyn EntityStore<crate::subscription::Subscriber>> = Arc::new(MemoryEntityStore::new());
        let subs = Arc::new(SubscriptionRegistry::new(subs_store, Arc::clone(&bus)));
        subs.add_subscription("sub_1", "start_collect", true, Duration::from_secs(30))
            .await
            .unwrap();
        subs.add_subscription("sub_1", "collect", true, Duration::from_secs(30))
            .await
            .unwrap();
        subs.add_subscription("sub_2", "collect", true, Duration::from_secs(30))
            .await
            .unwrap();
        let engine = WorkflowEngine::new(store, bus, subs.clone(), vec![two_step_descriptor()]);

        engine.start("collect", "inst-1", serde_json::json!({})).await.unwrap();
        engine
            .receive_action_done(ActionDone::new("start_collect", "inst-1", "start_collect", "sub_1"))
            .await
            .unwrap();

        // sub_3 subscribes to "collect" only after the step already
        // entered `act` — must not appear in the awaited snapshot.
        subs.add_subscription("sub_3", "collect", true, Duration::from_secs(30))
            .await
            .unwrap();

        let pending_sub2 = engine.list_all_pending_actions_for("sub_2").await.unwrap();
        assert_eq!(pending_sub2.len(), 1);
        assert_eq!(pending_sub2[0].step_name, "collect");

        let pending_sub3 = engine.list_all_pending_actions_for("sub_3").await.unwrap();
        assert!(pending_sub3.is_empty(), "sub_3 joined after act-entry, must not be awaited");
    }

    #[tokio::test]
    async fn timeout_with_fail_policy_removes_instance_and_emits_failure_event() {
        let descriptor = WorkflowDescriptor {
            name: "flaky".into(),
            steps: vec![Step::act("only", "only_action", Duration::from_millis(0))],
            on_success: "workflow_end".into(),
            on_failure: "workflow_failed".into(),
        };
        let (engine, _store, bus) = engine_with(descriptor).await;
        let waiter = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move { bus.wait_for("workflow_failed", |_| true).await })
        };
        tokio::task::yield_now().await;

        engine.start("flaky", "inst-1", serde_json::json!({})).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let handled = engine.check_timeouts().await.unwrap();
        assert_eq!(handled, 1);
        let msg = waiter.await.unwrap();
        assert!(matches!(msg, Message::Event(_)));
    }

    #[test]
    fn builtin_descriptors_cover_the_fixed_workflow_kinds() {
        let names: Vec<&str> = builtin_descriptors(Duration::from_secs(30))
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(names, vec!["collect", "cleanup", "metrics"]);
    }

    #[tokio::test]
    async fn metrics_workflow_continues_past_a_timed_out_step() {
        let descriptor = builtin_descriptors(Duration::from_millis(0))
            .into_iter()
            .find(|d| d.name == "metrics")
            .unwrap();
        let (engine, _store, bus) = engine_with(descriptor).await;
        let waiter = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move { bus.wait_for("metrics_workflow_end", |_| true).await })
        };
        tokio::task::yield_now().await;

        engine.start("metrics", "inst-1", serde_json::json!({})).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let handled = engine.check_timeouts().await.unwrap();
        assert_eq!(handled, 1);
        let msg = waiter.await.unwrap();
        assert!(matches!(msg, Message::Event(_)));
    }
}
