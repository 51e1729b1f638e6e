//! Subscription registry, worker-task queue, and workflow engine.

pub mod config;
pub mod queue;
pub mod subscription;
pub mod workflow;

pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::queue::{QueueConfig, TaskFailure, TaskResult, WorkerTask, WorkerTaskQueue};
    pub use crate::subscription::{Subscriber, Subscription, SubscriptionRegistry};
    pub use crate::workflow::{
        builtin_descriptors, FailurePolicy, InstanceState, Step, StepKind, WorkflowDescriptor, WorkflowEngine,
        WorkflowInstance,
    };
}
