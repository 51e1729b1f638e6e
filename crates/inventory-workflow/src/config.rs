//! Construction-time knobs for the worker-task queue and workflow engine,
//! gathered into one struct the embedding application builds and passes in.

use std::time::Duration as StdDuration;

use crate::queue::QueueConfig;
use crate::workflow::{builtin_descriptors, WorkflowDescriptor};

/// Plain `Default`-implementing configuration, not sourced from an env/CLI
/// layer — the embedding application constructs it directly, the same shape
/// a library with no binary entry point of its own takes configuration in.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_backlog: usize,
    pub max_attempts: u32,
    pub stale_claim_threshold: chrono::Duration,
    pub default_step_timeout: StdDuration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_backlog: 1000,
            max_attempts: 3,
            stale_claim_threshold: chrono::Duration::seconds(60),
            default_step_timeout: StdDuration::from_secs(30),
        }
    }
}

impl EngineConfig {
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_backlog: self.max_backlog,
            max_attempts: self.max_attempts,
            in_flight_timeout: self.stale_claim_threshold,
        }
    }

    /// The fixed `collect`/`cleanup`/`metrics` descriptors, each step using
    /// `default_step_timeout` unless the embedding application overrides one.
    pub fn builtin_descriptors(&self) -> Vec<WorkflowDescriptor> {
        builtin_descriptors(self.default_step_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_feeds_consistent_queue_and_descriptors() {
        let config = EngineConfig::default();
        let queue_config = config.queue_config();
        assert_eq!(queue_config.max_backlog, config.max_backlog);
        assert_eq!(queue_config.max_attempts, config.max_attempts);
        assert_eq!(queue_config.in_flight_timeout, config.stale_claim_threshold);

        let descriptors = config.builtin_descriptors();
        assert_eq!(descriptors.len(), 3);
        assert!(descriptors
            .iter()
            .flat_map(|d| d.steps.iter())
            .all(|step| step.timeout == config.default_step_timeout));
    }
}
