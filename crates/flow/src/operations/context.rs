//! Concrete orchestration context

use std::sync::Arc;

use super::{LogHistory, OperationsConfig, WorkflowOperations};
use crate::reliability::RetryPolicy;
use crate::timer::TimerService;

/// Operations for one orchestration execution
///
/// Owns the activities handle and the status log; shares the engine's
/// timer service. Create one per execution (and per replay).
///
/// # Example
///
/// ```
/// use everruns_flow::prelude::*;
///
/// struct Greeter;
///
/// let ctx = OrchestrationContext::new(Greeter, VirtualTimers::new());
/// ctx.status("started");
/// assert_eq!(ctx.log_history().entries(), vec!["started"]);
/// ```
pub struct OrchestrationContext<A> {
    activities: A,
    timers: Arc<dyn TimerService>,
    history: LogHistory,
    config: OperationsConfig,
}

impl<A> OrchestrationContext<A> {
    /// Create a context with the default configuration
    pub fn new<S: TimerService + 'static>(activities: A, timers: S) -> Self {
        Self::with_config(activities, Arc::new(timers), OperationsConfig::default())
    }

    /// Create a context with a custom configuration
    pub fn with_config(
        activities: A,
        timers: Arc<dyn TimerService>,
        config: OperationsConfig,
    ) -> Self {
        Self {
            activities,
            timers,
            history: LogHistory::new(),
            config,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &OperationsConfig {
        &self.config
    }
}

impl<A> std::fmt::Debug for OrchestrationContext<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationContext")
            .field("history", &self.history)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<A: Send + Sync> WorkflowOperations for OrchestrationContext<A> {
    type Activities = A;

    fn activities(&self) -> &A {
        &self.activities
    }

    fn timers(&self) -> Arc<dyn TimerService> {
        self.timers.clone()
    }

    fn log_history(&self) -> &LogHistory {
        &self.history
    }

    fn default_retry_policy(&self) -> RetryPolicy {
        self.config.default_retry_policy.clone()
    }

    fn trace_status(&self) -> bool {
        self.config.trace_status
    }
}
