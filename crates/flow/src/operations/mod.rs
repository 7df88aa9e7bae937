//! Orchestration operations façade
//!
//! [`WorkflowOperations`] is the authoring API: engine integrations supply
//! the activities handle, the timer service and the status log, and every
//! other operation comes with a default implementation built on those.
//! [`OrchestrationContext`] is the provided implementation.

mod config;
mod context;
mod history;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::promise::{
    all_promises, any_promises, AndPromise, Awaitable, IntoPromise, OrPromise, Promise,
    PromiseValue,
};
use crate::reliability::{retry_with_timers, RetryPolicy};
use crate::supervision::DoTry;
use crate::timer::TimerService;

pub use config::OperationsConfig;
pub use context::OrchestrationContext;
pub use history::{LogHistory, StatusMessage};

/// Deterministic operations available to orchestration code
///
/// None of these block a thread. Anything that depends on a pending promise
/// registers a continuation and returns a promise the engine resolves later.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use everruns_flow::prelude::*;
///
/// let timers = VirtualTimers::new();
/// let ctx = OrchestrationContext::new((), timers.clone());
///
/// let delayed = ctx.timer(Duration::from_secs(30));
/// let done = ctx.wait_for(&delayed, |_| Ok::<_, FlowError>("woke up"));
///
/// timers.advance(Duration::from_secs(30));
/// assert_eq!(done.outcome(), Some(Ok("woke up")));
/// ```
pub trait WorkflowOperations: Send + Sync {
    /// Handle through which activities are scheduled
    type Activities;

    /// Activities handle, stable for the lifetime of one execution
    fn activities(&self) -> &Self::Activities;

    /// Engine timer primitive
    fn timers(&self) -> Arc<dyn TimerService>;

    /// Status log owned by this execution
    fn log_history(&self) -> &LogHistory;

    /// Policy used by [`retry`](Self::retry)
    ///
    /// Exponential backoff from 1 second, doubling up to 60 seconds, with no
    /// attempt limit.
    fn default_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::unlimited()
    }

    /// Whether status messages are also emitted at info level
    fn trace_status(&self) -> bool {
        false
    }

    /// Record a status message
    ///
    /// Empty or absent messages are skipped. Always returns a ready promise,
    /// so it can end a continuation chain.
    fn status(&self, message: impl StatusMessage) -> Promise<()> {
        if let Some(message) = message.into_message() {
            if self.log_history().append(&message) {
                if self.trace_status() {
                    info!(status = %message, "orchestration status");
                } else {
                    debug!(status = %message, "orchestration status");
                }
            }
        }
        Promise::ready(())
    }

    /// Promise that is ready once every input resolved without failure
    fn all_promises(&self, promises: &[&dyn Awaitable]) -> AndPromise {
        all_promises(promises)
    }

    /// Promise that is ready once any input is ready
    fn any_promises(&self, promises: &[&dyn Awaitable]) -> OrPromise {
        any_promises(promises)
    }

    /// Wrap a value in exactly one promise
    ///
    /// Promises are returned unchanged, so wrapping is idempotent.
    fn promise_for<P: IntoPromise>(&self, value: P) -> Promise<P::Output> {
        value.into_promise()
    }

    /// Run `work` with the trigger's value once it is ready
    ///
    /// If the trigger fails, the result fails with the same error and `work`
    /// is never invoked.
    fn wait_for<U, P, F>(&self, trigger: &Promise<U>, work: F) -> Promise<P::Output>
    where
        U: PromiseValue,
        P: IntoPromise,
        F: FnOnce(U) -> P + Send + 'static,
    {
        trigger.then(work)
    }

    /// [`wait_for`](Self::wait_for) on a value that may not be a promise yet
    fn wait_for_value<V, P, F>(&self, value: V, work: F) -> Promise<P::Output>
    where
        V: IntoPromise,
        P: IntoPromise,
        F: FnOnce(V::Output) -> P + Send + 'static,
    {
        let trigger = self.promise_for(value);
        self.wait_for(&trigger, work)
    }

    /// Arm `work` under exception supervision
    fn do_try<P, F>(&self, work: F) -> DoTry<P::Output>
    where
        P: IntoPromise,
        F: FnOnce() -> P + Send + 'static,
    {
        DoTry::new(work)
    }

    /// Arm `work` to run after `trigger`, supervising both
    ///
    /// A trigger failure reaches the catch handler like a failure of `work`.
    fn do_try_after<U, P, F>(&self, trigger: &Promise<U>, work: F) -> DoTry<P::Output>
    where
        U: PromiseValue,
        P: IntoPromise,
        F: FnOnce(U) -> P + Send + 'static,
    {
        let trigger = trigger.clone();
        DoTry::new(move || trigger.then(work))
    }

    /// Durable timer that is ready once `delay` elapses
    fn timer(&self, delay: Duration) -> Promise<()> {
        self.timers().start_timer(delay)
    }

    /// Started timer whose cancellation counts as success
    ///
    /// Cancel it through [`DoTry::cancel`] once it is no longer needed; any
    /// failure other than a cancellation is re-raised.
    fn cancellable_timer(&self, delay: Duration) -> DoTry<()> {
        let timers = self.timers();
        let timer = DoTry::new(move || timers.start_timer(delay)).with_catch(|err| {
            if err.is_cancellation() {
                debug!(error = %err, "cancellable timer discarded");
                Ok(())
            } else {
                Err(err)
            }
        });
        timer.start();
        timer
    }

    /// Invoke `work` until it succeeds or `policy` gives up
    fn retry_with<P, F>(&self, policy: RetryPolicy, work: F) -> Promise<P::Output>
    where
        P: IntoPromise,
        F: FnMut() -> P + Send + 'static,
    {
        retry_with_timers(self.timers(), policy, work)
    }

    /// [`retry_with`](Self::retry_with) using the default policy
    fn retry<P, F>(&self, work: F) -> Promise<P::Output>
    where
        P: IntoPromise,
        F: FnMut() -> P + Send + 'static,
    {
        self.retry_with(self.default_retry_policy(), work)
    }
}
