//! Timer-driven retry loop

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use super::RetryPolicy;
use crate::error::FlowError;
use crate::promise::{invoke_guarded, IntoPromise, Promise, PromiseValue, Resolver, WeakPromise};
use crate::timer::TimerService;

struct RetryLoop<T, F> {
    policy: RetryPolicy,
    timers: Arc<dyn TimerService>,
    work: Mutex<F>,
    resolver: Resolver<T>,
    started_at: Duration,
    /// Not owned: the pending timer's continuation already owns the loop
    backoff_timer: Mutex<Option<WeakPromise<()>>>,
}

/// Invoke `work` until it succeeds or `policy` gives up
///
/// Between attempts a timer is scheduled for the policy's delay; no thread
/// ever sleeps. Failures the policy refuses to retry (cancellations,
/// non-retryable errors) propagate unchanged. When attempts or the
/// expiration window run out the result fails with
/// [`FlowError::PolicyExhausted`] wrapping the last failure.
///
/// Cancelling the returned promise cancels a pending backoff timer and stops
/// further attempts.
#[instrument(skip(timers, policy, work), fields(max_attempts = ?policy.max_attempts))]
pub fn retry_with_timers<T, P, F>(
    timers: Arc<dyn TimerService>,
    policy: RetryPolicy,
    work: F,
) -> Promise<T>
where
    T: PromiseValue,
    P: IntoPromise<Output = T>,
    F: FnMut() -> P + Send + 'static,
{
    let (promise, resolver) = Promise::pending();
    let started_at = timers.now();
    let state = Arc::new(RetryLoop {
        policy,
        timers,
        work: Mutex::new(work),
        resolver,
        started_at,
        backoff_timer: Mutex::new(None),
    });

    let weak: Weak<RetryLoop<T, F>> = Arc::downgrade(&state);
    promise.set_cancel_hook(move || {
        let Some(state) = weak.upgrade() else {
            return;
        };
        // Release the lock before cancelling; the timer's continuation takes it.
        let timer = state.backoff_timer.lock().take().and_then(|t| t.upgrade());
        if let Some(timer) = timer {
            timer.cancel("retry cancelled");
        }
    });

    attempt(state, 1);
    promise
}

fn attempt<T, P, F>(state: Arc<RetryLoop<T, F>>, number: u32)
where
    T: PromiseValue,
    P: IntoPromise<Output = T>,
    F: FnMut() -> P + Send + 'static,
{
    if state.resolver.promise().is_terminal() {
        return;
    }

    debug!(attempt = number, "invoking work");
    let pending = {
        let mut work = state.work.lock();
        invoke_guarded(|| (*work)())
    };

    pending.on_settled(move |outcome| match outcome {
        Ok(value) => {
            if number > 1 {
                info!(attempts = number, "work succeeded after retry");
            }
            state.resolver.resolve(value);
        }
        Err(err) => on_failure(state, number, err),
    });
}

fn on_failure<T, P, F>(state: Arc<RetryLoop<T, F>>, number: u32, err: FlowError)
where
    T: PromiseValue,
    P: IntoPromise<Output = T>,
    F: FnMut() -> P + Send + 'static,
{
    if state.resolver.promise().is_terminal() {
        return;
    }

    if !state.policy.should_retry(&err) {
        debug!(attempt = number, error = %err, "failure is not retryable");
        state.resolver.fail(err);
        return;
    }

    let delay = state.policy.delay_for_attempt(number + 1);
    let elapsed = state.timers.now().saturating_sub(state.started_at);
    if !state.policy.has_attempts_remaining(number)
        || !state.policy.within_expiration(elapsed.saturating_add(delay))
    {
        warn!(attempts = number, error = %err, "retry policy exhausted");
        state.resolver.fail(FlowError::PolicyExhausted {
            attempts: number,
            last: Box::new(err),
        });
        return;
    }

    info!(
        attempt = number,
        delay_ms = delay.as_millis() as u64,
        error = %err,
        "scheduling retry"
    );
    let timer = state.timers.start_timer(delay);
    *state.backoff_timer.lock() = Some(timer.downgrade());

    timer.on_settled(move |fired| {
        // Already taken when the cancel hook of the result fired.
        let armed = state.backoff_timer.lock().take().is_some();
        match fired {
            Ok(()) => attempt(state, number + 1),
            Err(cancelled) if armed => {
                state.resolver.fail(cancelled);
            }
            Err(_) => {}
        }
    });
}
