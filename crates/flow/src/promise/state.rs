//! Single-assignment promise cell

use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::error::{FlowError, WorkError};

/// Values that can flow through a promise
///
/// A settled value is handed to every continuation, so it must be clonable.
pub trait PromiseValue: Clone + Send + 'static {}

impl<T: Clone + Send + 'static> PromiseValue for T {}

/// Terminal result as seen by a continuation
///
/// Cancellation is delivered as [`FlowError::Cancelled`].
pub type Outcome<T> = Result<T, FlowError>;

/// Observable state of a promise
#[derive(Debug, Clone, PartialEq)]
pub enum PromiseState<T> {
    /// Not resolved yet
    Pending,

    /// Resolved with a value
    Ready(T),

    /// Resolved with a failure
    Failed(FlowError),

    /// Cancelled by an external actor
    Cancelled(String),
}

impl<T> PromiseState<T> {
    /// Check if the state is terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready(_) => "ready",
            Self::Failed(_) => "failed",
            Self::Cancelled(_) => "cancelled",
        }
    }
}

impl<T: Clone> PromiseState<T> {
    /// Outcome of a terminal state, `None` while pending
    pub fn outcome(&self) -> Option<Outcome<T>> {
        match self {
            Self::Pending => None,
            Self::Ready(value) => Some(Ok(value.clone())),
            Self::Failed(err) => Some(Err(err.clone())),
            Self::Cancelled(reason) => Some(Err(FlowError::cancelled(reason.clone()))),
        }
    }
}

type Continuation<T> = Box<dyn FnOnce(Outcome<T>) + Send>;
type CancelHook = Box<dyn FnOnce() + Send>;

struct Cell<T> {
    state: PromiseState<T>,
    continuations: Vec<Continuation<T>>,
    wakers: Vec<Waker>,
    cancel_hook: Option<CancelHook>,
    /// Set while settled continuations are being drained
    dispatching: bool,
}

impl<T> Cell<T> {
    fn new(state: PromiseState<T>) -> Self {
        Self {
            state,
            continuations: Vec::new(),
            wakers: Vec::new(),
            cancel_hook: None,
            dispatching: false,
        }
    }
}

/// A deferred value resolved exactly once
///
/// Promises are cheap handles: clones observe the same cell. Continuations
/// registered with [`Promise::on_settled`] run synchronously when the promise
/// becomes terminal, in registration order, on whichever call settled it.
/// Nothing here blocks a thread.
///
/// # Example
///
/// ```
/// use everruns_flow::Promise;
///
/// let (promise, resolver) = Promise::<u32>::pending();
/// let doubled = promise.map(|v| v * 2);
///
/// resolver.resolve(21);
/// assert_eq!(doubled.outcome(), Some(Ok(42)));
/// ```
pub struct Promise<T> {
    cell: Arc<Mutex<Cell<T>>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T: PromiseValue> Promise<T> {
    fn with_state(state: PromiseState<T>) -> Self {
        Self {
            cell: Arc::new(Mutex::new(Cell::new(state))),
        }
    }

    /// Create a promise that is already ready
    pub fn ready(value: T) -> Self {
        Self::with_state(PromiseState::Ready(value))
    }

    /// Create a promise that has already failed
    pub fn failed(error: FlowError) -> Self {
        Self::with_state(terminal_state(Err(error)))
    }

    /// Create a pending promise together with the handle that settles it
    pub fn pending() -> (Self, Resolver<T>) {
        let promise = Self::with_state(PromiseState::Pending);
        let resolver = Resolver {
            cell: promise.cell.clone(),
        };
        (promise, resolver)
    }

    /// Current state
    pub fn state(&self) -> PromiseState<T> {
        self.cell.lock().state.clone()
    }

    /// Terminal outcome, `None` while pending
    pub fn outcome(&self) -> Option<Outcome<T>> {
        self.cell.lock().state.outcome()
    }

    /// Check if the promise resolved with a value
    pub fn is_ready(&self) -> bool {
        matches!(self.cell.lock().state, PromiseState::Ready(_))
    }

    /// Check if the promise reached any terminal state
    pub fn is_terminal(&self) -> bool {
        self.cell.lock().state.is_terminal()
    }

    /// Check if two handles observe the same cell
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// Register a continuation to run once the promise is terminal
    ///
    /// Runs immediately if the promise already settled.
    pub fn on_settled<F>(&self, continuation: F)
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        let outcome = {
            let mut cell = self.cell.lock();
            match cell.state.outcome() {
                Some(outcome) if !cell.dispatching => outcome,
                _ => {
                    cell.continuations.push(Box::new(continuation));
                    return;
                }
            }
        };
        continuation(outcome);
    }

    /// Chain work that produces another promise once this one is ready
    ///
    /// A failure of `self` skips `work` and fails the returned promise with
    /// the same error.
    pub fn then<P, F>(&self, work: F) -> Promise<P::Output>
    where
        P: IntoPromise,
        F: FnOnce(T) -> P + Send + 'static,
    {
        let (promise, resolver) = Promise::pending();
        self.on_settled(move |outcome| match outcome {
            Ok(value) => resolver.follow(&invoke_guarded(move || work(value))),
            Err(err) => {
                resolver.fail(err);
            }
        });
        promise
    }

    /// Transform the value once this promise is ready
    pub fn map<U, F>(&self, f: F) -> Promise<U>
    where
        U: PromiseValue,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.then(move |value| Promise::ready(f(value)))
    }

    /// Deliver a cancellation to a pending promise
    ///
    /// If the engine attached a cancel hook (timers do), the hook runs first.
    /// Returns `false` if the promise was already terminal or the hook
    /// settled it.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        let hook = {
            let mut cell = self.cell.lock();
            if cell.state.is_terminal() {
                return false;
            }
            cell.cancel_hook.take()
        };

        if let Some(hook) = hook {
            hook();
        }
        settle(&self.cell, PromiseState::Cancelled(reason.into()))
    }

    /// Handle that observes this promise without keeping it alive
    pub(crate) fn downgrade(&self) -> WeakPromise<T> {
        WeakPromise {
            cell: Arc::downgrade(&self.cell),
        }
    }

    /// Attach an engine-side hook that runs when the promise is cancelled
    pub(crate) fn set_cancel_hook<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut cell = self.cell.lock();
        if !cell.state.is_terminal() {
            cell.cancel_hook = Some(Box::new(hook));
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.cell.lock().state)
            .finish()
    }
}

impl<T: PromiseValue> Future for Promise<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut cell = self.cell.lock();
        if let Some(outcome) = cell.state.outcome() {
            return Poll::Ready(outcome);
        }
        if !cell.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            cell.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

/// Non-owning promise handle, see [`Promise::downgrade`]
pub(crate) struct WeakPromise<T> {
    cell: Weak<Mutex<Cell<T>>>,
}

impl<T> WeakPromise<T> {
    /// The promise, if some owner still holds it
    pub(crate) fn upgrade(&self) -> Option<Promise<T>> {
        self.cell.upgrade().map(|cell| Promise { cell })
    }
}

/// Engine-side handle that settles a pending promise
pub struct Resolver<T> {
    cell: Arc<Mutex<Cell<T>>>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T: PromiseValue> Resolver<T> {
    /// The promise this resolver settles
    pub fn promise(&self) -> Promise<T> {
        Promise {
            cell: self.cell.clone(),
        }
    }

    /// Resolve with a value; `false` if already terminal
    pub fn resolve(&self, value: T) -> bool {
        settle(&self.cell, PromiseState::Ready(value))
    }

    /// Fail with an error; `false` if already terminal
    ///
    /// A [`FlowError::Cancelled`] error settles the promise as cancelled.
    pub fn fail(&self, error: FlowError) -> bool {
        settle(&self.cell, terminal_state(Err(error)))
    }

    /// Cancel the promise; `false` if already terminal
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        settle(&self.cell, PromiseState::Cancelled(reason.into()))
    }

    /// Settle with an outcome; `false` if already terminal
    pub fn complete(&self, outcome: Outcome<T>) -> bool {
        settle(&self.cell, terminal_state(outcome))
    }

    /// Settle with whatever `source` settles with
    pub fn follow(&self, source: &Promise<T>) {
        if Arc::ptr_eq(&self.cell, &source.cell) {
            return;
        }
        let resolver = self.clone();
        source.on_settled(move |outcome| {
            resolver.complete(outcome);
        });
    }
}

fn terminal_state<T>(outcome: Outcome<T>) -> PromiseState<T> {
    match outcome {
        Ok(value) => PromiseState::Ready(value),
        Err(FlowError::Cancelled { reason }) => PromiseState::Cancelled(reason),
        Err(err) => PromiseState::Failed(err),
    }
}

fn settle<T: PromiseValue>(cell: &Arc<Mutex<Cell<T>>>, state: PromiseState<T>) -> bool {
    let Some(outcome) = state.outcome() else {
        return false;
    };

    let wakers = {
        let mut guard = cell.lock();
        if guard.state.is_terminal() {
            return false;
        }
        trace!(state = state.name(), "promise settled");
        guard.state = state;
        guard.cancel_hook = None;
        guard.dispatching = true;
        std::mem::take(&mut guard.wakers)
    };

    for waker in wakers {
        waker.wake();
    }

    let _dispatch = DispatchGuard { cell };
    // Continuations registered while draining are queued behind earlier ones.
    loop {
        let batch = {
            let mut guard = cell.lock();
            if guard.continuations.is_empty() {
                guard.dispatching = false;
                break;
            }
            std::mem::take(&mut guard.continuations)
        };
        for continuation in batch {
            continuation(outcome.clone());
        }
    }
    true
}

/// Clears the dispatching flag if a continuation unwinds out of `settle`
struct DispatchGuard<'a, T> {
    cell: &'a Arc<Mutex<Cell<T>>>,
}

impl<T> Drop for DispatchGuard<'_, T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.cell.lock().dispatching = false;
        }
    }
}

/// Run a callback, turning a panic into a non-retryable work failure
pub(crate) fn catch_panic<R, F>(f: F) -> Result<R, FlowError>
where
    F: FnOnce() -> R,
{
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        warn!(%message, "work panicked");
        FlowError::Work(
            WorkError::non_retryable(format!("work panicked: {message}")).with_type("panic"),
        )
    })
}

/// Run author-supplied work, turning a panic into a failed promise
pub(crate) fn invoke_guarded<P, F>(work: F) -> Promise<P::Output>
where
    P: IntoPromise,
    F: FnOnce() -> P,
{
    match catch_panic(work) {
        Ok(result) => result.into_promise(),
        Err(err) => Promise::failed(err),
    }
}

/// Type-erased view of a promise used by the combinators
///
/// Lets heterogeneous promise sets be combined without knowing value types.
pub trait Awaitable: Send + Sync {
    /// Register a continuation that only observes success or failure
    fn subscribe(&self, continuation: Box<dyn FnOnce(Result<(), FlowError>) + Send>);

    /// Terminal outcome with the value discarded, `None` while pending
    fn erased_outcome(&self) -> Option<Result<(), FlowError>>;
}

impl<T: PromiseValue> Awaitable for Promise<T> {
    fn subscribe(&self, continuation: Box<dyn FnOnce(Result<(), FlowError>) + Send>) {
        self.on_settled(move |outcome| continuation(outcome.map(|_| ())));
    }

    fn erased_outcome(&self) -> Option<Result<(), FlowError>> {
        self.outcome().map(|outcome| outcome.map(|_| ()))
    }
}

/// Conversion into exactly one promise
///
/// Promises convert to themselves, so wrapping never nests. `Result`s become
/// ready or failed promises, and common plain values become ready promises.
/// Other value types can be wrapped with [`Promise::ready`].
pub trait IntoPromise {
    /// Value type of the resulting promise
    type Output: PromiseValue;

    /// Perform the conversion
    fn into_promise(self) -> Promise<Self::Output>;
}

impl<T: PromiseValue> IntoPromise for Promise<T> {
    type Output = T;

    fn into_promise(self) -> Promise<T> {
        self
    }
}

impl<T: PromiseValue> IntoPromise for &Promise<T> {
    type Output = T;

    fn into_promise(self) -> Promise<T> {
        self.clone()
    }
}

impl<T: PromiseValue> IntoPromise for Result<T, FlowError> {
    type Output = T;

    fn into_promise(self) -> Promise<T> {
        match self {
            Ok(value) => Promise::ready(value),
            Err(err) => Promise::failed(err),
        }
    }
}

impl<T: PromiseValue> IntoPromise for Option<T> {
    type Output = Option<T>;

    fn into_promise(self) -> Promise<Option<T>> {
        Promise::ready(self)
    }
}

impl<T: PromiseValue> IntoPromise for Vec<T> {
    type Output = Vec<T>;

    fn into_promise(self) -> Promise<Vec<T>> {
        Promise::ready(self)
    }
}

impl IntoPromise for &str {
    type Output = String;

    fn into_promise(self) -> Promise<String> {
        Promise::ready(self.to_string())
    }
}

macro_rules! ready_into_promise {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoPromise for $ty {
                type Output = $ty;

                fn into_promise(self) -> Promise<$ty> {
                    Promise::ready(self)
                }
            }
        )*
    };
}

ready_into_promise!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    usize,
    i8,
    i16,
    i32,
    i64,
    isize,
    f32,
    f64,
    String,
    serde_json::Value,
);

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_ready_promise() {
        let promise = Promise::ready(7);
        assert!(promise.is_ready());
        assert_eq!(promise.state(), PromiseState::Ready(7));
        assert_eq!(promise.outcome(), Some(Ok(7)));
    }

    #[test]
    fn test_single_assignment() {
        let (promise, resolver) = Promise::<u32>::pending();
        assert!(!promise.is_terminal());

        assert!(resolver.resolve(1));
        assert!(!resolver.resolve(2));
        assert!(!resolver.fail(FlowError::work("late")));
        assert!(!promise.cancel("late"));

        assert_eq!(promise.outcome(), Some(Ok(1)));
    }

    #[test]
    fn test_continuations_run_in_registration_order() {
        let (promise, resolver) = Promise::<u32>::pending();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            promise.on_settled(move |_| order.lock().push(i));
        }
        assert!(order.lock().is_empty());

        resolver.resolve(0);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_continuation_registered_during_dispatch_runs_after_earlier_ones() {
        let (promise, resolver) = Promise::<u32>::pending();
        let order = Arc::new(Mutex::new(Vec::new()));

        {
            let order = order.clone();
            let inner = promise.clone();
            promise.on_settled(move |_| {
                order.lock().push("first");
                let order = order.clone();
                inner.on_settled(move |_| order.lock().push("nested"));
            });
        }
        {
            let order = order.clone();
            promise.on_settled(move |_| order.lock().push("second"));
        }

        resolver.resolve(1);
        assert_eq!(*order.lock(), vec!["first", "second", "nested"]);
    }

    #[test]
    fn test_on_settled_after_terminal_runs_immediately() {
        let promise = Promise::ready(3);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        promise.on_settled(move |outcome| {
            assert_eq!(outcome, Ok(3));
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_then_skips_work_on_failure() {
        let promise = Promise::<u32>::failed(FlowError::dependency("boom"));
        let invoked = Arc::new(AtomicUsize::new(0));
        let counter = invoked.clone();

        let next = promise.then(move |v| {
            counter.fetch_add(1, Ordering::SeqCst);
            Promise::ready(v + 1)
        });

        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(next.outcome(), Some(Err(FlowError::dependency("boom"))));
    }

    #[test]
    fn test_then_follows_returned_promise() {
        let (first, first_resolver) = Promise::<u32>::pending();
        let (second, second_resolver) = Promise::<String>::pending();

        let chained = first.then(move |_| second);
        first_resolver.resolve(1);
        assert!(!chained.is_terminal());

        second_resolver.resolve("done".to_string());
        assert_eq!(chained.outcome(), Some(Ok("done".to_string())));
    }

    #[test]
    fn test_cancel_runs_hook_and_reports_cancelled() {
        let (promise, _resolver) = Promise::<()>::pending();
        let hooked = Arc::new(AtomicUsize::new(0));
        let counter = hooked.clone();
        promise.set_cancel_hook(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(promise.cancel("no longer needed"));
        assert_eq!(hooked.load(Ordering::SeqCst), 1);
        assert_eq!(
            promise.state(),
            PromiseState::Cancelled("no longer needed".to_string())
        );
        assert_eq!(
            promise.outcome(),
            Some(Err(FlowError::cancelled("no longer needed")))
        );
    }

    #[test]
    fn test_panicking_continuation_does_not_wedge_dispatch() {
        let (promise, resolver) = Promise::<u32>::pending();
        promise.on_settled(|_| panic!("continuation bug"));

        let unwound = catch_unwind(AssertUnwindSafe(|| resolver.resolve(4)));
        assert!(unwound.is_err());
        assert_eq!(promise.state(), PromiseState::Ready(4));

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        promise.on_settled(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_reports_false_when_hook_settles_first() {
        let (promise, resolver) = Promise::<()>::pending();
        promise.set_cancel_hook(move || {
            resolver.resolve(());
        });

        assert!(!promise.cancel("too late"));
        assert_eq!(promise.state(), PromiseState::Ready(()));
    }

    #[test]
    fn test_failing_with_cancellation_settles_as_cancelled() {
        let (promise, resolver) = Promise::<()>::pending();
        resolver.fail(FlowError::cancelled("upstream"));
        assert_eq!(promise.state(), PromiseState::Cancelled("upstream".into()));
    }

    #[test]
    fn test_into_promise_is_identity_for_promises() {
        let (promise, _resolver) = Promise::<u32>::pending();
        let wrapped = promise.clone().into_promise();
        assert!(wrapped.ptr_eq(&promise));
        assert!((&promise).into_promise().ptr_eq(&promise));
    }

    #[test]
    fn test_into_promise_for_values_and_results() {
        assert_eq!(5u64.into_promise().outcome(), Some(Ok(5)));
        assert_eq!("hi".into_promise().outcome(), Some(Ok("hi".to_string())));
        assert_eq!(().into_promise().outcome(), Some(Ok(())));

        let failed: Result<u32, FlowError> = Err(FlowError::work("nope"));
        assert_eq!(
            failed.into_promise().outcome(),
            Some(Err(FlowError::work("nope")))
        );
    }

    #[test]
    fn test_awaitable_erases_value() {
        let promise = Promise::ready("value".to_string());
        let erased: &dyn Awaitable = &promise;
        assert_eq!(erased.erased_outcome(), Some(Ok(())));
    }

    #[tokio::test]
    async fn test_promise_can_be_awaited() {
        let (promise, resolver) = Promise::<u32>::pending();

        let handle = tokio::spawn(promise.clone());
        tokio::task::yield_now().await;
        resolver.resolve(9);

        assert_eq!(handle.await.unwrap(), Ok(9));
    }
}
