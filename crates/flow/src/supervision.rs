//! Structured exception handling over promise-returning work

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::FlowError;
use crate::promise::{
    catch_panic, invoke_guarded, IntoPromise, Outcome, Promise, PromiseValue, Resolver,
};

/// How a supervised block finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Produced a value (possibly through the catch handler)
    Ready,

    /// Failed and the failure was not recovered
    Failed,

    /// Ended with an unrecovered cancellation
    Cancelled,
}

impl Completion {
    fn of<T>(outcome: &Outcome<T>) -> Self {
        match outcome {
            Ok(_) => Self::Ready,
            Err(err) if err.is_cancellation() => Self::Cancelled,
            Err(_) => Self::Failed,
        }
    }
}

/// Lifecycle of a [`DoTry`]
///
/// Transitions only move forward: `Armed` → `CatchAttached` → `Running` →
/// `Completed`. A completed block is never re-armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoTryState {
    /// Work not yet attempted, no handler
    Armed,

    /// Work not yet attempted, catch handler attached
    CatchAttached,

    /// Work (or the recovery returned by the handler) is in flight
    Running,

    /// Result promise settled
    Completed(Completion),
}

type Work<T> = Box<dyn FnOnce() -> Promise<T> + Send>;
type Handler<T> = Box<dyn FnOnce(FlowError) -> Promise<T> + Send>;
type Finally = Box<dyn FnOnce() + Send>;

struct Supervision<T> {
    state: DoTryState,
    work: Option<Work<T>>,
    handler: Option<Handler<T>>,
    finally: Vec<Finally>,
    running: Option<Promise<T>>,
}

/// Work under exception supervision
///
/// Created armed by `do_try`; attach a handler with
/// [`with_catch`](Self::with_catch) and cleanup with
/// [`with_finally`](Self::with_finally), then [`start`](Self::start) it or
/// ask for its [`result`](Self::result). Failures of the work, including a
/// rejected promise or a panic, go to the handler. Without a handler they
/// fail the result unchanged.
///
/// # Example
///
/// ```
/// use everruns_flow::{DoTry, FlowError, Promise};
///
/// let result = DoTry::new(|| Promise::<u32>::failed(FlowError::work("flaky")))
///     .with_catch(|_err| Ok::<u32, FlowError>(0))
///     .result();
///
/// assert_eq!(result.outcome(), Some(Ok(0)));
/// ```
pub struct DoTry<T> {
    inner: Arc<Mutex<Supervision<T>>>,
    resolver: Resolver<T>,
}

impl<T: PromiseValue> DoTry<T> {
    /// Arm a block around `work`
    ///
    /// Nothing runs until the block is started.
    pub fn new<P, F>(work: F) -> Self
    where
        P: IntoPromise<Output = T>,
        F: FnOnce() -> P + Send + 'static,
    {
        let (_, resolver) = Promise::pending();
        Self {
            inner: Arc::new(Mutex::new(Supervision {
                state: DoTryState::Armed,
                work: Some(Box::new(move || invoke_guarded(work))),
                handler: None,
                finally: Vec::new(),
                running: None,
            })),
            resolver,
        }
    }

    /// Attach the catch handler
    ///
    /// The handler receives the failure and returns the replacement: a
    /// promise or `Ok(value)` recovers, `Err(error)` re-raises. Attaching
    /// again replaces the previous handler. Ignored once the work started.
    pub fn with_catch<R, H>(self, handler: H) -> Self
    where
        R: IntoPromise<Output = T>,
        H: FnOnce(FlowError) -> R + Send + 'static,
    {
        {
            let mut inner = self.inner.lock();
            match inner.state {
                DoTryState::Armed | DoTryState::CatchAttached => {
                    inner.handler = Some(Box::new(move |err: FlowError| {
                        invoke_guarded(move || handler(err))
                    }));
                    inner.state = DoTryState::CatchAttached;
                }
                state => warn!(?state, "catch handler ignored, work already started"),
            }
        }
        self
    }

    /// Attach a callback that runs once the outcome is known
    ///
    /// Callbacks run in attachment order, before the result promise settles.
    /// Ignored once the work started.
    pub fn with_finally<C>(self, callback: C) -> Self
    where
        C: FnOnce() + Send + 'static,
    {
        {
            let mut inner = self.inner.lock();
            match inner.state {
                DoTryState::Armed | DoTryState::CatchAttached => {
                    inner.finally.push(Box::new(callback));
                }
                state => warn!(?state, "finally callback ignored, work already started"),
            }
        }
        self
    }

    /// Current lifecycle state
    pub fn state(&self) -> DoTryState {
        self.inner.lock().state
    }

    /// Run the work if it has not run yet
    pub fn start(&self) {
        let work = {
            let mut inner = self.inner.lock();
            match inner.state {
                DoTryState::Armed | DoTryState::CatchAttached => {
                    inner.state = DoTryState::Running;
                    inner.work.take()
                }
                _ => None,
            }
        };
        let Some(work) = work else {
            return;
        };

        debug!("supervised work started");
        let running = work();
        self.inner.lock().running = Some(running.clone());

        let inner = self.inner.clone();
        let resolver = self.resolver.clone();
        running.on_settled(move |outcome| supervise(inner, resolver, outcome));
    }

    /// Promise for the supervised outcome, starting the work if needed
    pub fn result(&self) -> Promise<T> {
        self.start();
        self.resolver.promise()
    }

    /// Cancel the supervised work
    ///
    /// An armed block completes without running its work; the cancellation
    /// still goes through the catch handler. A running block cancels the
    /// promise currently in flight. Returns `false` if nothing was cancelled.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let running = {
            let mut inner = self.inner.lock();
            match inner.state {
                DoTryState::Armed | DoTryState::CatchAttached => {
                    inner.state = DoTryState::Running;
                    inner.work = None;
                    None
                }
                DoTryState::Running => match inner.running.clone() {
                    Some(running) => Some(running),
                    None => return false,
                },
                DoTryState::Completed(_) => return false,
            }
        };

        debug!(%reason, "cancelling supervised work");
        match running {
            Some(running) => running.cancel(reason),
            None => {
                supervise(
                    self.inner.clone(),
                    self.resolver.clone(),
                    Err(FlowError::cancelled(reason)),
                );
                true
            }
        }
    }
}

impl<T> std::fmt::Debug for DoTry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoTry")
            .field("state", &self.inner.lock().state)
            .finish()
    }
}

impl<T: PromiseValue> IntoPromise for DoTry<T> {
    type Output = T;

    fn into_promise(self) -> Promise<T> {
        self.result()
    }
}

fn supervise<T: PromiseValue>(
    inner: Arc<Mutex<Supervision<T>>>,
    resolver: Resolver<T>,
    outcome: Outcome<T>,
) {
    let err = match outcome {
        Ok(value) => return finish(inner, resolver, Ok(value)),
        Err(err) => err,
    };

    let handler = inner.lock().handler.take();
    let Some(handler) = handler else {
        return finish(inner, resolver, Err(err));
    };

    debug!(error = %err, "catch handler invoked");
    let recovery = handler(err);
    inner.lock().running = Some(recovery.clone());
    recovery.on_settled(move |outcome| finish(inner, resolver, outcome));
}

fn finish<T: PromiseValue>(
    inner: Arc<Mutex<Supervision<T>>>,
    resolver: Resolver<T>,
    outcome: Outcome<T>,
) {
    let finally = std::mem::take(&mut inner.lock().finally);

    // The first panicking callback replaces the outcome; later ones still run.
    let mut callback_panic = None;
    for callback in finally {
        if let Err(err) = catch_panic(callback) {
            callback_panic.get_or_insert(err);
        }
    }
    let outcome = match callback_panic {
        Some(err) => Err(err),
        None => outcome,
    };

    let completion = Completion::of(&outcome);
    {
        let mut inner = inner.lock();
        inner.state = DoTryState::Completed(completion);
        inner.running = None;
    }

    debug!(?completion, "supervised work completed");
    resolver.complete(outcome);
}
