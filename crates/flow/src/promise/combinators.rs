//! AND / OR aggregation over sets of promises

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::state::{Awaitable, IntoPromise, Outcome, Promise, PromiseState, Resolver};
use crate::error::FlowError;

/// Promise that is ready once every input is terminal and none failed
///
/// Fails with the lowest-index failure once every input is terminal.
/// It cannot be cancelled on its own; cancel the inputs instead.
#[derive(Clone)]
pub struct AndPromise {
    inner: Promise<()>,
    inputs: usize,
}

impl AndPromise {
    /// Number of combined inputs
    pub fn len(&self) -> usize {
        self.inputs
    }

    /// Check if the combination has no inputs
    pub fn is_empty(&self) -> bool {
        self.inputs == 0
    }

    /// Current state
    pub fn state(&self) -> PromiseState<()> {
        self.inner.state()
    }

    /// Terminal outcome, `None` while pending
    pub fn outcome(&self) -> Option<Outcome<()>> {
        self.inner.outcome()
    }

    /// Check if every input resolved without failure
    pub fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    /// Underlying promise
    pub fn promise(&self) -> Promise<()> {
        self.inner.clone()
    }
}

impl std::fmt::Debug for AndPromise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AndPromise")
            .field("inputs", &self.inputs)
            .field("state", &self.inner.state())
            .finish()
    }
}

impl IntoPromise for AndPromise {
    type Output = ();

    fn into_promise(self) -> Promise<()> {
        self.inner
    }
}

impl Awaitable for AndPromise {
    fn subscribe(&self, continuation: Box<dyn FnOnce(Result<(), FlowError>) + Send>) {
        self.inner.subscribe(continuation);
    }

    fn erased_outcome(&self) -> Option<Result<(), FlowError>> {
        self.inner.erased_outcome()
    }
}

/// Promise that is ready as soon as any input is ready
///
/// The value is the index of the winning input. Losing inputs are left
/// untouched. If every input ends without becoming ready, it fails with the
/// lowest-index failure. With no inputs it stays pending forever.
#[derive(Clone)]
pub struct OrPromise {
    inner: Promise<usize>,
    inputs: usize,
}

impl OrPromise {
    /// Number of combined inputs
    pub fn len(&self) -> usize {
        self.inputs
    }

    /// Check if the combination has no inputs
    pub fn is_empty(&self) -> bool {
        self.inputs == 0
    }

    /// Current state
    pub fn state(&self) -> PromiseState<usize> {
        self.inner.state()
    }

    /// Terminal outcome, `None` while pending
    pub fn outcome(&self) -> Option<Outcome<usize>> {
        self.inner.outcome()
    }

    /// Check if some input became ready
    pub fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    /// Index of the input that resolved first, if any
    pub fn winner(&self) -> Option<usize> {
        match self.inner.state() {
            PromiseState::Ready(index) => Some(index),
            _ => None,
        }
    }

    /// Underlying promise
    pub fn promise(&self) -> Promise<usize> {
        self.inner.clone()
    }
}

impl std::fmt::Debug for OrPromise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrPromise")
            .field("inputs", &self.inputs)
            .field("state", &self.inner.state())
            .finish()
    }
}

impl IntoPromise for OrPromise {
    type Output = usize;

    fn into_promise(self) -> Promise<usize> {
        self.inner
    }
}

impl Awaitable for OrPromise {
    fn subscribe(&self, continuation: Box<dyn FnOnce(Result<(), FlowError>) + Send>) {
        self.inner.subscribe(continuation);
    }

    fn erased_outcome(&self) -> Option<Result<(), FlowError>> {
        self.inner.erased_outcome()
    }
}

/// Per-input terminal results, indexed by input position
struct Tally {
    results: Vec<Option<Result<(), FlowError>>>,
    remaining: usize,
}

impl Tally {
    fn new(inputs: usize) -> Self {
        Self {
            results: vec![None; inputs],
            remaining: inputs,
        }
    }

    /// Record a result; returns true when the last input just settled
    fn record(&mut self, index: usize, result: Result<(), FlowError>) -> bool {
        if self.results[index].is_some() {
            return false;
        }
        self.results[index] = Some(result);
        self.remaining -= 1;
        self.remaining == 0
    }

    fn first_failure(&self) -> Option<FlowError> {
        self.results
            .iter()
            .flatten()
            .find_map(|result| result.as_ref().err().cloned())
    }
}

/// Combine promises with AND semantics
///
/// An empty set is immediately ready.
pub fn all_promises(promises: &[&dyn Awaitable]) -> AndPromise {
    let inputs = promises.len();
    if inputs == 0 {
        return AndPromise {
            inner: Promise::ready(()),
            inputs,
        };
    }

    let (inner, resolver) = Promise::pending();
    let tally = Arc::new(Mutex::new(Tally::new(inputs)));

    for (index, promise) in promises.iter().enumerate() {
        let tally = tally.clone();
        let resolver = resolver.clone();
        promise.subscribe(Box::new(move |result| {
            let failure = {
                let mut tally = tally.lock();
                if !tally.record(index, result) {
                    return;
                }
                tally.first_failure()
            };
            settle_and(&resolver, inputs, failure);
        }));
    }

    AndPromise { inner, inputs }
}

fn settle_and(resolver: &Resolver<()>, inputs: usize, failure: Option<FlowError>) {
    match failure {
        Some(err) => {
            debug!(inputs, error = %err, "and-promise failed");
            resolver.fail(err);
        }
        None => {
            debug!(inputs, "and-promise ready");
            resolver.resolve(());
        }
    }
}

/// Combine promises with OR semantics
///
/// An empty set never resolves.
pub fn any_promises(promises: &[&dyn Awaitable]) -> OrPromise {
    let inputs = promises.len();
    let (inner, resolver) = Promise::pending();
    if inputs == 0 {
        // Nothing can ever resolve it; the resolver is dropped on purpose.
        return OrPromise { inner, inputs };
    }

    // Inputs that are already ready win in index order.
    if let Some(index) = promises
        .iter()
        .position(|p| matches!(p.erased_outcome(), Some(Ok(()))))
    {
        debug!(inputs, winner = index, "or-promise ready");
        resolver.resolve(index);
        return OrPromise { inner, inputs };
    }

    let tally = Arc::new(Mutex::new(Tally::new(inputs)));
    for (index, promise) in promises.iter().enumerate() {
        let tally = tally.clone();
        let resolver = resolver.clone();
        promise.subscribe(Box::new(move |result| {
            let ready = result.is_ok();
            let failure = {
                let mut tally = tally.lock();
                if !tally.record(index, result) {
                    return;
                }
                if ready {
                    None
                } else if tally.remaining == 0 {
                    tally.first_failure()
                } else {
                    return;
                }
            };
            match failure {
                None => {
                    if resolver.resolve(index) {
                        debug!(inputs, winner = index, "or-promise ready");
                    }
                }
                Some(err) => {
                    if resolver.fail(err.clone()) {
                        debug!(inputs, error = %err, "or-promise failed, no input became ready");
                    }
                }
            }
        }));
    }

    OrPromise { inner, inputs }
}
