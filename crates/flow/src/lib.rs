//! # Deterministic Orchestration Operations
//!
//! Replay-safe building blocks for authoring long-running workflows on top of
//! a durable execution engine.
//!
//! ## Features
//!
//! - **Promises**: single-assignment deferred values with ordered continuations
//! - **Combinators**: AND / OR aggregation over heterogeneous promise sets
//! - **Supervision**: try/catch/finally over asynchronous work, cancellable timers
//! - **Retries**: timer-driven exponential backoff with reproducible delays
//! - **Status log**: append-only diagnostics owned by each execution
//!
//! Nothing in this crate blocks a thread, reads the wall clock or draws
//! unseeded randomness, so an orchestration replayed from history takes the
//! same path every time.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │               WorkflowOperations (façade)                    │
//! │  status · all/any_promises · wait_for · promise_for          │
//! │  do_try · timer · cancellable_timer · retry                  │
//! └─────────────────────────────────────────────────────────────┘
//!          │                    │                     │
//!          ▼                    ▼                     ▼
//! ┌────────────────┐  ┌──────────────────┐  ┌───────────────────┐
//! │ Promise /      │  │ DoTry            │  │ RetryPolicy +     │
//! │ And/OrPromise  │  │ (catch, finally) │  │ retry loop        │
//! └────────────────┘  └──────────────────┘  └───────────────────┘
//!                              │                     │
//!                              ▼                     ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 TimerService (engine)                        │
//! │        VirtualTimers: deterministic in-memory clock          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use std::time::Duration;
//! use everruns_flow::prelude::*;
//!
//! let timers = VirtualTimers::new();
//! let ctx = OrchestrationContext::new((), timers.clone());
//!
//! let mut calls = 0;
//! let charged = ctx.retry(move || {
//!     calls += 1;
//!     if calls < 3 {
//!         Err(FlowError::work("card processor unavailable"))
//!     } else {
//!         Ok("charged")
//!     }
//! });
//!
//! timers.run_until_idle();
//! assert_eq!(charged.outcome(), Some(Ok("charged")));
//! ```

pub mod error;
pub mod operations;
pub mod promise;
pub mod reliability;
pub mod supervision;
pub mod timer;

/// Prelude for common imports
pub mod prelude {
    pub use crate::error::{FlowError, WorkError};
    pub use crate::operations::{
        LogHistory, OperationsConfig, OrchestrationContext, StatusMessage, WorkflowOperations,
    };
    pub use crate::promise::{
        AndPromise, Awaitable, IntoPromise, OrPromise, Promise, PromiseState, Resolver,
    };
    pub use crate::reliability::RetryPolicy;
    pub use crate::supervision::{Completion, DoTry, DoTryState};
    pub use crate::timer::{FlowEvent, TimerService, VirtualTimers};
}

// Re-export key types at crate root
pub use error::{FlowError, WorkError};
pub use operations::{
    LogHistory, OperationsConfig, OrchestrationContext, StatusMessage, WorkflowOperations,
};
pub use promise::{
    all_promises, any_promises, AndPromise, Awaitable, IntoPromise, OrPromise, Outcome, Promise,
    PromiseState, PromiseValue, Resolver,
};
pub use reliability::{retry_with_timers, RetryPolicy};
pub use supervision::{Completion, DoTry, DoTryState};
pub use timer::{FlowEvent, TimerService, VirtualTimers};
