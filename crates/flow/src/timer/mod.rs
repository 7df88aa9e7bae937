//! Timer primitive consumed from the execution engine
//!
//! This module provides:
//! - [`TimerService`] trait the engine implements
//! - [`VirtualTimers`] deterministic in-memory implementation
//! - [`FlowEvent`] timer history events

mod event;
mod memory;

use std::time::Duration;

use crate::promise::Promise;

pub use event::FlowEvent;
pub use memory::VirtualTimers;

/// Durable timer scheduling supplied by the engine
///
/// Timers never sleep a thread. `start_timer` returns a promise that becomes
/// ready once the delay elapses, or cancelled if someone cancels it first.
pub trait TimerService: Send + Sync {
    /// Schedule a timer
    fn start_timer(&self, delay: Duration) -> Promise<()>;

    /// Current time on the engine's deterministic clock
    fn now(&self) -> Duration;
}
