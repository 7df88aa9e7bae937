//! Retry support for orchestration work
//!
//! This module provides:
//! - [`RetryPolicy`] - Deterministic exponential backoff configuration
//! - [`retry_with_timers`] - Timer-driven retry loop over promise-returning work

mod executor;
mod policy;

pub use executor::retry_with_timers;
pub use policy::RetryPolicy;
