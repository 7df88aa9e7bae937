//! Promise abstraction and combinators
//!
//! This module contains:
//! - [`Promise`] single-assignment deferred value and its [`Resolver`]
//! - [`IntoPromise`] normalization used by `promise_for`
//! - [`all_promises`] / [`any_promises`] AND / OR combinators

mod combinators;
mod state;

pub use combinators::{all_promises, any_promises, AndPromise, OrPromise};
pub(crate) use state::{catch_panic, invoke_guarded, WeakPromise};
pub use state::{Awaitable, IntoPromise, Outcome, Promise, PromiseState, PromiseValue, Resolver};
