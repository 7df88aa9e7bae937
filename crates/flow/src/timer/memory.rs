//! In-memory deterministic timer service

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{FlowEvent, TimerService};
use crate::promise::{Promise, Resolver};

/// Upper bound on timers fired by a single `run_until_idle` call
const MAX_IDLE_STEPS: usize = 10_000;

struct PendingTimer {
    timer_id: String,
    resolver: Resolver<()>,
}

struct TimerQueue {
    now: Duration,
    next_seq: u64,
    /// Keyed by (due time, creation order) so ties fire in creation order
    pending: BTreeMap<(Duration, u64), PendingTimer>,
    history: Vec<FlowEvent>,
}

impl TimerQueue {
    fn pop_due(&mut self, limit: Option<Duration>) -> Option<(String, Resolver<()>)> {
        let (&(due, seq), _) = self.pending.iter().next()?;
        if limit.is_some_and(|limit| due > limit) {
            return None;
        }
        let timer = self.pending.remove(&(due, seq))?;
        self.now = self.now.max(due);
        self.history.push(FlowEvent::TimerFired {
            timer_id: timer.timer_id.clone(),
        });
        Some((timer.timer_id, timer.resolver))
    }
}

/// Timer service driven by a virtual clock
///
/// Nothing fires until the clock is moved with [`advance`](Self::advance),
/// [`fire_next`](Self::fire_next) or [`run_until_idle`](Self::run_until_idle).
/// Timers due at the same instant fire in creation order and ids are
/// sequential, so the same orchestration always produces the same history.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use everruns_flow::{TimerService, VirtualTimers};
///
/// let timers = VirtualTimers::new();
/// let timer = timers.start_timer(Duration::from_secs(5));
///
/// timers.advance(Duration::from_secs(4));
/// assert!(!timer.is_terminal());
///
/// timers.advance(Duration::from_secs(1));
/// assert!(timer.is_ready());
/// ```
#[derive(Clone)]
pub struct VirtualTimers {
    queue: Arc<Mutex<TimerQueue>>,
}

impl VirtualTimers {
    /// Create a timer service with the clock at zero
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(TimerQueue {
                now: Duration::ZERO,
                next_seq: 0,
                pending: BTreeMap::new(),
                history: Vec::new(),
            })),
        }
    }

    /// Number of timers that have neither fired nor been cancelled
    pub fn pending_timers(&self) -> usize {
        self.queue.lock().pending.len()
    }

    /// Recorded timer events, oldest first
    pub fn history(&self) -> Vec<FlowEvent> {
        self.queue.lock().history.clone()
    }

    /// Durations of every timer started so far, in start order
    pub fn started_durations(&self) -> Vec<Duration> {
        self.queue
            .lock()
            .history
            .iter()
            .filter_map(|event| match event {
                FlowEvent::TimerStarted { duration_ms, .. } => {
                    Some(Duration::from_millis(*duration_ms))
                }
                _ => None,
            })
            .collect()
    }

    /// Move the clock forward, firing every timer that falls due
    ///
    /// Timers started by continuations during the advance fire too if they
    /// are due before the target time. Returns the number of timers fired.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.queue.lock().now.saturating_add(by);
        let mut fired = 0;

        loop {
            let next = self.queue.lock().pop_due(Some(target));
            let Some((timer_id, resolver)) = next else {
                break;
            };
            debug!(%timer_id, "timer fired");
            resolver.resolve(());
            fired += 1;
        }

        let mut queue = self.queue.lock();
        queue.now = queue.now.max(target);
        fired
    }

    /// Jump the clock to the earliest pending timer and fire it
    pub fn fire_next(&self) -> Option<String> {
        let next = self.queue.lock().pop_due(None);
        let (timer_id, resolver) = next?;
        debug!(%timer_id, "timer fired");
        resolver.resolve(());
        Some(timer_id)
    }

    /// Fire timers until none are pending
    ///
    /// Stops after a fixed number of steps so an orchestration that keeps
    /// scheduling timers cannot spin forever. Returns the number fired.
    pub fn run_until_idle(&self) -> usize {
        let mut fired = 0;
        while fired < MAX_IDLE_STEPS {
            if self.fire_next().is_none() {
                return fired;
            }
            fired += 1;
        }
        warn!(
            fired,
            pending = self.pending_timers(),
            "stopped firing timers, orchestration did not become idle"
        );
        fired
    }
}

impl Default for VirtualTimers {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for VirtualTimers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queue = self.queue.lock();
        f.debug_struct("VirtualTimers")
            .field("now", &queue.now)
            .field("pending", &queue.pending.len())
            .field("events", &queue.history.len())
            .finish()
    }
}

impl TimerService for VirtualTimers {
    fn start_timer(&self, delay: Duration) -> Promise<()> {
        let (promise, resolver) = Promise::pending();
        let duration_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);

        let (timer_id, key) = {
            let mut queue = self.queue.lock();
            queue.next_seq += 1;
            let seq = queue.next_seq;
            let timer_id = format!("timer-{seq}");
            let key = (queue.now.saturating_add(delay), seq);

            queue.history.push(FlowEvent::TimerStarted {
                timer_id: timer_id.clone(),
                duration_ms,
            });
            queue.pending.insert(
                key,
                PendingTimer {
                    timer_id: timer_id.clone(),
                    resolver,
                },
            );
            (timer_id, key)
        };

        debug!(%timer_id, delay_ms = duration_ms, "timer started");

        let queue = self.queue.clone();
        promise.set_cancel_hook(move || {
            let mut queue = queue.lock();
            if queue.pending.remove(&key).is_some() {
                debug!(%timer_id, "timer cancelled");
                queue.history.push(FlowEvent::TimerCancelled { timer_id });
            }
        });

        promise
    }

    fn now(&self) -> Duration {
        self.queue.lock().now
    }
}
