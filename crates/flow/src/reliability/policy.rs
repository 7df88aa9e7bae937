//! Retry policy implementation

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::FlowError;

/// Configuration for retrying failed work
///
/// Delays grow exponentially and are capped at `max_interval`. Every delay is
/// a pure function of the policy and the attempt number: jitter is only
/// applied when `jitter_seed` is set, and the same seed always yields the
/// same delays, so replays reproduce the original timing.
///
/// # Example
///
/// ```
/// use everruns_flow::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential()
///     .with_max_attempts(5)
///     .with_initial_interval(Duration::from_secs(1))
///     .with_max_interval(Duration::from_secs(60));
///
/// assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(1));
/// assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(2));
/// assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(4));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including initial), `None` for unlimited
    pub max_attempts: Option<u32>,

    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Maximum delay between retries
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Backoff multiplier (e.g., 2.0 for exponential)
    pub backoff_coefficient: f64,

    /// Stop retrying once this much engine time passed since the first attempt
    #[serde(default, with = "option_duration_millis")]
    pub expiration: Option<Duration>,

    /// Jitter factor (0.0-1.0)
    ///
    /// A value of 0.1 means ±10% randomness. Ignored unless `jitter_seed` is set.
    pub jitter: f64,

    /// Seed that makes jitter reproducible
    #[serde(default)]
    pub jitter_seed: Option<u64>,

    /// Error types that should NOT be retried
    #[serde(default)]
    pub non_retryable_errors: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// Create an exponential backoff retry policy
    ///
    /// - 5 max attempts
    /// - 1 second initial interval
    /// - 60 second max interval
    /// - 2x backoff coefficient
    /// - no jitter
    pub fn exponential() -> Self {
        Self {
            max_attempts: Some(5),
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            backoff_coefficient: 2.0,
            expiration: None,
            jitter: 0.0,
            jitter_seed: None,
            non_retryable_errors: vec![],
        }
    }

    /// Exponential backoff that retries until the work succeeds
    ///
    /// Used when no policy is given: 1 second initial interval, 2x backoff,
    /// 60 second cap, no attempt limit, no expiration.
    pub fn unlimited() -> Self {
        Self {
            max_attempts: None,
            ..Self::exponential()
        }
    }

    /// Create a policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: Some(1),
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            backoff_coefficient: 1.0,
            expiration: None,
            jitter: 0.0,
            jitter_seed: None,
            non_retryable_errors: vec![],
        }
    }

    /// Create a policy with fixed intervals (no backoff)
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            initial_interval: interval,
            max_interval: interval,
            backoff_coefficient: 1.0,
            expiration: None,
            jitter: 0.0,
            jitter_seed: None,
            non_retryable_errors: vec![],
        }
    }

    /// Set the maximum number of attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Remove the attempt limit
    pub fn with_unlimited_attempts(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    /// Set the initial retry interval
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Set the maximum retry interval
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set the backoff coefficient
    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    /// Stop retrying after this much engine time
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Set a seeded jitter factor (0.0-1.0)
    pub fn with_jitter(mut self, jitter: f64, seed: u64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self.jitter_seed = Some(seed);
        self
    }

    /// Add a non-retryable error type
    pub fn with_non_retryable_error(mut self, error_type: impl Into<String>) -> Self {
        self.non_retryable_errors.push(error_type.into());
        self
    }

    /// Calculate delay for a given attempt number (1-based)
    ///
    /// Returns the duration to wait before that attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let retry_num = attempt - 1; // First retry is after attempt 1
        let exponent = i32::try_from(retry_num - 1).unwrap_or(i32::MAX);
        let base = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        let capped = base.min(self.max_interval.as_secs_f64());

        let jittered = match self.jitter_seed {
            Some(seed) if self.jitter > 0.0 && capped > 0.0 => {
                let mut rng = StdRng::seed_from_u64(seed ^ u64::from(attempt));
                let jitter_range = capped * self.jitter;
                let jitter_offset = rng.gen_range(-jitter_range..jitter_range);
                (capped + jitter_offset).max(0.0)
            }
            _ => capped,
        };

        Duration::try_from_secs_f64(jittered).unwrap_or(self.max_interval)
    }

    /// Check if a failure may be retried under this policy
    pub fn should_retry(&self, error: &FlowError) -> bool {
        if !error.is_retryable() {
            return false;
        }
        match error.error_type() {
            Some(error_type) => !self.non_retryable_errors.iter().any(|t| t == error_type),
            None => true,
        }
    }

    /// Check if there are remaining attempts
    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        self.max_attempts
            .map_or(true, |max_attempts| current_attempt < max_attempts)
    }

    /// Check if the retry window is still open
    ///
    /// `elapsed` is measured on the engine clock since the first attempt.
    pub fn within_expiration(&self, elapsed: Duration) -> bool {
        self.expiration.map_or(true, |expiration| elapsed < expiration)
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Serde support for Option<Duration>
mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => (d.as_millis() as u64).serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis: Option<u64> = Option::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkError;

    #[test]
    fn test_exponential_defaults() {
        let policy = RetryPolicy::exponential();
        assert_eq!(policy.max_attempts, Some(5));
        assert_eq!(policy.initial_interval, Duration::from_secs(1));
        assert_eq!(policy.backoff_coefficient, 2.0);
        assert_eq!(policy.jitter_seed, None);
    }

    #[test]
    fn test_unlimited_never_runs_out() {
        let policy = RetryPolicy::unlimited();
        assert_eq!(policy.max_attempts, None);
        assert!(policy.has_attempts_remaining(1));
        assert!(policy.has_attempts_remaining(u32::MAX - 1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(1));
    }

    #[test]
    fn test_no_retry() {
        let policy = RetryPolicy::no_retry();
        assert_eq!(policy.max_attempts, Some(1));
        assert!(!policy.has_attempts_remaining(1));
    }

    #[test]
    fn test_fixed_interval() {
        let policy = RetryPolicy::fixed(Duration::from_secs(5), 3);

        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(5));
    }

    #[test]
    fn test_delay_for_attempt() {
        let policy = RetryPolicy::exponential();

        // Attempt 1 (initial) has no delay
        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(4));
    }

    #[test]
    fn test_max_interval_cap() {
        let policy = RetryPolicy::exponential().with_max_interval(Duration::from_secs(5));

        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(1000), Duration::from_secs(5));
    }

    #[test]
    fn test_seeded_jitter_is_reproducible() {
        let policy = RetryPolicy::exponential()
            .with_initial_interval(Duration::from_secs(10))
            .with_jitter(0.5, 42);

        let first: Vec<Duration> = (2..6).map(|a| policy.delay_for_attempt(a)).collect();
        let second: Vec<Duration> = (2..6).map(|a| policy.clone().delay_for_attempt(a)).collect();
        assert_eq!(first, second);

        let delay = policy.delay_for_attempt(2);
        assert!(delay >= Duration::from_secs(5));
        assert!(delay <= Duration::from_secs(15));
    }

    #[test]
    fn test_unseeded_jitter_is_ignored() {
        let mut policy = RetryPolicy::exponential();
        policy.jitter = 0.5;
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(2));
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::exponential()
            .with_non_retryable_error("INVALID_INPUT")
            .with_non_retryable_error("NOT_FOUND");

        let invalid = FlowError::Work(WorkError::retryable("bad").with_type("INVALID_INPUT"));
        let timeout = FlowError::Work(WorkError::retryable("slow").with_type("TIMEOUT"));
        let fatal = FlowError::Work(WorkError::non_retryable("fatal"));

        assert!(!policy.should_retry(&invalid));
        assert!(policy.should_retry(&timeout));
        assert!(policy.should_retry(&FlowError::work("untyped")));
        assert!(!policy.should_retry(&fatal));
        assert!(!policy.should_retry(&FlowError::cancelled("stop")));
    }

    #[test]
    fn test_has_attempts_remaining() {
        let policy = RetryPolicy::exponential().with_max_attempts(3);

        assert!(policy.has_attempts_remaining(1));
        assert!(policy.has_attempts_remaining(2));
        assert!(!policy.has_attempts_remaining(3));
    }

    #[test]
    fn test_expiration() {
        let policy = RetryPolicy::unlimited().with_expiration(Duration::from_secs(30));

        assert!(policy.within_expiration(Duration::from_secs(29)));
        assert!(!policy.within_expiration(Duration::from_secs(30)));
        assert!(RetryPolicy::unlimited().within_expiration(Duration::MAX));
    }

    #[test]
    fn test_serialization() {
        let policy = RetryPolicy::exponential()
            .with_max_attempts(10)
            .with_expiration(Duration::from_secs(120))
            .with_non_retryable_error("TEST");

        let json = serde_json::to_string(&policy).unwrap();
        let parsed: RetryPolicy = serde_json::from_str(&json).unwrap();

        assert_eq!(policy, parsed);
    }
}
