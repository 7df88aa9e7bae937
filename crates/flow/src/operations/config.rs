//! Orchestration context configuration

use serde::{Deserialize, Serialize};

use crate::reliability::RetryPolicy;

/// Configuration for an [`OrchestrationContext`](super::OrchestrationContext)
///
/// Supplied by the host; nothing is read from the environment so that every
/// replay sees the same settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationsConfig {
    /// Policy used by `retry` when no policy is given
    pub default_retry_policy: RetryPolicy,

    /// Echo status messages to tracing at info level
    pub trace_status: bool,
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            default_retry_policy: RetryPolicy::unlimited(),
            trace_status: false,
        }
    }
}

impl OperationsConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the policy used by `retry`
    pub fn with_default_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.default_retry_policy = policy;
        self
    }

    /// Enable or disable echoing status messages to tracing
    pub fn with_trace_status(mut self, enabled: bool) -> Self {
        self.trace_status = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = OperationsConfig::default();
        assert_eq!(config.default_retry_policy, RetryPolicy::unlimited());
        assert!(!config.trace_status);
    }

    #[test]
    fn test_config_builder() {
        let policy = RetryPolicy::fixed(Duration::from_secs(2), 3);
        let config = OperationsConfig::new()
            .with_default_retry_policy(policy.clone())
            .with_trace_status(true);

        assert_eq!(config.default_retry_policy, policy);
        assert!(config.trace_status);
    }

    #[test]
    fn test_config_deserializes_from_json() {
        let json = serde_json::json!({
            "default_retry_policy": {
                "max_attempts": 3,
                "initial_interval": 500,
                "max_interval": 10000,
                "backoff_coefficient": 3.0,
                "jitter": 0.0
            },
            "trace_status": true
        });

        let config: OperationsConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.default_retry_policy.max_attempts, Some(3));
        assert_eq!(
            config.default_retry_policy.initial_interval,
            Duration::from_millis(500)
        );
        assert_eq!(config.default_retry_policy.expiration, None);
        assert!(config.trace_status);
    }
}
