//! Failure types shared by promises and operations

use serde::{Deserialize, Serialize};

/// Failure raised by author-supplied work
///
/// This is what continuations, activities and retried work return when they
/// fail. It is serializable so it can be recorded in history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkError {
    /// Error message
    pub message: String,

    /// Error type/code for programmatic handling
    pub error_type: Option<String>,

    /// Whether this error may be retried
    ///
    /// Non-retryable errors end a retry loop immediately.
    pub retryable: bool,

    /// Additional error details (for debugging)
    pub details: Option<serde_json::Value>,
}

impl WorkError {
    /// Create a new retryable error
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: true,
            details: None,
        }
    }

    /// Create a non-retryable error
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: false,
            details: None,
        }
    }

    /// Set the error type
    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    /// Add error details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl std::fmt::Display for WorkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_type {
            Some(error_type) => write!(f, "{}: {}", error_type, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for WorkError {}

impl From<anyhow::Error> for WorkError {
    fn from(err: anyhow::Error) -> Self {
        Self::retryable(format!("{err:#}"))
    }
}

/// Failure observed through a promise
///
/// Every failed or cancelled promise carries one of these. Cancellation is a
/// distinguished kind so that handlers can tell it apart from real errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FlowError {
    /// A promise this computation depended on failed
    #[error("dependency failed: {0}")]
    Dependency(String),

    /// An external actor cancelled the pending operation
    #[error("cancelled: {reason}")]
    Cancelled {
        /// Reason given by whoever cancelled
        reason: String,
    },

    /// Retry attempts ran out; wraps the last failure
    #[error("retry policy exhausted after {attempts} attempt(s): {last}")]
    PolicyExhausted {
        /// Number of times the work was invoked
        attempts: u32,

        /// Failure of the final attempt
        last: Box<FlowError>,
    },

    /// Author-supplied work failed
    #[error("{0}")]
    Work(WorkError),
}

impl FlowError {
    /// Create a dependency failure
    pub fn dependency(message: impl Into<String>) -> Self {
        Self::Dependency(message.into())
    }

    /// Create a cancellation signal
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Create a retryable work failure
    pub fn work(message: impl Into<String>) -> Self {
        Self::Work(WorkError::retryable(message))
    }

    /// Check if this is a cancellation signal
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Check if a retry loop may make another attempt after this failure
    ///
    /// Cancellations, exhausted policies and non-retryable work errors are terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Dependency(_) => true,
            Self::Work(err) => err.retryable,
            Self::Cancelled { .. } | Self::PolicyExhausted { .. } => false,
        }
    }

    /// Error type of the underlying work failure, if any
    pub fn error_type(&self) -> Option<&str> {
        match self {
            Self::Work(err) => err.error_type.as_deref(),
            _ => None,
        }
    }
}

impl From<WorkError> for FlowError {
    fn from(err: WorkError) -> Self {
        Self::Work(err)
    }
}

impl From<anyhow::Error> for FlowError {
    fn from(err: anyhow::Error) -> Self {
        Self::Work(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_error_retryable() {
        let error = WorkError::retryable("timeout");
        assert!(error.retryable);
        assert_eq!(error.to_string(), "timeout");
    }

    #[test]
    fn test_work_error_with_type_display() {
        let error = WorkError::non_retryable("bad input").with_type("INVALID_INPUT");
        assert!(!error.retryable);
        assert_eq!(error.to_string(), "INVALID_INPUT: bad input");
    }

    #[test]
    fn test_work_error_serialization() {
        let error = WorkError::retryable("test error")
            .with_type("TEST")
            .with_details(serde_json::json!({"key": "value"}));

        let json = serde_json::to_string(&error).unwrap();
        let parsed: WorkError = serde_json::from_str(&json).unwrap();

        assert_eq!(error, parsed);
    }

    #[test]
    fn test_cancellation_is_not_retryable() {
        let error = FlowError::cancelled("user");
        assert!(error.is_cancellation());
        assert!(!error.is_retryable());
        assert_eq!(error.to_string(), "cancelled: user");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(FlowError::dependency("upstream").is_retryable());
        assert!(FlowError::work("flaky").is_retryable());
        assert!(!FlowError::Work(WorkError::non_retryable("fatal")).is_retryable());

        let exhausted = FlowError::PolicyExhausted {
            attempts: 3,
            last: Box::new(FlowError::work("flaky")),
        };
        assert!(!exhausted.is_retryable());
        assert_eq!(
            exhausted.to_string(),
            "retry policy exhausted after 3 attempt(s): flaky"
        );
    }

    #[test]
    fn test_from_anyhow() {
        let err: FlowError = anyhow::anyhow!("disk full").into();
        assert_eq!(err, FlowError::work("disk full"));
    }
}
