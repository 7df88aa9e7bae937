//! Timer history events

use serde::{Deserialize, Serialize};

/// Events recorded by a timer service
///
/// These form an append-only log of timer activity, in the order it
/// happened. Replaying the same orchestration must yield the same log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowEvent {
    /// Timer was started
    TimerStarted {
        /// Timer identifier
        timer_id: String,

        /// Duration in milliseconds
        duration_ms: u64,
    },

    /// Timer fired (duration elapsed)
    TimerFired {
        /// Timer identifier
        timer_id: String,
    },

    /// Timer was cancelled
    TimerCancelled {
        /// Timer identifier
        timer_id: String,
    },
}

impl FlowEvent {
    /// Timer this event refers to
    pub fn timer_id(&self) -> &str {
        match self {
            Self::TimerStarted { timer_id, .. }
            | Self::TimerFired { timer_id }
            | Self::TimerCancelled { timer_id } => timer_id,
        }
    }

    /// Check if this event ends a timer
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TimerFired { .. } | Self::TimerCancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_event_serialization() {
        let event = FlowEvent::TimerStarted {
            timer_id: "timer-1".to_string(),
            duration_ms: 1500,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"timer_started\""));

        let parsed: FlowEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, parsed);
    }

    #[test]
    fn test_timer_id_extraction() {
        let event = FlowEvent::TimerCancelled {
            timer_id: "timer-7".to_string(),
        };
        assert_eq!(event.timer_id(), "timer-7");
    }

    #[test]
    fn test_is_terminal() {
        assert!(FlowEvent::TimerFired {
            timer_id: "t".into()
        }
        .is_terminal());
        assert!(FlowEvent::TimerCancelled {
            timer_id: "t".into()
        }
        .is_terminal());
        assert!(!FlowEvent::TimerStarted {
            timer_id: "t".into(),
            duration_ms: 0
        }
        .is_terminal());
    }
}
