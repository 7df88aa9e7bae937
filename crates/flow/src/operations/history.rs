//! Append-only status log

use parking_lot::Mutex;

/// Ordered record of status messages emitted by one orchestration
///
/// Entries are only ever appended; the log is never truncated or reordered.
/// It exists for diagnosis and plays no part in control flow.
#[derive(Debug, Default)]
pub struct LogHistory {
    entries: Mutex<Vec<String>>,
}

impl LogHistory {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message; empty messages are skipped
    ///
    /// Returns whether the message was recorded.
    pub fn append(&self, message: &str) -> bool {
        if message.is_empty() {
            return false;
        }
        self.entries.lock().push(message.to_string());
        true
    }

    /// Snapshot of all entries, oldest first
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Most recent entry
    pub fn last(&self) -> Option<String> {
        self.entries.lock().last().cloned()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if nothing was logged
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Anything that can be recorded as a status message
///
/// `None` and empty strings are skipped by
/// [`status`](super::WorkflowOperations::status).
pub trait StatusMessage {
    /// The message, if there is one
    fn into_message(self) -> Option<String>;
}

impl StatusMessage for &str {
    fn into_message(self) -> Option<String> {
        Some(self.to_string())
    }
}

impl StatusMessage for String {
    fn into_message(self) -> Option<String> {
        Some(self)
    }
}

impl StatusMessage for &String {
    fn into_message(self) -> Option<String> {
        Some(self.clone())
    }
}

impl<M: StatusMessage> StatusMessage for Option<M> {
    fn into_message(self) -> Option<String> {
        self.and_then(StatusMessage::into_message)
    }
}
