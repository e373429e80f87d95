//! Queue item definitions.
//!
//! A `QueueItem` is the unit of scheduled work: an opaque payload plus the
//! routing metadata (priority, attempt counter, admission timestamps) the
//! queue manager needs for reaping and retry decisions.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Priority level of a queue item.
///
/// Dequeue discipline is strict priority: all `High` items drain before any
/// `Normal` item, and all `Normal` items before any `Low` item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Processed before all other levels.
    High,
    /// Default level for new work.
    Normal,
    /// Drained last; stale retries are demoted here.
    Low,
}

impl Priority {
    /// All levels in dequeue order.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    /// Stable lowercase name, used as the queue key suffix.
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// A unit of scheduled work persisted in the priority queue.
///
/// The `data` payload is opaque to the queue; only the manager inspects the
/// attempt counter and timestamps while reaping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Stable identifier, unique per logical request.
    pub id: String,
    /// Opaque payload interpreted by the request processor.
    pub data: serde_json::Value,
    /// Priority level at which the item is currently admitted.
    pub priority: Priority,
    /// Number of times this item has been attempted.
    #[serde(default)]
    pub attempts: u32,
    /// When the item was first admitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// When the item was last attempted or re-admitted for retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<DateTime<Utc>>,
}

impl QueueItem {
    /// Creates a new item stamped with the current time and zero attempts.
    pub fn new(id: impl Into<String>, data: serde_json::Value, priority: Priority) -> Self {
        Self {
            id: id.into(),
            data,
            priority,
            attempts: 0,
            timestamp: Some(Utc::now()),
            last_attempt: None,
        }
    }

    /// Sets the attempt counter.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Sets the first-admission timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the last-attempt timestamp.
    pub fn with_last_attempt(mut self, last_attempt: DateTime<Utc>) -> Self {
        self.last_attempt = Some(last_attempt);
        self
    }

    /// The most recent of `timestamp` and `last_attempt`, if either is set.
    pub fn age_reference(&self) -> Option<DateTime<Utc>> {
        match (self.timestamp, self.last_attempt) {
            (Some(t), Some(l)) => Some(t.max(l)),
            (Some(t), None) => Some(t),
            (None, Some(l)) => Some(l),
            (None, None) => None,
        }
    }

    /// Whether the item has been in flight longer than `timeout`.
    ///
    /// Items without any timestamp cannot be aged and are never stale.
    pub fn is_stale(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        let Some(reference) = self.age_reference() else {
            return false;
        };
        let timeout = ChronoDuration::from_std(timeout).unwrap_or(ChronoDuration::MAX);
        now - reference > timeout
    }

    /// Whether the retry cool-off has elapsed.
    ///
    /// Items that were never attempted are always ready.
    pub fn ready_for_retry(&self, retry_delay: Duration, now: DateTime<Utc>) -> bool {
        let Some(last) = self.last_attempt else {
            return true;
        };
        let delay = ChronoDuration::from_std(retry_delay).unwrap_or(ChronoDuration::MAX);
        now - last >= delay
    }

    /// Records another attempt at `now`.
    pub fn mark_attempt(&mut self, now: DateTime<Utc>) {
        self.attempts += 1;
        self.last_attempt = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_dequeue_order() {
        assert_eq!(
            Priority::ALL,
            [Priority::High, Priority::Normal, Priority::Low]
        );
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_priority_as_str() {
        assert_eq!(Priority::High.as_str(), "high");
        assert_eq!(Priority::Normal.as_str(), "normal");
        assert_eq!(Priority::Low.as_str(), "low");
    }

    #[test]
    fn test_item_serialization_roundtrip() {
        let item = QueueItem::new("req-1", serde_json::json!({"prompt": "hi"}), Priority::High)
            .with_attempts(2)
            .with_last_attempt(Utc::now());

        let serialized = serde_json::to_string(&item).expect("serialization should work");
        let parsed: QueueItem =
            serde_json::from_str(&serialized).expect("deserialization should work");

        assert_eq!(parsed, item);
    }

    #[test]
    fn test_item_deserializes_without_optional_fields() {
        let raw = r#"{"id":"req-2","data":{},"priority":"normal"}"#;
        let item: QueueItem = serde_json::from_str(raw).expect("minimal item should parse");

        assert_eq!(item.attempts, 0);
        assert!(item.timestamp.is_none());
        assert!(item.last_attempt.is_none());
    }

    #[test]
    fn test_staleness() {
        let now = Utc::now();
        let item = QueueItem::new("req-3", serde_json::json!({}), Priority::Normal)
            .with_timestamp(now - ChronoDuration::seconds(10));

        assert!(item.is_stale(Duration::from_secs(5), now));
        assert!(!item.is_stale(Duration::from_secs(60), now));
    }

    #[test]
    fn test_staleness_uses_most_recent_timestamp() {
        let now = Utc::now();
        let item = QueueItem::new("req-4", serde_json::json!({}), Priority::Normal)
            .with_timestamp(now - ChronoDuration::seconds(600))
            .with_last_attempt(now - ChronoDuration::seconds(1));

        assert!(!item.is_stale(Duration::from_secs(300), now));
    }

    #[test]
    fn test_item_without_timestamps_is_never_stale() {
        let now = Utc::now();
        let item = QueueItem {
            id: "req-5".to_string(),
            data: serde_json::json!({}),
            priority: Priority::Low,
            attempts: 0,
            timestamp: None,
            last_attempt: None,
        };

        assert!(!item.is_stale(Duration::from_millis(1), now));
    }

    #[test]
    fn test_retry_readiness() {
        let now = Utc::now();
        let mut item = QueueItem::new("req-6", serde_json::json!({}), Priority::Normal);
        assert!(item.ready_for_retry(Duration::from_secs(30), now));

        item.mark_attempt(now);
        assert_eq!(item.attempts, 1);
        assert!(!item.ready_for_retry(Duration::from_secs(30), now));
        assert!(item.ready_for_retry(
            Duration::from_secs(30),
            now + ChronoDuration::seconds(30)
        ));
    }
}
