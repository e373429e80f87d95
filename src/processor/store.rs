//! In-memory request lifecycle store.
//!
//! One record per request id, tracking status transitions from admission to
//! a terminal state. The store is the single owner of lifecycle state and
//! is safe for concurrent reads and writes; callers always receive cloned
//! snapshots, never references into the map.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Lifecycle status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestStatus {
    /// Admitted, waiting in the queue.
    Pending,
    /// Picked up by a worker.
    Processing,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled before processing began.
    Cancelled,
}

impl RequestStatus {
    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Completed | RequestStatus::Failed | RequestStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestStatus::Pending => write!(f, "pending"),
            RequestStatus::Processing => write!(f, "processing"),
            RequestStatus::Completed => write!(f, "completed"),
            RequestStatus::Failed => write!(f, "failed"),
            RequestStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Lifecycle record for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    /// Request identifier.
    pub request_id: String,
    /// Current lifecycle status.
    pub status: RequestStatus,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record last changed. Strictly monotonic per record.
    pub updated_at: DateTime<Utc>,
    /// Provider the request resolved to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Model the request resolved to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Accumulated metadata (original request, outcomes, errors).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Outcome of a cancellation attempt.
///
/// Cancellation never errors for well-formed input; refusals carry a
/// reason instead.
#[derive(Debug, Clone, Serialize)]
pub struct CancelOutcome {
    /// Whether the request is (now or already) out of the running.
    pub success: bool,
    /// The record's status after the attempt, when the record exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RequestStatus>,
    /// Why the cancellation was refused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Concurrent map of request id to lifecycle record.
#[derive(Default)]
pub struct RequestStore {
    records: RwLock<HashMap<String, RequestRecord>>,
}

impl RequestStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a record in `Pending`. Overwrites nothing: ids are unique by
    /// construction.
    pub fn create_pending(
        &self,
        request_id: &str,
        provider: Option<String>,
        model: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> RequestRecord {
        let now = Utc::now();
        let record = RequestRecord {
            request_id: request_id.to_string(),
            status: RequestStatus::Pending,
            created_at: now,
            updated_at: now,
            provider,
            model,
            metadata,
        };

        self.records
            .write()
            .expect("lock poisoned")
            .insert(request_id.to_string(), record.clone());
        record
    }

    /// Snapshot of one record.
    pub fn get(&self, request_id: &str) -> Option<RequestRecord> {
        self.records
            .read()
            .expect("lock poisoned")
            .get(request_id)
            .cloned()
    }

    /// Upserts a record's status and merges metadata.
    ///
    /// `updated_at` moves strictly forward even when the wall clock does
    /// not. A missing record is created on the spot so late status reports
    /// are never lost.
    pub fn update(
        &self,
        request_id: &str,
        status: RequestStatus,
        metadata: Option<serde_json::Value>,
    ) -> RequestRecord {
        let mut records = self.records.write().expect("lock poisoned");
        let now = Utc::now();

        let record = match records.get_mut(request_id) {
            Some(record) => {
                record.status = status;
                record.updated_at = if now > record.updated_at {
                    now
                } else {
                    record.updated_at + ChronoDuration::nanoseconds(1)
                };
                if let Some(incoming) = metadata {
                    record.metadata = Some(merge_metadata(record.metadata.take(), incoming));
                }
                record.clone()
            }
            None => {
                debug!(request_id, %status, "Status update for unknown request; creating record");
                let record = RequestRecord {
                    request_id: request_id.to_string(),
                    status,
                    created_at: now,
                    updated_at: now,
                    provider: None,
                    model: None,
                    metadata,
                };
                records.insert(request_id.to_string(), record.clone());
                record
            }
        };

        record
    }

    /// Attempts to cancel a request.
    ///
    /// `Pending` transitions to `Cancelled`; `Processing` is refused (the
    /// work is already running); terminal states report success with their
    /// existing status; unknown ids report a not-found failure.
    pub fn cancel(&self, request_id: &str) -> CancelOutcome {
        let mut records = self.records.write().expect("lock poisoned");

        let Some(record) = records.get_mut(request_id) else {
            return CancelOutcome {
                success: false,
                status: None,
                reason: Some(format!("Request '{request_id}' not found")),
            };
        };

        match record.status {
            RequestStatus::Pending => {
                record.status = RequestStatus::Cancelled;
                let now = Utc::now();
                record.updated_at = if now > record.updated_at {
                    now
                } else {
                    record.updated_at + ChronoDuration::nanoseconds(1)
                };
                CancelOutcome {
                    success: true,
                    status: Some(RequestStatus::Cancelled),
                    reason: None,
                }
            }
            RequestStatus::Processing => CancelOutcome {
                success: false,
                status: Some(RequestStatus::Processing),
                reason: Some(
                    "Request is currently being processed and cannot be cancelled".to_string(),
                ),
            },
            terminal => CancelOutcome {
                success: true,
                status: Some(terminal),
                reason: None,
            },
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.read().expect("lock poisoned").len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.read().expect("lock poisoned").is_empty()
    }
}

/// Shallow-merges metadata objects; non-object values replace wholesale.
fn merge_metadata(
    existing: Option<serde_json::Value>,
    incoming: serde_json::Value,
) -> serde_json::Value {
    match (existing, incoming) {
        (Some(serde_json::Value::Object(mut base)), serde_json::Value::Object(additions)) => {
            for (key, value) in additions {
                base.insert(key, value);
            }
            serde_json::Value::Object(base)
        }
        (_, incoming) => incoming,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_serialization_is_uppercase() {
        assert_eq!(
            serde_json::to_value(RequestStatus::Pending).unwrap(),
            json!("PENDING")
        );
        assert_eq!(
            serde_json::to_value(RequestStatus::Cancelled).unwrap(),
            json!("CANCELLED")
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(!RequestStatus::Processing.is_terminal());
        assert!(RequestStatus::Completed.is_terminal());
        assert!(RequestStatus::Failed.is_terminal());
        assert!(RequestStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_create_pending() {
        let store = RequestStore::new();
        let record = store.create_pending(
            "req-1",
            Some("anthropic".to_string()),
            Some("claude-sonnet-4-5".to_string()),
            Some(json!({"original_request": {"prompt": "hi"}})),
        );

        assert_eq!(record.status, RequestStatus::Pending);
        assert_eq!(record.created_at, record.updated_at);
        assert_eq!(store.get("req-1").unwrap().status, RequestStatus::Pending);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_update_moves_updated_at_strictly_forward() {
        let store = RequestStore::new();
        store.create_pending("req-1", None, None, None);

        let before = store.get("req-1").unwrap().updated_at;
        let after = store.update("req-1", RequestStatus::Processing, None);

        assert_eq!(after.status, RequestStatus::Processing);
        assert!(after.updated_at > before);

        let later = store.update("req-1", RequestStatus::Completed, None);
        assert!(later.updated_at > after.updated_at);
        assert!(later.created_at <= later.updated_at);
    }

    #[test]
    fn test_update_merges_metadata() {
        let store = RequestStore::new();
        store.create_pending("req-1", None, None, Some(json!({"a": 1})));

        store.update("req-1", RequestStatus::Failed, Some(json!({"error": "boom"})));
        let record = store.get("req-1").unwrap();
        let metadata = record.metadata.unwrap();

        assert_eq!(metadata["a"], 1);
        assert_eq!(metadata["error"], "boom");
    }

    #[test]
    fn test_update_creates_missing_record() {
        let store = RequestStore::new();
        let record = store.update("req-late", RequestStatus::Processing, None);

        assert_eq!(record.status, RequestStatus::Processing);
        assert!(store.get("req-late").is_some());
    }

    #[test]
    fn test_cancel_pending() {
        let store = RequestStore::new();
        store.create_pending("req-1", None, None, None);

        let outcome = store.cancel("req-1");
        assert!(outcome.success);
        assert_eq!(outcome.status, Some(RequestStatus::Cancelled));
        assert!(outcome.reason.is_none());
        assert_eq!(store.get("req-1").unwrap().status, RequestStatus::Cancelled);
    }

    #[test]
    fn test_cancel_processing_is_refused() {
        let store = RequestStore::new();
        store.create_pending("req-1", None, None, None);
        store.update("req-1", RequestStatus::Processing, None);

        let outcome = store.cancel("req-1");
        assert!(!outcome.success);
        assert_eq!(outcome.status, Some(RequestStatus::Processing));
        assert_eq!(
            outcome.reason.as_deref(),
            Some("Request is currently being processed and cannot be cancelled")
        );
        // The record is untouched.
        assert_eq!(store.get("req-1").unwrap().status, RequestStatus::Processing);
    }

    #[test]
    fn test_cancel_terminal_is_idempotent_success() {
        let store = RequestStore::new();
        store.create_pending("req-1", None, None, None);
        store.update("req-1", RequestStatus::Completed, None);

        let outcome = store.cancel("req-1");
        assert!(outcome.success);
        assert_eq!(outcome.status, Some(RequestStatus::Completed));
        assert_eq!(store.get("req-1").unwrap().status, RequestStatus::Completed);
    }

    #[test]
    fn test_cancel_missing_is_not_found() {
        let store = RequestStore::new();
        let outcome = store.cancel("ghost");

        assert!(!outcome.success);
        assert!(outcome.status.is_none());
        assert!(outcome.reason.unwrap().contains("not found"));
    }
}
