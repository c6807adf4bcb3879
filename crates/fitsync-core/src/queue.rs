// ABOUTME: Sync queue entry types: the deferred mutation record, its HTTP method, and its status graph.
// ABOUTME: Status transitions are validated here so every writer enforces the same monotonic lifecycle.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use ulid::Ulid;

use crate::collection::Collection;
use crate::record::RecordId;

/// Lifecycle status of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Completed,
    Failed,
}

impl SyncStatus {
    pub const ALL: [SyncStatus; 4] = [
        SyncStatus::Pending,
        SyncStatus::Syncing,
        SyncStatus::Completed,
        SyncStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        }
    }

    /// Whether `self -> next` is an edge of the status graph:
    /// pending -> syncing -> {completed | failed}, failed -> syncing.
    pub fn can_transition_to(self, next: SyncStatus) -> bool {
        matches!(
            (self, next),
            (SyncStatus::Pending, SyncStatus::Syncing)
                | (SyncStatus::Syncing, SyncStatus::Completed)
                | (SyncStatus::Syncing, SyncStatus::Failed)
                | (SyncStatus::Failed, SyncStatus::Syncing)
        )
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SyncStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown sync status: {s}"))
    }
}

/// Mutating HTTP methods a queue entry can replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Points a queued create at the optimistic local record it introduced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordRef {
    pub collection: Collection,
    pub id: RecordId,
}

/// Rejected status change.
#[derive(Debug, Error)]
#[error("invalid queue status transition {from} -> {to}")]
pub struct TransitionError {
    pub from: SyncStatus,
    pub to: SyncStatus,
}

/// One deferred mutation against the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Ulid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub endpoint: String,
    pub method: HttpMethod,
    pub payload: Option<Value>,
    pub status: SyncStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// HTTP status of the last failed attempt; absent for timeouts and
    /// connection errors.
    pub status_code: Option<u16>,
    #[serde(default)]
    pub record: Option<RecordRef>,
}

impl QueueEntry {
    /// Create a fresh pending entry stamped with the current time.
    pub fn new(id: Ulid, endpoint: String, method: HttpMethod, payload: Option<Value>) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            endpoint,
            method,
            payload,
            status: SyncStatus::Pending,
            retry_count: 0,
            last_error: None,
            status_code: None,
            record: None,
        }
    }

    /// Move to `next`, recording the failure details when entering `failed`.
    /// The retry count only grows on entry into `failed`.
    pub fn transition(
        &mut self,
        next: SyncStatus,
        error: Option<String>,
        status_code: Option<u16>,
    ) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        if next == SyncStatus::Failed {
            self.retry_count += 1;
            self.last_error = error;
            self.status_code = status_code;
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// A failed entry is worth retrying unless the server rejected the request
    /// itself (a 4xx response).
    pub fn is_retryable_failure(&self) -> bool {
        self.status == SyncStatus::Failed
            && !matches!(self.status_code, Some(code) if (400..500).contains(&code))
    }

    /// Whether a drain pass will still try to deliver this entry.
    pub fn is_outstanding(&self, max_retries: u32) -> bool {
        match self.status {
            SyncStatus::Pending | SyncStatus::Syncing => true,
            SyncStatus::Completed => false,
            SyncStatus::Failed => self.is_retryable_failure() && self.retry_count < max_retries,
        }
    }

    /// Whether the endpoint or payload mentions the record id `id`, or the
    /// entry is the create that introduced it.
    pub fn references(&self, id: &str) -> bool {
        self.endpoint.split('/').any(|segment| segment == id)
            || self.payload.as_ref().is_some_and(|p| contains_string(p, id))
            || self.record.as_ref().is_some_and(|r| r.id.as_str() == id)
    }
}

fn contains_string(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => s == needle,
        Value::Array(items) => items.iter().any(|v| contains_string(v, needle)),
        Value::Object(map) => map.values().any(|v| contains_string(v, needle)),
        _ => false,
    }
}
