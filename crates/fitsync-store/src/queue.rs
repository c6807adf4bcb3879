// ABOUTME: Durable FIFO log of deferred mutations stored in the sync_queue collection.
// ABOUTME: Handles enqueue, status transitions, replay ordering, id rewriting after reconciliation, and pruning.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use fitsync_core::{
    Collection, HttpMethod, QueueEntry, Record, RecordId, RecordRef, SyncStatus, TransitionError,
};
use serde_json::Value;
use thiserror::Error;
use ulid::{Generator, Ulid};

use crate::sqlite::{IndexQuery, LocalStore, StoreError};

/// Errors that can occur during sync queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("queue entry not found: {0}")]
    EntryNotFound(Ulid),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
}

/// Per-status entry totals, for status displays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: usize,
    pub syncing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueCounts {
    /// Entries that still need to reach the server.
    pub fn outstanding(&self) -> usize {
        self.pending + self.syncing + self.failed
    }
}

/// The sync queue. Entry ids come from a monotonic ULID generator so
/// entries created within the same millisecond keep their submission order.
#[derive(Clone)]
pub struct SyncQueue {
    store: LocalStore,
    ids: Arc<Mutex<Generator>>,
}

impl SyncQueue {
    pub fn new(store: LocalStore) -> Self {
        Self {
            store,
            ids: Arc::new(Mutex::new(Generator::new())),
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    fn next_id(&self) -> Ulid {
        match self.ids.lock() {
            Ok(mut generator) => generator.generate().unwrap_or_else(|_| Ulid::new()),
            Err(_) => Ulid::new(),
        }
    }

    /// Append a pending mutation and persist it before returning.
    pub async fn enqueue(
        &self,
        endpoint: &str,
        method: HttpMethod,
        payload: Option<Value>,
    ) -> Result<QueueEntry, QueueError> {
        let entry = QueueEntry::new(self.next_id(), endpoint.to_string(), method, payload);
        self.insert(entry).await
    }

    /// Append a create whose optimistic local record lives under a temporary id.
    pub async fn enqueue_create(
        &self,
        endpoint: &str,
        payload: Value,
        record: RecordRef,
    ) -> Result<QueueEntry, QueueError> {
        let mut entry = QueueEntry::new(
            self.next_id(),
            endpoint.to_string(),
            HttpMethod::Post,
            Some(payload),
        );
        entry.record = Some(record);
        self.insert(entry).await
    }

    async fn insert(&self, entry: QueueEntry) -> Result<QueueEntry, QueueError> {
        self.store.add(to_record(&entry)?).await?;
        tracing::debug!(
            "enqueued {} {} as {}",
            entry.method,
            entry.endpoint,
            entry.id
        );
        Ok(entry)
    }

    pub async fn get(&self, id: Ulid) -> Result<Option<QueueEntry>, QueueError> {
        self.store
            .get(Collection::SyncQueue, &id.to_string())
            .await?
            .map(|r| from_record(&r))
            .transpose()
    }

    /// Pending entries in FIFO replay order.
    pub async fn list_pending(&self) -> Result<Vec<QueueEntry>, QueueError> {
        self.list_by_status(SyncStatus::Pending).await
    }

    /// Entries with the given status, oldest first.
    pub async fn list_by_status(&self, status: SyncStatus) -> Result<Vec<QueueEntry>, QueueError> {
        let records = self
            .store
            .query(
                Collection::SyncQueue,
                IndexQuery::Equals(status.as_str().to_string()),
            )
            .await?;
        decode_sorted(&records)
    }

    /// Every entry, oldest first.
    pub async fn list_all(&self) -> Result<Vec<QueueEntry>, QueueError> {
        let records = self.store.get_all(Collection::SyncQueue).await?;
        decode_sorted(&records)
    }

    /// Entries a drain pass should replay: every pending entry plus failed
    /// entries that are retryable and still under the retry budget, merged
    /// in FIFO order.
    pub async fn list_replayable(&self, max_retries: u32) -> Result<Vec<QueueEntry>, QueueError> {
        let mut entries = self.list_pending().await?;
        entries.extend(
            self.list_by_status(SyncStatus::Failed)
                .await?
                .into_iter()
                .filter(|e| e.is_outstanding(max_retries)),
        );
        sort_fifo(&mut entries);
        Ok(entries)
    }

    /// Whether any entry for `endpoint` still has to reach the server.
    pub async fn has_outstanding_for(
        &self,
        endpoint: &str,
        max_retries: u32,
    ) -> Result<bool, QueueError> {
        Ok(self
            .list_all()
            .await?
            .iter()
            .any(|e| e.endpoint == endpoint && e.is_outstanding(max_retries)))
    }

    pub async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let mut counts = QueueCounts::default();
        for entry in self.list_all().await? {
            match entry.status {
                SyncStatus::Pending => counts.pending += 1,
                SyncStatus::Syncing => counts.syncing += 1,
                SyncStatus::Completed => counts.completed += 1,
                SyncStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    /// Move an entry to `status`. The retry count grows only on entry into
    /// `failed`.
    pub async fn mark_status(
        &self,
        id: Ulid,
        status: SyncStatus,
        error: Option<String>,
    ) -> Result<QueueEntry, QueueError> {
        self.transition(id, status, error, None).await
    }

    /// Mark an entry failed, keeping the HTTP status (if any) so later passes
    /// can tell retryable failures from rejected requests.
    pub async fn mark_failed(
        &self,
        id: Ulid,
        error: String,
        status_code: Option<u16>,
    ) -> Result<QueueEntry, QueueError> {
        self.transition(id, SyncStatus::Failed, Some(error), status_code)
            .await
    }

    async fn transition(
        &self,
        id: Ulid,
        status: SyncStatus,
        error: Option<String>,
        status_code: Option<u16>,
    ) -> Result<QueueEntry, QueueError> {
        let mut entry = self.get(id).await?.ok_or(QueueError::EntryNotFound(id))?;
        entry.transition(status, error, status_code)?;
        self.store.put(to_record(&entry)?).await?;
        Ok(entry)
    }

    /// Replace every occurrence of a temporary record id in the endpoint and
    /// payload of entries that have not completed yet. Returns the number of
    /// entries rewritten.
    pub async fn rewrite_references(
        &self,
        temporary: &RecordId,
        persisted: &RecordId,
    ) -> Result<usize, QueueError> {
        let mut rewritten = 0;
        for mut entry in self.list_all().await? {
            if entry.status == SyncStatus::Completed {
                continue;
            }
            let mut changed = false;
            if entry.endpoint.contains(temporary.as_str()) {
                entry.endpoint = entry
                    .endpoint
                    .replace(temporary.as_str(), persisted.as_str());
                changed = true;
            }
            if let Some(payload) = entry.payload.as_mut() {
                changed |= replace_strings(payload, temporary.as_str(), persisted.as_str());
            }
            if let Some(record) = entry.record.as_mut()
                && &record.id == temporary
            {
                record.id = persisted.clone();
                changed = true;
            }
            if changed {
                self.store.put(to_record(&entry)?).await?;
                rewritten += 1;
            }
        }
        if rewritten > 0 {
            tracing::info!(
                "rewrote {} queued entries from {} to {}",
                rewritten,
                temporary,
                persisted
            );
        }
        Ok(rewritten)
    }

    /// Put entries left in `syncing` by an interrupted drain into `failed`
    /// so the next pass can retry them.
    pub async fn recover_interrupted(&self) -> Result<usize, QueueError> {
        let stuck = self.list_by_status(SyncStatus::Syncing).await?;
        for entry in &stuck {
            self.mark_failed(entry.id, "interrupted during replay".to_string(), None)
                .await?;
        }
        if !stuck.is_empty() {
            tracing::warn!("recovered {} interrupted queue entries", stuck.len());
        }
        Ok(stuck.len())
    }

    /// Delete completed entries last updated before `cutoff`.
    pub async fn prune_completed(&self, cutoff: DateTime<Utc>) -> Result<usize, QueueError> {
        let mut pruned = 0;
        for entry in self.list_by_status(SyncStatus::Completed).await? {
            if entry.updated_at < cutoff
                && self
                    .store
                    .delete(Collection::SyncQueue, &entry.id.to_string())
                    .await?
            {
                pruned += 1;
            }
        }
        Ok(pruned)
    }
}

fn to_record(entry: &QueueEntry) -> Result<Record, StoreError> {
    let data = serde_json::to_value(entry)?;
    Ok(Record::new(
        Collection::SyncQueue,
        RecordId::Persisted(entry.id.to_string()),
        data,
    )?)
}

fn from_record(record: &Record) -> Result<QueueEntry, QueueError> {
    serde_json::from_value(record.data.clone())
        .map_err(|e| QueueError::Store(StoreError::Serialization(e)))
}

fn decode_sorted(records: &[Record]) -> Result<Vec<QueueEntry>, QueueError> {
    let mut entries = records
        .iter()
        .map(from_record)
        .collect::<Result<Vec<_>, _>>()?;
    sort_fifo(&mut entries);
    Ok(entries)
}

fn sort_fifo(entries: &mut [QueueEntry]) {
    entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}

/// Recursively replace string values equal to `from`. Returns whether
/// anything changed.
fn replace_strings(value: &mut Value, from: &str, to: &str) -> bool {
    match value {
        Value::String(s) if s == from => {
            *s = to.to_string();
            true
        }
        Value::Array(items) => items
            .iter_mut()
            .fold(false, |acc, v| replace_strings(v, from, to) | acc),
        Value::Object(map) => map
            .values_mut()
            .fold(false, |acc, v| replace_strings(v, from, to) | acc),
        _ => false,
    }
}
