// ABOUTME: Queue drainer that replays queued mutations against the remote API in FIFO order.
// ABOUTME: Isolates per-entry failures, stops when the network drops, and reconciles temporary record ids.

use std::collections::HashSet;
use std::sync::Arc;

use fitsync_core::{
    DrainReport, HttpMethod, QueueEntry, Record, RecordRef, SyncEvent, SyncStatus,
};
use fitsync_store::{QueueError, StoreError};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::context::SyncContext;
use crate::remote::RemoteError;

/// Errors that abort a drain pass. Remote failures never do; they are
/// recorded on the entry instead.
#[derive(Debug, Error)]
pub enum DrainError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Records a pass must not touch yet: endpoints with an earlier entry still
/// owed to the server, and temporary ids whose create has not gone through.
#[derive(Default)]
struct HeldBack {
    endpoints: HashSet<String>,
    temporaries: HashSet<String>,
}

impl HeldBack {
    fn holds(&self, entry: &QueueEntry) -> bool {
        (entry.method != HttpMethod::Post && self.endpoints.contains(&entry.endpoint))
            || self.temporaries.iter().any(|id| entry.references(id))
    }

    fn hold(&mut self, entry: &QueueEntry) {
        // Creates against a collection endpoint are independent of each other.
        if entry.method != HttpMethod::Post {
            self.endpoints.insert(entry.endpoint.clone());
        }
        if let Some(target) = &entry.record
            && target.id.is_temporary()
        {
            self.temporaries.insert(target.id.as_str().to_string());
        }
    }
}

/// How one replay attempt ended.
enum Replay {
    Completed,
    Failed {
        /// The entry stays eligible for a later pass.
        retryable: bool,
        /// The request never reached the server.
        connectivity: bool,
    },
}

/// Replays the sync queue. Clones share one drain lock, so passes never
/// overlap within a process.
#[derive(Clone)]
pub struct QueueDrainer {
    ctx: SyncContext,
    lock: Arc<Mutex<()>>,
}

impl QueueDrainer {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            ctx,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Run one drain pass. Entries are replayed strictly one after another,
    /// oldest first. Entries enqueued while the pass runs are picked up
    /// before it ends; entries that fail are not retried within the pass.
    ///
    /// Once an entry fails in a way a later pass will retry, every later
    /// entry for the same record stays pending until it has gone through, so
    /// an older write never lands on top of a newer one.
    pub async fn drain(&self) -> Result<DrainReport, DrainError> {
        let _guard = self.lock.lock().await;
        let Some(queue) = self.ctx.queue() else {
            tracing::debug!("no local store, nothing to drain");
            return Ok(DrainReport::default());
        };

        queue.recover_interrupted().await?;

        let max_retries = self.ctx.config().max_retries;
        let mut seen: HashSet<Ulid> = HashSet::new();
        let mut held = HeldBack::default();
        let mut report = DrainReport::default();

        'pass: loop {
            let batch: Vec<Ulid> = queue
                .list_replayable(max_retries)
                .await?
                .into_iter()
                .map(|e| e.id)
                .filter(|id| !seen.contains(id))
                .collect();
            if batch.is_empty() {
                break;
            }

            for (position, id) in batch.iter().enumerate() {
                seen.insert(*id);
                // Reload: reconciliation earlier in the pass may have rewritten it.
                let Some(entry) = queue.get(*id).await? else {
                    continue;
                };
                if !matches!(entry.status, SyncStatus::Pending | SyncStatus::Failed) {
                    continue;
                }
                if held.holds(&entry) {
                    tracing::debug!(
                        "holding {} {} behind an earlier entry",
                        entry.method,
                        entry.endpoint
                    );
                    held.hold(&entry);
                    report.deferred += 1;
                    continue;
                }

                report.attempted += 1;
                let (retryable, connectivity) = match self.replay(&entry).await? {
                    Replay::Completed => {
                        report.completed += 1;
                        continue;
                    }
                    Replay::Failed {
                        retryable,
                        connectivity,
                    } => (retryable, connectivity),
                };

                report.failed += 1;
                if retryable {
                    held.hold(&entry);
                }
                if connectivity && !self.ctx.reachability().is_reachable() {
                    report.connectivity_lost = true;
                    report.skipped = batch.len() - position - 1;
                    tracing::warn!(
                        "network lost during drain, leaving {} entries for later",
                        report.skipped
                    );
                    break 'pass;
                }
            }
        }

        tracing::info!(
            "drain finished: {} attempted, {} completed, {} failed, {} deferred, {} skipped",
            report.attempted,
            report.completed,
            report.failed,
            report.deferred,
            report.skipped
        );
        self.ctx.emit(SyncEvent::DrainFinished {
            report: report.clone(),
        });
        Ok(report)
    }

    async fn replay(&self, entry: &QueueEntry) -> Result<Replay, DrainError> {
        let Some(queue) = self.ctx.queue() else {
            return Ok(Replay::Failed {
                retryable: false,
                connectivity: false,
            });
        };
        queue
            .mark_status(entry.id, SyncStatus::Syncing, None)
            .await?;

        let result = self
            .ctx
            .remote()
            .send(entry.method, &entry.endpoint, entry.payload.as_ref())
            .await;

        let response = match result {
            Ok(response) => Some(response),
            Err(RemoteError::Decode(e)) => {
                // The server accepted the request; only its answer is unreadable.
                tracing::warn!(
                    "entry {} replayed but response was unreadable: {}",
                    entry.id,
                    e
                );
                None
            }
            Err(err) => {
                let failed = queue
                    .mark_failed(entry.id, err.to_string(), err.status_code())
                    .await?;
                let retryable = failed.is_outstanding(self.ctx.config().max_retries);
                tracing::warn!(
                    "replay of {} {} failed (attempt {}): {}",
                    entry.method,
                    entry.endpoint,
                    failed.retry_count,
                    err
                );
                self.ctx.emit(SyncEvent::EntryFailed {
                    entry_id: entry.id,
                    error: err.to_string(),
                    permanent: !retryable,
                });
                return Ok(Replay::Failed {
                    retryable,
                    connectivity: err.is_connectivity(),
                });
            }
        };

        queue
            .mark_status(entry.id, SyncStatus::Completed, None)
            .await?;
        tracing::debug!("replayed {} {}", entry.method, entry.endpoint);
        self.ctx.emit(SyncEvent::EntrySynced {
            entry_id: entry.id,
            endpoint: entry.endpoint.clone(),
        });

        if let (Some(target), Some(response)) = (&entry.record, response)
            && let Err(e) = self.reconcile(target, response).await
        {
            tracing::warn!("could not reconcile {}: {}", target.id, e);
        }
        Ok(Replay::Completed)
    }

    /// Swap the optimistic record created offline for the server's copy and
    /// point every still-queued mutation at the persisted id.
    async fn reconcile(&self, target: &RecordRef, response: Value) -> Result<(), DrainError> {
        let (Some(store), Some(queue)) = (self.ctx.store(), self.ctx.queue()) else {
            return Ok(());
        };
        let mut server = match Record::from_value(target.collection, response) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(
                    "server response for {} carries no usable id: {}",
                    target.id,
                    e
                );
                return Ok(());
            }
        };
        if !target.id.is_temporary() || server.id == target.id {
            store.put(server).await?;
            return Ok(());
        }

        // A temporary record removed locally stays removed; its queued delete
        // is rewritten below and replays against the persisted id.
        let local = store.get(target.collection, target.id.as_str()).await?;
        let persisted = server.id.clone();
        let rewritten = queue.rewrite_references(&target.id, &persisted).await?;
        if let Some(local) = local {
            // Edits still queued behind the create are already applied locally.
            if rewritten > 0 {
                server.merge(&local.data);
            }
            store.put(server).await?;
            store
                .delete(target.collection, target.id.as_str())
                .await?;
        }

        tracing::info!(
            "reconciled {} record {} as {}",
            target.collection,
            target.id,
            persisted
        );
        self.ctx.emit(SyncEvent::Reconciled {
            collection: target.collection,
            temporary: target.id.clone(),
            persisted,
        });
        Ok(())
    }
}
