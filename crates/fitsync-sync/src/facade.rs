// ABOUTME: Data access facade: per-entity load/save/update/remove that picks the online or queued path per call.
// ABOUTME: Also serves the offline food lookup cache (search queries and barcodes) with TTL-based expiry.

use chrono::Utc;
use fitsync_core::{
    Collection, ConnectivityState, HttpMethod, LookupEntry, LookupKind, Record, RecordError,
    RecordId, RecordRef, SyncEvent, lookup::normalize_key,
};
use fitsync_store::{LocalStore, QueueError, StoreError, SyncQueue};
use futures::stream::Stream;
use serde_json::Value;
use thiserror::Error;

use crate::context::SyncContext;
use crate::remote::RemoteError;

/// Errors surfaced to application code.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("{collection} record {id} not found")]
    NotFound { collection: Collection, id: String },

    #[error("duplicate key '{id}' in {collection}")]
    DuplicateKey { collection: Collection, id: String },

    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("invalid record: {0}")]
    InvalidRecord(#[from] RecordError),

    #[error("unexpected response from {endpoint}: expected a JSON array")]
    UnexpectedResponse { endpoint: String },

    #[error("offline and no local store is available")]
    Offline,
}

impl From<StoreError> for DataError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateKey { collection, id } => DataError::DuplicateKey { collection, id },
            StoreError::InvalidRecord(e) => DataError::InvalidRecord(e),
            other => DataError::Store(other),
        }
    }
}

/// The API application code uses for entity data. Stateless over the
/// context; cheap to clone.
#[derive(Clone)]
pub struct DataAccess {
    ctx: SyncContext,
}

impl DataAccess {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.ctx.connectivity()
    }

    /// Sync events: connectivity changes, replay outcomes, reconciliations.
    pub fn subscribe(&self) -> impl Stream<Item = SyncEvent> + Send + 'static {
        self.ctx.subscribe()
    }

    fn online(&self) -> bool {
        self.ctx.connectivity() == ConnectivityState::Online
    }

    /// Whether a write to an existing record can go straight to the server.
    /// Records still under a temporary id, and endpoints with queued writes
    /// still to replay, take the queued path so replay order is kept.
    async fn goes_direct(&self, endpoint: &str, id: &RecordId) -> bool {
        if !self.online() || id.is_temporary() {
            return false;
        }
        let Some(queue) = self.ctx.queue() else {
            return true;
        };
        match queue
            .has_outstanding_for(endpoint, self.ctx.config().max_retries)
            .await
        {
            Ok(queued) => {
                if queued {
                    tracing::debug!("{} has queued writes, queueing behind them", endpoint);
                }
                !queued
            }
            Err(e) => {
                tracing::warn!("cannot inspect sync queue for {}: {}", endpoint, e);
                true
            }
        }
    }

    fn offline_handles(&self) -> Result<(&LocalStore, &SyncQueue), DataError> {
        match (self.ctx.store(), self.ctx.queue()) {
            (Some(store), Some(queue)) => Ok((store, queue)),
            _ => Err(DataError::Offline),
        }
    }

    /// List a collection: from the network when online (refreshing the local
    /// copy), otherwise from the local store.
    pub async fn load(&self, endpoint: &str, collection: Collection) -> Result<Vec<Record>, DataError> {
        let store = self.ctx.store();
        if self.online() || store.is_none() {
            match self.ctx.remote().get(endpoint).await {
                Ok(body) => {
                    let records = parse_records(endpoint, collection, body)?;
                    self.refresh_cache(collection, &records).await;
                    return Ok(records);
                }
                Err(e) if e.is_retryable() && store.is_some() => {
                    tracing::warn!("GET {} failed, serving cached {}: {}", endpoint, collection, e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let Some(store) = store else {
            return Err(DataError::Offline);
        };
        match store.get_all(collection).await {
            Ok(records) => Ok(records),
            Err(e) => {
                tracing::warn!("cannot read cached {}, returning nothing: {}", collection, e);
                Ok(Vec::new())
            }
        }
    }

    /// Read one record from the local store.
    pub async fn get(&self, collection: Collection, id: &RecordId) -> Result<Option<Record>, DataError> {
        let Some(store) = self.ctx.store() else {
            return Err(DataError::Offline);
        };
        Ok(store.get(collection, id.as_str()).await?)
    }

    /// Mirror the server's view of a collection locally. Unsynced optimistic
    /// records survive the refresh.
    async fn refresh_cache(&self, collection: Collection, records: &[Record]) {
        let Some(store) = self.ctx.store() else {
            return;
        };
        match store
            .replace_all(collection, records.to_vec(), |id| id.is_temporary())
            .await
        {
            Ok(removed) if removed > 0 => {
                tracing::debug!("refreshed {}: dropped {} stale records", collection, removed);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("cannot refresh cached {}: {}", collection, e),
        }
    }

    /// Create a record. Online, the server assigns the id; otherwise the
    /// record is stored under a temporary id and the create is queued.
    pub async fn save(
        &self,
        endpoint: &str,
        collection: Collection,
        data: Value,
    ) -> Result<Record, DataError> {
        if !data.is_object() {
            return Err(RecordError::NotAnObject { collection }.into());
        }

        if self.online() {
            match self
                .ctx
                .remote()
                .send(HttpMethod::Post, endpoint, Some(&data))
                .await
            {
                Ok(body) => {
                    let record = Record::from_value(collection, body)?;
                    self.cache_created(record.clone()).await;
                    return Ok(record);
                }
                Err(e) if e.is_retryable() && self.ctx.queue().is_some() => {
                    tracing::warn!("POST {} failed, queueing create: {}", endpoint, e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let (store, queue) = self.offline_handles()?;
        let record = Record::new(collection, RecordId::temporary(), data.clone())?;
        store.add(record.clone()).await?;
        let target = RecordRef {
            collection,
            id: record.id.clone(),
        };
        if let Err(e) = queue.enqueue_create(endpoint, data, target).await {
            if let Err(cleanup) = store.delete(collection, record.id.as_str()).await {
                tracing::warn!("cannot drop unqueued record {}: {}", record.id, cleanup);
            }
            return Err(e.into());
        }
        tracing::debug!("saved {} {} offline", collection, record.id);
        Ok(record)
    }

    async fn cache_created(&self, record: Record) {
        let Some(store) = self.ctx.store() else {
            return;
        };
        let result = match store.add(record.clone()).await {
            Err(StoreError::DuplicateKey { collection, id }) => {
                tracing::warn!("server id {} already cached in {}, overwriting", id, collection);
                store.put(record).await
            }
            other => other,
        };
        if let Err(e) = result {
            tracing::warn!("cannot cache created record: {}", e);
        }
    }

    /// Apply a partial update. Fails with `NotFound` if the record is not in
    /// the local store. Records still under a temporary id are always
    /// updated through the queue, behind their pending create. Online, a
    /// local read error is logged and the update still goes to the server.
    pub async fn update(
        &self,
        endpoint: &str,
        collection: Collection,
        id: &RecordId,
        patch: Value,
    ) -> Result<Record, DataError> {
        let direct = self.goes_direct(endpoint, id).await;
        let not_found = || DataError::NotFound {
            collection,
            id: id.to_string(),
        };
        let existing = match self.ctx.store() {
            Some(store) => match store.get(collection, id.as_str()).await {
                Ok(Some(record)) => Some(record),
                Ok(None) => return Err(not_found()),
                Err(e) if direct => {
                    tracing::warn!("cannot read cached {} {}, updating remotely: {}", collection, id, e);
                    None
                }
                Err(e) => return Err(e.into()),
            },
            None => None,
        };

        if direct {
            match self
                .ctx
                .remote()
                .send(HttpMethod::Put, endpoint, Some(&patch))
                .await
            {
                Ok(body) => {
                    let record = if body.is_null() {
                        match existing {
                            Some(mut record) => {
                                record.merge(&patch);
                                record
                            }
                            None => Record::new(collection, id.clone(), patch)?,
                        }
                    } else {
                        Record::from_value(collection, body)?
                    };
                    if let Some(store) = self.ctx.store()
                        && let Err(e) = store.put(record.clone()).await
                    {
                        tracing::warn!("cannot cache updated {} {}: {}", collection, id, e);
                    }
                    return Ok(record);
                }
                Err(e) if e.is_retryable() && self.ctx.queue().is_some() => {
                    tracing::warn!("PUT {} failed, queueing update: {}", endpoint, e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let (store, queue) = self.offline_handles()?;
        let mut record = match existing {
            Some(record) => record,
            None => store
                .get(collection, id.as_str())
                .await?
                .ok_or_else(not_found)?,
        };
        record.merge(&patch);
        store.put(record.clone()).await?;
        queue.enqueue(endpoint, HttpMethod::Put, Some(patch)).await?;
        tracing::debug!("updated {} {} offline", collection, id);
        Ok(record)
    }

    /// Delete a record. Deleting something that is not stored locally is
    /// not an error.
    pub async fn remove(
        &self,
        endpoint: &str,
        collection: Collection,
        id: &RecordId,
    ) -> Result<(), DataError> {
        if self.goes_direct(endpoint, id).await {
            match self
                .ctx
                .remote()
                .send(HttpMethod::Delete, endpoint, None)
                .await
            {
                Ok(_) => {
                    if let Some(store) = self.ctx.store()
                        && let Err(e) = store.delete(collection, id.as_str()).await
                    {
                        tracing::warn!("cannot drop cached {} {}: {}", collection, id, e);
                    }
                    return Ok(());
                }
                Err(e) if e.is_retryable() && self.ctx.queue().is_some() => {
                    tracing::warn!("DELETE {} failed, queueing removal: {}", endpoint, e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let (store, queue) = self.offline_handles()?;
        store.delete(collection, id.as_str()).await?;
        queue.enqueue(endpoint, HttpMethod::Delete, None).await?;
        tracing::debug!("removed {} {} offline", collection, id);
        Ok(())
    }

    fn require_store(&self) -> Result<&LocalStore, DataError> {
        self.ctx.store().ok_or(DataError::Offline)
    }

    fn lookup_ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.ctx.config().lookup_ttl)
            .unwrap_or_else(|_| chrono::Duration::days(36_500))
    }

    async fn cache_lookup(
        &self,
        kind: LookupKind,
        key: &str,
        foods: Vec<Value>,
    ) -> Result<LookupEntry, DataError> {
        let store = self.require_store()?;
        let mut ids = Vec::with_capacity(foods.len());
        for food in foods {
            let record = Record::from_value(Collection::Foods, food)?;
            ids.push(record.id.to_string());
            store.put(record).await?;
        }
        let entry = LookupEntry::new(kind, key, ids);
        store.put(entry.to_record()?).await?;
        Ok(entry)
    }

    async fn cached_lookup(
        &self,
        kind: LookupKind,
        key: &str,
    ) -> Result<Option<Vec<Record>>, DataError> {
        let store = self.require_store()?;
        let key = normalize_key(kind, key);
        let Some(stored) = store.get(kind.collection(), &key).await? else {
            return Ok(None);
        };
        let Some(entry) = LookupEntry::from_record(kind, &stored) else {
            tracing::warn!("dropping unreadable {} entry {}", kind.collection(), key);
            store.delete(kind.collection(), &key).await?;
            return Ok(None);
        };
        if entry.is_stale(self.lookup_ttl(), Utc::now()) {
            store.delete(kind.collection(), &key).await?;
            return Ok(None);
        }

        let mut foods = Vec::with_capacity(entry.result_ids.len());
        for id in &entry.result_ids {
            if let Some(food) = store.get(Collection::Foods, id).await? {
                foods.push(food);
            }
        }
        Ok(Some(foods))
    }

    /// Remember the foods a search query resolved to.
    pub async fn cache_search(&self, query: &str, foods: Vec<Value>) -> Result<LookupEntry, DataError> {
        self.cache_lookup(LookupKind::Search, query, foods).await
    }

    /// Foods cached for a search query, or `None` if unknown or expired.
    pub async fn cached_search(&self, query: &str) -> Result<Option<Vec<Record>>, DataError> {
        self.cached_lookup(LookupKind::Search, query).await
    }

    /// Remember the foods a barcode resolved to.
    pub async fn cache_barcode(&self, barcode: &str, foods: Vec<Value>) -> Result<LookupEntry, DataError> {
        self.cache_lookup(LookupKind::Barcode, barcode, foods).await
    }

    /// Foods cached for a barcode, or `None` if unknown or expired.
    pub async fn cached_barcode(&self, barcode: &str) -> Result<Option<Vec<Record>>, DataError> {
        self.cached_lookup(LookupKind::Barcode, barcode).await
    }

    /// Delete every expired or unreadable lookup entry. Returns how many
    /// were removed.
    pub async fn evict_stale_lookups(&self) -> Result<usize, DataError> {
        let store = self.require_store()?;
        let ttl = self.lookup_ttl();
        let now = Utc::now();
        let mut evicted = 0;
        for kind in [LookupKind::Search, LookupKind::Barcode] {
            for record in store.get_all(kind.collection()).await? {
                let stale = match LookupEntry::from_record(kind, &record) {
                    Some(entry) => entry.is_stale(ttl, now),
                    None => true,
                };
                if stale && store.delete(kind.collection(), record.id.as_str()).await? {
                    evicted += 1;
                }
            }
        }
        if evicted > 0 {
            tracing::info!("evicted {} stale lookup entries", evicted);
        }
        Ok(evicted)
    }
}

fn parse_records(endpoint: &str, collection: Collection, body: Value) -> Result<Vec<Record>, DataError> {
    match body {
        Value::Array(items) => items
            .into_iter()
            .map(|item| Record::from_value(collection, item).map_err(DataError::from))
            .collect(),
        Value::Null => Ok(Vec::new()),
        _ => Err(DataError::UnexpectedResponse {
            endpoint: endpoint.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::SyncConfig;
    use crate::reachability::ManualReachability;
    use crate::testing::FakeRemote;
    use fitsync_core::SyncStatus;
    use serde_json::json;

    struct Harness {
        data: DataAccess,
        remote: Arc<FakeRemote>,
    }

    async fn harness(reachable: bool) -> Harness {
        harness_with(reachable, SyncConfig::default()).await
    }

    async fn harness_with(reachable: bool, config: SyncConfig) -> Harness {
        let store = LocalStore::open_in_memory().await.unwrap();
        let remote = Arc::new(FakeRemote::new());
        let ctx = SyncContext::new(
            Some(store),
            remote.clone(),
            Arc::new(ManualReachability::new(reachable)),
            config,
        );
        Harness {
            data: DataAccess::new(ctx),
            remote,
        }
    }

    fn ids(records: &[Record]) -> HashSet<String> {
        records.iter().map(|r| r.id.to_string()).collect()
    }

    #[tokio::test]
    async fn online_load_refreshes_cache_idempotently() {
        let h = harness(true).await;
        h.remote.seed(
            "/workouts",
            vec![json!({"id": 1, "name": "run"}), json!({"id": 2, "name": "lift"})],
        );
        let store = h.data.context().store().unwrap();
        store
            .put(Record::from_value(Collection::Workouts, json!({"id": "9", "name": "stale"})).unwrap())
            .await
            .unwrap();

        let first = h.data.load("/workouts", Collection::Workouts).await.unwrap();
        let second = h.data.load("/workouts", Collection::Workouts).await.unwrap();
        assert_eq!(ids(&first), ids(&second));

        let cached = store.get_all(Collection::Workouts).await.unwrap();
        assert_eq!(ids(&cached), HashSet::from(["1".to_string(), "2".to_string()]));
    }

    #[tokio::test]
    async fn offline_load_uses_cache_without_network() {
        let h = harness(false).await;
        let store = h.data.context().store().unwrap();
        store
            .put(Record::from_value(Collection::Progress, json!({"id": "3", "weight": 80})).unwrap())
            .await
            .unwrap();

        let records = h.data.load("/progress", Collection::Progress).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data["weight"], 80);
        assert_eq!(h.remote.call_count(), 0);
    }

    #[tokio::test]
    async fn transient_load_failure_falls_back_to_cache() {
        let h = harness(true).await;
        let store = h.data.context().store().unwrap();
        store
            .put(Record::from_value(Collection::Workouts, json!({"id": "1"})).unwrap())
            .await
            .unwrap();
        h.remote.fail_next(RemoteError::Timeout);

        let records = h.data.load("/workouts", Collection::Workouts).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn client_error_on_load_propagates() {
        let h = harness(true).await;
        h.remote.fail_next(RemoteError::Client {
            status: 403,
            body: "forbidden".to_string(),
        });
        let err = h.data.load("/workouts", Collection::Workouts).await.unwrap_err();
        assert!(matches!(err, DataError::Remote(RemoteError::Client { status: 403, .. })));
    }

    #[tokio::test]
    async fn online_save_stores_server_record() {
        let h = harness(true).await;
        let record = h
            .data
            .save("/meal-entries", Collection::MealEntries, json!({"name": "egg"}))
            .await
            .unwrap();
        assert_eq!(record.id, RecordId::Persisted("1000".to_string()));

        let cached = h
            .data
            .get(Collection::MealEntries, &record.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.data["name"], "egg");
    }

    #[tokio::test]
    async fn offline_save_is_optimistic_and_queued() {
        let h = harness(false).await;
        let record = h
            .data
            .save("/meal-entries", Collection::MealEntries, json!({"name": "egg"}))
            .await
            .unwrap();
        assert!(record.id.is_temporary());
        assert_eq!(h.remote.call_count(), 0);

        let listed = h.data.load("/meal-entries", Collection::MealEntries).await.unwrap();
        assert_eq!(ids(&listed), HashSet::from([record.id.to_string()]));

        let queue = h.data.context().queue().unwrap();
        let pending = queue.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].method, HttpMethod::Post);
        assert_eq!(pending[0].payload, Some(json!({"name": "egg"})));
        assert_eq!(pending[0].record.as_ref().unwrap().id, record.id);
    }

    #[tokio::test]
    async fn transient_save_failure_degrades_to_queue() {
        let h = harness(true).await;
        h.remote.fail_next(RemoteError::Connection("reset".to_string()));
        let record = h
            .data
            .save("/workouts", Collection::Workouts, json!({"name": "row"}))
            .await
            .unwrap();
        assert!(record.id.is_temporary());
        let counts = h.data.context().queue().unwrap().counts().await.unwrap();
        assert_eq!(counts.pending, 1);
    }

    #[tokio::test]
    async fn save_rejects_non_objects() {
        let h = harness(false).await;
        let err = h
            .data
            .save("/workouts", Collection::Workouts, json!([1, 2]))
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::InvalidRecord(_)));
    }

    #[tokio::test]
    async fn update_of_unknown_record_is_not_found() {
        let h = harness(true).await;
        let err = h
            .data
            .update(
                "/workouts/5",
                Collection::Workouts,
                &RecordId::parse("5"),
                json!({"name": "x"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::NotFound { .. }));
        assert_eq!(h.remote.call_count(), 0);
    }

    #[tokio::test]
    async fn offline_updates_merge_locally_in_order() {
        let h = harness(false).await;
        let store = h.data.context().store().unwrap();
        store
            .put(Record::from_value(Collection::Progress, json!({"id": "7", "weight": 81, "unit": "kg"})).unwrap())
            .await
            .unwrap();
        let id = RecordId::parse("7");

        h.data
            .update("/progress/7", Collection::Progress, &id, json!({"weight": 80}))
            .await
            .unwrap();
        let record = h
            .data
            .update("/progress/7", Collection::Progress, &id, json!({"weight": 79}))
            .await
            .unwrap();
        assert_eq!(record.data["weight"], 79);
        assert_eq!(record.data["unit"], "kg");

        let pending = h.data.context().queue().unwrap().list_pending().await.unwrap();
        let payloads: Vec<_> = pending.iter().map(|e| e.payload.clone().unwrap()).collect();
        assert_eq!(payloads, vec![json!({"weight": 80}), json!({"weight": 79})]);
    }

    #[tokio::test]
    async fn online_update_caches_server_response() {
        let h = harness(true).await;
        h.remote.seed("/progress", vec![json!({"id": 7, "weight": 81})]);
        h.data.load("/progress", Collection::Progress).await.unwrap();

        let record = h
            .data
            .update("/progress/7", Collection::Progress, &RecordId::parse("7"), json!({"weight": 80}))
            .await
            .unwrap();
        assert_eq!(record.data["weight"], 80);
        assert_eq!(h.remote.records("/progress")[0]["weight"], 80);
        let cached = h
            .data
            .get(Collection::Progress, &RecordId::parse("7"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.data["weight"], 80);
    }

    #[tokio::test]
    async fn online_writes_queue_behind_unfinished_entries_for_the_same_record() {
        let h = harness(true).await;
        h.remote.seed("/progress", vec![json!({"id": 7, "weight": 81})]);
        h.data.load("/progress", Collection::Progress).await.unwrap();
        let queue = h.data.context().queue().unwrap();
        let earlier = queue
            .enqueue("/progress/7", HttpMethod::Put, Some(json!({"weight": 80})))
            .await
            .unwrap();
        queue
            .mark_status(earlier.id, SyncStatus::Syncing, None)
            .await
            .unwrap();
        queue
            .mark_failed(earlier.id, "503".to_string(), Some(503))
            .await
            .unwrap();
        h.remote.clear_calls();

        let id = RecordId::parse("7");
        let record = h
            .data
            .update("/progress/7", Collection::Progress, &id, json!({"weight": 79}))
            .await
            .unwrap();
        assert_eq!(record.data["weight"], 79);
        h.data
            .remove("/progress/7", Collection::Progress, &id)
            .await
            .unwrap();
        assert_eq!(h.remote.call_count(), 0);
        assert_eq!(h.remote.records("/progress")[0]["weight"], 81);

        let methods: Vec<_> = queue
            .list_pending()
            .await
            .unwrap()
            .iter()
            .map(|e| e.method)
            .collect();
        assert_eq!(methods, vec![HttpMethod::Put, HttpMethod::Delete]);
    }

    #[tokio::test]
    async fn online_update_goes_through_when_cached_copy_is_unreadable() {
        let h = harness(true).await;
        h.remote.seed("/progress", vec![json!({"id": 7, "weight": 81})]);
        let store = h.data.context().store().unwrap();
        store
            .put(Record {
                id: RecordId::parse("7"),
                collection: Collection::Progress,
                data: json!(5),
            })
            .await
            .unwrap();

        let record = h
            .data
            .update("/progress/7", Collection::Progress, &RecordId::parse("7"), json!({"weight": 80}))
            .await
            .unwrap();
        assert_eq!(record.data["weight"], 80);
        assert_eq!(h.remote.records("/progress")[0]["weight"], 80);
        let cached = store.get(Collection::Progress, "7").await.unwrap().unwrap();
        assert_eq!(cached.data["weight"], 80);
    }

    #[tokio::test]
    async fn temporary_records_are_always_updated_through_the_queue() {
        let h = harness(false).await;
        let record = h
            .data
            .save("/workouts", Collection::Workouts, json!({"name": "row"}))
            .await
            .unwrap();

        h.data.context().set_connectivity(ConnectivityState::Online);
        let endpoint = format!("/workouts/{}", record.id);
        h.data
            .update(&endpoint, Collection::Workouts, &record.id, json!({"name": "erg"}))
            .await
            .unwrap();
        assert_eq!(h.remote.call_count(), 0);

        let pending = h.data.context().queue().unwrap().list_pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[1].method, HttpMethod::Put);
    }

    #[tokio::test]
    async fn remove_of_missing_record_is_a_no_op_offline() {
        let h = harness(false).await;
        h.data
            .remove("/workouts/42", Collection::Workouts, &RecordId::parse("42"))
            .await
            .unwrap();
        let pending = h.data.context().queue().unwrap().list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].method, HttpMethod::Delete);
        assert_eq!(pending[0].status, SyncStatus::Pending);
    }

    #[tokio::test]
    async fn online_remove_deletes_remote_then_local() {
        let h = harness(true).await;
        h.remote.seed("/workouts", vec![json!({"id": 4})]);
        h.data.load("/workouts", Collection::Workouts).await.unwrap();

        h.data
            .remove("/workouts/4", Collection::Workouts, &RecordId::parse("4"))
            .await
            .unwrap();
        assert!(h.remote.records("/workouts").is_empty());
        assert!(
            h.data
                .get(Collection::Workouts, &RecordId::parse("4"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn without_store_reads_go_online_and_offline_writes_fail() {
        let remote = Arc::new(FakeRemote::new());
        remote.seed("/foods", vec![json!({"id": 1})]);
        let signal = ManualReachability::new(false);
        let data = DataAccess::new(SyncContext::new(
            None,
            remote.clone(),
            Arc::new(signal),
            SyncConfig::default(),
        ));

        let foods = data.load("/foods", Collection::Foods).await.unwrap();
        assert_eq!(foods.len(), 1);

        let err = data
            .save("/workouts", Collection::Workouts, json!({"name": "row"}))
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Offline));
    }

    #[tokio::test]
    async fn search_cache_round_trip_with_normalized_key() {
        let h = harness(false).await;
        h.data
            .cache_search(
                "Greek Yogurt",
                vec![json!({"id": "f1", "name": "yogurt"}), json!({"id": "f2", "name": "skyr"})],
            )
            .await
            .unwrap();

        let foods = h.data.cached_search("  greek yogurt ").await.unwrap().unwrap();
        assert_eq!(ids(&foods), HashSet::from(["f1".to_string(), "f2".to_string()]));
        assert!(h.data.cached_search("oats").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn barcode_cache_round_trip() {
        let h = harness(false).await;
        h.data
            .cache_barcode("4006381333931", vec![json!({"id": 12, "name": "oats"})])
            .await
            .unwrap();
        let foods = h.data.cached_barcode("4006381333931").await.unwrap().unwrap();
        assert_eq!(foods[0].data["name"], "oats");
    }

    #[tokio::test]
    async fn stale_lookups_are_evicted() {
        let h = harness_with(
            false,
            SyncConfig {
                lookup_ttl: Duration::from_secs(60),
                ..SyncConfig::default()
            },
        )
        .await;
        let store = h.data.context().store().unwrap();

        let mut old = LookupEntry::new(LookupKind::Search, "oats", vec![]);
        old.created_at = Utc::now() - chrono::Duration::hours(1);
        store.put(old.to_record().unwrap()).await.unwrap();
        h.data.cache_barcode("123", vec![]).await.unwrap();

        assert_eq!(h.data.evict_stale_lookups().await.unwrap(), 1);
        assert!(h.data.cached_search("oats").await.unwrap().is_none());
        assert!(h.data.cached_barcode("123").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn zero_ttl_keeps_lookups_forever() {
        let h = harness_with(
            false,
            SyncConfig {
                lookup_ttl: Duration::ZERO,
                ..SyncConfig::default()
            },
        )
        .await;
        let store = h.data.context().store().unwrap();
        let mut old = LookupEntry::new(LookupKind::Search, "oats", vec![]);
        old.created_at = Utc::now() - chrono::Duration::days(400);
        store.put(old.to_record().unwrap()).await.unwrap();

        assert!(h.data.cached_search("oats").await.unwrap().is_some());
        assert_eq!(h.data.evict_stale_lookups().await.unwrap(), 0);
    }
}
