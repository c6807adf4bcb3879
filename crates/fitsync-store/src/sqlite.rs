// ABOUTME: SQLite-backed local store offering async, durable CRUD over the fixed set of collections.
// ABOUTME: Each operation runs in its own transaction on tokio's blocking pool and commits before returning.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fitsync_core::{Collection, Record, RecordError, RecordId};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use thiserror::Error;

use crate::schema;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can occur during local store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("persistent storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage io error: {0}")]
    Io(#[from] rusqlite::Error),

    #[error("duplicate key '{id}' in {collection}")]
    DuplicateKey { collection: Collection, id: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid record: {0}")]
    InvalidRecord(#[from] RecordError),

    #[error("collection {0} has no indexed field")]
    NotIndexed(Collection),

    #[error("storage task failed: {0}")]
    TaskFailed(String),
}

/// Predicate over a collection's indexed field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexQuery {
    Equals(String),
    /// Inclusive range, compared as text (ISO-8601 dates sort correctly).
    Between { lower: String, upper: String },
}

/// Handle to the durable local store. Cheap to clone; clones share one
/// connection guarded by a mutex.
#[derive(Clone)]
pub struct LocalStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore").field("path", &self.path).finish()
    }
}

impl LocalStore {
    /// Open or create the store at `path`, creating parent directories and any
    /// collections missing from an older schema. Safe to call repeatedly and
    /// from several callers at once.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::open_blocking(path))
            .await
            .map_err(|e| StoreError::TaskFailed(e.to_string()))?
    }

    fn open_blocking(path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let mut conn = Connection::open(&path)
            .map_err(|e| StoreError::Unavailable(format!("cannot open {}: {}", path.display(), e)))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA synchronous=FULL;")?;

        let version = schema::apply_migrations(&mut conn)?;
        tracing::info!("opened local store at {} (schema v{})", path.display(), version);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path),
        })
    }

    /// Open a private in-memory store with the full schema.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let mut conn =
            Connection::open_in_memory().map_err(|e| StoreError::Unavailable(e.to_string()))?;
        schema::apply_migrations(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// On-disk location, if the store is file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::TaskFailed("store connection lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::TaskFailed(e.to_string()))?
    }

    /// Currently applied schema version.
    pub async fn schema_version(&self) -> Result<u32, StoreError> {
        self.with_conn(|conn| Ok(schema::current_version(conn)?))
            .await
    }

    /// Insert a new record. Fails with `DuplicateKey` if its id is taken.
    pub async fn add(&self, record: Record) -> Result<Record, StoreError> {
        self.with_conn(move |conn| {
            let collection = record.collection;
            let body = serde_json::to_string(&record.data)?;
            let result = conn.execute(
                &format!(
                    "INSERT INTO {} (id, body, idx) VALUES (?1, ?2, ?3)",
                    collection.name()
                ),
                params![record.id.as_str(), body, record.index_value()],
            );
            match result {
                Ok(_) => Ok(record),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::DuplicateKey {
                        collection,
                        id: record.id.to_string(),
                    })
                }
                Err(e) => Err(StoreError::Io(e)),
            }
        })
        .await
    }

    /// Insert or overwrite a record by id.
    pub async fn put(&self, record: Record) -> Result<Record, StoreError> {
        self.with_conn(move |conn| {
            upsert(conn, &record)?;
            Ok(record)
        })
        .await
    }

    /// Fetch one record; `None` when absent.
    pub async fn get(&self, collection: Collection, id: &str) -> Result<Option<Record>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let body: Option<String> = conn
                .query_row(
                    &format!("SELECT body FROM {} WHERE id = ?1", collection.name()),
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            body.map(|b| decode(collection, &b)).transpose()
        })
        .await
    }

    /// Every record in the collection, in no particular order.
    pub async fn get_all(&self, collection: Collection) -> Result<Vec<Record>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!("SELECT body FROM {}", collection.name()))?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

            let mut records = Vec::new();
            for row in rows {
                records.push(decode(collection, &row?)?);
            }
            Ok(records)
        })
        .await
    }

    /// Remove a record. Returns whether a row was removed; an absent id is
    /// not an error.
    pub async fn delete(&self, collection: Collection, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute(
                &format!("DELETE FROM {} WHERE id = ?1", collection.name()),
                params![id],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    /// Records whose indexed field matches `query`.
    pub async fn query(
        &self,
        collection: Collection,
        query: IndexQuery,
    ) -> Result<Vec<Record>, StoreError> {
        if collection.index_field().is_none() {
            return Err(StoreError::NotIndexed(collection));
        }
        self.with_conn(move |conn| {
            let table = collection.name();
            let bodies: Vec<String> = match &query {
                IndexQuery::Equals(value) => {
                    let mut stmt =
                        conn.prepare(&format!("SELECT body FROM {table} WHERE idx = ?1"))?;
                    let rows = stmt
                        .query_map(params![value], |row| row.get(0))?
                        .collect::<Result<Vec<String>, _>>()?;
                    rows
                }
                IndexQuery::Between { lower, upper } => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT body FROM {table} WHERE idx >= ?1 AND idx <= ?2"
                    ))?;
                    let rows = stmt
                        .query_map(params![lower, upper], |row| row.get(0))?
                        .collect::<Result<Vec<String>, _>>()?;
                    rows
                }
            };
            bodies.iter().map(|b| decode(collection, b)).collect()
        })
        .await
    }

    /// Make the collection mirror `records` in one transaction: every given
    /// record is upserted and every other existing record is deleted unless
    /// `retain` keeps it.
    pub async fn replace_all<F>(
        &self,
        collection: Collection,
        records: Vec<Record>,
        retain: F,
    ) -> Result<usize, StoreError>
    where
        F: Fn(&RecordId) -> bool + Send + 'static,
    {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let keep: HashSet<String> = records.iter().map(|r| r.id.to_string()).collect();

            for record in &records {
                if record.collection != collection {
                    continue;
                }
                upsert(&tx, record)?;
            }

            let existing: Vec<String> = {
                let mut stmt = tx.prepare(&format!("SELECT id FROM {}", collection.name()))?;
                let ids = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                ids
            };

            let mut removed = 0;
            for id in existing {
                if keep.contains(&id) || retain(&RecordId::parse(id.clone())) {
                    continue;
                }
                tx.execute(
                    &format!("DELETE FROM {} WHERE id = ?1", collection.name()),
                    params![id],
                )?;
                removed += 1;
            }

            tx.commit()?;
            Ok(removed)
        })
        .await
    }
}

fn upsert(conn: &Connection, record: &Record) -> Result<(), StoreError> {
    let body = serde_json::to_string(&record.data)?;
    conn.execute(
        &format!(
            "INSERT INTO {} (id, body, idx) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET body = excluded.body, idx = excluded.idx",
            record.collection.name()
        ),
        params![record.id.as_str(), body, record.index_value()],
    )?;
    Ok(())
}

fn decode(collection: Collection, body: &str) -> Result<Record, StoreError> {
    let value = serde_json::from_str(body)?;
    Ok(Record::from_value(collection, value)?)
}
