// ABOUTME: Cached lookup entries mapping a search query or barcode to cached food ids.
// ABOUTME: Lets food search work offline; entries expire after a configurable TTL.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::collection::Collection;
use crate::record::{Record, RecordError, RecordId};

/// Which lookup table an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupKind {
    Search,
    Barcode,
}

impl LookupKind {
    pub fn collection(self) -> Collection {
        match self {
            LookupKind::Search => Collection::Searches,
            LookupKind::Barcode => Collection::Barcodes,
        }
    }
}

/// A query or barcode together with the ids of the food records it resolved to.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupEntry {
    pub kind: LookupKind,
    pub key: String,
    pub result_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl LookupEntry {
    pub fn new(kind: LookupKind, key: impl Into<String>, result_ids: Vec<String>) -> Self {
        Self {
            kind,
            key: normalize_key(kind, &key.into()),
            result_ids,
            created_at: Utc::now(),
        }
    }

    /// Whether the entry is older than `ttl`. A zero TTL disables expiry.
    pub fn is_stale(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        ttl > Duration::zero() && now - self.created_at > ttl
    }

    pub fn to_record(&self) -> Result<Record, RecordError> {
        let collection = self.kind.collection();
        Record::new(
            collection,
            RecordId::Persisted(self.key.clone()),
            json!({
                "result_ids": self.result_ids,
                "created_at": self.created_at,
            }),
        )
    }

    /// Read an entry back from its stored record. Malformed payloads yield
    /// `None` so a damaged cache row behaves like a cache miss.
    pub fn from_record(kind: LookupKind, record: &Record) -> Option<Self> {
        let result_ids = record
            .data
            .get("result_ids")?
            .as_array()?
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect();
        let created_at = serde_json::from_value(record.data.get("created_at")?.clone()).ok()?;
        Some(Self {
            kind,
            key: record.id.as_str().to_string(),
            result_ids,
            created_at,
        })
    }
}

/// Search queries are matched case-insensitively and ignoring surrounding
/// whitespace; barcodes are matched exactly after trimming.
pub fn normalize_key(kind: LookupKind, key: &str) -> String {
    match kind {
        LookupKind::Search => key.trim().to_lowercase(),
        LookupKind::Barcode => key.trim().to_string(),
    }
}
