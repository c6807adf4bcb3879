// ABOUTME: Fixed set of named collections held by the local store, one per entity type.
// ABOUTME: Each collection declares its key field, optional indexed field, and the schema version that introduced it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Returned when a string does not name a known collection.
#[derive(Debug, Error)]
#[error("unknown collection: {0}")]
pub struct UnknownCollection(pub String);

/// A named, independently keyed set of records within the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// Pending and historical mutations waiting to be replayed.
    SyncQueue,
    Workouts,
    MealEntries,
    Progress,
    /// Food items cached from search and barcode lookups.
    Foods,
    /// Search query to food id list mappings.
    Searches,
    /// Barcode to food id list mappings.
    Barcodes,
}

impl Collection {
    /// Every collection, in schema declaration order.
    pub const ALL: [Collection; 7] = [
        Collection::SyncQueue,
        Collection::Workouts,
        Collection::MealEntries,
        Collection::Progress,
        Collection::Foods,
        Collection::Searches,
        Collection::Barcodes,
    ];

    /// Storage name of the collection. Also used as the SQLite table name.
    pub fn name(self) -> &'static str {
        match self {
            Collection::SyncQueue => "sync_queue",
            Collection::Workouts => "workouts",
            Collection::MealEntries => "meal_entries",
            Collection::Progress => "progress",
            Collection::Foods => "foods",
            Collection::Searches => "searches",
            Collection::Barcodes => "barcodes",
        }
    }

    /// Name of the payload field that holds the record identifier.
    pub fn key_field(self) -> &'static str {
        match self {
            Collection::Searches => "query",
            Collection::Barcodes => "barcode",
            _ => "id",
        }
    }

    /// Name of the payload field mirrored into the secondary index, if any.
    pub fn index_field(self) -> Option<&'static str> {
        match self {
            Collection::SyncQueue => Some("status"),
            Collection::Workouts | Collection::MealEntries | Collection::Progress => Some("date"),
            Collection::Foods | Collection::Searches | Collection::Barcodes => None,
        }
    }

    /// Schema version in which this collection was introduced.
    pub fn since_version(self) -> u32 {
        match self {
            Collection::SyncQueue
            | Collection::Workouts
            | Collection::MealEntries
            | Collection::Progress => 1,
            Collection::Foods | Collection::Searches | Collection::Barcodes => 2,
        }
    }

    /// True for collections that hold application entities mirrored from the server.
    pub fn is_entity(self) -> bool {
        !matches!(self, Collection::SyncQueue | Collection::Searches | Collection::Barcodes)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Collection {
    type Err = UnknownCollection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| UnknownCollection(s.to_string()))
    }
}
