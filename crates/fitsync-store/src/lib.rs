// ABOUTME: Persistence layer for fitsync, holding every collection in one SQLite database.
// ABOUTME: Provides the versioned schema, the async local store, and the sync queue built on it.

pub mod queue;
pub mod schema;
pub mod sqlite;

pub use queue::{QueueCounts, QueueError, SyncQueue};
pub use schema::SCHEMA_VERSION;
pub use sqlite::{IndexQuery, LocalStore, StoreError};
