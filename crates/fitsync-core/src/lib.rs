// ABOUTME: Core library for fitsync, containing the domain types shared by the store and sync engine.
// ABOUTME: Defines collections, record identity, queue entries, connectivity state, events, and lookup entries.

pub mod collection;
pub mod connectivity;
pub mod event;
pub mod lookup;
pub mod queue;
pub mod record;

pub use collection::{Collection, UnknownCollection};
pub use connectivity::ConnectivityState;
pub use event::{DrainReport, SyncEvent};
pub use lookup::{LookupEntry, LookupKind};
pub use queue::{HttpMethod, QueueEntry, RecordRef, SyncStatus, TransitionError};
pub use record::{Record, RecordError, RecordId, TEMP_ID_PREFIX};
