// ABOUTME: Notifications fanned out to subscribers of the sync core.
// ABOUTME: Covers connectivity transitions, per-entry replay outcomes, reconciliation, and drain summaries.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::collection::Collection;
use crate::connectivity::ConnectivityState;
use crate::record::RecordId;

/// Outcome of one drain pass over the sync queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    pub attempted: usize,
    pub completed: usize,
    pub failed: usize,
    /// Entries left untouched because the pass stopped early.
    pub skipped: usize,
    /// Entries held back, still pending, because an earlier entry for the
    /// same record has not gone through yet.
    #[serde(default)]
    pub deferred: usize,
    /// The pass stopped because the network became unreachable.
    pub connectivity_lost: bool,
}

/// Something subscribers may want to reflect in a status display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    StateChanged {
        state: ConnectivityState,
    },
    EntrySynced {
        entry_id: Ulid,
        endpoint: String,
    },
    EntryFailed {
        entry_id: Ulid,
        error: String,
        /// The server rejected the request; it will not be retried automatically.
        permanent: bool,
    },
    Reconciled {
        collection: Collection,
        temporary: RecordId,
        persisted: RecordId,
    },
    DrainFinished {
        report: DrainReport,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_by_type() {
        let event = SyncEvent::StateChanged {
            state: ConnectivityState::Offline,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "state_changed");
        assert_eq!(value["state"], "offline");
    }

    #[test]
    fn default_report_is_empty() {
        let report = DrainReport::default();
        assert_eq!(report.attempted, 0);
        assert!(!report.connectivity_lost);
    }
}
