// ABOUTME: Process-wide connectivity state published by the connectivity monitor.
// ABOUTME: Never persisted; re-derived from the reachability signal on every start.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Connectivity as seen by the sync core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    Online,
    Offline,
    /// Reachable, with the queue currently being drained.
    Syncing,
}

impl ConnectivityState {
    /// Initial state derived from a raw reachability flag.
    pub fn from_reachable(reachable: bool) -> Self {
        if reachable {
            ConnectivityState::Online
        } else {
            ConnectivityState::Offline
        }
    }

    pub fn is_online(self) -> bool {
        self == ConnectivityState::Online
    }

    pub fn is_offline(self) -> bool {
        self == ConnectivityState::Offline
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectivityState::Online => "online",
            ConnectivityState::Offline => "offline",
            ConnectivityState::Syncing => "syncing",
        }
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
