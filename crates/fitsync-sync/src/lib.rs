// ABOUTME: Sync engine for fitsync, connecting the local store to the REST backend.
// ABOUTME: Provides the remote client, reachability signals, data access facade, queue drainer, and connectivity monitor.

pub mod config;
pub mod context;
pub mod drainer;
pub mod facade;
pub mod monitor;
pub mod reachability;
pub mod remote;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::{ConfigError, SyncConfig};
pub use context::SyncContext;
pub use drainer::{DrainError, QueueDrainer};
pub use facade::{DataAccess, DataError};
pub use monitor::{MonitorError, MonitorHandle};
pub use reachability::{ManualReachability, PollingReachability, ReachabilitySignal};
pub use remote::{HttpRemote, RemoteApi, RemoteError};
