// ABOUTME: Network reachability signals feeding the connectivity monitor.
// ABOUTME: ManualReachability is pushed by host code; PollingReachability probes a health endpoint on an interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::remote::HttpRemote;

/// A boolean "is the network reachable" flag plus its transitions. The
/// receiver yields only changes; repeated identical readings are collapsed.
pub trait ReachabilitySignal: Send + Sync + 'static {
    fn is_reachable(&self) -> bool;

    fn watch(&self) -> watch::Receiver<bool>;
}

/// Push-style signal for hosts that already observe network transitions.
#[derive(Debug, Clone)]
pub struct ManualReachability {
    tx: Arc<watch::Sender<bool>>,
}

impl ManualReachability {
    pub fn new(reachable: bool) -> Self {
        let (tx, _) = watch::channel(reachable);
        Self { tx: Arc::new(tx) }
    }

    /// Record the current reachability. Returns true if it changed.
    pub fn set_reachable(&self, reachable: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == reachable {
                false
            } else {
                *current = reachable;
                true
            }
        });
        if changed {
            tracing::debug!("reachability set to {}", reachable);
        }
        changed
    }
}

impl ReachabilitySignal for ManualReachability {
    fn is_reachable(&self) -> bool {
        *self.tx.borrow()
    }

    fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Fallback signal that probes the backend's health path on a fixed
/// interval. The probe task stops when the signal is dropped.
#[derive(Debug)]
pub struct PollingReachability {
    rx: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl PollingReachability {
    /// Probe once to establish the initial reading, then keep probing every
    /// `interval` in the background.
    pub async fn start(remote: HttpRemote, health_path: String, interval: Duration) -> Self {
        let initial = remote.probe(&health_path).await;
        let (tx, rx) = watch::channel(initial);
        tracing::info!(
            "polling {} every {:?} (initially {})",
            remote.url(&health_path),
            interval,
            if initial { "reachable" } else { "unreachable" }
        );

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately and the initial probe already ran.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let reachable = remote.probe(&health_path).await;
                let changed = tx.send_if_modified(|current| {
                    if *current == reachable {
                        false
                    } else {
                        *current = reachable;
                        true
                    }
                });
                if changed {
                    tracing::info!("backend became {}", if reachable { "reachable" } else { "unreachable" });
                }
                if tx.is_closed() {
                    break;
                }
            }
        });

        Self { rx, task }
    }
}

impl ReachabilitySignal for PollingReachability {
    fn is_reachable(&self) -> bool {
        *self.rx.borrow()
    }

    fn watch(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }
}

impl Drop for PollingReachability {
    fn drop(&mut self) {
        self.task.abort();
    }
}
