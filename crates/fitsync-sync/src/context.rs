// ABOUTME: Explicitly constructed context shared by the facade, drainer, and monitor.
// ABOUTME: Holds the store and queue handles, the remote API, reachability, connectivity state, and the event fan-out.

use std::sync::Arc;

use fitsync_core::{ConnectivityState, SyncEvent};
use fitsync_store::{LocalStore, SyncQueue};
use futures::stream::{Stream, StreamExt};
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;

use crate::config::SyncConfig;
use crate::reachability::ReachabilitySignal;
use crate::remote::RemoteApi;

const EVENT_CAPACITY: usize = 256;

/// Everything the sync core shares. Cheap to clone; clones observe the same
/// state and publish to the same subscribers.
#[derive(Clone)]
pub struct SyncContext {
    store: Option<LocalStore>,
    queue: Option<SyncQueue>,
    remote: Arc<dyn RemoteApi>,
    reachability: Arc<dyn ReachabilitySignal>,
    state: Arc<watch::Sender<ConnectivityState>>,
    events: broadcast::Sender<SyncEvent>,
    config: Arc<SyncConfig>,
}

impl SyncContext {
    /// Build a context around an already opened store, or `None` to run
    /// online-only. The initial connectivity state is sampled from the signal.
    pub fn new(
        store: Option<LocalStore>,
        remote: Arc<dyn RemoteApi>,
        reachability: Arc<dyn ReachabilitySignal>,
        config: SyncConfig,
    ) -> Self {
        let initial = ConnectivityState::from_reachable(reachability.is_reachable());
        let (state, _) = watch::channel(initial);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let queue = store.clone().map(SyncQueue::new);
        Self {
            store,
            queue,
            remote,
            reachability,
            state: Arc::new(state),
            events,
            config: Arc::new(config),
        }
    }

    /// Open the store at the configured location. A store that cannot be
    /// opened is logged and the context degrades to online-only operation.
    pub async fn open(
        config: SyncConfig,
        remote: Arc<dyn RemoteApi>,
        reachability: Arc<dyn ReachabilitySignal>,
    ) -> Self {
        let path = config.database_path();
        let store = match LocalStore::open(&path).await {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::error!(
                    "local store unavailable at {}, running online-only: {}",
                    path.display(),
                    e
                );
                None
            }
        };
        Self::new(store, remote, reachability, config)
    }

    pub fn store(&self) -> Option<&LocalStore> {
        self.store.as_ref()
    }

    pub fn queue(&self) -> Option<&SyncQueue> {
        self.queue.as_ref()
    }

    pub fn remote(&self) -> &dyn RemoteApi {
        self.remote.as_ref()
    }

    pub fn reachability(&self) -> &dyn ReachabilitySignal {
        self.reachability.as_ref()
    }

    pub(crate) fn reachability_handle(&self) -> Arc<dyn ReachabilitySignal> {
        Arc::clone(&self.reachability)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Current connectivity state.
    pub fn connectivity(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    /// Receiver that observes every connectivity change.
    pub fn watch_connectivity(&self) -> watch::Receiver<ConnectivityState> {
        self.state.subscribe()
    }

    /// Subscribe to sync events. Each subscriber receives every event
    /// published after it subscribed, in order; drop the stream to
    /// unsubscribe. A subscriber that falls too far behind skips the events
    /// it missed.
    pub fn subscribe(&self) -> impl Stream<Item = SyncEvent> + Send + 'static {
        BroadcastStream::new(self.events.subscribe()).filter_map(|result| async move {
            match result {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::warn!("event subscriber lagged: {}", e);
                    None
                }
            }
        })
    }

    /// Raw broadcast receiver, for callers that select over several channels.
    pub fn subscribe_raw(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Publish an event. Having no subscribers is fine.
    pub(crate) fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    /// Change the connectivity state and announce it. Only the monitor
    /// writes the state. Returns false if the state was already `next`.
    pub(crate) fn set_connectivity(&self, next: ConnectivityState) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            tracing::info!("connectivity is now {}", next);
            self.emit(SyncEvent::StateChanged { state: next });
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reachability::ManualReachability;
    use crate::testing::FakeRemote;

    fn context(reachable: bool, store: Option<LocalStore>) -> SyncContext {
        SyncContext::new(
            store,
            Arc::new(FakeRemote::new()),
            Arc::new(ManualReachability::new(reachable)),
            SyncConfig::default(),
        )
    }

    #[tokio::test]
    async fn initial_state_follows_the_signal() {
        assert_eq!(context(true, None).connectivity(), ConnectivityState::Online);
        assert_eq!(context(false, None).connectivity(), ConnectivityState::Offline);
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_state_change_in_order() {
        let ctx = context(true, None);
        let first = ctx.subscribe();
        let second = ctx.subscribe();

        assert!(ctx.set_connectivity(ConnectivityState::Offline));
        assert!(!ctx.set_connectivity(ConnectivityState::Offline));
        assert!(ctx.set_connectivity(ConnectivityState::Syncing));
        assert!(ctx.set_connectivity(ConnectivityState::Online));

        let expected = vec![
            SyncEvent::StateChanged {
                state: ConnectivityState::Offline,
            },
            SyncEvent::StateChanged {
                state: ConnectivityState::Syncing,
            },
            SyncEvent::StateChanged {
                state: ConnectivityState::Online,
            },
        ];
        let seen_first: Vec<_> = first.take(3).collect().await;
        let seen_second: Vec<_> = second.take(3).collect().await;
        assert_eq!(seen_first, expected);
        assert_eq!(seen_second, expected);
    }

    #[tokio::test]
    async fn unopenable_store_degrades_to_online_only() {
        let dir = tempfile::TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let config = SyncConfig {
            home: blocker.join("nested"),
            ..SyncConfig::default()
        };
        let ctx = SyncContext::open(
            config,
            Arc::new(FakeRemote::new()),
            Arc::new(ManualReachability::new(true)),
        )
        .await;
        assert!(ctx.store().is_none());
        assert!(ctx.queue().is_none());
    }

    #[tokio::test]
    async fn open_creates_store_under_home() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = SyncConfig {
            home: dir.path().join("fitsync"),
            ..SyncConfig::default()
        };
        let ctx = SyncContext::open(
            config,
            Arc::new(FakeRemote::new()),
            Arc::new(ManualReachability::new(false)),
        )
        .await;
        assert!(ctx.store().is_some());
        assert!(dir.path().join("fitsync").join("fitsync.db").exists());
    }
}
