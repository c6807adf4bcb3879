// ABOUTME: Connectivity monitor actor: the single writer of the online/offline/syncing state.
// ABOUTME: Drains the sync queue on reconnect and serves manual sync requests through MonitorHandle.

use fitsync_core::{ConnectivityState, DrainReport, SyncEvent};
use futures::stream::Stream;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::context::SyncContext;
use crate::drainer::{DrainError, QueueDrainer};

/// Errors returned through the monitor handle.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("cannot sync while offline")]
    Offline,

    #[error("monitor channel closed")]
    ChannelClosed,

    #[error("drain failed: {0}")]
    Drain(#[from] DrainError),
}

enum MonitorCommand {
    TriggerSync(oneshot::Sender<Result<DrainReport, MonitorError>>),
    Shutdown,
}

/// Handle to a running connectivity monitor.
pub struct MonitorHandle {
    cmd_tx: mpsc::Sender<MonitorCommand>,
    ctx: SyncContext,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Drain the queue now. Rejected while offline.
    pub async fn trigger_sync(&self) -> Result<DrainReport, MonitorError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(MonitorCommand::TriggerSync(tx))
            .await
            .map_err(|_| MonitorError::ChannelClosed)?;
        rx.await.map_err(|_| MonitorError::ChannelClosed)?
    }

    pub fn state(&self) -> ConnectivityState {
        self.ctx.connectivity()
    }

    pub fn watch(&self) -> watch::Receiver<ConnectivityState> {
        self.ctx.watch_connectivity()
    }

    pub fn subscribe(&self) -> impl Stream<Item = SyncEvent> + Send + 'static {
        self.ctx.subscribe()
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    /// Stop the monitor and wait for its task to finish. A drain in
    /// progress runs to completion first.
    pub async fn shutdown(self) {
        let _ = self.cmd_tx.send(MonitorCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            tracing::error!("connectivity monitor task failed: {}", e);
        }
    }
}

/// Start the monitor for `ctx`. The state is sampled from the reachability
/// signal immediately; if the network is up and work is queued, a drain
/// runs right away.
pub fn spawn(ctx: SyncContext) -> MonitorHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel::<MonitorCommand>(16);
    let reachability = ctx.reachability_handle().watch();

    let monitor = ConnectivityMonitor {
        drainer: QueueDrainer::new(ctx.clone()),
        ctx: ctx.clone(),
        cmd_rx,
        reachability,
    };
    let task = tokio::spawn(monitor.run());

    MonitorHandle { cmd_tx, ctx, task }
}

struct ConnectivityMonitor {
    ctx: SyncContext,
    drainer: QueueDrainer,
    cmd_rx: mpsc::Receiver<MonitorCommand>,
    reachability: watch::Receiver<bool>,
}

impl ConnectivityMonitor {
    async fn run(mut self) {
        let reachable = *self.reachability.borrow_and_update();
        if !reachable {
            self.ctx.set_connectivity(ConnectivityState::Offline);
        } else if self.has_outstanding().await {
            if let Err(e) = self.sync_now().await {
                tracing::error!("startup sync failed: {}", e);
            }
        } else {
            self.ctx.set_connectivity(ConnectivityState::Online);
        }

        let mut watching = true;
        loop {
            tokio::select! {
                changed = self.reachability.changed(), if watching => {
                    match changed {
                        Ok(()) => {
                            let reachable = *self.reachability.borrow_and_update();
                            self.on_reachability(reachable).await;
                        }
                        Err(_) => {
                            tracing::warn!("reachability signal closed, state is now fixed");
                            watching = false;
                        }
                    }
                }
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(MonitorCommand::TriggerSync(reply)) => {
                        let result = self.trigger().await;
                        // The caller may have stopped waiting.
                        let _ = reply.send(result);
                    }
                    Some(MonitorCommand::Shutdown) | None => break,
                }
            }
        }
        tracing::debug!("connectivity monitor stopped");
    }

    async fn on_reachability(&mut self, reachable: bool) {
        if !reachable {
            self.ctx.set_connectivity(ConnectivityState::Offline);
            return;
        }
        if self.ctx.connectivity() == ConnectivityState::Offline
            && let Err(e) = self.sync_now().await
        {
            tracing::error!("sync after reconnect failed: {}", e);
        }
    }

    async fn trigger(&mut self) -> Result<DrainReport, MonitorError> {
        if self.ctx.connectivity() == ConnectivityState::Offline {
            return Err(MonitorError::Offline);
        }
        self.sync_now().await
    }

    /// Drain under the `syncing` state, then settle on `online`, or on
    /// `offline` if the network went away during the pass.
    async fn sync_now(&mut self) -> Result<DrainReport, MonitorError> {
        self.ctx.set_connectivity(ConnectivityState::Syncing);
        let result = self.drainer.drain().await;

        let lost = matches!(&result, Ok(report) if report.connectivity_lost);
        let next = if lost || !self.ctx.reachability().is_reachable() {
            ConnectivityState::Offline
        } else {
            ConnectivityState::Online
        };
        self.ctx.set_connectivity(next);
        Ok(result?)
    }

    async fn has_outstanding(&self) -> bool {
        let Some(queue) = self.ctx.queue() else {
            return false;
        };
        match queue.counts().await {
            Ok(counts) => counts.outstanding() > 0,
            Err(e) => {
                tracing::warn!("cannot read queue counts: {}", e);
                false
            }
        }
    }
}
