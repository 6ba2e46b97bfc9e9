//! Background sync task
//!
//! Listens for connectivity transitions and drains the queue after each
//! online transition, once the settle delay has passed. Also accepts
//! explicit drain requests from the UI.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::connectivity::Subscription;
use super::coordinator::{DrainOutcome, SyncCoordinator};

/// Commands sent to the sync task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    /// Re-check connectivity and drain now
    Drain,
    /// Stop the task
    Shutdown,
}

/// Events emitted by the sync task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTaskEvent {
    /// The device went online (`true`) or offline (`false`)
    ConnectivityChanged(bool),
    /// A drain triggered by the task finished
    DrainFinished(DrainOutcome),
}

/// Handle to control the background sync task
pub struct SyncTaskHandle {
    /// Send commands to the sync task
    pub command_tx: mpsc::Sender<SyncCommand>,
    /// Receive events from the sync task
    pub event_rx: mpsc::Receiver<SyncTaskEvent>,
    join: JoinHandle<()>,
    subscription: Subscription,
}

impl SyncTaskHandle {
    /// Ask for an immediate drain; `false` if the task has stopped
    pub async fn request_drain(&self) -> bool {
        self.command_tx.send(SyncCommand::Drain).await.is_ok()
    }

    /// Stop the task and wait for it to finish
    pub async fn shutdown(self) {
        self.subscription.unsubscribe();
        let _ = self.command_tx.send(SyncCommand::Shutdown).await;
        let _ = self.join.await;
    }
}

/// Spawn the background sync task
///
/// Drains run on this task only, so they never block the caller.
pub fn spawn_sync_task(coordinator: Arc<SyncCoordinator>) -> SyncTaskHandle {
    let (command_tx, command_rx) = mpsc::channel(16);
    let (event_tx, event_rx) = mpsc::channel(64);
    let (transition_tx, transition_rx) = mpsc::unbounded_channel();

    let subscription = coordinator.subscribe(move |online| {
        let _ = transition_tx.send(online);
    });

    let join = tokio::spawn(sync_task_loop(
        coordinator,
        command_rx,
        transition_rx,
        event_tx,
    ));

    SyncTaskHandle {
        command_tx,
        event_rx,
        join,
        subscription,
    }
}

/// Events are advisory; a full or closed channel drops them
fn emit(event_tx: &mpsc::Sender<SyncTaskEvent>, event: SyncTaskEvent) {
    if let Err(e) = event_tx.try_send(event) {
        debug!(error = %e, "Dropped sync task event");
    }
}

async fn sync_task_loop(
    coordinator: Arc<SyncCoordinator>,
    mut command_rx: mpsc::Receiver<SyncCommand>,
    mut transition_rx: mpsc::UnboundedReceiver<bool>,
    event_tx: mpsc::Sender<SyncTaskEvent>,
) {
    let settle_delay = coordinator.policy().settle_delay;

    loop {
        tokio::select! {
            cmd = command_rx.recv() => match cmd {
                Some(SyncCommand::Drain) => {
                    let outcome = coordinator.force_check_and_sync().await;
                    emit(&event_tx, SyncTaskEvent::DrainFinished(outcome));
                }
                Some(SyncCommand::Shutdown) | None => break,
            },
            transition = transition_rx.recv() => {
                let Some(online) = transition else {
                    break;
                };
                emit(&event_tx, SyncTaskEvent::ConnectivityChanged(online));
                if !online {
                    continue;
                }

                info!(delay = ?settle_delay, "Network restored, syncing after settle delay");
                // A flap back offline during the delay makes the drain a no-op
                tokio::select! {
                    _ = tokio::time::sleep(settle_delay) => {
                        let outcome = coordinator.drain().await;
                        emit(&event_tx, SyncTaskEvent::DrainFinished(outcome));
                    }
                    cmd = command_rx.recv() => match cmd {
                        Some(SyncCommand::Drain) => {
                            let outcome = coordinator.force_check_and_sync().await;
                            emit(&event_tx, SyncTaskEvent::DrainFinished(outcome));
                        }
                        Some(SyncCommand::Shutdown) | None => break,
                    },
                }
            }
        }
    }

    debug!("Sync task stopped");
}
