//! Watch command handler
//!
//! Keeps the process alive: polls connectivity, drains the queue after
//! reconnection and simulates progress for every active delivery.

use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinSet;
use tracing::warn;

use parcel_core::sync::{spawn_sync_task, SyncTaskEvent, SyncTaskHandle};
use parcel_core::App;

use crate::output::Output;

/// Run until Ctrl-C
pub async fn watch(app: &App, stage_duration: Duration, output: &Output) -> Result<()> {
    let poller = app.monitor().spawn_poller(app.config().sync.poll_interval());
    let mut sync_task = if app.sync_enabled() {
        let outcome = app.coordinator().start().await;
        output.print_drain(&outcome);
        Some(spawn_sync_task(app.coordinator().clone()))
    } else {
        None
    };

    let mut progress = JoinSet::new();
    for delivery in app.deliveries().list()? {
        if delivery.status.is_terminal() {
            continue;
        }
        let tracker = app.tracker().clone();
        progress.spawn(async move {
            let result = tracker.run_auto_progress(&delivery.id, stage_duration).await;
            (delivery.tracking_number, result)
        });
    }

    output.message(&format!(
        "Watching {} active deliveries ({}). Press Ctrl-C to stop.",
        progress.len(),
        if app.monitor().is_connected() {
            "online"
        } else {
            "offline"
        }
    ));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(event) = next_event(&mut sync_task) => match event {
                SyncTaskEvent::ConnectivityChanged(online) => {
                    output.message(if online { "● Online" } else { "○ Offline" });
                }
                SyncTaskEvent::DrainFinished(outcome) => output.print_drain(&outcome),
            },
            Some(joined) = progress.join_next() => match joined {
                Ok((tracking_number, Ok(()))) => {
                    output.message(&format!("{} finished", tracking_number));
                }
                Ok((tracking_number, Err(e))) => {
                    warn!(tracking_number = %tracking_number, error = %e, "Auto-progress failed");
                }
                Err(e) => warn!(error = %e, "Auto-progress task panicked"),
            },
        }
    }

    progress.abort_all();
    poller.abort();
    if let Some(handle) = sync_task {
        handle.shutdown().await;
    }

    let stats = app.coordinator().queue_stats()?;
    if stats.pending > 0 {
        output.message(&format!(
            "{} address(es) still queued, they will be sent next time you are online",
            stats.pending
        ));
    }
    Ok(())
}

async fn next_event(handle: &mut Option<SyncTaskHandle>) -> Option<SyncTaskEvent> {
    match handle {
        Some(handle) => handle.event_rx.recv().await,
        None => std::future::pending().await,
    }
}
