//! Sync command handlers

use anyhow::{bail, Result};

use parcel_core::{App, DrainOutcome};

use crate::output::Output;

/// Re-check connectivity and drain the sync queue now
pub async fn sync(app: &App, output: &Output) -> Result<()> {
    if !app.sync_enabled() {
        bail!(
            "Sync is not enabled. Enable it with:\n  \
             parcel config set sync.enabled true"
        );
    }

    output.message(&format!(
        "Syncing with {}...",
        app.config().delivery_endpoint()
    ));
    let outcome = app.coordinator().force_check_and_sync().await;
    output.print_drain(&outcome);

    if let DrainOutcome::Failed(error) = outcome {
        bail!("Sync failed: {}", error);
    }
    Ok(())
}

/// List records still waiting to be sent
pub fn queue(app: &App, output: &Output) -> Result<()> {
    let records = app.coordinator().queue().list_pending()?;
    output.print_records(&records);
    Ok(())
}

/// Startup housekeeping and drain, silent unless something was sent
pub async fn auto_sync(app: &App, output: &Output) {
    if !app.sync_enabled() {
        return;
    }

    match app.coordinator().start().await {
        DrainOutcome::Completed(report) if report.succeeded > 0 => {
            if !output.is_quiet() {
                eprintln!("✓ Sent {} queued address(es)", report.succeeded);
            }
        }
        DrainOutcome::Failed(error) => {
            if !output.is_quiet() {
                eprintln!("⚠ Auto-sync failed: {}", error);
            }
        }
        _ => {}
    }
}
