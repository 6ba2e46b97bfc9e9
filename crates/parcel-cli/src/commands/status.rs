//! Status command handler

use anyhow::Result;

use parcel_core::App;

use crate::output::{Output, OutputFormat};

/// Show connectivity and sync queue status
pub async fn show(app: &App, output: &Output) -> Result<()> {
    let config = app.config();
    let online = app.monitor().force_check().await;
    let stats = app.coordinator().queue_stats()?;
    let deliveries = app.deliveries().list()?;
    let active = deliveries.iter().filter(|d| !d.status.is_terminal()).count();

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "online": online,
                    "api_url": config.api_url,
                    "sync_enabled": config.sync.enabled,
                    "queue": stats,
                    "deliveries": {
                        "total": deliveries.len(),
                        "active": active
                    },
                    "database": config.sqlite_path()
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", if online { "online" } else { "offline" });
        }
        OutputFormat::Human => {
            println!("Parcel Status");
            println!("=============");
            println!();
            println!("Network:");
            println!("  State:   {}", if online { "online" } else { "offline" });
            println!("  API:     {}", config.api_url);
            println!();
            println!("Sync:");
            println!(
                "  Status:  {}",
                if config.sync.enabled {
                    "enabled"
                } else {
                    "disabled"
                }
            );
            println!("  Pending: {}", stats.pending);
            println!("  Synced:  {}", stats.synced);
            println!();
            println!("Deliveries:");
            println!("  Total:   {}", deliveries.len());
            println!("  Active:  {}", active);
            println!();
            println!("Database: {}", config.sqlite_path().display());
        }
    }

    Ok(())
}
