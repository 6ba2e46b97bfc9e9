//! Delivery command handlers

use anyhow::{bail, Context, Result};

use parcel_core::{App, DeliveryStore};

use crate::output::{short_id, Output};

/// Start tracking a parcel
pub fn track(app: &App, tracking_number: String, output: &Output) -> Result<()> {
    let delivery = app
        .tracker()
        .create(&tracking_number)
        .context("Failed to create delivery")?;

    output.success(&format!(
        "Tracking {} ({})",
        delivery.tracking_number,
        short_id(&delivery.id)
    ));
    let history = app.deliveries().history(&delivery.id)?;
    output.print_delivery(&delivery, &history);
    Ok(())
}

/// List all deliveries
pub fn list(app: &App, output: &Output) -> Result<()> {
    let deliveries = app.deliveries().list()?;
    output.print_deliveries(&deliveries);
    Ok(())
}

/// Show a single delivery with its history
pub fn show(app: &App, id: String, output: &Output) -> Result<()> {
    let id = resolve_delivery_id(app.deliveries(), &id)?;
    let delivery = app.deliveries().require(&id)?;
    let history = app.deliveries().history(&id)?;
    output.print_delivery(&delivery, &history);
    Ok(())
}

/// Move a delivery one step along its pipeline
pub async fn advance(app: &App, id: String, output: &Output) -> Result<()> {
    let id = resolve_delivery_id(app.deliveries(), &id)?;

    match app.tracker().advance(&id).await? {
        Some(delivery) => {
            output.success(&format!(
                "{}: {}",
                delivery.tracking_number,
                delivery.status.message()
            ));
            let history = app.deliveries().history(&id)?;
            output.print_delivery(&delivery, &history);
        }
        None => output.message("Delivery is already complete."),
    }
    Ok(())
}

/// Cancel a delivery
pub async fn cancel(app: &App, id: String, output: &Output) -> Result<()> {
    let id = resolve_delivery_id(app.deliveries(), &id)?;
    let delivery = app.tracker().cancel(&id).await?;
    output.success(&format!("Cancelled {}", delivery.tracking_number));
    Ok(())
}

/// Set the delivery address
pub async fn address(app: &App, id: String, address: String, output: &Output) -> Result<()> {
    let id = resolve_delivery_id(app.deliveries(), &id)?;
    let delivery = app.tracker().set_address(&id, &address).await?;
    output.success(&format!(
        "Address for {} set to {}",
        delivery.tracking_number,
        delivery.address.as_deref().unwrap_or_default()
    ));
    Ok(())
}

/// Rate a delivery
pub fn review(
    app: &App,
    id: String,
    rating: u8,
    text: Option<String>,
    output: &Output,
) -> Result<()> {
    let id = resolve_delivery_id(app.deliveries(), &id)?;
    let delivery = app.deliveries().require(&id)?;
    if !delivery.status.is_terminal() {
        bail!("Only completed deliveries can be reviewed");
    }

    app.deliveries()
        .set_review(&id, rating, text.as_deref())
        .context("Failed to save review")?;
    output.success(&format!("Rated {} {}/5", delivery.tracking_number, rating));
    Ok(())
}

/// Resolve a delivery ID (supports full ID or unique prefix)
fn resolve_delivery_id(store: &DeliveryStore, id: &str) -> Result<String> {
    let id = id.trim();
    if id.is_empty() {
        bail!("Delivery ID cannot be empty");
    }

    if let Some(delivery) = store.get(id)? {
        return Ok(delivery.id);
    }

    let matches = store.find_by_prefix(id)?;
    match matches.len() {
        0 => bail!("No delivery found matching: {}", id),
        1 => Ok(matches[0].id.clone()),
        _ => {
            eprintln!("Multiple deliveries match '{}':", id);
            for delivery in &matches {
                eprintln!("  {} - {}", delivery.id, delivery.tracking_number);
            }
            bail!("Ambiguous ID. Please provide more characters.");
        }
    }
}
