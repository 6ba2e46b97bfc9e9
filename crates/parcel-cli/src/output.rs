//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use parcel_core::{Delivery, DeliveryHistoryItem, DrainOutcome, SyncRecord};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Print a single delivery with its history
    pub fn print_delivery(&self, delivery: &Delivery, history: &[DeliveryHistoryItem]) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:          {}", delivery.id);
                println!("Tracking:    {}", delivery.tracking_number);
                println!("Status:      {}", delivery.status.message());
                if let Some(ref location) = delivery.current_location {
                    println!("Location:    {}", location);
                }
                if let Some(ref address) = delivery.address {
                    println!("Address:     {}", address);
                }
                if let Some(eta) = delivery.estimated_delivery {
                    println!("Estimated:   {}", eta.format("%Y-%m-%d %H:%M"));
                }
                if let Some(rating) = delivery.rating {
                    let stars = "*".repeat(rating as usize);
                    match delivery.review {
                        Some(ref review) => println!("Rating:      {} {}", stars, review),
                        None => println!("Rating:      {}", stars),
                    }
                }
                println!("Created:     {}", delivery.created_at.format("%Y-%m-%d %H:%M"));
                println!("Updated:     {}", delivery.updated_at.format("%Y-%m-%d %H:%M"));

                if !history.is_empty() {
                    println!();
                    println!("── History ({}) ──", history.len());
                    for item in history {
                        match item.location {
                            Some(ref location) => println!(
                                "[{}] {} - {}",
                                item.timestamp.format("%H:%M:%S"),
                                item.message,
                                location
                            ),
                            None => println!(
                                "[{}] {}",
                                item.timestamp.format("%H:%M:%S"),
                                item.message
                            ),
                        }
                    }
                }
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({ "delivery": delivery, "history": history })
                );
            }
            OutputFormat::Quiet => {
                println!("{}", delivery.id);
            }
        }
    }

    /// Print a list of deliveries
    pub fn print_deliveries(&self, deliveries: &[Delivery]) {
        match self.format {
            OutputFormat::Human => {
                if deliveries.is_empty() {
                    println!("No deliveries found.");
                    return;
                }
                for delivery in deliveries {
                    println!(
                        "{} | {} | {} | {}",
                        short_id(&delivery.id),
                        truncate(&delivery.tracking_number, 20),
                        delivery.status,
                        truncate(delivery.current_location.as_deref().unwrap_or("-"), 30)
                    );
                }
                println!("\n{} deliver{}", deliveries.len(), plural(deliveries.len(), "y", "ies"));
            }
            OutputFormat::Json => {
                println!("{}", serde_json::json!(deliveries));
            }
            OutputFormat::Quiet => {
                for delivery in deliveries {
                    println!("{}", delivery.id);
                }
            }
        }
    }

    /// Print pending sync records
    pub fn print_records(&self, records: &[SyncRecord]) {
        match self.format {
            OutputFormat::Human => {
                if records.is_empty() {
                    println!("Sync queue is empty.");
                    return;
                }
                for record in records {
                    let address = if record.is_placeholder() {
                        "(awaiting address)".to_string()
                    } else {
                        truncate(&record.address, 35)
                    };
                    let error = record
                        .last_error
                        .as_deref()
                        .map(|e| format!(" | {}", truncate(e, 40)))
                        .unwrap_or_default();
                    println!(
                        "#{} | {} | retries: {} | {}{}",
                        record.id,
                        record.created_at.format("%Y-%m-%d %H:%M"),
                        record.retry_count,
                        address,
                        error
                    );
                }
                println!("\n{} pending record(s)", records.len());
            }
            OutputFormat::Json => {
                println!("{}", serde_json::json!(records));
            }
            OutputFormat::Quiet => {
                for record in records {
                    println!("{}", record.id);
                }
            }
        }
    }

    /// Print the result of a drain
    pub fn print_drain(&self, outcome: &DrainOutcome) {
        match self.format {
            OutputFormat::Human => match outcome {
                DrainOutcome::Completed(report) => {
                    println!(
                        "✓ Sync complete - succeeded: {}, failed: {}",
                        report.succeeded, report.failed
                    );
                    if report.gave_up > 0 {
                        println!("  Gave up on {} record(s) after repeated failures", report.gave_up);
                    }
                    if !report.dropped_placeholders.is_empty() {
                        println!(
                            "  Dropped {} record(s) with no address",
                            report.dropped_placeholders.len()
                        );
                    }
                    if report.held_placeholders > 0 {
                        println!(
                            "  {} record(s) still waiting for an address",
                            report.held_placeholders
                        );
                    }
                    if report.aborted {
                        println!("  Stopped early: connection lost");
                    }
                }
                DrainOutcome::Offline => {
                    println!("Offline - queued addresses will sync when the connection returns")
                }
                DrainOutcome::Busy => println!("Sync already in progress"),
                DrainOutcome::Failed(error) => println!("Sync failed: {}", error),
            },
            OutputFormat::Json => {
                let value = match outcome {
                    DrainOutcome::Completed(report) => {
                        serde_json::json!({ "status": "completed", "report": report })
                    }
                    DrainOutcome::Offline => serde_json::json!({ "status": "offline" }),
                    DrainOutcome::Busy => serde_json::json!({ "status": "busy" }),
                    DrainOutcome::Failed(error) => {
                        serde_json::json!({ "status": "failed", "error": error })
                    }
                };
                println!("{}", value);
            }
            OutputFormat::Quiet => {
                if let DrainOutcome::Completed(report) = outcome {
                    println!("{} {}", report.succeeded, report.failed);
                }
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// First eight characters of an id
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn plural(count: usize, one: &'static str, many: &'static str) -> &'static str {
    if count == 1 {
        one
    } else {
        many
    }
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
