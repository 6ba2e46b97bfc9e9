//! Sync coordinator
//!
//! Decides between sending a delivered address now and queueing it, and
//! drains the queue when connectivity allows. At most one drain runs at a
//! time per coordinator; overlapping triggers are skipped, not queued.
//!
//! ## Drain pass
//!
//! Pending records are processed oldest first, one at a time:
//! 1. Re-check connectivity; stop the pass if offline
//! 2. Reconcile the queued address against the delivery record
//! 3. Apply the placeholder policy to records without an address
//! 4. Send; on success mark synced, on failure count the retry and give
//!    the record up once it reaches the retry ceiling
//!
//! A timeout or transport failure ends the pass early, since the remaining
//! records would fail the same way.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::connectivity::{ConnectivityMonitor, Subscription};
use super::sender::RemoteSender;
use super::{DeliveryLookup, PlaceholderPolicy, SyncPolicy};
use crate::models::{QueueStats, SyncRecord};
use crate::storage::{StorageResult, SyncQueue};

/// Result of handing a delivered address to the coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Accepted by the remote API right away
    Sent,
    /// Persisted for a later drain
    Queued(SyncRecord),
}

/// Counters for one drain pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Records for which a send was attempted
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Records marked synced after reaching the retry ceiling
    pub gave_up: usize,
    /// Placeholder records marked synced without a send
    pub dropped_placeholders: Vec<i64>,
    /// Placeholder records left pending for a back-fill
    pub held_placeholders: usize,
    /// The pass stopped before reaching the end of the queue
    pub aborted: bool,
}

/// What a drain request did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Another drain was already running
    Busy,
    /// The device was offline; nothing was attempted
    Offline,
    /// The queue could not be read
    Failed(String),
    Completed(DrainReport),
}

impl DrainOutcome {
    pub fn report(&self) -> Option<&DrainReport> {
        match self {
            DrainOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}

enum Step {
    Continue,
    Abort,
}

/// Clears the drain flag however the pass ends
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Orchestrates immediate sends, queueing and drains
pub struct SyncCoordinator {
    queue: SyncQueue,
    monitor: Arc<ConnectivityMonitor>,
    sender: Arc<dyn RemoteSender>,
    deliveries: Arc<dyn DeliveryLookup>,
    policy: SyncPolicy,
    draining: AtomicBool,
}

impl SyncCoordinator {
    pub fn new(
        queue: SyncQueue,
        monitor: Arc<ConnectivityMonitor>,
        sender: Arc<dyn RemoteSender>,
        deliveries: Arc<dyn DeliveryLookup>,
        policy: SyncPolicy,
    ) -> Self {
        Self {
            queue,
            monitor,
            sender,
            deliveries,
            policy,
            draining: AtomicBool::new(false),
        }
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    /// Startup housekeeping, then a drain if we are online
    pub async fn start(&self) -> DrainOutcome {
        match self.queue.purge_old_synced(self.policy.retention) {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Purged old synced records"),
            Err(e) => warn!(error = %e, "Failed to purge old synced records"),
        }

        if self.monitor.is_connected() {
            self.drain().await
        } else {
            debug!("Starting offline, queue will drain on reconnection");
            DrainOutcome::Offline
        }
    }

    /// Hand off a delivery that just reached `Delivered`
    ///
    /// Sends immediately when online and an address is known; otherwise the
    /// obligation is persisted. A delivery never gets a second pending
    /// record: an existing one is updated instead.
    pub async fn on_delivered(
        &self,
        delivery_id: &str,
        address: Option<&str>,
    ) -> StorageResult<Dispatch> {
        let address = address.map(str::trim).filter(|a| !a.is_empty());

        match address {
            Some(address) if self.monitor.is_connected() => {
                match self.sender.send(address).await {
                    Ok(_) => {
                        info!(delivery_id, "Delivered address sent immediately");
                        return Ok(Dispatch::Sent);
                    }
                    Err(e) => {
                        warn!(delivery_id, error = %e, "Immediate send failed, queueing address")
                    }
                }
            }
            Some(_) => info!(delivery_id, "Offline, queueing delivered address"),
            None => warn!(
                delivery_id,
                "Delivered without a known address, queueing placeholder"
            ),
        }

        let record = self.enqueue_for_delivery(delivery_id, address.unwrap_or(""))?;
        Ok(Dispatch::Queued(record))
    }

    /// Apply a later-known address for a delivered parcel
    ///
    /// A pending record for the delivery is updated in place. Without one,
    /// the address is treated as a fresh delivered hand-off. Blank input is
    /// ignored and yields `None`.
    pub async fn backfill_address(
        &self,
        delivery_id: &str,
        address: &str,
    ) -> StorageResult<Option<Dispatch>> {
        let address = address.trim();
        if address.is_empty() {
            return Ok(None);
        }

        if let Some(mut record) = self.queue.find_pending_for_delivery(delivery_id)? {
            if record.address.trim() != address {
                self.queue.update_address(record.id, address)?;
                info!(id = record.id, delivery_id, "Back-filled queued address");
                record.address = address.to_string();
            }
            return Ok(Some(Dispatch::Queued(record)));
        }

        self.on_delivered(delivery_id, Some(address)).await.map(Some)
    }

    /// Queue an address directly, bypassing the immediate send
    pub fn add_to_queue(&self, address: &str, delivery_id: Option<&str>) -> StorageResult<SyncRecord> {
        self.queue.append(address, delivery_id)
    }

    pub fn is_connected(&self) -> bool {
        self.monitor.is_connected()
    }

    /// Register for connectivity transitions
    pub fn subscribe(&self, callback: impl Fn(bool) + Send + Sync + 'static) -> Subscription {
        self.monitor.subscribe(callback)
    }

    pub fn queue_stats(&self) -> StorageResult<QueueStats> {
        self.queue.stats()
    }

    /// Manual sync: re-query connectivity, then drain if online
    pub async fn force_check_and_sync(&self) -> DrainOutcome {
        if !self.monitor.force_check().await {
            info!("Cannot sync while offline");
            return DrainOutcome::Offline;
        }
        self.drain().await
    }

    /// Run one drain pass over the pending queue
    pub async fn drain(&self) -> DrainOutcome {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Sync already in progress, skipping");
            return DrainOutcome::Busy;
        }
        let _guard = DrainGuard(&self.draining);

        if !self.monitor.is_connected() {
            debug!("Offline, skipping sync");
            return DrainOutcome::Offline;
        }

        let pending = match self.queue.list_pending() {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "Failed to read sync queue");
                return DrainOutcome::Failed(e.to_string());
            }
        };

        let mut report = DrainReport::default();
        if pending.is_empty() {
            debug!("No pending sync records");
            return DrainOutcome::Completed(report);
        }

        info!(count = pending.len(), "Syncing pending records");
        for record in pending {
            if !self.monitor.force_check().await {
                info!("Connectivity lost during sync, stopping");
                report.aborted = true;
                break;
            }
            if let Step::Abort = self.process(record, &mut report).await {
                report.aborted = true;
                break;
            }
        }

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            gave_up = report.gave_up,
            dropped = report.dropped_placeholders.len(),
            aborted = report.aborted,
            "Sync pass complete"
        );
        DrainOutcome::Completed(report)
    }

    async fn process(&self, mut record: SyncRecord, report: &mut DrainReport) -> Step {
        let address = self.reconcile_address(&mut record);
        if address.is_empty() {
            self.handle_placeholder(&record, report);
            return Step::Continue;
        }

        report.attempted += 1;
        match self.sender.send(&address).await {
            Ok(_) => {
                if let Err(e) = self.queue.mark_synced(record.id) {
                    warn!(id = record.id, error = %e, "Sent but failed to mark record synced");
                }
                debug!(id = record.id, "Synced record");
                report.succeeded += 1;
                Step::Continue
            }
            Err(e) => {
                report.failed += 1;
                warn!(id = record.id, error = %e, "Failed to sync record");

                match self.queue.record_failure(record.id, &e.to_string()) {
                    Ok(count) if count >= self.policy.max_retries => {
                        warn!(
                            id = record.id,
                            retries = count,
                            "Record exceeded max retries, giving up"
                        );
                        if let Err(e) = self.queue.mark_synced(record.id) {
                            warn!(id = record.id, error = %e, "Failed to give up record");
                        } else {
                            report.gave_up += 1;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!(id = record.id, error = %e, "Failed to record sync failure"),
                }

                if e.is_connectivity() {
                    Step::Abort
                } else {
                    Step::Continue
                }
            }
        }
    }

    /// Persist a delivery's obligation, reusing its pending record if any
    fn enqueue_for_delivery(&self, delivery_id: &str, address: &str) -> StorageResult<SyncRecord> {
        let Some(mut record) = self.queue.find_pending_for_delivery(delivery_id)? else {
            return self.queue.append(address, Some(delivery_id));
        };

        if !address.is_empty() && record.address.trim() != address {
            self.queue.update_address(record.id, address)?;
            debug!(id = record.id, delivery_id, "Updated pending record address");
            record.address = address.to_string();
        }
        Ok(record)
    }

    /// The address to send: the delivery's current one when it differs
    /// from what was queued, persisted back onto the record
    fn reconcile_address(&self, record: &mut SyncRecord) -> String {
        let queued = record.address.trim().to_string();
        let Some(delivery_id) = record.delivery_id.clone() else {
            return queued;
        };

        let current = match self.deliveries.lookup_address(&delivery_id) {
            Ok(Some(current)) => current,
            Ok(None) => return queued,
            Err(e) => {
                warn!(id = record.id, error = %e, "Failed to look up delivery, using queued address");
                return queued;
            }
        };
        let Some(authoritative) = current.resolved() else {
            return queued;
        };

        if authoritative != queued {
            info!(
                id = record.id,
                from = %queued,
                to = %authoritative,
                "Updating queued address from delivery"
            );
            if let Err(e) = self.queue.update_address(record.id, authoritative) {
                warn!(id = record.id, error = %e, "Failed to persist corrected address");
            }
            record.address = authoritative.to_string();
        }
        authoritative.to_string()
    }

    fn handle_placeholder(&self, record: &SyncRecord, report: &mut DrainReport) {
        if let PlaceholderPolicy::HoldFor(max_age) = self.policy.placeholders {
            let age = (Utc::now() - record.created_at).to_std().unwrap_or_default();
            if age < max_age {
                debug!(id = record.id, "Placeholder waiting for an address");
                report.held_placeholders += 1;
                return;
            }
        }

        warn!(
            id = record.id,
            delivery_id = record.delivery_id.as_deref().unwrap_or(""),
            "Empty address in sync record, dropping without sending"
        );
        match self.queue.mark_synced(record.id) {
            Ok(()) => report.dropped_placeholders.push(record.id),
            Err(e) => warn!(id = record.id, error = %e, "Failed to drop placeholder"),
        }
    }
}
