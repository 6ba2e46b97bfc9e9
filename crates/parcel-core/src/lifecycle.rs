//! Delivery lifecycle
//!
//! Creates deliveries, moves them along the status pipeline and simulates
//! carrier progress. Reaching `Delivered` hands the delivery's address to
//! the sync coordinator.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::models::{Delivery, DeliveryHistoryItem, DeliveryStatus};
use crate::notify::{Notification, Notifier};
use crate::storage::DeliveryStore;
use crate::sync::SyncCoordinator;

/// Time between simulated stages
pub const STAGE_DURATION: Duration = Duration::from_secs(30);

/// Carrier locations; stage `i` of the progression reports `LOCATIONS[i - 1]`
pub const LOCATIONS: [&str; 4] = [
    "Kyiv, warehouse",
    "Kyiv, sorting center",
    "Kyiv, branch 15",
    "Kyiv, on the way to you",
];

const BRANCH_LOCATION: &str = "Kyiv, branch 15";

fn location_for_stage(index: usize) -> Option<&'static str> {
    index.checked_sub(1).and_then(|i| LOCATIONS.get(i).copied())
}

/// Drives deliveries through their statuses
pub struct DeliveryTracker {
    store: DeliveryStore,
    /// `None` when address sync is disabled
    coordinator: Option<Arc<SyncCoordinator>>,
    notifier: Arc<dyn Notifier>,
}

impl DeliveryTracker {
    pub fn new(
        store: DeliveryStore,
        coordinator: Option<Arc<SyncCoordinator>>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            coordinator,
            notifier,
        }
    }

    pub fn store(&self) -> &DeliveryStore {
        &self.store
    }

    /// Start tracking a parcel
    ///
    /// A tracking number that is already known returns the existing delivery.
    pub fn create(&self, tracking_number: &str) -> Result<Delivery> {
        let tracking_number = tracking_number.trim();
        if tracking_number.is_empty() {
            bail!("Tracking number cannot be empty");
        }

        if let Some(existing) = self.store.get_by_tracking(tracking_number)? {
            debug!(id = %existing.id, tracking_number, "Delivery already tracked");
            return Ok(existing);
        }

        let delivery = Delivery::new(tracking_number);
        self.store.save(&delivery)?;
        self.record_history(&delivery, None)?;
        self.notifier.show(&status_notification(&delivery));

        info!(id = %delivery.id, tracking_number, "Created delivery");
        Ok(delivery)
    }

    /// Move a delivery to a new status
    ///
    /// Terminal deliveries cannot change status.
    pub async fn update_status(
        &self,
        id: &str,
        status: DeliveryStatus,
        location: Option<&str>,
    ) -> Result<Delivery> {
        let mut delivery = self.store.require(id)?;
        if delivery.status.is_terminal() {
            bail!("Delivery {} is already {}", delivery.tracking_number, delivery.status);
        }

        delivery.set_status(status);
        if let Some(location) = location {
            delivery.current_location = Some(location.to_string());
        }
        self.store.save(&delivery)?;
        self.record_history(&delivery, location)?;
        self.notifier.show(&status_notification(&delivery));
        info!(id = %delivery.id, status = %status, "Delivery status updated");

        if status == DeliveryStatus::Delivered {
            self.hand_off(&delivery).await;
        }
        Ok(delivery)
    }

    /// Step to the next status; `None` if the delivery is already terminal
    pub async fn advance(&self, id: &str) -> Result<Option<Delivery>> {
        let delivery = self.store.require(id)?;
        let (Some(next), Some(index)) = (delivery.status.next(), delivery.status.stage_index())
        else {
            return Ok(None);
        };

        let location = LOCATIONS.get(index).copied();
        self.update_status(&delivery.id, next, location).await.map(Some)
    }

    pub async fn cancel(&self, id: &str) -> Result<Delivery> {
        self.update_status(id, DeliveryStatus::Cancelled, None).await
    }

    /// Set the delivery address
    ///
    /// For a delivered parcel the new address also reaches the sync queue.
    pub async fn set_address(&self, id: &str, address: &str) -> Result<Delivery> {
        let address = address.trim();
        if address.is_empty() {
            bail!("Address cannot be empty");
        }

        let mut delivery = self.store.require(id)?;
        delivery.address = Some(address.to_string());
        delivery.updated_at = Utc::now();
        self.store.save(&delivery)?;
        info!(id = %delivery.id, "Delivery address updated");

        if delivery.status == DeliveryStatus::Delivered {
            if let Some(coordinator) = &self.coordinator {
                if let Err(e) = coordinator.backfill_address(&delivery.id, address).await {
                    warn!(id = %delivery.id, error = %e, "Failed to back-fill sync record");
                }
            }
        }
        Ok(delivery)
    }

    /// Simulate carrier progress until the delivery is terminal
    ///
    /// Stage `i` is due at `created_at + i * stage_duration`. Stages already
    /// due are applied right away, so a restart catches up.
    pub async fn run_auto_progress(&self, id: &str, stage_duration: Duration) -> Result<()> {
        let delivery = self.store.require(id)?;
        let Some(current) = delivery.status.stage_index() else {
            return Ok(());
        };
        if delivery.status.is_terminal() {
            return Ok(());
        }

        self.schedule_arrival(&delivery, current, stage_duration);

        for (index, status) in DeliveryStatus::PROGRESSION
            .iter()
            .copied()
            .enumerate()
            .skip(current + 1)
        {
            let due = stage_due(delivery.created_at, index, stage_duration);
            let wait = (due - Utc::now()).to_std().unwrap_or_default();
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }

            // Someone else may have moved it meanwhile
            let Some(latest) = self.store.get(id)? else {
                return Ok(());
            };
            if latest.status.is_terminal() {
                return Ok(());
            }
            if latest.status.stage_index().is_some_and(|i| i >= index) {
                continue;
            }

            self.update_status(id, status, location_for_stage(index)).await?;
        }
        Ok(())
    }

    fn schedule_arrival(&self, delivery: &Delivery, current: usize, stage_duration: Duration) {
        let Some(index) = (current + 1..DeliveryStatus::PROGRESSION.len())
            .find(|&i| location_for_stage(i) == Some(BRANCH_LOCATION))
        else {
            return;
        };

        let fire_at = stage_due(delivery.created_at, index, stage_duration);
        let notification = Notification::new(
            format!("Parcel {}", delivery.tracking_number),
            format!("Your parcel has arrived at {}", BRANCH_LOCATION),
        )
        .with_data("delivery_id", delivery.id.clone());

        if fire_at <= Utc::now() {
            self.notifier.show(&notification);
        } else {
            self.notifier.schedule(&notification, fire_at);
        }
    }

    async fn hand_off(&self, delivery: &Delivery) {
        let Some(coordinator) = &self.coordinator else {
            debug!(id = %delivery.id, "Sync disabled, not reporting delivered address");
            return;
        };
        if let Err(e) = coordinator
            .on_delivered(&delivery.id, delivery.resolved_address())
            .await
        {
            warn!(id = %delivery.id, error = %e, "Failed to hand off delivered address");
        }
    }

    fn record_history(&self, delivery: &Delivery, location: Option<&str>) -> Result<()> {
        self.store.add_history(&DeliveryHistoryItem {
            delivery_id: delivery.id.clone(),
            status: delivery.status,
            timestamp: delivery.updated_at,
            message: delivery.status.message().to_string(),
            location: location.map(str::to_string),
        })?;
        Ok(())
    }
}

fn stage_due(created_at: DateTime<Utc>, index: usize, stage_duration: Duration) -> DateTime<Utc> {
    let offset = chrono::Duration::from_std(stage_duration * index as u32)
        .unwrap_or_else(|_| chrono::Duration::zero());
    created_at + offset
}

fn status_notification(delivery: &Delivery) -> Notification {
    let mut notification = Notification::new(
        format!("Parcel {}", delivery.tracking_number),
        delivery.status.message(),
    )
    .with_data("delivery_id", delivery.id.clone())
    .with_data("status", delivery.status.as_str());
    if let Some(location) = &delivery.current_location {
        notification.body = format!("{} ({})", notification.body, location);
    }
    notification
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::testing::RecordingNotifier;
    use crate::storage::{Database, SyncQueue};
    use crate::sync::testing::{FakeProbe, FakeSender};
    use crate::sync::{spawn_sync_task, ConnectivityMonitor, SyncPolicy, SyncTaskEvent};

    struct Fixture {
        tracker: DeliveryTracker,
        notifier: Arc<RecordingNotifier>,
        probe: Arc<FakeProbe>,
        sender: Arc<FakeSender>,
        coordinator: Arc<SyncCoordinator>,
        queue: SyncQueue,
    }

    async fn fixture(online: bool) -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let store = DeliveryStore::new(db.clone());
        let queue = SyncQueue::new(db);
        let sender = FakeSender::new();
        let probe = FakeProbe::new(online);
        let monitor = Arc::new(ConnectivityMonitor::new(probe.clone()).await);
        let coordinator = Arc::new(SyncCoordinator::new(
            queue.clone(),
            monitor,
            sender.clone(),
            Arc::new(store.clone()),
            SyncPolicy::default(),
        ));
        let notifier = Arc::new(RecordingNotifier::default());
        let tracker = DeliveryTracker::new(store, Some(coordinator.clone()), notifier.clone());
        Fixture {
            tracker,
            notifier,
            probe,
            sender,
            coordinator,
            queue,
        }
    }

    async fn deliver(tracker: &DeliveryTracker, id: &str) -> Delivery {
        let mut last = None;
        while let Some(delivery) = tracker.advance(id).await.unwrap() {
            last = Some(delivery);
        }
        last.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_delivery_syncs_after_reconnect() {
        let f = fixture(false).await;
        let mut handle = spawn_sync_task(f.coordinator.clone());
        let delivery = f.tracker.create("TN-1").unwrap();

        f.tracker
            .update_status(&delivery.id, DeliveryStatus::Delivered, Some("Kyiv, branch 15"))
            .await
            .unwrap();
        let queued: Vec<String> = f
            .queue
            .list_pending()
            .unwrap()
            .into_iter()
            .map(|r| r.address)
            .collect();
        assert_eq!(queued, vec!["Kyiv, branch 15"]);

        f.probe.set_online(true);
        f.coordinator.monitor().observe(true);
        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert_eq!(f.sender.calls(), 0);

        let outcome = loop {
            match handle.event_rx.recv().await {
                Some(SyncTaskEvent::DrainFinished(outcome)) => break outcome,
                Some(SyncTaskEvent::ConnectivityChanged(_)) => continue,
                None => panic!("sync task stopped"),
            }
        };
        assert_eq!(outcome.report().map(|r| r.succeeded), Some(1));
        assert_eq!(f.sender.sent(), vec!["Kyiv, branch 15"]);
        assert_eq!(f.queue.stats().unwrap().pending, 0);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_create_is_idempotent_per_tracking_number() {
        let f = fixture(true).await;

        let first = f.tracker.create("TN-1").unwrap();
        let second = f.tracker.create(" TN-1 ").unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.status, DeliveryStatus::Pending);
        assert!(first.estimated_delivery.unwrap() > first.created_at);
        assert_eq!(f.tracker.store().history(&first.id).unwrap().len(), 1);
        assert_eq!(f.notifier.shown.lock().unwrap().len(), 1);
        assert!(f.tracker.create("  ").is_err());
    }

    #[tokio::test]
    async fn test_advance_walks_the_progression() {
        let f = fixture(true).await;
        let delivery = f.tracker.create("TN-1").unwrap();

        let confirmed = f.tracker.advance(&delivery.id).await.unwrap().unwrap();
        assert_eq!(confirmed.status, DeliveryStatus::Confirmed);
        assert_eq!(confirmed.current_location.as_deref(), Some("Kyiv, warehouse"));

        let delivered = deliver(&f.tracker, &delivery.id).await;
        assert_eq!(delivered.status, DeliveryStatus::Delivered);
        assert_eq!(
            delivered.current_location.as_deref(),
            Some("Kyiv, on the way to you")
        );
        assert!(f.tracker.advance(&delivery.id).await.unwrap().is_none());

        let history = f.tracker.store().history(&delivery.id).unwrap();
        let statuses: Vec<DeliveryStatus> = history.iter().map(|h| h.status).collect();
        assert_eq!(statuses, DeliveryStatus::PROGRESSION.to_vec());
    }

    #[tokio::test]
    async fn test_delivered_online_sends_address() {
        let f = fixture(true).await;
        let delivery = f.tracker.create("TN-1").unwrap();
        f.tracker
            .set_address(&delivery.id, "Kyiv, Khreshchatyk 1")
            .await
            .unwrap();

        deliver(&f.tracker, &delivery.id).await;

        assert_eq!(f.sender.sent(), vec!["Kyiv, Khreshchatyk 1"]);
        assert_eq!(f.queue.stats().unwrap().pending, 0);
    }

    #[tokio::test]
    async fn test_delivered_offline_queues_location() {
        let f = fixture(false).await;
        let delivery = f.tracker.create("TN-1").unwrap();

        deliver(&f.tracker, &delivery.id).await;

        assert_eq!(f.sender.calls(), 0);
        let pending = f.queue.list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].address, "Kyiv, on the way to you");
        assert_eq!(pending[0].delivery_id.as_deref(), Some(delivery.id.as_str()));
    }

    #[tokio::test]
    async fn test_address_after_delivery_backfills_queue() {
        let f = fixture(false).await;
        let delivery = f.tracker.create("TN-1").unwrap();
        deliver(&f.tracker, &delivery.id).await;

        f.tracker.set_address(&delivery.id, "Lviv st.2").await.unwrap();

        let pending = f.queue.list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].address, "Lviv st.2");
    }

    #[tokio::test]
    async fn test_cancel_is_terminal() {
        let f = fixture(true).await;
        let delivery = f.tracker.create("TN-1").unwrap();

        let cancelled = f.tracker.cancel(&delivery.id).await.unwrap();
        assert_eq!(cancelled.status, DeliveryStatus::Cancelled);
        assert!(f.tracker.advance(&delivery.id).await.unwrap().is_none());
        assert!(f.tracker.cancel(&delivery.id).await.is_err());
        assert_eq!(f.sender.calls(), 0);
    }

    #[tokio::test]
    async fn test_sync_disabled_skips_hand_off() {
        let db = Database::open_in_memory().unwrap();
        let store = DeliveryStore::new(db.clone());
        let tracker = DeliveryTracker::new(store, None, Arc::new(RecordingNotifier::default()));
        let delivery = tracker.create("TN-1").unwrap();

        deliver(&tracker, &delivery.id).await;

        assert_eq!(SyncQueue::new(db).stats().unwrap().pending, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_progress_reaches_delivered() {
        let f = fixture(false).await;
        let delivery = f.tracker.create("TN-1").unwrap();

        f.tracker
            .run_auto_progress(&delivery.id, Duration::from_millis(10))
            .await
            .unwrap();

        let done = f.tracker.store().require(&delivery.id).unwrap();
        assert_eq!(done.status, DeliveryStatus::Delivered);
        assert_eq!(f.queue.pending_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_auto_progress_schedules_branch_arrival() {
        let f = fixture(true).await;
        let delivery = f.tracker.create("TN-1").unwrap();

        // Stages are already due, so arrival is shown rather than scheduled
        f.tracker
            .run_auto_progress(&delivery.id, Duration::ZERO)
            .await
            .unwrap();

        let shown = f.notifier.shown.lock().unwrap();
        assert!(shown.iter().any(|n| n.body.contains("arrived at Kyiv, branch 15")));
        assert!(f.notifier.scheduled.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_branch_arrival_scheduled_ahead() {
        let f = fixture(true).await;
        let delivery = f.tracker.create("TN-1").unwrap();
        f.tracker.cancel(&delivery.id).await.unwrap();

        // Terminal deliveries schedule nothing
        f.tracker
            .run_auto_progress(&delivery.id, STAGE_DURATION)
            .await
            .unwrap();
        assert!(f.notifier.scheduled.lock().unwrap().is_empty());

        let other = f.tracker.create("TN-2").unwrap();
        f.tracker.schedule_arrival(&other, 0, STAGE_DURATION);
        let scheduled = f.notifier.scheduled.lock().unwrap();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(
            scheduled[0].1,
            other.created_at + chrono::Duration::seconds(90)
        );
    }

    #[tokio::test]
    async fn test_auto_progress_stops_when_cancelled() {
        let f = fixture(true).await;
        let delivery = f.tracker.create("TN-1").unwrap();
        f.tracker.cancel(&delivery.id).await.unwrap();

        f.tracker
            .run_auto_progress(&delivery.id, Duration::ZERO)
            .await
            .unwrap();

        let latest = f.tracker.store().require(&delivery.id).unwrap();
        assert_eq!(latest.status, DeliveryStatus::Cancelled);
    }

    #[test]
    fn test_location_for_stage() {
        assert_eq!(location_for_stage(0), None);
        assert_eq!(location_for_stage(1), Some("Kyiv, warehouse"));
        assert_eq!(location_for_stage(3), Some(BRANCH_LOCATION));
        assert_eq!(location_for_stage(4), Some("Kyiv, on the way to you"));
    }
}
