//! Application wiring
//!
//! Builds the database, stores, connectivity monitor, sender, coordinator
//! and tracker from a [`Config`], in one place.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::debug;

use crate::config::Config;
use crate::lifecycle::DeliveryTracker;
use crate::notify::{LogNotifier, Notifier};
use crate::storage::{Database, DeliveryStore, SyncQueue};
use crate::sync::{
    ConnectivityMonitor, ConnectivityProbe, HttpSender, RemoteSender, SyncCoordinator, TcpProbe,
};

/// How long a connectivity probe may take
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Fully wired application services
pub struct App {
    config: Config,
    deliveries: DeliveryStore,
    coordinator: Arc<SyncCoordinator>,
    tracker: Arc<DeliveryTracker>,
}

impl App {
    /// Open the configured database and connect the production adapters
    pub async fn open(config: Config) -> Result<Self> {
        let db = Database::open(&config).context("Failed to open database")?;
        let probe = TcpProbe::for_url(&config.api_url, PROBE_TIMEOUT)
            .context("Invalid api_url in config")?;
        let sender = HttpSender::from_config(&config)?;

        Ok(Self::with_parts(
            config,
            db,
            Arc::new(probe),
            Arc::new(sender),
            Arc::new(LogNotifier),
        )
        .await)
    }

    /// Wire the services around the given adapters
    pub async fn with_parts(
        config: Config,
        db: Database,
        probe: Arc<dyn ConnectivityProbe>,
        sender: Arc<dyn RemoteSender>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let deliveries = DeliveryStore::new(db.clone());
        let monitor = Arc::new(ConnectivityMonitor::new(probe).await);
        let coordinator = Arc::new(SyncCoordinator::new(
            SyncQueue::new(db),
            monitor,
            sender,
            Arc::new(deliveries.clone()),
            config.sync.policy(),
        ));

        let hand_off = config.sync.enabled.then(|| coordinator.clone());
        if hand_off.is_none() {
            debug!("Address sync disabled in config");
        }
        let tracker = Arc::new(DeliveryTracker::new(deliveries.clone(), hand_off, notifier));

        Self {
            config,
            deliveries,
            coordinator,
            tracker,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn deliveries(&self) -> &DeliveryStore {
        &self.deliveries
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        self.coordinator.monitor()
    }

    pub fn tracker(&self) -> &Arc<DeliveryTracker> {
        &self.tracker
    }

    pub fn sync_enabled(&self) -> bool {
        self.config.sync.enabled
    }
}
