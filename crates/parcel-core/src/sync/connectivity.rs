//! Connectivity monitor
//!
//! Single source of truth for "is the device online". Three inputs feed it:
//! edge-triggered platform events (`observe`), explicit re-checks
//! (`force_check`), and a periodic poll (`spawn_poller`) that reconciles
//! missed events. All of them go through [`ConnectivityMonitor::observe`],
//! which compares against one shared cached state, so a transition is
//! reported once no matter how many inputs notice it.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Platform query for the current connectivity state
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// `Err` means the platform could not answer, not that we are offline
    async fn check(&self) -> Result<bool>;
}

/// Probe that treats the API host as reachable when a TCP connection
/// to it can be opened within the timeout
pub struct TcpProbe {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    /// Probe the host and port of an HTTP(S) URL
    pub fn for_url(url: &str, timeout: Duration) -> Result<Self> {
        let parsed = reqwest::Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;
        let host = parsed
            .host_str()
            .with_context(|| format!("URL has no host: {}", url))?;
        let port = parsed.port_or_known_default().unwrap_or(80);
        Ok(Self::new(host, port, timeout))
    }
}

#[async_trait]
impl ConnectivityProbe for TcpProbe {
    async fn check(&self) -> Result<bool> {
        let connect = TcpStream::connect((self.host.as_str(), self.port));
        match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(_)) => Ok(true),
            Ok(Err(e)) => {
                debug!(host = %self.host, port = self.port, error = %e, "Probe connection failed");
                Ok(false)
            }
            Err(_) => {
                debug!(host = %self.host, port = self.port, "Probe connection timed out");
                Ok(false)
            }
        }
    }
}

type Listener = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

/// Handle returned by [`ConnectivityMonitor::subscribe`]
///
/// Dropping it does not unsubscribe.
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<Listeners>>,
}

impl Subscription {
    /// Stop receiving transitions. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        let Some(listeners) = self.listeners.upgrade() else {
            return;
        };
        if let Ok(mut listeners) = listeners.lock() {
            listeners.entries.retain(|(id, _)| *id != self.id);
        };
    }
}

/// Tracks online/offline state and notifies subscribers on transitions
pub struct ConnectivityMonitor {
    probe: Arc<dyn ConnectivityProbe>,
    state: watch::Sender<bool>,
    listeners: Arc<Mutex<Listeners>>,
    /// Held from a state change until its callbacks have run
    transitions: Mutex<()>,
}

impl ConnectivityMonitor {
    /// Create a monitor seeded from an immediate probe query
    ///
    /// If the probe cannot answer, the monitor starts offline.
    pub async fn new(probe: Arc<dyn ConnectivityProbe>) -> Self {
        let initial = match probe.check().await {
            Ok(online) => online,
            Err(e) => {
                warn!(error = %e, "Initial connectivity check failed, assuming offline");
                false
            }
        };
        info!(online = initial, "Initial network state");

        let (state, _) = watch::channel(initial);
        Self {
            probe,
            state,
            listeners: Arc::new(Mutex::new(Listeners::default())),
            transitions: Mutex::new(()),
        }
    }

    /// Cached state, never blocks on the network
    pub fn is_connected(&self) -> bool {
        *self.state.borrow()
    }

    /// Receiver that always holds the latest cached state
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Register a callback fired once per observed transition
    ///
    /// Callbacks run synchronously on the task that observed the change and
    /// should only hand the value off (e.g. into a channel). They must not
    /// call back into [`observe`](Self::observe).
    pub fn subscribe(&self, callback: impl Fn(bool) + Send + Sync + 'static) -> Subscription {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.push((id, Arc::new(callback)));

        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Feed an observed state into the monitor
    ///
    /// Returns `true` if this call performed a transition. Callers racing
    /// with the same value see exactly one `true`. Subscribers see
    /// transitions in the order they were applied.
    pub fn observe(&self, online: bool) -> bool {
        let _transition = self
            .transitions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            info!(
                online,
                "Network state changed to {}",
                if online { "ONLINE" } else { "OFFLINE" }
            );
            self.notify(online);
        }
        changed
    }

    /// Re-query the platform now and return the fresh state
    ///
    /// A failed query keeps the cached state.
    pub async fn force_check(&self) -> bool {
        match self.probe.check().await {
            Ok(online) => {
                self.observe(online);
                online
            }
            Err(e) => {
                warn!(error = %e, "Connectivity check failed, keeping current state");
                self.is_connected()
            }
        }
    }

    /// Periodically reconcile the cached state with the platform
    ///
    /// The task ends once the monitor is dropped.
    pub fn spawn_poller(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let monitor = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(monitor) = monitor.upgrade() else {
                    break;
                };
                monitor.poll_once().await;
            }
            debug!("Connectivity poller stopped");
        })
    }

    async fn poll_once(&self) {
        match self.probe.check().await {
            Ok(online) => {
                if self.observe(online) {
                    debug!(online, "Periodic check detected network change");
                }
            }
            Err(e) => debug!(error = %e, "Periodic connectivity check failed"),
        }
    }

    fn notify(&self, online: bool) {
        // Snapshot so callbacks run without the lock held
        let callbacks: Vec<Listener> = match self.listeners.lock() {
            Ok(listeners) => listeners.entries.iter().map(|(_, cb)| cb.clone()).collect(),
            Err(poisoned) => poisoned
                .into_inner()
                .entries
                .iter()
                .map(|(_, cb)| cb.clone())
                .collect(),
        };
        for callback in callbacks {
            callback(online);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::FakeProbe;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder(monitor: &ConnectivityMonitor) -> (Arc<Mutex<Vec<bool>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = monitor.subscribe(move |online| sink.lock().unwrap().push(online));
        (seen, sub)
    }

    #[tokio::test]
    async fn test_initial_state_from_probe() {
        let probe = FakeProbe::new(true);
        let monitor = ConnectivityMonitor::new(probe.clone()).await;
        assert!(monitor.is_connected());
        assert_eq!(probe.checks(), 1);
    }

    #[tokio::test]
    async fn test_initial_probe_failure_starts_offline() {
        let probe = FakeProbe::new(true);
        probe.set_failing(true);
        let monitor = ConnectivityMonitor::new(probe).await;
        assert!(!monitor.is_connected());
    }

    #[tokio::test]
    async fn test_observe_is_edge_triggered() {
        let monitor = ConnectivityMonitor::new(FakeProbe::new(false)).await;
        let (seen, _sub) = recorder(&monitor);

        assert!(monitor.observe(true));
        assert!(!monitor.observe(true));
        assert!(monitor.observe(false));
        assert!(!monitor.observe(false));

        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_and_unsubscribe() {
        let monitor = ConnectivityMonitor::new(FakeProbe::new(false)).await;
        let (first, first_sub) = recorder(&monitor);
        let (second, _second_sub) = recorder(&monitor);

        monitor.observe(true);
        first_sub.unsubscribe();
        first_sub.unsubscribe();
        monitor.observe(false);

        assert_eq!(*first.lock().unwrap(), vec![true]);
        assert_eq!(*second.lock().unwrap(), vec![true, false]);
    }

    #[tokio::test]
    async fn test_unsubscribe_after_monitor_dropped() {
        let monitor = ConnectivityMonitor::new(FakeProbe::new(false)).await;
        let (_seen, sub) = recorder(&monitor);
        drop(monitor);
        sub.unsubscribe();
    }

    #[tokio::test]
    async fn test_force_check_detects_change() {
        let probe = FakeProbe::new(false);
        let monitor = ConnectivityMonitor::new(probe.clone()).await;
        let (seen, _sub) = recorder(&monitor);

        probe.set_online(true);
        assert!(monitor.force_check().await);
        assert!(monitor.is_connected());
        // No second transition when nothing changed
        assert!(monitor.force_check().await);

        assert_eq!(*seen.lock().unwrap(), vec![true]);
    }

    #[tokio::test]
    async fn test_force_check_failure_keeps_state() {
        let probe = FakeProbe::new(true);
        let monitor = ConnectivityMonitor::new(probe.clone()).await;
        let (seen, _sub) = recorder(&monitor);

        probe.set_online(false);
        probe.set_failing(true);

        assert!(monitor.force_check().await);
        assert!(monitor.is_connected());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_observers_count_one_transition() {
        let monitor = Arc::new(ConnectivityMonitor::new(FakeProbe::new(false)).await);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let _sub = monitor.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let monitor = monitor.clone();
            tasks.push(tokio::spawn(async move { monitor.observe(true) }));
        }
        let mut transitions = 0;
        for task in tasks {
            if task.await.unwrap() {
                transitions += 1;
            }
        }

        assert_eq!(transitions, 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_flaps_notify_in_applied_order() {
        let monitor = Arc::new(ConnectivityMonitor::new(FakeProbe::new(false)).await);
        let (seen, _sub) = recorder(&monitor);

        let mut tasks = Vec::new();
        for worker in 0..8 {
            let monitor = monitor.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..200 {
                    monitor.observe((i + worker) % 2 == 0);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|pair| pair[0] != pair[1]));
        assert_eq!(seen.last().copied(), Some(monitor.is_connected()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_reconciles_missed_event() {
        let probe = FakeProbe::new(false);
        let monitor = Arc::new(ConnectivityMonitor::new(probe.clone()).await);
        let (seen, _sub) = recorder(&monitor);
        let poller = monitor.spawn_poller(Duration::from_secs(5));

        probe.set_online(true);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(monitor.is_connected());

        // Platform event arriving after the poll is not a new transition
        assert!(!monitor.observe(true));
        assert_eq!(*seen.lock().unwrap(), vec![true]);

        poller.abort();
    }

    #[tokio::test]
    async fn test_watch_receiver_tracks_state() {
        let monitor = ConnectivityMonitor::new(FakeProbe::new(false)).await;
        let rx = monitor.watch();
        monitor.observe(true);
        assert!(*rx.borrow());
    }

    #[test]
    fn test_tcp_probe_for_url() {
        let probe = TcpProbe::for_url("http://10.0.2.2:3000", Duration::from_secs(1)).unwrap();
        assert_eq!(probe.host, "10.0.2.2");
        assert_eq!(probe.port, 3000);

        let probe = TcpProbe::for_url("https://api.example.com", Duration::from_secs(1)).unwrap();
        assert_eq!(probe.port, 443);

        assert!(TcpProbe::for_url("not a url", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_tcp_probe_reaches_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let probe = TcpProbe::new("127.0.0.1", port, Duration::from_secs(1));
        assert!(probe.check().await.unwrap());
    }
}
