//! Offline-tolerant address sync
//!
//! When a delivery completes, its resolved address must reach the remote
//! delivery API exactly once, even if the device is offline at the time.
//!
//! ## Pieces
//!
//! - [`ConnectivityMonitor`]: cached online/offline state plus transition
//!   callbacks, fed by platform events, explicit checks and a poll
//! - [`RemoteSender`]: one-shot `POST /delivery`
//! - [`SyncCoordinator`]: immediate send or enqueue, and queue drains
//! - [`spawn_sync_task`]: background task that drains on reconnection
//!
//! Durable records live in [`crate::storage::SyncQueue`].

mod connectivity;
mod coordinator;
mod sender;
mod task;

use std::time::Duration;

pub use connectivity::{ConnectivityMonitor, ConnectivityProbe, Subscription, TcpProbe};
pub use coordinator::{Dispatch, DrainOutcome, DrainReport, SyncCoordinator};
pub use sender::{HttpSender, RemoteSender, SendError, SendReceipt};
pub use task::{spawn_sync_task, SyncCommand, SyncTaskEvent, SyncTaskHandle};

use crate::models::DeliveryAddress;
use crate::storage::StorageResult;

/// Read access to the authoritative address of a delivery
pub trait DeliveryLookup: Send + Sync {
    fn lookup_address(&self, delivery_id: &str) -> StorageResult<Option<DeliveryAddress>>;
}

/// What a drain does with a record that still has no address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderPolicy {
    /// Mark it synced without sending
    DropImmediately,
    /// Leave it pending until it is this old, then drop it
    HoldFor(Duration),
}

/// Tunables for the coordinator and background task
#[derive(Debug, Clone, PartialEq)]
pub struct SyncPolicy {
    /// A record is given up after this many failed attempts
    pub max_retries: u32,
    /// Wait after an online transition before draining
    pub settle_delay: Duration,
    /// Synced records older than this are purged at startup
    pub retention: chrono::Duration,
    pub placeholders: PlaceholderPolicy,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            settle_delay: Duration::from_secs(2),
            retention: chrono::Duration::days(7),
            placeholders: PlaceholderPolicy::DropImmediately,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scriptable fakes for the sync seams

    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use anyhow::{bail, Result};
    use async_trait::async_trait;

    use super::*;

    /// Probe whose answer is flipped by the test
    pub struct FakeProbe {
        online: Arc<AtomicBool>,
        failing: AtomicBool,
        checks: AtomicUsize,
    }

    impl FakeProbe {
        pub fn new(online: bool) -> Arc<Self> {
            Self::sharing(Arc::new(AtomicBool::new(online)))
        }

        /// Probe reading a flag another fake can flip
        pub fn sharing(online: Arc<AtomicBool>) -> Arc<Self> {
            Arc::new(Self {
                online,
                failing: AtomicBool::new(false),
                checks: AtomicUsize::new(0),
            })
        }

        pub fn set_online(&self, online: bool) {
            self.online.store(online, Ordering::SeqCst);
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub fn checks(&self) -> usize {
            self.checks.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ConnectivityProbe for FakeProbe {
        async fn check(&self) -> Result<bool> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                bail!("platform query failed");
            }
            Ok(self.online.load(Ordering::SeqCst))
        }
    }

    /// What the fake sender does on a call
    pub enum Reply {
        Ok,
        Reject(u16),
        Timeout,
        Network,
    }

    /// Sender that records calls and replays scripted replies
    ///
    /// Without a script every call succeeds.
    #[derive(Default)]
    pub struct FakeSender {
        sent: Mutex<Vec<String>>,
        script: Mutex<VecDeque<Reply>>,
        delay: Option<Duration>,
        /// Flag flipped to offline after this many calls
        disconnect_after: Option<(usize, Arc<AtomicBool>)>,
    }

    impl FakeSender {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn scripted(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(replies.into()),
                ..Self::default()
            })
        }

        pub fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay: Some(delay),
                ..Self::default()
            })
        }

        pub fn disconnecting_after(calls: usize, online: Arc<AtomicBool>) -> Arc<Self> {
            Arc::new(Self {
                disconnect_after: Some((calls, online)),
                ..Self::default()
            })
        }

        pub fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }

        pub fn calls(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl RemoteSender for FakeSender {
        async fn send(&self, address: &str) -> Result<SendReceipt, SendError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let calls = {
                let mut sent = self.sent.lock().unwrap();
                sent.push(address.to_string());
                sent.len()
            };
            if let Some((after, online)) = &self.disconnect_after {
                if calls >= *after {
                    online.store(false, Ordering::SeqCst);
                }
            }

            let reply = self.script.lock().unwrap().pop_front().unwrap_or(Reply::Ok);
            match reply {
                Reply::Ok => Ok(SendReceipt {
                    status: 200,
                    body: None,
                }),
                Reply::Reject(status) => Err(SendError::Rejected {
                    status,
                    body: String::new(),
                }),
                Reply::Timeout => Err(SendError::Timeout(Duration::from_secs(10))),
                Reply::Network => Err(SendError::Network("connection refused".to_string())),
            }
        }
    }

    /// In-memory delivery lookup
    #[derive(Default)]
    pub struct FakeLookup {
        addresses: Mutex<HashMap<String, DeliveryAddress>>,
    }

    impl FakeLookup {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn set_address(&self, delivery_id: &str, address: &str) {
            self.addresses.lock().unwrap().insert(
                delivery_id.to_string(),
                DeliveryAddress {
                    address: Some(address.to_string()),
                    current_location: None,
                },
            );
        }
    }

    impl DeliveryLookup for FakeLookup {
        fn lookup_address(&self, delivery_id: &str) -> StorageResult<Option<DeliveryAddress>> {
            Ok(self.addresses.lock().unwrap().get(delivery_id).cloned())
        }
    }
}
