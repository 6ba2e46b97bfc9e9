//! Parcel Core Library
//!
//! This crate provides the core functionality for Parcel, a delivery
//! tracker whose delivered addresses reach a remote API even when the
//! device is offline at the moment of delivery.
//!
//! # Architecture
//!
//! - **SQLite**: one database file holds deliveries, their history and the
//!   durable sync queue
//! - **Sync**: a connectivity monitor, a one-shot HTTP sender and a
//!   coordinator that drains the queue when the device comes back online
//!
//! # Quick Start
//!
//! ```text
//! let app = App::open(Config::load()?).await?;
//!
//! let delivery = app.tracker().create("TN-1")?;
//! app.tracker().advance(&delivery.id).await?;
//!
//! // Drain anything queued while offline
//! app.coordinator().force_check_and_sync().await;
//! ```
//!
//! # Modules
//!
//! - `app`: Wires the services together (main entry point)
//! - `models`: Deliveries, history items and sync records
//! - `lifecycle`: Status pipeline and simulated carrier progress
//! - `storage`: SQLite persistence
//! - `sync`: Connectivity, remote sender and queue draining
//! - `notify`: User notifications
//! - `config`: Application configuration

pub mod app;
pub mod config;
pub mod lifecycle;
pub mod models;
pub mod notify;
pub mod storage;
pub mod sync;

pub use app::App;
pub use config::Config;
pub use lifecycle::DeliveryTracker;
pub use models::{Delivery, DeliveryHistoryItem, DeliveryStatus, QueueStats, SyncRecord};
pub use notify::{LogNotifier, Notification, Notifier};
pub use storage::{Database, DeliveryStore, StorageError, SyncQueue};
pub use sync::{DrainOutcome, DrainReport, SyncCoordinator};
