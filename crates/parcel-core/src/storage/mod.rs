//! Storage layer
//!
//! SQLite persistence for deliveries, their history, and the outbound
//! address sync queue.
//!
//! ## Architecture
//!
//! - **Database**: one shared connection (WAL, full sync)
//! - **DeliveryStore**: key-indexed delivery records and history
//! - **SyncQueue**: durable queue of pending address updates
//!
//! Both repositories are thin handles over the same `Database`.

pub mod database;
pub mod deliveries;
pub mod error;
pub mod queue;
pub mod schema;

pub use database::Database;
pub use deliveries::DeliveryStore;
pub use error::{StorageError, StorageResult};
pub use queue::SyncQueue;
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};
