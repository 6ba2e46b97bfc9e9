//! Delivery record store
//!
//! Key-indexed persistence for deliveries and their status history.
//! Also serves as the authoritative address source for sync reconciliation.

use rusqlite::{params, OptionalExtension, Row};

use super::database::Database;
use super::error::{StorageError, StorageResult};
use super::queue::from_millis;
use crate::models::{Delivery, DeliveryAddress, DeliveryHistoryItem, DeliveryStatus};
use crate::sync::DeliveryLookup;

const DELIVERY_COLUMNS: &str = "id, tracking_number, status, created_at, updated_at, \
     estimated_delivery, current_location, recipient, address, rating, review";

/// Repository for delivery records
#[derive(Clone)]
pub struct DeliveryStore {
    db: Database,
}

impl DeliveryStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace a delivery
    pub fn save(&self, delivery: &Delivery) -> StorageResult<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO deliveries (id, tracking_number, status, created_at, updated_at,
                     estimated_delivery, current_location, recipient, address, rating, review)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(id) DO UPDATE SET
                     tracking_number = excluded.tracking_number,
                     status = excluded.status,
                     updated_at = excluded.updated_at,
                     estimated_delivery = excluded.estimated_delivery,
                     current_location = excluded.current_location,
                     recipient = excluded.recipient,
                     address = excluded.address,
                     rating = excluded.rating,
                     review = excluded.review",
                params![
                    delivery.id,
                    delivery.tracking_number,
                    delivery.status.as_str(),
                    delivery.created_at.timestamp_millis(),
                    delivery.updated_at.timestamp_millis(),
                    delivery.estimated_delivery.map(|t| t.timestamp_millis()),
                    delivery.current_location,
                    delivery.recipient,
                    delivery.address,
                    delivery.rating,
                    delivery.review,
                ],
            )
        })?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> StorageResult<Option<Delivery>> {
        let sql = format!("SELECT {} FROM deliveries WHERE id = ?1", DELIVERY_COLUMNS);
        self.db
            .with_conn(|conn| conn.query_row(&sql, [id], row_to_delivery).optional())
    }

    /// Like `get`, but a missing delivery is an error
    pub fn require(&self, id: &str) -> StorageResult<Delivery> {
        self.get(id)?.ok_or_else(|| StorageError::DeliveryNotFound { id: id.to_string() })
    }

    pub fn get_by_tracking(&self, tracking_number: &str) -> StorageResult<Option<Delivery>> {
        let sql = format!(
            "SELECT {} FROM deliveries WHERE tracking_number = ?1 LIMIT 1",
            DELIVERY_COLUMNS
        );
        self.db.with_conn(|conn| {
            conn.query_row(&sql, [tracking_number], row_to_delivery)
                .optional()
        })
    }

    /// All deliveries, most recently updated first
    pub fn list(&self) -> StorageResult<Vec<Delivery>> {
        let sql = format!(
            "SELECT {} FROM deliveries ORDER BY updated_at DESC",
            DELIVERY_COLUMNS
        );
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let deliveries = stmt
                .query_map([], row_to_delivery)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(deliveries)
        })
    }

    /// Resolve a full id or a unique id prefix
    pub fn find_by_prefix(&self, prefix: &str) -> StorageResult<Vec<Delivery>> {
        let sql = format!(
            "SELECT {} FROM deliveries WHERE id LIKE ?1 || '%' ORDER BY updated_at DESC",
            DELIVERY_COLUMNS
        );
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let deliveries = stmt
                .query_map([prefix], row_to_delivery)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(deliveries)
        })
    }

    pub fn add_history(&self, item: &DeliveryHistoryItem) -> StorageResult<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO delivery_history (delivery_id, status, timestamp, message, location)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    item.delivery_id,
                    item.status.as_str(),
                    item.timestamp.timestamp_millis(),
                    item.message,
                    item.location,
                ],
            )
        })?;
        Ok(())
    }

    /// History of one delivery, oldest first
    pub fn history(&self, delivery_id: &str) -> StorageResult<Vec<DeliveryHistoryItem>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT delivery_id, status, timestamp, message, location
                 FROM delivery_history WHERE delivery_id = ?1 ORDER BY timestamp ASC, id ASC",
            )?;
            let items = stmt
                .query_map([delivery_id], |row| {
                    Ok(DeliveryHistoryItem {
                        delivery_id: row.get(0)?,
                        status: parse_status(row, 1)?,
                        timestamp: from_millis(row.get(2)?),
                        message: row.get(3)?,
                        location: row.get(4)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(items)
        })
    }

    /// Store a 1-5 star rating with an optional review text
    pub fn set_review(&self, id: &str, rating: u8, review: Option<&str>) -> StorageResult<()> {
        if !(1..=5).contains(&rating) {
            return Err(StorageError::InvalidData {
                column: "rating".to_string(),
                details: format!("rating must be between 1 and 5, got {}", rating),
            });
        }
        let changed = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE deliveries SET rating = ?2, review = ?3 WHERE id = ?1",
                params![id, rating, review],
            )
        })?;
        if changed == 0 {
            return Err(StorageError::DeliveryNotFound { id: id.to_string() });
        }
        Ok(())
    }
}

impl DeliveryLookup for DeliveryStore {
    fn lookup_address(&self, delivery_id: &str) -> StorageResult<Option<DeliveryAddress>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT address, current_location FROM deliveries WHERE id = ?1",
                [delivery_id],
                |row| {
                    Ok(DeliveryAddress {
                        address: row.get(0)?,
                        current_location: row.get(1)?,
                    })
                },
            )
            .optional()
        })
    }
}

fn parse_status(row: &Row<'_>, idx: usize) -> rusqlite::Result<DeliveryStatus> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            e.into(),
        )
    })
}

fn row_to_delivery(row: &Row<'_>) -> rusqlite::Result<Delivery> {
    Ok(Delivery {
        id: row.get(0)?,
        tracking_number: row.get(1)?,
        status: parse_status(row, 2)?,
        created_at: from_millis(row.get(3)?),
        updated_at: from_millis(row.get(4)?),
        estimated_delivery: row.get::<_, Option<i64>>(5)?.map(from_millis),
        current_location: row.get(6)?,
        recipient: row.get(7)?,
        address: row.get(8)?,
        rating: row.get(9)?,
        review: row.get(10)?,
    })
}
