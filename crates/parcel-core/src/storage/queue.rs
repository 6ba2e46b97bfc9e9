//! Durable sync queue
//!
//! Persists outbound address-sync records in the `sync_queue` table.
//! This is pure storage: every method is a single statement touching a
//! single record, so each mutation is atomic on its own and no
//! multi-record transactions are needed.
//!
//! Timestamps are stored as milliseconds since the Unix epoch.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

use super::database::Database;
use super::error::{StorageError, StorageResult};
use crate::models::{QueueStats, SyncRecord};

const RECORD_COLUMNS: &str =
    "id, address, delivery_id, created_at, retry_count, last_error, synced";

/// The persisted queue of outbound sync records
#[derive(Clone)]
pub struct SyncQueue {
    db: Database,
}

impl SyncQueue {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a new pending record
    ///
    /// `address` may be empty: such a placeholder waits for a back-fill.
    pub fn append(&self, address: &str, delivery_id: Option<&str>) -> StorageResult<SyncRecord> {
        self.append_at(address, delivery_id, Utc::now())
    }

    fn append_at(
        &self,
        address: &str,
        delivery_id: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> StorageResult<SyncRecord> {
        let id = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sync_queue (address, delivery_id, created_at, retry_count, synced)
                 VALUES (?1, ?2, ?3, 0, 0)",
                params![address, delivery_id, created_at.timestamp_millis()],
            )?;
            Ok(conn.last_insert_rowid())
        })?;

        debug!(id, address, delivery_id, "Appended sync record");

        Ok(SyncRecord {
            id,
            address: address.to_string(),
            delivery_id: delivery_id.map(str::to_string),
            created_at: from_millis(created_at.timestamp_millis()),
            retry_count: 0,
            last_error: None,
            synced: false,
        })
    }

    /// Fetch a record by id
    pub fn get(&self, id: i64) -> StorageResult<Option<SyncRecord>> {
        let sql = format!("SELECT {} FROM sync_queue WHERE id = ?1", RECORD_COLUMNS);
        self.db
            .with_conn(|conn| conn.query_row(&sql, [id], row_to_record).optional())
    }

    /// All records not yet synced, oldest first
    pub fn list_pending(&self) -> StorageResult<Vec<SyncRecord>> {
        let sql = format!(
            "SELECT {} FROM sync_queue WHERE synced = 0 ORDER BY created_at ASC, id ASC",
            RECORD_COLUMNS
        );
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let records = stmt
                .query_map([], row_to_record)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
    }

    /// The oldest pending record reporting on a delivery
    pub fn find_pending_for_delivery(&self, delivery_id: &str) -> StorageResult<Option<SyncRecord>> {
        let sql = format!(
            "SELECT {} FROM sync_queue WHERE synced = 0 AND delivery_id = ?1
             ORDER BY created_at ASC, id ASC LIMIT 1",
            RECORD_COLUMNS
        );
        self.db
            .with_conn(|conn| conn.query_row(&sql, [delivery_id], row_to_record).optional())
    }

    /// Mark a record as terminal
    ///
    /// Idempotent: marking an already-synced record changes nothing.
    pub fn mark_synced(&self, id: i64) -> StorageResult<()> {
        let changed = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE sync_queue SET synced = 1 WHERE id = ?1 AND synced = 0",
                [id],
            )
        })?;
        if changed > 0 {
            debug!(id, "Marked sync record as synced");
        }
        Ok(())
    }

    /// Count a failed attempt and remember its error
    ///
    /// Returns the retry count after the increment.
    pub fn record_failure(&self, id: i64, error: &str) -> StorageResult<u32> {
        let count: Option<u32> = self.db.with_conn(|conn| {
            conn.query_row(
                "UPDATE sync_queue SET retry_count = retry_count + 1, last_error = ?2
                 WHERE id = ?1 RETURNING retry_count",
                params![id, error],
                |row| row.get(0),
            )
            .optional()
        })?;
        count.ok_or(StorageError::RecordNotFound { id })
    }

    /// Overwrite a record's address
    pub fn update_address(&self, id: i64, address: &str) -> StorageResult<()> {
        let changed = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE sync_queue SET address = ?2 WHERE id = ?1",
                params![id, address],
            )
        })?;
        if changed == 0 {
            return Err(StorageError::RecordNotFound { id });
        }
        debug!(id, address, "Updated sync record address");
        Ok(())
    }

    /// Delete synced records created before the retention window
    ///
    /// Returns how many records were removed.
    pub fn purge_old_synced(&self, retention: Duration) -> StorageResult<usize> {
        let cutoff = (Utc::now() - retention).timestamp_millis();
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM sync_queue WHERE synced = 1 AND created_at < ?1",
                [cutoff],
            )
        })
    }

    pub fn pending_count(&self) -> StorageResult<usize> {
        let count: i64 = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM sync_queue WHERE synced = 0",
                [],
                |row| row.get(0),
            )
        })?;
        Ok(count as usize)
    }

    pub fn stats(&self) -> StorageResult<QueueStats> {
        let (pending, synced): (i64, i64) = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(synced = 0), 0), COALESCE(SUM(synced = 1), 0) FROM sync_queue",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
        })?;
        Ok(QueueStats {
            pending: pending as usize,
            synced: synced as usize,
        })
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<SyncRecord> {
    Ok(SyncRecord {
        id: row.get(0)?,
        address: row.get(1)?,
        delivery_id: row.get(2)?,
        created_at: from_millis(row.get(3)?),
        retry_count: row.get(4)?,
        last_error: row.get(5)?,
        synced: row.get(6)?,
    })
}

pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default()
}
