//! Data models for Parcel
//!
//! Defines deliveries, their status history, and the outbound sync records
//! that carry a delivered parcel's address to the remote API.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery status, in pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Confirmed,
    InTransit,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl DeliveryStatus {
    /// The automatic progression; `Cancelled` is only reached manually
    pub const PROGRESSION: [DeliveryStatus; 5] = [
        DeliveryStatus::Pending,
        DeliveryStatus::Confirmed,
        DeliveryStatus::InTransit,
        DeliveryStatus::OutForDelivery,
        DeliveryStatus::Delivered,
    ];

    /// Whether no further transitions happen from this status
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Cancelled)
    }

    /// Position in the progression (`None` for cancelled)
    pub fn stage_index(self) -> Option<usize> {
        Self::PROGRESSION.iter().position(|s| *s == self)
    }

    /// Next status in the progression
    pub fn next(self) -> Option<DeliveryStatus> {
        self.stage_index()
            .and_then(|i| Self::PROGRESSION.get(i + 1).copied())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Confirmed => "confirmed",
            DeliveryStatus::InTransit => "in_transit",
            DeliveryStatus::OutForDelivery => "out_for_delivery",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Cancelled => "cancelled",
        }
    }

    /// Message recorded in history and shown to the user
    pub fn message(self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "Order is awaiting processing",
            DeliveryStatus::Confirmed => "Order confirmed",
            DeliveryStatus::InTransit => "Order arrived at the branch",
            DeliveryStatus::OutForDelivery => "Courier is bringing your order",
            DeliveryStatus::Delivered => "Order delivered",
            DeliveryStatus::Cancelled => "Order cancelled",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "confirmed" => Ok(DeliveryStatus::Confirmed),
            "in_transit" => Ok(DeliveryStatus::InTransit),
            "out_for_delivery" => Ok(DeliveryStatus::OutForDelivery),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "cancelled" => Ok(DeliveryStatus::Cancelled),
            other => Err(format!("unknown delivery status '{}'", other)),
        }
    }
}

/// A tracked parcel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Delivery {
    /// Unique identifier
    pub id: String,
    /// Carrier tracking number
    pub tracking_number: String,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub estimated_delivery: Option<DateTime<Utc>>,
    /// Last known location along the route
    pub current_location: Option<String>,
    pub recipient: Option<String>,
    /// Delivery address, when the user has provided one
    pub address: Option<String>,
    /// 1-5 stars
    pub rating: Option<u8>,
    pub review: Option<String>,
}

impl Delivery {
    /// Create a pending delivery for a tracking number
    pub fn new(tracking_number: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            tracking_number: tracking_number.into(),
            status: DeliveryStatus::Pending,
            created_at: now,
            updated_at: now,
            estimated_delivery: Some(now + Duration::minutes(2)),
            current_location: None,
            recipient: None,
            address: None,
            rating: None,
            review: None,
        }
    }

    /// The address the remote API should receive for this delivery
    ///
    /// An explicit address wins; otherwise the last known location stands in.
    /// Blank values count as absent.
    pub fn resolved_address(&self) -> Option<&str> {
        resolve_address(self.address.as_deref(), self.current_location.as_deref())
    }

    /// Update the status
    pub fn set_status(&mut self, status: DeliveryStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// The address-bearing projection of a delivery used for sync reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryAddress {
    pub address: Option<String>,
    pub current_location: Option<String>,
}

impl DeliveryAddress {
    pub fn resolved(&self) -> Option<&str> {
        resolve_address(self.address.as_deref(), self.current_location.as_deref())
    }
}

impl From<&Delivery> for DeliveryAddress {
    fn from(delivery: &Delivery) -> Self {
        Self {
            address: delivery.address.clone(),
            current_location: delivery.current_location.clone(),
        }
    }
}

fn resolve_address<'a>(address: Option<&'a str>, location: Option<&'a str>) -> Option<&'a str> {
    address
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .or_else(|| location.map(str::trim).filter(|l| !l.is_empty()))
}

/// A single status change in a delivery's history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryHistoryItem {
    pub delivery_id: String,
    pub status: DeliveryStatus,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub location: Option<String>,
}

/// One outstanding obligation to tell the remote API a delivery's address
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncRecord {
    /// Store-assigned, increasing in creation order
    pub id: i64,
    /// Empty for a placeholder awaiting back-fill
    pub address: String,
    /// Weak reference to the delivery this record reports on
    pub delivery_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// Terminal: either sent or given up
    pub synced: bool,
}

impl SyncRecord {
    /// Whether this record has no address to send yet
    pub fn is_placeholder(&self) -> bool {
        self.address.trim().is_empty()
    }
}

/// Queue counters exposed to the UI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub synced: usize,
}
