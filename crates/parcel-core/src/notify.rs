//! User notifications
//!
//! Status changes surface to the user through a [`Notifier`]. Delivery is
//! fire-and-forget: a notifier never fails the operation that triggered it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// A notification shown or scheduled for the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// Extra key/value payload, e.g. the delivery id
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
}

impl Notification {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            data: BTreeMap::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Outlet for user-facing notifications
pub trait Notifier: Send + Sync {
    /// Show a notification now
    fn show(&self, notification: &Notification);

    /// Show a notification at a later time
    fn schedule(&self, notification: &Notification, fire_at: DateTime<Utc>);
}

/// Notifier that writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn show(&self, notification: &Notification) {
        info!(title = %notification.title, body = %notification.body, "Notification");
    }

    fn schedule(&self, notification: &Notification, fire_at: DateTime<Utc>) {
        info!(
            title = %notification.title,
            body = %notification.body,
            fire_at = %fire_at,
            "Scheduled notification"
        );
    }
}
