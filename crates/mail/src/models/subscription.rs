//! Push-notification subscription and its persisted form

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::{HistoryCursor, LabelId};
use crate::sync;

/// An active watch on the mailbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub expires_at: DateTime<Utc>,
    pub current_cursor: HistoryCursor,
}

impl Subscription {
    pub fn new(expires_at: DateTime<Utc>, current_cursor: HistoryCursor) -> Self {
        Self {
            expires_at,
            current_cursor,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        sync::expired_at(self.expires_at, now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// On-disk form of a subscription
///
/// `expiration` is whole seconds since the Unix epoch. `topic` and
/// `label_ids` are absent from files written without them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchState {
    pub expiration: i64,
    pub history_id: HistoryCursor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub label_ids: Vec<LabelId>,
}

impl WatchState {
    /// File name used inside the config directory
    pub const FILE_NAME: &'static str = "watch-state.json";

    pub fn to_subscription(&self) -> Option<Subscription> {
        let expires_at = Utc.timestamp_opt(self.expiration, 0).single()?;
        Some(Subscription::new(expires_at, self.history_id))
    }

    /// Record the topic and labels the watch was created with
    pub fn with_filter(mut self, topic: impl Into<String>, label_ids: Vec<LabelId>) -> Self {
        self.topic = Some(topic.into());
        self.label_ids = label_ids;
        self
    }
}

impl From<&Subscription> for WatchState {
    fn from(sub: &Subscription) -> Self {
        Self {
            expiration: sub.expires_at.timestamp(),
            history_id: sub.current_cursor,
            topic: None,
            label_ids: Vec::new(),
        }
    }
}
