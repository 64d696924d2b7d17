//! History cursors and the change events reconciled from them

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{LabelId, MessageId, MessageRef};
use crate::error::SyncError;

/// Position in the remote mailbox's change log
///
/// Gmail sends history ids as decimal strings; they are kept as `u64` so
/// cursors order numerically.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct HistoryCursor(u64);

impl HistoryCursor {
    pub const fn new(history_id: u64) -> Self {
        Self(history_id)
    }

    pub const fn history_id(self) -> u64 {
        self.0
    }

    /// Parse the wire form (a decimal string)
    pub fn parse(s: &str) -> Result<Self, SyncError> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| SyncError::InvalidCursor(s.to_string()))
    }
}

impl FromStr for HistoryCursor {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for HistoryCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A change to a single message reported by the history feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeEvent {
    MessageAdded(MessageRef),
    LabelAdded(MessageRef, Vec<LabelId>),
}

impl ChangeEvent {
    pub fn message(&self) -> &MessageRef {
        match self {
            Self::MessageAdded(m) | Self::LabelAdded(m, _) => m,
        }
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message().id
    }
}

/// Result of a successful history reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChangeSet {
    /// One event per distinct message id, in first-sighting order
    pub events: Vec<ChangeEvent>,
    /// Highest record history id seen, never below the start cursor
    pub end_cursor: HistoryCursor,
    /// Mailbox-wide history id reported by the last page, if any
    pub mailbox_cursor: Option<HistoryCursor>,
    /// Messages mentioned only as plain touch events
    pub touched: Vec<MessageRef>,
    /// Number of history pages fetched
    pub pages: usize,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Distinct message ids in emission order
    pub fn message_ids(&self) -> Vec<MessageId> {
        self.events.iter().map(|e| e.message_id().clone()).collect()
    }
}
