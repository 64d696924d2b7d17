//! Remote mailbox trait definitions

use serde::{Deserialize, Serialize};

use crate::error::SyncResult;
use crate::gmail::Authorization;
use crate::gmail::api::{GmailMessage, HistoryRecord, WatchRequest};
use crate::models::{
    HistoryCursor, LabelId, MessageId, MessageRef, PageRequest, PageResult, Subscription,
};

/// Kinds of change the history feed can be filtered to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HistoryType {
    MessageAdded,
    MessageDeleted,
    LabelAdded,
    LabelRemoved,
}

impl HistoryType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MessageAdded => "messageAdded",
            Self::MessageDeleted => "messageDeleted",
            Self::LabelAdded => "labelAdded",
            Self::LabelRemoved => "labelRemoved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "messageAdded" => Some(Self::MessageAdded),
            "messageDeleted" => Some(Self::MessageDeleted),
            "labelAdded" => Some(Self::LabelAdded),
            "labelRemoved" => Some(Self::LabelRemoved),
            _ => None,
        }
    }
}

/// Parameters of one `history.list` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    pub start: HistoryCursor,
    pub page_token: Option<String>,
    pub label_id: Option<LabelId>,
    pub history_types: Vec<HistoryType>,
}

impl HistoryRequest {
    pub fn new(start: HistoryCursor) -> Self {
        Self {
            start,
            page_token: None,
            label_id: None,
            history_types: Vec::new(),
        }
    }
}

/// One page of history records
#[derive(Debug, Clone, Default)]
pub struct HistoryPage {
    pub records: Vec<HistoryRecord>,
    pub next_page_token: Option<String>,
    /// Mailbox-wide history id at the time of the call
    pub mailbox_cursor: Option<HistoryCursor>,
}

/// Mailbox profile, used to pick up a fresh cursor after a full resync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub email_address: String,
    pub history_id: HistoryCursor,
}

/// One sub-response of a grouped call
///
/// `index` is the position of the originating request in the call's input.
#[derive(Debug, Clone)]
pub struct BatchReply<T> {
    pub index: usize,
    pub result: SyncResult<T>,
}

/// The remote mailbox as seen by the sync engine
///
/// One method per remote call. Every method receives the authorization
/// capability explicitly; implementations must not hold ambient credentials.
pub trait MailboxApi: Send + Sync {
    /// List or search message refs, one page per call
    fn list_messages(
        &self,
        auth: &Authorization,
        request: &PageRequest,
    ) -> SyncResult<PageResult<MessageRef>>;

    /// Fetch one full message
    fn get_message(&self, auth: &Authorization, id: &MessageId) -> SyncResult<GmailMessage>;

    /// Fetch many messages in a single grouped round trip
    ///
    /// `Err` means the grouped call itself failed. Requests missing from the
    /// returned replies were never answered.
    fn batch_get_messages(
        &self,
        auth: &Authorization,
        ids: &[MessageId],
    ) -> SyncResult<Vec<BatchReply<GmailMessage>>>;

    /// Upload and send a raw RFC 822 message
    fn send_message(
        &self,
        auth: &Authorization,
        raw: &[u8],
        content_type: &str,
    ) -> SyncResult<MessageRef>;

    /// Replace the signature of one send-as alias
    ///
    /// Returns the signature the server now holds. Acting for another user
    /// needs an authorization issued for that user.
    fn update_send_as_signature(
        &self,
        auth: &Authorization,
        send_as_email: &str,
        signature: &str,
    ) -> SyncResult<String>;

    /// Start or renew push notifications
    fn watch(&self, auth: &Authorization, request: &WatchRequest) -> SyncResult<Subscription>;

    /// Stop push notifications
    fn stop(&self, auth: &Authorization) -> SyncResult<()>;

    /// One page of the change log since `request.start`
    ///
    /// Fails with `SyncError::StaleCursor` when the start cursor is older
    /// than the retained history.
    fn list_history(&self, auth: &Authorization, request: &HistoryRequest)
    -> SyncResult<HistoryPage>;

    fn get_profile(&self, auth: &Authorization) -> SyncResult<Profile>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_type_names() {
        for ty in [
            HistoryType::MessageAdded,
            HistoryType::MessageDeleted,
            HistoryType::LabelAdded,
            HistoryType::LabelRemoved,
        ] {
            assert_eq!(HistoryType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(HistoryType::parse("bogus"), None);
    }
}
