//! Gmail API integration
//!
//! This module provides:
//! - The explicit authorization capability passed to every call
//! - Gmail REST client implementing [`MailboxApi`](crate::remote::MailboxApi)
//! - Multipart batch request encoding and response demultiplexing
//! - Response normalization to domain models

mod auth;
pub mod batch;
mod client;
mod normalize;

pub use auth::Authorization;
pub use client::GmailClient;
pub use normalize::{flatten_body, normalize_message};

/// Gmail API wire types
pub mod api {
    use serde::{Deserialize, Serialize};

    /// Response from listing messages
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListMessagesResponse {
        pub messages: Option<Vec<MessageRef>>,
        pub next_page_token: Option<String>,
        pub result_size_estimate: Option<u32>,
    }

    /// Reference to a message (just ID and thread ID)
    #[derive(Debug, Clone, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
        pub thread_id: String,
    }

    /// Full message from Gmail API
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GmailMessage {
        pub id: String,
        pub thread_id: String,
        pub label_ids: Option<Vec<String>>,
        pub snippet: Option<String>,
        pub history_id: Option<String>,
        pub internal_date: Option<String>,
        pub payload: Option<MessagePart>,
    }

    /// Email header (name-value pair)
    #[derive(Debug, Clone, Deserialize, Serialize)]
    pub struct Header {
        pub name: String,
        pub value: String,
    }

    /// Message body (base64url encoded when present)
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageBody {
        pub size: Option<u32>,
        pub data: Option<String>,
        pub attachment_id: Option<String>,
    }

    /// A MIME part; the message payload is the top-level part
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePart {
        pub part_id: Option<String>,
        pub mime_type: Option<String>,
        pub filename: Option<String>,
        pub headers: Option<Vec<Header>>,
        pub body: Option<MessageBody>,
        pub parts: Option<Vec<MessagePart>>,
    }

    /// Response from `users.history.list`
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryResponse {
        pub history: Option<Vec<HistoryRecord>>,
        pub next_page_token: Option<String>,
        /// Current mailbox history id
        pub history_id: Option<String>,
    }

    /// One entry of the mailbox change log
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryRecord {
        pub id: String,
        /// Every message touched by this record, whatever the change
        pub messages: Option<Vec<HistoryMessage>>,
        pub messages_added: Option<Vec<HistoryMessageChange>>,
        pub labels_added: Option<Vec<HistoryLabelChange>>,
    }

    /// Message reference inside a history record; ids may be missing
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryMessage {
        pub id: Option<String>,
        pub thread_id: Option<String>,
        pub label_ids: Option<Vec<String>>,
    }

    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    pub struct HistoryMessageChange {
        pub message: Option<HistoryMessage>,
    }

    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryLabelChange {
        pub message: Option<HistoryMessage>,
        pub label_ids: Option<Vec<String>>,
    }

    /// Body of `users.watch`
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct WatchRequest {
        pub topic_name: String,
        pub label_ids: Vec<String>,
        pub label_filter_action: String,
    }

    /// Response from `users.watch`
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct WatchResponse {
        pub history_id: String,
        /// Milliseconds since the Unix epoch
        pub expiration: String,
    }

    /// Body of `users.settings.sendAs.patch`
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct SendAsPatch {
        pub signature: String,
    }

    /// A send-as alias from `users.settings.sendAs`
    #[derive(Debug, Clone, Default, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SendAs {
        pub send_as_email: String,
        pub display_name: Option<String>,
        #[serde(default)]
        pub signature: String,
        pub is_primary: Option<bool>,
    }

    /// Response from `users.getProfile`
    #[derive(Debug, Clone, Deserialize, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ProfileResponse {
        pub email_address: String,
        pub messages_total: Option<u64>,
        pub threads_total: Option<u64>,
        pub history_id: String,
    }

    /// Google API error envelope
    #[derive(Debug, Deserialize)]
    pub struct ErrorResponse {
        pub error: ErrorBody,
    }

    #[derive(Debug, Deserialize)]
    pub struct ErrorBody {
        pub code: Option<u16>,
        #[serde(default)]
        pub message: String,
        #[serde(default)]
        pub errors: Vec<ErrorDetail>,
    }

    #[derive(Debug, Deserialize)]
    pub struct ErrorDetail {
        #[serde(default)]
        pub reason: String,
    }
}
