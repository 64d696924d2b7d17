//! In-memory mailbox implementation
//!
//! A scripted, thread-safe stand-in for the remote service. It enforces the
//! same protocol limits as Gmail (page size cap, stale history floor, topic
//! validation) and records every call so tests can assert on traffic.

use base64::prelude::*;
use chrono::{Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};

use super::{BatchReply, HistoryPage, HistoryRequest, MailboxApi, Profile};
use crate::error::{SyncError, SyncResult};
use crate::gmail::Authorization;
use crate::gmail::api::{
    GmailMessage, Header, HistoryRecord, MessageBody, MessagePart, WatchRequest,
};
use crate::models::{HistoryCursor, MessageId, MessageRef, PageRequest, PageResult, Subscription};

/// Gmail's page size limit for `messages.list`
pub const DEFAULT_MAX_PAGE_SIZE: usize = 500;

/// How long a watch stays valid
const WATCH_TTL_DAYS: i64 = 7;

/// In-memory implementation of [`MailboxApi`]
pub struct InMemoryMailbox {
    max_page_size: usize,
    /// Messages in listing order (newest first)
    messages: RwLock<Vec<GmailMessage>>,
    /// Scripted history pages, served in order
    history_pages: RwLock<Vec<HistoryPage>>,
    /// Oldest start cursor still accepted by history.list
    history_floor: RwLock<HistoryCursor>,
    history_id: RwLock<HistoryCursor>,
    revoked: RwLock<bool>,
    watching: RwLock<bool>,
    /// Ids the next grouped call will leave unanswered
    dropped_replies: RwLock<HashSet<MessageId>>,
    /// Failures injected into upcoming grouped calls
    batch_failures: Mutex<Vec<SyncError>>,
    list_calls: Mutex<Vec<PageRequest>>,
    batch_calls: Mutex<Vec<usize>>,
    history_calls: Mutex<Vec<HistoryRequest>>,
    watch_requests: Mutex<Vec<WatchRequest>>,
    stop_calls: Mutex<usize>,
    sent: Mutex<Vec<Vec<u8>>>,
    /// Signature per send-as address
    signatures: RwLock<HashMap<String, String>>,
}

impl Default for InMemoryMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMailbox {
    /// Create an empty mailbox
    pub fn new() -> Self {
        Self::with_max_page_size(DEFAULT_MAX_PAGE_SIZE)
    }

    pub fn with_max_page_size(max_page_size: usize) -> Self {
        Self {
            max_page_size,
            messages: RwLock::new(Vec::new()),
            history_pages: RwLock::new(Vec::new()),
            history_floor: RwLock::new(HistoryCursor::default()),
            history_id: RwLock::new(HistoryCursor::new(1)),
            revoked: RwLock::new(false),
            watching: RwLock::new(false),
            dropped_replies: RwLock::new(HashSet::new()),
            batch_failures: Mutex::new(Vec::new()),
            list_calls: Mutex::new(Vec::new()),
            batch_calls: Mutex::new(Vec::new()),
            history_calls: Mutex::new(Vec::new()),
            watch_requests: Mutex::new(Vec::new()),
            stop_calls: Mutex::new(0),
            sent: Mutex::new(Vec::new()),
            signatures: RwLock::new(HashMap::new()),
        }
    }

    // === Scripting ===

    /// Add a plain-text message with the given headers
    pub fn add_message(&self, id: &str, thread_id: &str, headers: &[(&str, &str)], body: &str) {
        let payload = MessagePart {
            mime_type: Some("text/plain".to_string()),
            headers: Some(
                headers
                    .iter()
                    .map(|(name, value)| Header {
                        name: name.to_string(),
                        value: value.to_string(),
                    })
                    .collect(),
            ),
            body: Some(MessageBody {
                size: Some(body.len() as u32),
                data: Some(BASE64_URL_SAFE_NO_PAD.encode(body)),
                attachment_id: None,
            }),
            ..MessagePart::default()
        };
        self.insert_message(GmailMessage {
            id: id.to_string(),
            thread_id: thread_id.to_string(),
            payload: Some(payload),
            ..GmailMessage::default()
        });
    }

    /// Add a fully specified message
    pub fn insert_message(&self, message: GmailMessage) {
        self.messages.write().unwrap().push(message);
    }

    /// Append a history page; pages are chained by generated tokens
    pub fn push_history_page(
        &self,
        records: Vec<HistoryRecord>,
        mailbox_cursor: Option<HistoryCursor>,
    ) {
        self.history_pages.write().unwrap().push(HistoryPage {
            records,
            next_page_token: None,
            mailbox_cursor,
        });
    }

    /// Register a send-as alias with an empty signature
    pub fn add_send_as(&self, email: &str) {
        self.signatures
            .write()
            .unwrap()
            .insert(email.to_string(), String::new());
    }

    /// Current signature of a send-as alias
    pub fn signature(&self, email: &str) -> Option<String> {
        self.signatures.read().unwrap().get(email).cloned()
    }

    /// Start cursors below `floor` are reported as stale
    pub fn set_history_floor(&self, floor: HistoryCursor) {
        *self.history_floor.write().unwrap() = floor;
    }

    /// Current mailbox history id, returned by watch and profile
    pub fn set_history_id(&self, cursor: HistoryCursor) {
        *self.history_id.write().unwrap() = cursor;
    }

    /// Make every call fail with an authorization error
    pub fn revoke_authorization(&self) {
        *self.revoked.write().unwrap() = true;
    }

    /// Leave `id` unanswered in grouped calls
    pub fn drop_batch_reply(&self, id: &str) {
        self.dropped_replies.write().unwrap().insert(MessageId::new(id));
    }

    /// Fail the next grouped call as a whole
    pub fn fail_next_batch(&self, error: SyncError) {
        self.batch_failures.lock().unwrap().push(error);
    }

    // === Recorded traffic ===

    pub fn list_calls(&self) -> Vec<PageRequest> {
        self.list_calls.lock().unwrap().clone()
    }

    /// Size of each grouped call, in call order
    pub fn batch_calls(&self) -> Vec<usize> {
        self.batch_calls.lock().unwrap().clone()
    }

    pub fn history_calls(&self) -> Vec<HistoryRequest> {
        self.history_calls.lock().unwrap().clone()
    }

    pub fn watch_requests(&self) -> Vec<WatchRequest> {
        self.watch_requests.lock().unwrap().clone()
    }

    pub fn stop_calls(&self) -> usize {
        *self.stop_calls.lock().unwrap()
    }

    pub fn sent_messages(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_watching(&self) -> bool {
        *self.watching.read().unwrap()
    }

    fn check_auth(&self) -> SyncResult<()> {
        if *self.revoked.read().unwrap() {
            return Err(SyncError::Authorization("Invalid Credentials".to_string()));
        }
        Ok(())
    }

    fn lookup(&self, id: &MessageId) -> SyncResult<GmailMessage> {
        self.messages
            .read()
            .unwrap()
            .iter()
            .find(|m| m.id == id.as_str())
            .cloned()
            .ok_or_else(|| SyncError::Api {
                status: 404,
                message: format!("Requested entity was not found: {}", id),
            })
    }
}

/// Case-insensitive match against header values and body text
fn matches_query(message: &GmailMessage, query: &str) -> bool {
    let needle = query.to_lowercase();
    let Some(payload) = &message.payload else {
        return false;
    };
    let in_headers = payload
        .headers
        .iter()
        .flatten()
        .any(|h| h.value.to_lowercase().contains(&needle));
    let in_body = crate::gmail::flatten_body(payload)
        .ok()
        .flatten()
        .is_some_and(|b| String::from_utf8_lossy(&b).to_lowercase().contains(&needle));
    in_headers || in_body
}

fn parse_token(token: Option<&str>) -> SyncResult<usize> {
    token
        .map(|t| {
            t.parse::<usize>()
                .map_err(|_| SyncError::Api {
                    status: 400,
                    message: format!("Invalid pageToken {t:?}"),
                })
        })
        .transpose()
        .map(Option::unwrap_or_default)
}

impl MailboxApi for InMemoryMailbox {
    fn list_messages(
        &self,
        _auth: &Authorization,
        request: &PageRequest,
    ) -> SyncResult<PageResult<MessageRef>> {
        self.check_auth()?;
        self.list_calls.lock().unwrap().push(request.clone());

        if request.page_size == 0 || request.page_size > self.max_page_size {
            return Err(SyncError::Api {
                status: 400,
                message: format!("Invalid maxResults {}", request.page_size),
            });
        }

        let messages = self.messages.read().unwrap();
        let matching: Vec<&GmailMessage> = messages
            .iter()
            .filter(|m| request.query.as_deref().is_none_or(|q| matches_query(m, q)))
            .collect();

        let offset = parse_token(request.page_token.as_deref())?;
        let end = (offset + request.page_size).min(matching.len());
        let items = matching
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|m| MessageRef::new(m.id.clone(), m.thread_id.clone()))
            .collect();
        let next_page_token = (end < matching.len()).then(|| end.to_string());

        Ok(PageResult::new(items, next_page_token))
    }

    fn get_message(&self, _auth: &Authorization, id: &MessageId) -> SyncResult<GmailMessage> {
        self.check_auth()?;
        self.lookup(id)
    }

    fn batch_get_messages(
        &self,
        _auth: &Authorization,
        ids: &[MessageId],
    ) -> SyncResult<Vec<BatchReply<GmailMessage>>> {
        self.check_auth()?;
        self.batch_calls.lock().unwrap().push(ids.len());

        {
            let mut failures = self.batch_failures.lock().unwrap();
            if !failures.is_empty() {
                return Err(failures.remove(0));
            }
        }

        let dropped = self.dropped_replies.read().unwrap();
        // Answer in reverse order; callers must match by index
        Ok(ids
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, id)| !dropped.contains(*id))
            .map(|(index, id)| BatchReply {
                index,
                result: self.lookup(id),
            })
            .collect())
    }

    fn send_message(
        &self,
        _auth: &Authorization,
        raw: &[u8],
        content_type: &str,
    ) -> SyncResult<MessageRef> {
        self.check_auth()?;
        if content_type != "message/rfc822" {
            return Err(SyncError::Api {
                status: 400,
                message: format!("Unsupported content type {content_type}"),
            });
        }

        let mut sent = self.sent.lock().unwrap();
        sent.push(raw.to_vec());
        let id = format!("sent-{}", sent.len());

        self.insert_message(GmailMessage {
            id: id.clone(),
            thread_id: id.clone(),
            label_ids: Some(vec!["SENT".to_string()]),
            payload: Some(MessagePart {
                body: Some(MessageBody {
                    size: Some(raw.len() as u32),
                    data: Some(BASE64_URL_SAFE_NO_PAD.encode(raw)),
                    attachment_id: None,
                }),
                ..MessagePart::default()
            }),
            ..GmailMessage::default()
        });

        Ok(MessageRef::new(id.clone(), id))
    }

    fn update_send_as_signature(
        &self,
        _auth: &Authorization,
        send_as_email: &str,
        signature: &str,
    ) -> SyncResult<String> {
        self.check_auth()?;
        let mut signatures = self.signatures.write().unwrap();
        let Some(current) = signatures.get_mut(send_as_email) else {
            return Err(SyncError::Api {
                status: 404,
                message: format!("Send-as alias not found: {send_as_email}"),
            });
        };
        *current = signature.to_string();
        Ok(current.clone())
    }

    fn watch(&self, _auth: &Authorization, request: &WatchRequest) -> SyncResult<Subscription> {
        self.check_auth()?;
        self.watch_requests.lock().unwrap().push(request.clone());
        let topic = request.topic_name.as_str();
        let valid = topic.starts_with("projects/")
            && topic
                .split_once("/topics/")
                .is_some_and(|(_, name)| !name.is_empty());
        if !valid {
            return Err(SyncError::InvalidTopic(format!(
                "Invalid topicName does not match projects/*/topics/*: {topic}"
            )));
        }

        *self.watching.write().unwrap() = true;
        Ok(Subscription::new(
            Utc::now() + Duration::days(WATCH_TTL_DAYS),
            *self.history_id.read().unwrap(),
        ))
    }

    fn stop(&self, _auth: &Authorization) -> SyncResult<()> {
        self.check_auth()?;
        *self.stop_calls.lock().unwrap() += 1;
        *self.watching.write().unwrap() = false;
        Ok(())
    }

    fn list_history(
        &self,
        _auth: &Authorization,
        request: &HistoryRequest,
    ) -> SyncResult<HistoryPage> {
        self.check_auth()?;
        self.history_calls.lock().unwrap().push(request.clone());

        if request.start < *self.history_floor.read().unwrap() {
            return Err(SyncError::StaleCursor {
                start: request.start,
            });
        }

        let pages = self.history_pages.read().unwrap();
        let index = parse_token(request.page_token.as_deref())?;
        let Some(page) = pages.get(index) else {
            return Ok(HistoryPage {
                mailbox_cursor: Some(*self.history_id.read().unwrap()),
                ..HistoryPage::default()
            });
        };

        let records = page
            .records
            .iter()
            .filter(|r| HistoryCursor::parse(&r.id).is_ok_and(|id| id > request.start))
            .cloned()
            .collect();
        let next_page_token = (index + 1 < pages.len()).then(|| (index + 1).to_string());

        Ok(HistoryPage {
            records,
            next_page_token,
            mailbox_cursor: page.mailbox_cursor,
        })
    }

    fn get_profile(&self, _auth: &Authorization) -> SyncResult<Profile> {
        self.check_auth()?;
        Ok(Profile {
            email_address: "me@example.com".to_string(),
            history_id: *self.history_id.read().unwrap(),
        })
    }
}
