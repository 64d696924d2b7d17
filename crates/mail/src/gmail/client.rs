//! Gmail API HTTP client
//!
//! Implements [`MailboxApi`] over the Gmail v1 REST surface.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use chrono::{TimeZone, Utc};
use log::debug;
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

use super::Authorization;
use super::api::{
    ErrorResponse, GmailMessage, HistoryResponse, ListMessagesResponse, ProfileResponse, SendAs,
    SendAsPatch, WatchRequest, WatchResponse,
};
use super::batch::{self, BatchRequest};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::models::{HistoryCursor, MessageId, MessageRef, PageRequest, PageResult, Subscription};
use crate::remote::{BatchReply, HistoryPage, HistoryRequest, MailboxApi, Profile};

/// Largest response body the client will buffer
const MAX_BODY_BYTES: u64 = 512 * 1024 * 1024;

/// Gmail API client
pub struct GmailClient {
    agent: ureq::Agent,
    user_id: String,
    base_url: String,
    upload_url: String,
    batch_url: String,
}

impl GmailClient {
    /// Gmail API base URL
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";
    /// Media upload base URL
    const UPLOAD_URL: &'static str = "https://gmail.googleapis.com/upload/gmail/v1";

    /// Create a client for `user_id` ("me" for the authorized user)
    pub fn new(user_id: impl Into<String>, timeout: Option<Duration>) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(timeout)
            .build()
            .into();

        Self {
            agent,
            user_id: user_id.into(),
            base_url: Self::BASE_URL.to_string(),
            upload_url: Self::UPLOAD_URL.to_string(),
            batch_url: batch::BATCH_URL.to_string(),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.user_id.clone(), Some(config.http_timeout()))
    }

    /// Point the client at different endpoints (proxies, emulators)
    pub fn with_endpoints(
        mut self,
        base_url: impl Into<String>,
        upload_url: impl Into<String>,
        batch_url: impl Into<String>,
    ) -> Self {
        self.base_url = base_url.into();
        self.upload_url = upload_url.into();
        self.batch_url = batch_url.into();
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn user_url(&self, base: &str, path: &str) -> SyncResult<Url> {
        let raw = format!(
            "{}/users/{}/{}",
            base,
            urlencoding::encode(&self.user_id),
            path
        );
        Url::parse(&raw).map_err(|e| SyncError::Parse(format!("invalid URL {raw}: {e}")))
    }

    fn get(&self, auth: &Authorization, url: &Url) -> SyncResult<(u16, String)> {
        let response = self
            .agent
            .get(url.as_str())
            .header("Authorization", &auth.header_value())
            .call()
            .map_err(transport_error)?;
        read_response(response)
    }

    fn post_json<B: serde::Serialize>(
        &self,
        auth: &Authorization,
        url: &Url,
        body: &B,
    ) -> SyncResult<(u16, String)> {
        let response = self
            .agent
            .post(url.as_str())
            .header("Authorization", &auth.header_value())
            .send_json(body)
            .map_err(transport_error)?;
        read_response(response)
    }
}

impl MailboxApi for GmailClient {
    fn list_messages(
        &self,
        auth: &Authorization,
        request: &PageRequest,
    ) -> SyncResult<PageResult<MessageRef>> {
        let mut url = self.user_url(&self.base_url, "messages")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("maxResults", &request.page_size.to_string());
            if let Some(q) = &request.query {
                query.append_pair("q", q);
            }
            if let Some(token) = &request.page_token {
                query.append_pair("pageToken", token);
            }
        }

        let list: ListMessagesResponse = expect_json(self.get(auth, &url)?)?;
        let items: Vec<MessageRef> = list
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(|m| MessageRef::new(m.id, m.thread_id))
            .collect();

        debug!(
            "Listed {} messages (estimate {:?}, more={})",
            items.len(),
            list.result_size_estimate,
            list.next_page_token.is_some()
        );
        Ok(PageResult::new(items, list.next_page_token))
    }

    fn get_message(&self, auth: &Authorization, id: &MessageId) -> SyncResult<GmailMessage> {
        let path = format!("messages/{}", urlencoding::encode(id.as_str()));
        let mut url = self.user_url(&self.base_url, &path)?;
        url.query_pairs_mut().append_pair("format", "full");

        expect_json(self.get(auth, &url)?)
    }

    fn batch_get_messages(
        &self,
        auth: &Authorization,
        ids: &[MessageId],
    ) -> SyncResult<Vec<BatchReply<GmailMessage>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let request = BatchRequest::get_messages(&self.user_id, ids);
        debug!("Sending batch of {} message requests", ids.len());

        let mut response = self
            .agent
            .post(&self.batch_url)
            .header("Authorization", &auth.header_value())
            .header("Content-Type", &request.content_type())
            .send(request.body.as_bytes())
            .map_err(transport_error)?;

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let status = response.status().as_u16();
        let body = read_body(&mut response)?;

        if !is_success(status) {
            return Err(classify_status(status, &body));
        }

        let replies: Vec<BatchReply<GmailMessage>> = batch::parse_response(&content_type, &body)?
            .into_iter()
            .filter(|part| part.index < ids.len())
            .map(|part| BatchReply {
                index: part.index,
                result: expect_json((part.status, part.body)),
            })
            .collect();

        debug!("Batch answered {}/{} requests", replies.len(), ids.len());
        Ok(replies)
    }

    fn send_message(
        &self,
        auth: &Authorization,
        raw: &[u8],
        content_type: &str,
    ) -> SyncResult<MessageRef> {
        let mut url = self.user_url(&self.upload_url, "messages/send")?;
        url.query_pairs_mut().append_pair("uploadType", "media");

        let response = self
            .agent
            .post(url.as_str())
            .header("Authorization", &auth.header_value())
            .header("Content-Type", content_type)
            .send(raw)
            .map_err(transport_error)?;

        let sent: super::api::MessageRef = expect_json(read_response(response)?)?;
        debug!("Sent message {} ({} bytes)", sent.id, raw.len());
        Ok(MessageRef::new(sent.id, sent.thread_id))
    }

    fn update_send_as_signature(
        &self,
        auth: &Authorization,
        send_as_email: &str,
        signature: &str,
    ) -> SyncResult<String> {
        let path = format!("settings/sendAs/{}", urlencoding::encode(send_as_email));
        let url = self.user_url(&self.base_url, &path)?;
        let patch = SendAsPatch {
            signature: signature.to_string(),
        };

        let response = self
            .agent
            .patch(url.as_str())
            .header("Authorization", &auth.header_value())
            .send_json(&patch)
            .map_err(transport_error)?;

        let updated: SendAs = expect_json(read_response(response)?)?;
        debug!("Updated signature of {}", updated.send_as_email);
        Ok(updated.signature)
    }

    fn watch(&self, auth: &Authorization, request: &WatchRequest) -> SyncResult<Subscription> {
        let url = self.user_url(&self.base_url, "watch")?;
        let (status, body) = self.post_json(auth, &url, request)?;

        if matches!(status, 400 | 404) {
            return Err(SyncError::InvalidTopic(error_message(&body)));
        }
        let watch: WatchResponse = expect_json((status, body))?;

        let expiration_ms: i64 = watch
            .expiration
            .parse()
            .map_err(|_| SyncError::Parse(format!("invalid expiration {:?}", watch.expiration)))?;
        let expires_at = Utc
            .timestamp_millis_opt(expiration_ms)
            .single()
            .ok_or_else(|| SyncError::Parse(format!("expiration out of range: {expiration_ms}")))?;

        Ok(Subscription::new(
            expires_at,
            HistoryCursor::parse(&watch.history_id)?,
        ))
    }

    fn stop(&self, auth: &Authorization) -> SyncResult<()> {
        let url = self.user_url(&self.base_url, "stop")?;
        let response = self
            .agent
            .post(url.as_str())
            .header("Authorization", &auth.header_value())
            .send_empty()
            .map_err(transport_error)?;

        let (status, body) = read_response(response)?;
        if is_success(status) {
            Ok(())
        } else {
            Err(classify_status(status, &body))
        }
    }

    fn list_history(
        &self,
        auth: &Authorization,
        request: &HistoryRequest,
    ) -> SyncResult<HistoryPage> {
        let mut url = self.user_url(&self.base_url, "history")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("startHistoryId", &request.start.to_string());
            if let Some(label) = &request.label_id {
                query.append_pair("labelId", label.as_str());
            }
            for ty in &request.history_types {
                query.append_pair("historyTypes", ty.as_str());
            }
            if let Some(token) = &request.page_token {
                query.append_pair("pageToken", token);
            }
        }

        let (status, body) = self.get(auth, &url)?;
        if status == 404 {
            // History ID expired or invalid
            return Err(SyncError::StaleCursor {
                start: request.start,
            });
        }

        let history: HistoryResponse = expect_json((status, body))?;
        let mailbox_cursor = history
            .history_id
            .as_deref()
            .map(HistoryCursor::parse)
            .transpose()?;

        Ok(HistoryPage {
            records: history.history.unwrap_or_default(),
            next_page_token: history.next_page_token,
            mailbox_cursor,
        })
    }

    fn get_profile(&self, auth: &Authorization) -> SyncResult<Profile> {
        let url = self.user_url(&self.base_url, "profile")?;
        let profile: ProfileResponse = expect_json(self.get(auth, &url)?)?;

        Ok(Profile {
            history_id: HistoryCursor::parse(&profile.history_id)?,
            email_address: profile.email_address,
        })
    }
}

fn transport_error(e: ureq::Error) -> SyncError {
    SyncError::Transport(e.to_string())
}

fn read_body(response: &mut ureq::http::Response<ureq::Body>) -> SyncResult<String> {
    response
        .body_mut()
        .with_config()
        .limit(MAX_BODY_BYTES)
        .read_to_string()
        .map_err(transport_error)
}

fn read_response(mut response: ureq::http::Response<ureq::Body>) -> SyncResult<(u16, String)> {
    let status = response.status().as_u16();
    let body = read_body(&mut response)?;
    Ok((status, body))
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Deserialize a successful response, or classify the failure
fn expect_json<T: DeserializeOwned>((status, body): (u16, String)) -> SyncResult<T> {
    if !is_success(status) {
        return Err(classify_status(status, &body));
    }
    Ok(serde_json::from_str(&body)?)
}

/// Map a non-success HTTP status to the error taxonomy
pub(crate) fn classify_status(status: u16, body: &str) -> SyncError {
    let message = error_message(body);
    match status {
        401 => SyncError::Authorization(message),
        429 => SyncError::RateLimited(message),
        403 if is_rate_limit_reason(body) => SyncError::RateLimited(message),
        403 => SyncError::Authorization(message),
        _ => SyncError::Api { status, message },
    }
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(err) if !err.error.message.is_empty() => err.error.message,
        _ => body.trim().to_string(),
    }
}

fn is_rate_limit_reason(body: &str) -> bool {
    serde_json::from_str::<ErrorResponse>(body).is_ok_and(|err| {
        err.error.errors.iter().any(|d| {
            matches!(
                d.reason.as_str(),
                "rateLimitExceeded" | "userRateLimitExceeded" | "quotaExceeded"
            )
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        let body = r#"{"error":{"code":401,"message":"Invalid Credentials","errors":[{"reason":"authError"}]}}"#;
        assert_eq!(
            classify_status(401, body),
            SyncError::Authorization("Invalid Credentials".to_string())
        );

        let body = r#"{"error":{"code":403,"message":"slow down","errors":[{"reason":"userRateLimitExceeded"}]}}"#;
        assert!(matches!(classify_status(403, body), SyncError::RateLimited(_)));

        let body = r#"{"error":{"code":403,"message":"forbidden","errors":[{"reason":"forbidden"}]}}"#;
        assert!(matches!(classify_status(403, body), SyncError::Authorization(_)));

        assert!(matches!(classify_status(429, ""), SyncError::RateLimited(_)));
        assert_eq!(
            classify_status(500, "backend error"),
            SyncError::Api {
                status: 500,
                message: "backend error".to_string()
            }
        );
    }

    #[test]
    fn test_expect_json() {
        let msg: GmailMessage =
            expect_json((200, r#"{"id":"m1","threadId":"t1"}"#.to_string())).unwrap();
        assert_eq!(msg.id, "m1");

        let err = expect_json::<GmailMessage>((200, "not json".to_string())).unwrap_err();
        assert!(matches!(err, SyncError::Parse(_)));

        let err = expect_json::<GmailMessage>((404, "{}".to_string())).unwrap_err();
        assert!(matches!(err, SyncError::Api { status: 404, .. }));
    }

    #[test]
    fn test_send_as_response() {
        let updated: SendAs = expect_json((
            200,
            r#"{"sendAsEmail":"ops@example.com","signature":"<b>Ops</b>","isPrimary":false}"#
                .to_string(),
        ))
        .unwrap();
        assert_eq!(updated.send_as_email, "ops@example.com");
        assert_eq!(updated.signature, "<b>Ops</b>");
        assert_eq!(
            serde_json::to_string(&SendAsPatch {
                signature: "hi".to_string()
            })
            .unwrap(),
            r#"{"signature":"hi"}"#
        );
    }

    #[test]
    fn test_user_url_encodes_user() {
        let client = GmailClient::new("someone@example.com", None);
        let url = client.user_url(GmailClient::BASE_URL, "messages").unwrap();
        assert_eq!(
            url.as_str(),
            "https://gmail.googleapis.com/gmail/v1/users/someone%40example.com/messages"
        );
    }
}
