//! Gmail batch endpoint wire format
//!
//! A batch is one `multipart/mixed` POST whose parts are embedded HTTP
//! requests. Each part carries a `Content-ID` of the form `<item-N>`, where
//! N is the position of the request in the batch; the server echoes it as
//! `<response-item-N>` on the matching response part, which may arrive in
//! any order.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{SyncError, SyncResult};
use crate::models::MessageId;

/// Batch endpoint for the Gmail API
pub const BATCH_URL: &str = "https://www.googleapis.com/batch/gmail/v1";

static BOUNDARY_COUNTER: AtomicU64 = AtomicU64::new(0);

/// An encoded multipart batch body
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub boundary: String,
    pub body: String,
}

impl BatchRequest {
    /// Encode one `messages.get` request per id
    pub fn get_messages(user_id: &str, ids: &[MessageId]) -> Self {
        let boundary = next_boundary();
        let mut body = String::new();
        for (index, id) in ids.iter().enumerate() {
            body.push_str(&format!("--{boundary}\r\n"));
            body.push_str("Content-Type: application/http\r\n");
            body.push_str(&format!("Content-ID: <item-{index}>\r\n"));
            body.push_str("\r\n");
            body.push_str(&format!(
                "GET /gmail/v1/users/{}/messages/{}?format=full\r\n",
                urlencoding::encode(user_id),
                urlencoding::encode(id.as_str())
            ));
            body.push_str("\r\n");
        }
        body.push_str(&format!("--{boundary}--\r\n"));
        Self { boundary, body }
    }

    pub fn content_type(&self) -> String {
        format!("multipart/mixed; boundary={}", self.boundary)
    }
}

fn next_boundary() -> String {
    let seq = BOUNDARY_COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("mailsync_batch_{}_{nanos}_{seq}", std::process::id())
}

/// One embedded HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPart {
    /// Position of the originating request in the batch
    pub index: usize,
    pub status: u16,
    pub body: String,
}

/// Split a batch response into its embedded responses
///
/// Parts without a recognizable `Content-ID` or status line are skipped;
/// the caller treats the corresponding requests as unanswered.
pub fn parse_response(content_type: &str, body: &str) -> SyncResult<Vec<BatchPart>> {
    let boundary = boundary_from_content_type(content_type).ok_or_else(|| {
        SyncError::Parse(format!(
            "batch response missing boundary in content-type {content_type:?}"
        ))
    })?;

    let separator = format!("--{boundary}");
    let normalized = body.replace("\r\n", "\n");

    let mut parts = Vec::new();
    for raw in normalized.split(&separator) {
        let raw = raw.trim_start_matches('\n');
        if raw.trim().is_empty() || raw.starts_with("--") {
            continue;
        }
        match parse_part(raw) {
            Some(part) => parts.push(part),
            None => log::warn!("Skipping unparseable batch response part"),
        }
    }
    Ok(parts)
}

fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|param| {
        param
            .trim()
            .strip_prefix("boundary=")
            .map(|value| value.trim_matches('"').to_string())
    })
}

fn parse_part(raw: &str) -> Option<BatchPart> {
    // Outer MIME headers, blank line, then the embedded HTTP response
    let (outer_headers, http) = raw.split_once("\n\n")?;
    let index = outer_headers
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("content-id")
                .then(|| value.trim())
        })
        .and_then(parse_content_id)?;

    let http = http.trim_start_matches('\n');
    let (status_line, rest) = http.split_once('\n').unwrap_or((http, ""));
    let status = status_line
        .strip_prefix("HTTP/")?
        .split_whitespace()
        .nth(1)?
        .parse::<u16>()
        .ok()?;

    // Embedded headers end at the first blank line; there may be none
    let body = match rest.strip_prefix('\n') {
        Some(body) => body,
        None => rest.split_once("\n\n").map(|(_, body)| body).unwrap_or(""),
    }
    .trim()
    .to_string();

    Some(BatchPart {
        index,
        status,
        body,
    })
}

fn parse_content_id(value: &str) -> Option<usize> {
    let id = value.trim_start_matches('<').trim_end_matches('>');
    let id = id.strip_prefix("response-").unwrap_or(id);
    id.strip_prefix("item-")?.parse().ok()
}
