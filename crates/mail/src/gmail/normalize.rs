//! Gmail API response normalization
//!
//! Converts full Gmail messages to [`MessageSummary`] values.

use base64::prelude::*;
use log::warn;

use super::api::{GmailMessage, MessagePart};
use crate::error::{SyncError, SyncResult};
use crate::models::{Headers, MessageId, MessageSummary, ThreadId};

/// Normalize a Gmail API message to a summary
///
/// Body data that no base64 alphabet accepts is a `Parse` error rather than
/// an absent body.
pub fn normalize_message(gmail_msg: GmailMessage) -> SyncResult<MessageSummary> {
    let payload = gmail_msg
        .payload
        .as_ref()
        .ok_or_else(|| SyncError::Parse(format!("message {} has no payload", gmail_msg.id)))?;

    let headers: Headers = payload
        .headers
        .iter()
        .flatten()
        .map(|h| (h.name.as_str(), h.value.as_str()))
        .collect();

    let body = flatten_body(payload).map_err(|e| {
        warn!("Message {} has an undecodable body: {}", gmail_msg.id, e);
        SyncError::Parse(format!("message {}: undecodable body data", gmail_msg.id))
    })?;

    Ok(MessageSummary {
        id: MessageId::new(gmail_msg.id),
        thread_id: ThreadId::new(gmail_msg.thread_id),
        headers,
        body,
    })
}

/// Body bytes of a payload
///
/// The top-level body wins when it carries data. Otherwise the leaf parts'
/// bodies are concatenated in part order, descending into nested
/// multiparts. `Ok(None)` when no part carries data; `Err` when some part
/// carries data that cannot be decoded.
pub fn flatten_body(payload: &MessagePart) -> SyncResult<Option<Vec<u8>>> {
    if let Some(data) = part_data(payload)? {
        return Ok(Some(data));
    }

    let Some(parts) = payload.parts.as_deref() else {
        return Ok(None);
    };
    let mut out = Vec::new();
    let mut found = false;
    collect_leaf_bodies(parts, &mut out, &mut found)?;
    Ok(found.then_some(out))
}

fn collect_leaf_bodies(
    parts: &[MessagePart],
    out: &mut Vec<u8>,
    found: &mut bool,
) -> SyncResult<()> {
    for part in parts {
        match part.parts.as_deref() {
            Some(nested) if !nested.is_empty() => collect_leaf_bodies(nested, out, found)?,
            _ => {
                if let Some(data) = part_data(part)? {
                    out.extend_from_slice(&data);
                    *found = true;
                }
            }
        }
    }
    Ok(())
}

fn part_data(part: &MessagePart) -> SyncResult<Option<Vec<u8>>> {
    let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref()) else {
        return Ok(None);
    };
    decode_base64_body(data).map(Some).ok_or_else(|| {
        SyncError::Parse(format!("undecodable body data in part {:?}", part.part_id))
    })
}

/// Decode base64-encoded body data
///
/// Gmail uses URL-safe base64 but padding can vary, so we try multiple decoders.
fn decode_base64_body(data: &str) -> Option<Vec<u8>> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE};

    let decoders: &[&base64::engine::GeneralPurpose] =
        &[&BASE64_URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD];

    decoders.iter().find_map(|decoder| decoder.decode(data).ok())
}
