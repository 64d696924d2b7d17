//! High-level mailbox operations built from the paginator, batch executor
//! and history reconciler

use log::{debug, info, warn};

use super::{BatchExecutor, BatchReport, CancelFlag, HistoryReconciler, Paginator};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::gmail::{Authorization, normalize_message};
use crate::models::{ChangeSet, HistoryCursor, MessageId, MessageRef, MessageSummary, PageRequest};
use crate::remote::MailboxApi;

/// Content type for raw message uploads
const RFC822: &str = "message/rfc822";

/// Summaries fetched in one grouped run
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Successful summaries, in request order
    pub summaries: Vec<MessageSummary>,
    /// Requests that failed, in request order
    pub failures: Vec<(MessageId, SyncError)>,
    pub report: BatchReport,
}

/// How `sync_changes` brought the caller up to date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Incremental,
    /// The cursor was stale; the mailbox was listed from scratch
    FullResync,
}

/// Statistics and results of one `sync_changes` run
#[derive(Debug)]
pub struct SyncOutcome {
    pub mode: SyncMode,
    /// Cursor to resume from next time
    pub cursor: HistoryCursor,
    /// Reconciled changes; `None` after a full resync
    pub changes: Option<ChangeSet>,
    pub fetched: FetchOutcome,
    pub duration_ms: u64,
}

/// One authorized session against a remote mailbox
pub struct SyncSession<'a> {
    api: &'a dyn MailboxApi,
    auth: &'a Authorization,
    config: &'a SyncConfig,
    cancel: CancelFlag,
}

impl<'a> SyncSession<'a> {
    pub fn new(api: &'a dyn MailboxApi, auth: &'a Authorization, config: &'a SyncConfig) -> Self {
        Self {
            api,
            auth,
            config,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Flag that stops this session at the next page or chunk boundary
    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    fn paginator(&self) -> Paginator {
        Paginator::from_config(self.config).with_cancel(self.cancel.clone())
    }

    fn executor(&self) -> BatchExecutor {
        BatchExecutor::from_config(self.config).with_cancel(self.cancel.clone())
    }

    /// List message refs, optionally matching `query`, up to `limit`
    pub fn list_all(&self, query: Option<&str>, limit: usize) -> SyncResult<Vec<MessageRef>> {
        let refs = self.paginator().collect(limit, |token, page_size| {
            let mut request = PageRequest::new(page_size).page_token(token.map(str::to_string));
            if let Some(q) = query {
                request = request.query(q);
            }
            self.api.list_messages(self.auth, &request)
        })?;
        debug!("Listed {} messages (query {:?})", refs.len(), query);
        Ok(refs)
    }

    /// Fetch and normalize one message
    pub fn fetch_summary(&self, id: &MessageId) -> SyncResult<MessageSummary> {
        let message = self.api.get_message(self.auth, id)?;
        normalize_message(message)
    }

    /// Fetch and normalize many messages through grouped calls
    pub fn fetch_summaries(&self, ids: &[MessageId]) -> FetchOutcome {
        let (results, report) = self
            .executor()
            .collect(ids, |chunk| self.api.batch_get_messages(self.auth, chunk));

        let mut outcome = FetchOutcome {
            report,
            ..FetchOutcome::default()
        };
        for (id, result) in results {
            match result.and_then(normalize_message) {
                Ok(summary) => outcome.summaries.push(summary),
                Err(e) => {
                    warn!("Failed to fetch {}: {}", id, e);
                    outcome.failures.push((id, e));
                }
            }
        }
        outcome
    }

    /// List messages matching `query` and fetch their summaries
    pub fn search(&self, query: &str, limit: usize) -> SyncResult<FetchOutcome> {
        let refs = self.list_all(Some(query), limit)?;
        let ids: Vec<MessageId> = refs.into_iter().map(|r| r.id).collect();
        let outcome = self.fetch_summaries(&ids);
        info!(
            "Search {:?}: {} results, {} failures",
            query,
            outcome.summaries.len(),
            outcome.failures.len()
        );
        Ok(outcome)
    }

    /// Send a complete RFC 822 message
    pub fn send_raw(&self, raw: &[u8]) -> SyncResult<MessageRef> {
        let sent = self.api.send_message(self.auth, raw, RFC822)?;
        info!("Sent message {} ({} bytes)", sent.id, raw.len());
        Ok(sent)
    }

    /// Replace the signature of the send-as alias `send_as_email`
    pub fn update_signature(&self, send_as_email: &str, signature: &str) -> SyncResult<String> {
        let updated = self
            .api
            .update_send_as_signature(self.auth, send_as_email, signature)?;
        info!("Updated signature of {}", send_as_email);
        Ok(updated)
    }

    /// Reconcile history from `start` without fetching any messages
    pub fn reconcile(&self, start: HistoryCursor) -> SyncResult<ChangeSet> {
        HistoryReconciler::from_config(self.config)
            .with_cancel(self.cancel.clone())
            .reconcile_remote(self.api, self.auth, start)
    }

    /// Bring the caller up to date from `start`
    ///
    /// Reconciles history and fetches every changed message. A stale cursor
    /// falls back to a full listing; the resume cursor is then taken from
    /// the mailbox profile before listing so nothing slips between the two.
    pub fn sync_changes(&self, start: HistoryCursor) -> SyncResult<SyncOutcome> {
        let started = std::time::Instant::now();

        let (mode, cursor, changes, ids) = match self.reconcile(start) {
            Ok(changes) => {
                let ids = changes.message_ids();
                (SyncMode::Incremental, changes.end_cursor, Some(changes), ids)
            }
            Err(SyncError::StaleCursor { .. }) => {
                warn!("Cursor {} expired, falling back to full resync", start);
                let profile = self.api.get_profile(self.auth)?;
                let refs = self.list_all(None, self.config.resync_limit)?;
                let ids = refs.into_iter().map(|r| r.id).collect();
                (SyncMode::FullResync, profile.history_id, None, ids)
            }
            Err(e) => return Err(e),
        };

        let fetched = self.fetch_summaries(&ids);
        let outcome = SyncOutcome {
            mode,
            cursor,
            changes,
            fetched,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            "Sync ({:?}) complete: {} fetched, {} failed, cursor {} -> {} in {}ms",
            outcome.mode,
            outcome.fetched.summaries.len(),
            outcome.fetched.failures.len(),
            start,
            outcome.cursor,
            outcome.duration_ms
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryMailbox;

    fn mailbox_with(n: usize) -> InMemoryMailbox {
        let mailbox = InMemoryMailbox::new();
        for i in 0..n {
            let subject = format!("Report {i}");
            mailbox.add_message(
                &format!("m{i}"),
                &format!("t{i}"),
                &[("Subject", subject.as_str()), ("From", "alice@example.com")],
                &format!("body {i}"),
            );
        }
        mailbox
    }

    #[test]
    fn test_list_all_respects_limit() {
        let mailbox = mailbox_with(12);
        let config = SyncConfig {
            max_page_size: 5,
            ..SyncConfig::default()
        };
        let auth = Authorization::bearer("t");
        let session = SyncSession::new(&mailbox, &auth, &config);

        let refs = session.list_all(None, 7).unwrap();
        // Second page of 5 crosses the limit and is kept whole
        assert_eq!(refs.len(), 10);
        assert_eq!(mailbox.list_calls().len(), 2);
    }

    #[test]
    fn test_fetch_summary() {
        let mailbox = mailbox_with(1);
        let config = SyncConfig::default();
        let auth = Authorization::bearer("t");
        let session = SyncSession::new(&mailbox, &auth, &config);

        let summary = session.fetch_summary(&MessageId::new("m0")).unwrap();
        assert_eq!(summary.subject(), Some("Report 0"));
        assert_eq!(summary.body_text().as_deref(), Some("body 0"));
    }

    #[test]
    fn test_fetch_summaries_reports_missing() {
        let mailbox = mailbox_with(2);
        let config = SyncConfig::default();
        let auth = Authorization::bearer("t");
        let session = SyncSession::new(&mailbox, &auth, &config);

        let ids = vec![MessageId::new("m1"), MessageId::new("nope"), MessageId::new("m0")];
        let outcome = session.fetch_summaries(&ids);
        let got: Vec<&str> = outcome.summaries.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(got, vec!["m1", "m0"]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].0, MessageId::new("nope"));
        assert_eq!(outcome.report.calls, 1);
    }

    #[test]
    fn test_send_raw_uses_rfc822() {
        let mailbox = InMemoryMailbox::new();
        let config = SyncConfig::default();
        let auth = Authorization::bearer("t");
        let session = SyncSession::new(&mailbox, &auth, &config);

        let raw = b"From: a@example.com\r\nTo: b@example.com\r\nSubject: hi\r\n\r\nhello";
        let sent = session.send_raw(raw).unwrap();
        assert_eq!(sent.id, MessageId::new("sent-1"));
        assert_eq!(mailbox.sent_messages(), vec![raw.to_vec()]);
    }

    #[test]
    fn test_cancelled_session_stops_listing() {
        let mailbox = mailbox_with(3);
        let config = SyncConfig::default();
        let auth = Authorization::bearer("t");
        let session = SyncSession::new(&mailbox, &auth, &config);
        session.cancel_flag().cancel();

        assert_eq!(session.list_all(None, 10), Err(SyncError::Cancelled));
        assert!(mailbox.list_calls().is_empty());
    }

    #[test]
    fn test_update_signature() {
        let mailbox = InMemoryMailbox::new();
        mailbox.add_send_as("support@example.com");
        let config = SyncConfig::default();
        let auth = Authorization::bearer("t");
        let session = SyncSession::new(&mailbox, &auth, &config);

        let sig = session
            .update_signature("support@example.com", "Support desk")
            .unwrap();
        assert_eq!(sig, "Support desk");
        assert_eq!(
            mailbox.signature("support@example.com").as_deref(),
            Some("Support desk")
        );
    }
}
