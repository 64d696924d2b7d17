//! History reconciliation
//!
//! Walks the change log from a start cursor across every page and reduces
//! it to one event per distinct message. Any page failure, including a
//! stale cursor, fails the whole walk: a partial change set would let the
//! caller advance past changes it never saw.

use log::{debug, info, warn};
use std::collections::HashSet;

use super::CancelFlag;
use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::gmail::Authorization;
use crate::gmail::api::{HistoryMessage, HistoryRecord};
use crate::models::{ChangeEvent, ChangeSet, HistoryCursor, LabelId, MessageId, MessageRef};
use crate::remote::{HistoryPage, HistoryRequest, HistoryType, MailboxApi};

/// Reduces paged history records to a deduplicated change set
#[derive(Debug, Clone, Default)]
pub struct HistoryReconciler {
    label_id: Option<LabelId>,
    history_types: Vec<HistoryType>,
    cancel: Option<CancelFlag>,
}

impl HistoryReconciler {
    /// Reconciler with no label or type filter
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            label_id: config.history_label.clone(),
            history_types: config.history_types.clone(),
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Reconcile against a remote mailbox using this reconciler's filters
    pub fn reconcile_remote(
        &self,
        api: &dyn MailboxApi,
        auth: &Authorization,
        start: HistoryCursor,
    ) -> SyncResult<ChangeSet> {
        self.reconcile(start, |start, page_token| {
            let request = HistoryRequest {
                start,
                page_token: page_token.map(str::to_string),
                label_id: self.label_id.clone(),
                history_types: self.history_types.clone(),
            };
            api.list_history(auth, &request)
        })
    }

    /// Walk every page from `start` and reduce it to a change set
    ///
    /// `fetch_page` receives the start cursor and the continuation token.
    pub fn reconcile<F>(&self, start: HistoryCursor, mut fetch_page: F) -> SyncResult<ChangeSet>
    where
        F: FnMut(HistoryCursor, Option<&str>) -> SyncResult<HistoryPage>,
    {
        let mut walk = Walk::new(start);
        let mut token: Option<String> = None;

        loop {
            if let Some(cancel) = &self.cancel {
                cancel.check()?;
            }

            let page = fetch_page(start, token.as_deref()).inspect_err(|e| {
                if e.is_stale_cursor() {
                    warn!("History cursor {} is stale, full resync required", start);
                }
            })?;

            walk.changes.pages += 1;
            if page.mailbox_cursor.is_some() {
                walk.changes.mailbox_cursor = page.mailbox_cursor;
            }
            debug!(
                "History page {}: {} records",
                walk.changes.pages,
                page.records.len()
            );

            for record in &page.records {
                walk.apply(record);
            }

            match page.next_page_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        let changes = walk.finish();
        info!(
            "History from {} to {}: {} changes over {} pages ({} touched only)",
            start,
            changes.end_cursor,
            changes.events.len(),
            changes.pages,
            changes.touched.len()
        );
        Ok(changes)
    }
}

/// Accumulated state of one reconciliation
struct Walk {
    seen: HashSet<MessageId>,
    touched_seen: HashSet<MessageId>,
    changes: ChangeSet,
}

impl Walk {
    fn new(start: HistoryCursor) -> Self {
        Self {
            seen: HashSet::new(),
            touched_seen: HashSet::new(),
            changes: ChangeSet {
                end_cursor: start,
                ..ChangeSet::default()
            },
        }
    }

    fn apply(&mut self, record: &HistoryRecord) {
        match HistoryCursor::parse(&record.id) {
            Ok(cursor) => self.changes.end_cursor = self.changes.end_cursor.max(cursor),
            Err(_) => warn!("History record with invalid id {:?}", record.id),
        }

        for message in record.messages.iter().flatten() {
            let Some(message) = resolve(message) else {
                continue;
            };
            debug!("History record {} touched {}", record.id, message.id);
            if !self.seen.contains(&message.id) && self.touched_seen.insert(message.id.clone()) {
                self.changes.touched.push(message);
            }
        }

        for added in record.messages_added.iter().flatten() {
            match added.message.as_ref().and_then(resolve) {
                Some(message) => {
                    if self.seen.insert(message.id.clone()) {
                        self.changes.events.push(ChangeEvent::MessageAdded(message));
                    }
                }
                None => warn!("Dropping messageAdded entry without an id in record {}", record.id),
            }
        }

        for change in record.labels_added.iter().flatten() {
            match change.message.as_ref().and_then(resolve) {
                Some(message) => {
                    if self.seen.insert(message.id.clone()) {
                        let labels = change
                            .label_ids
                            .iter()
                            .flatten()
                            .map(|l| LabelId::new(l.as_str()))
                            .collect();
                        self.changes.events.push(ChangeEvent::LabelAdded(message, labels));
                    }
                }
                None => warn!("Dropping labelAdded entry without an id in record {}", record.id),
            }
        }
    }

    fn finish(mut self) -> ChangeSet {
        // A message both touched and later added is reported once, as added
        let seen = &self.seen;
        self.changes.touched.retain(|m| !seen.contains(&m.id));
        self.changes
    }
}

fn resolve(message: &HistoryMessage) -> Option<MessageRef> {
    let id = message.id.as_deref().filter(|id| !id.is_empty())?;
    Some(MessageRef::new(
        id,
        message.thread_id.as_deref().unwrap_or_default(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::gmail::api::{HistoryLabelChange, HistoryMessageChange};

    fn msg(id: &str) -> HistoryMessage {
        HistoryMessage {
            id: Some(id.to_string()),
            thread_id: Some(format!("t-{id}")),
            label_ids: None,
        }
    }

    fn added(record_id: u64, ids: &[&str]) -> HistoryRecord {
        HistoryRecord {
            id: record_id.to_string(),
            messages: Some(ids.iter().map(|id| msg(id)).collect()),
            messages_added: Some(
                ids.iter()
                    .map(|id| HistoryMessageChange {
                        message: Some(msg(id)),
                    })
                    .collect(),
            ),
            labels_added: None,
        }
    }

    fn labelled(record_id: u64, id: &str, labels: &[&str]) -> HistoryRecord {
        HistoryRecord {
            id: record_id.to_string(),
            messages: Some(vec![msg(id)]),
            messages_added: None,
            labels_added: Some(vec![HistoryLabelChange {
                message: Some(msg(id)),
                label_ids: Some(labels.iter().map(|l| l.to_string()).collect()),
            }]),
        }
    }

    fn touched(record_id: u64, id: &str) -> HistoryRecord {
        HistoryRecord {
            id: record_id.to_string(),
            messages: Some(vec![msg(id)]),
            ..HistoryRecord::default()
        }
    }

    /// Serve `pages` in order, chained by index tokens
    fn pages(
        pages: Vec<Vec<HistoryRecord>>,
    ) -> impl FnMut(HistoryCursor, Option<&str>) -> SyncResult<HistoryPage> {
        move |_, token| {
            let index: usize = token.map(|t| t.parse().unwrap()).unwrap_or(0);
            Ok(HistoryPage {
                records: pages[index].clone(),
                next_page_token: (index + 1 < pages.len()).then(|| (index + 1).to_string()),
                mailbox_cursor: Some(HistoryCursor::new(999)),
            })
        }
    }

    #[test]
    fn test_dedups_across_pages() {
        let changes = HistoryReconciler::new()
            .reconcile(
                HistoryCursor::new(100),
                pages(vec![
                    vec![added(101, &["a", "b"])],
                    vec![labelled(102, "a", &["UNREAD"]), added(103, &["c"])],
                ]),
            )
            .unwrap();

        assert_eq!(
            changes.message_ids(),
            vec![MessageId::new("a"), MessageId::new("b"), MessageId::new("c")]
        );
        assert_eq!(changes.end_cursor, HistoryCursor::new(103));
        assert_eq!(changes.mailbox_cursor, Some(HistoryCursor::new(999)));
        assert_eq!(changes.pages, 2);
        assert!(changes.touched.is_empty());
    }

    #[test]
    fn test_label_event_carries_labels() {
        let changes = HistoryReconciler::new()
            .reconcile(
                HistoryCursor::new(1),
                pages(vec![vec![labelled(5, "x", &["UNREAD", "INBOX"])]]),
            )
            .unwrap();
        assert_eq!(
            changes.events,
            vec![ChangeEvent::LabelAdded(
                MessageRef::new("x", "t-x"),
                vec![LabelId::new("UNREAD"), LabelId::new("INBOX")]
            )]
        );
    }

    #[test]
    fn test_touch_events_are_not_changes() {
        let changes = HistoryReconciler::new()
            .reconcile(
                HistoryCursor::new(1),
                pages(vec![vec![touched(2, "t1")], vec![touched(3, "t2")]]),
            )
            .unwrap();
        assert!(changes.is_empty());
        assert_eq!(changes.touched.len(), 2);
        assert_eq!(changes.end_cursor, HistoryCursor::new(3));
    }

    #[test]
    fn test_touch_then_added_emits_once() {
        let changes = HistoryReconciler::new()
            .reconcile(
                HistoryCursor::new(1),
                pages(vec![vec![touched(2, "m")], vec![added(3, &["m"])]]),
            )
            .unwrap();
        assert_eq!(changes.message_ids(), vec![MessageId::new("m")]);
        assert!(changes.touched.is_empty());
    }

    #[test]
    fn test_touch_of_earlier_add_is_not_reported() {
        let changes = HistoryReconciler::new()
            .reconcile(
                HistoryCursor::new(1),
                pages(vec![
                    vec![added(2, &["m1"])],
                    vec![touched(3, "m1"), added(4, &["m2"])],
                ]),
            )
            .unwrap();
        assert_eq!(
            changes.message_ids(),
            vec![MessageId::new("m1"), MessageId::new("m2")]
        );
        assert!(changes.touched.is_empty());
        assert_eq!(changes.end_cursor, HistoryCursor::new(4));
        assert_eq!(changes.pages, 2);
    }

    #[test]
    fn test_entries_without_id_are_dropped() {
        let record = HistoryRecord {
            id: "7".to_string(),
            messages: None,
            messages_added: Some(vec![
                HistoryMessageChange { message: None },
                HistoryMessageChange {
                    message: Some(HistoryMessage::default()),
                },
                HistoryMessageChange {
                    message: Some(msg("ok")),
                },
            ]),
            labels_added: None,
        };
        let changes = HistoryReconciler::new()
            .reconcile(HistoryCursor::new(1), pages(vec![vec![record]]))
            .unwrap();
        assert_eq!(changes.message_ids(), vec![MessageId::new("ok")]);
    }

    #[test]
    fn test_empty_history_keeps_start_cursor() {
        let changes = HistoryReconciler::new()
            .reconcile(HistoryCursor::new(42), pages(vec![vec![]]))
            .unwrap();
        assert!(changes.is_empty());
        assert_eq!(changes.end_cursor, HistoryCursor::new(42));
    }

    #[test]
    fn test_stale_cursor_propagates() {
        let start = HistoryCursor::new(5);
        let result = HistoryReconciler::new().reconcile(start, |start, _| {
            Err(SyncError::StaleCursor { start })
        });
        assert_eq!(result, Err(SyncError::StaleCursor { start }));
    }

    #[test]
    fn test_failure_on_later_page_discards_everything() {
        let result = HistoryReconciler::new().reconcile(HistoryCursor::new(1), |_, token| {
            match token {
                None => Ok(HistoryPage {
                    records: vec![added(2, &["a"])],
                    next_page_token: Some("1".to_string()),
                    mailbox_cursor: None,
                }),
                Some(_) => Err(SyncError::Transport("connection reset".to_string())),
            }
        });
        assert!(matches!(result, Err(SyncError::Transport(_))));
    }

    #[test]
    fn test_every_page_uses_start_cursor() {
        let mut starts = Vec::new();
        let mut inner = pages(vec![vec![], vec![], vec![]]);
        HistoryReconciler::new()
            .reconcile(HistoryCursor::new(77), |start, token| {
                starts.push(start);
                inner(start, token)
            })
            .unwrap();
        assert_eq!(starts, vec![HistoryCursor::new(77); 3]);
    }
}
