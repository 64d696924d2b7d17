//! Push-notification subscription lifecycle
//!
//! ```text
//! Unsubscribed --subscribe--> Subscribed --expiry--> Expired
//!       ^                         |                     |
//!       +-------unsubscribe-------+----subscribe--------+
//! ```
//!
//! An expired subscription is not renewed implicitly. Changes made while it
//! was lapsed may be missing from the feed, so callers must subscribe again
//! and treat the gap like a stale cursor.

use anyhow::Result;
use chrono::{DateTime, Utc};
use config::ConfigDir;
use log::{debug, info, warn};

use super::timing;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::gmail::Authorization;
use crate::gmail::api::WatchRequest;
use crate::models::{HistoryCursor, LabelId, Subscription, WatchState};
use crate::remote::MailboxApi;

/// Only labels in the filter trigger notifications
const LABEL_FILTER_INCLUDE: &str = "include";

/// Where a [`WatchController`] is in the subscription lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchStatus {
    Unsubscribed,
    Subscribed,
    Expired,
}

/// Owns the one watch a session may hold
pub struct WatchController<'a> {
    api: &'a dyn MailboxApi,
    subscription: Option<Subscription>,
    topic: Option<String>,
    label_filter: Vec<LabelId>,
}

impl<'a> WatchController<'a> {
    pub fn new(api: &'a dyn MailboxApi) -> Self {
        Self {
            api,
            subscription: None,
            topic: None,
            label_filter: Vec::new(),
        }
    }

    /// Resume from a subscription created by an earlier session
    pub fn restore(api: &'a dyn MailboxApi, subscription: Subscription) -> Self {
        Self {
            subscription: Some(subscription),
            ..Self::new(api)
        }
    }

    /// Resume from the state saved in `dir`, if any
    ///
    /// Topic and labels are restored too when the file records them, so a
    /// loaded watch can be renewed.
    pub fn load(api: &'a dyn MailboxApi, dir: &ConfigDir) -> Result<Self> {
        let Some(state) = dir.load_json_opt::<WatchState>(WatchState::FILE_NAME)? else {
            return Ok(Self::new(api));
        };
        let Some(subscription) = state.to_subscription() else {
            warn!("Ignoring saved watch with invalid expiration {}", state.expiration);
            return Ok(Self::new(api));
        };
        debug!(
            "Restored watch on {:?} expiring at {} at cursor {}",
            state.topic, subscription.expires_at, subscription.current_cursor
        );
        Ok(Self {
            topic: state.topic,
            label_filter: state.label_ids,
            ..Self::restore(api, subscription)
        })
    }

    /// Persist the subscription to `dir`, or clear it when unsubscribed
    pub fn save(&self, dir: &ConfigDir) -> Result<()> {
        match &self.subscription {
            Some(subscription) => {
                let mut state = WatchState::from(subscription);
                if let Some(topic) = &self.topic {
                    state = state.with_filter(topic.as_str(), self.label_filter.clone());
                }
                dir.save_json(WatchState::FILE_NAME, &state)?;
            }
            None => dir.remove(WatchState::FILE_NAME)?,
        }
        Ok(())
    }

    /// Start a watch on `topic` for the given labels
    ///
    /// Replaces any current or expired subscription. The returned cursor is
    /// where incremental sync should start.
    pub fn subscribe(
        &mut self,
        auth: &Authorization,
        topic: &str,
        label_filter: &[LabelId],
    ) -> SyncResult<Subscription> {
        if topic.trim().is_empty() {
            return Err(SyncError::InvalidTopic(topic.to_string()));
        }

        let request = WatchRequest {
            topic_name: topic.to_string(),
            label_ids: label_filter.iter().map(|l| l.as_str().to_string()).collect(),
            label_filter_action: LABEL_FILTER_INCLUDE.to_string(),
        };
        let subscription = self.api.watch(auth, &request)?;

        info!(
            "Watching {} until {} from cursor {}",
            topic, subscription.expires_at, subscription.current_cursor
        );
        self.subscription = Some(subscription);
        self.topic = Some(topic.to_string());
        self.label_filter = label_filter.to_vec();
        Ok(subscription)
    }

    /// Subscribe again with the topic and labels of the last `subscribe`
    ///
    /// Fails with `InvalidTopic` when no topic is known, either because the
    /// controller never subscribed or it was loaded from a file without one.
    pub fn renew(&mut self, auth: &Authorization) -> SyncResult<Subscription> {
        let Some(topic) = self.topic.clone() else {
            return Err(SyncError::InvalidTopic(
                "no topic recorded to renew; subscribe first".to_string(),
            ));
        };
        let labels = self.label_filter.clone();
        self.subscribe(auth, &topic, &labels)
    }

    /// Renew when the watch is within the configured margin of expiry
    ///
    /// Returns the new subscription, or `None` when no renewal was due.
    pub fn renew_if_due(
        &mut self,
        auth: &Authorization,
        config: &SyncConfig,
    ) -> SyncResult<Option<Subscription>> {
        if !self.renewal_due_for(config) {
            return Ok(None);
        }
        info!("Watch renewal due, renewing");
        self.renew(auth).map(Some)
    }

    /// Stop the watch
    ///
    /// Only a live subscription is stopped remotely; otherwise this is a
    /// local no-op. On failure the subscription is kept.
    pub fn unsubscribe(&mut self, auth: &Authorization) -> SyncResult<()> {
        match self.state() {
            WatchStatus::Unsubscribed => {
                debug!("Unsubscribe with no active watch");
                return Ok(());
            }
            WatchStatus::Expired => {
                debug!("Dropping expired watch without a remote call");
            }
            WatchStatus::Subscribed => {
                self.api.stop(auth).inspect_err(|e| {
                    warn!("Failed to stop watch: {}", e);
                })?;
                info!("Stopped watch");
            }
        }
        self.subscription = None;
        Ok(())
    }

    pub fn state(&self) -> WatchStatus {
        self.state_at(Utc::now())
    }

    pub fn state_at(&self, now: DateTime<Utc>) -> WatchStatus {
        match &self.subscription {
            None => WatchStatus::Unsubscribed,
            Some(sub) if sub.is_expired_at(now) => WatchStatus::Expired,
            Some(_) => WatchStatus::Subscribed,
        }
    }

    pub fn subscription(&self) -> Option<Subscription> {
        self.subscription
    }

    /// Cursor incremental sync should resume from, while the watch is live
    pub fn current_cursor(&self) -> Option<HistoryCursor> {
        match self.state() {
            WatchStatus::Subscribed => self.subscription.map(|s| s.current_cursor),
            _ => None,
        }
    }

    /// Move the cursor forward after a successful reconciliation
    ///
    /// Returns `false` and leaves the cursor alone when `cursor` is not
    /// ahead of it or there is no subscription.
    pub fn advance(&mut self, cursor: HistoryCursor) -> bool {
        match &mut self.subscription {
            Some(sub) if cursor > sub.current_cursor => {
                debug!("Advancing watch cursor {} -> {}", sub.current_cursor, cursor);
                sub.current_cursor = cursor;
                true
            }
            _ => false,
        }
    }

    /// True when a live watch is within `margin_secs` of expiry
    pub fn renewal_due(&self, margin_secs: u64) -> bool {
        self.state() == WatchStatus::Subscribed
            && self
                .subscription
                .is_some_and(|s| timing::renewal_due(s.expires_at, margin_secs))
    }

    /// `renewal_due` with the margin from `config`
    pub fn renewal_due_for(&self, config: &SyncConfig) -> bool {
        self.renewal_due(config.watch_renewal_margin_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryMailbox;
    use chrono::Duration;
    use tempfile::TempDir;

    const TOPIC: &str = "projects/acme/topics/mail";

    fn auth() -> Authorization {
        Authorization::bearer("token")
    }

    #[test]
    fn test_subscribe_then_unsubscribe() {
        let mailbox = InMemoryMailbox::new();
        mailbox.set_history_id(HistoryCursor::new(500));
        let mut watch = WatchController::new(&mailbox);
        assert_eq!(watch.state(), WatchStatus::Unsubscribed);
        assert_eq!(watch.current_cursor(), None);

        let sub = watch.subscribe(&auth(), TOPIC, &[LabelId::unread()]).unwrap();
        assert_eq!(sub.current_cursor, HistoryCursor::new(500));
        assert_eq!(watch.state(), WatchStatus::Subscribed);
        assert_eq!(watch.current_cursor(), Some(HistoryCursor::new(500)));
        assert!(mailbox.is_watching());

        watch.unsubscribe(&auth()).unwrap();
        assert_eq!(watch.state(), WatchStatus::Unsubscribed);
        assert_eq!(mailbox.stop_calls(), 1);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let mailbox = InMemoryMailbox::new();
        let mut watch = WatchController::new(&mailbox);
        watch.unsubscribe(&auth()).unwrap();
        watch.unsubscribe(&auth()).unwrap();
        assert_eq!(mailbox.stop_calls(), 0);
    }

    #[test]
    fn test_empty_topic_rejected_locally() {
        let mailbox = InMemoryMailbox::new();
        let mut watch = WatchController::new(&mailbox);
        let err = watch.subscribe(&auth(), "  ", &[]).unwrap_err();
        assert!(matches!(err, SyncError::InvalidTopic(_)));
        assert!(!mailbox.is_watching());
        assert_eq!(watch.state(), WatchStatus::Unsubscribed);
    }

    #[test]
    fn test_malformed_topic_rejected_remotely() {
        let mailbox = InMemoryMailbox::new();
        let mut watch = WatchController::new(&mailbox);
        let err = watch.subscribe(&auth(), "not-a-topic", &[]).unwrap_err();
        assert!(matches!(err, SyncError::InvalidTopic(_)));
        assert_eq!(watch.state(), WatchStatus::Unsubscribed);
    }

    #[test]
    fn test_expired_requires_explicit_resubscribe() {
        let mailbox = InMemoryMailbox::new();
        let lapsed = Subscription::new(Utc::now() - Duration::minutes(1), HistoryCursor::new(9));
        let mut watch = WatchController::restore(&mailbox, lapsed);

        assert_eq!(watch.state(), WatchStatus::Expired);
        assert_eq!(watch.current_cursor(), None);
        assert!(!watch.renewal_due(3600));

        // Dropping an expired watch makes no remote call
        watch.unsubscribe(&auth()).unwrap();
        assert_eq!(mailbox.stop_calls(), 0);
        assert_eq!(watch.state(), WatchStatus::Unsubscribed);
    }

    #[test]
    fn test_status_at_expiry_boundary() {
        let mailbox = InMemoryMailbox::new();
        let expires = Utc::now() + Duration::hours(1);
        let watch =
            WatchController::restore(&mailbox, Subscription::new(expires, HistoryCursor::new(1)));
        assert_eq!(
            watch.state_at(expires - Duration::seconds(1)),
            WatchStatus::Subscribed
        );
        assert_eq!(watch.state_at(expires), WatchStatus::Expired);
        assert!(watch.renewal_due(7200));
        assert!(!watch.renewal_due(60));
    }

    #[test]
    fn test_advance_is_monotonic() {
        let mailbox = InMemoryMailbox::new();
        mailbox.set_history_id(HistoryCursor::new(10));
        let mut watch = WatchController::new(&mailbox);
        assert!(!watch.advance(HistoryCursor::new(50)));

        watch.subscribe(&auth(), TOPIC, &[]).unwrap();
        assert!(watch.advance(HistoryCursor::new(20)));
        assert!(!watch.advance(HistoryCursor::new(15)));
        assert_eq!(watch.current_cursor(), Some(HistoryCursor::new(20)));
    }

    #[test]
    fn test_renew_reuses_topic() {
        let mailbox = InMemoryMailbox::new();
        let mut watch = WatchController::new(&mailbox);
        assert!(matches!(
            watch.renew(&auth()),
            Err(SyncError::InvalidTopic(_))
        ));

        watch.subscribe(&auth(), TOPIC, &[LabelId::unread()]).unwrap();
        mailbox.set_history_id(HistoryCursor::new(77));
        let renewed = watch.renew(&auth()).unwrap();
        assert_eq!(renewed.current_cursor, HistoryCursor::new(77));
    }

    #[test]
    fn test_save_and_load_state() {
        let tmp = TempDir::new().unwrap();
        let dir = ConfigDir::at(tmp.path());
        let mailbox = InMemoryMailbox::new();
        mailbox.set_history_id(HistoryCursor::new(1234));

        let mut watch = WatchController::new(&mailbox);
        watch.subscribe(&auth(), TOPIC, &[]).unwrap();
        watch.save(&dir).unwrap();
        assert!(dir.exists(WatchState::FILE_NAME));

        let restored = WatchController::load(&mailbox, &dir).unwrap();
        assert_eq!(restored.state(), WatchStatus::Subscribed);
        assert_eq!(restored.current_cursor(), Some(HistoryCursor::new(1234)));

        watch.unsubscribe(&auth()).unwrap();
        watch.save(&dir).unwrap();
        assert!(!dir.exists(WatchState::FILE_NAME));
        let empty = WatchController::load(&mailbox, &dir).unwrap();
        assert_eq!(empty.state(), WatchStatus::Unsubscribed);
    }

    #[test]
    fn test_loaded_watch_can_renew() {
        let tmp = TempDir::new().unwrap();
        let dir = ConfigDir::at(tmp.path());
        let mailbox = InMemoryMailbox::new();
        mailbox.set_history_id(HistoryCursor::new(40));

        let mut watch = WatchController::new(&mailbox);
        watch.subscribe(&auth(), TOPIC, &[LabelId::unread()]).unwrap();
        watch.save(&dir).unwrap();
        drop(watch);

        let mut restored = WatchController::load(&mailbox, &dir).unwrap();
        mailbox.set_history_id(HistoryCursor::new(41));
        let renewed = restored.renew(&auth()).unwrap();
        assert_eq!(renewed.current_cursor, HistoryCursor::new(41));

        let request = mailbox.watch_requests().pop().unwrap();
        assert_eq!(request.topic_name, TOPIC);
        assert_eq!(request.label_ids, vec!["UNREAD".to_string()]);
    }

    #[test]
    fn test_renew_without_recorded_topic() {
        let tmp = TempDir::new().unwrap();
        let dir = ConfigDir::at(tmp.path());
        let expires = Utc::now() + Duration::days(3);
        dir.save_json(
            WatchState::FILE_NAME,
            &WatchState::from(&Subscription::new(expires, HistoryCursor::new(5))),
        )
        .unwrap();

        let mailbox = InMemoryMailbox::new();
        let mut watch = WatchController::load(&mailbox, &dir).unwrap();
        assert_eq!(watch.state(), WatchStatus::Subscribed);
        match watch.renew(&auth()) {
            Err(SyncError::InvalidTopic(msg)) => assert!(msg.contains("subscribe first")),
            other => panic!("expected InvalidTopic, got {:?}", other),
        }
        assert!(!mailbox.is_watching());
    }

    #[test]
    fn test_renew_if_due_uses_configured_margin() {
        let mailbox = InMemoryMailbox::new();
        let mut watch = WatchController::new(&mailbox);
        watch.subscribe(&auth(), TOPIC, &[]).unwrap();
        let watched_until = watch.subscription().unwrap().expires_at;

        let config = SyncConfig {
            watch_renewal_margin_secs: 60,
            ..SyncConfig::default()
        };
        assert!(!watch.renewal_due_for(&config));
        assert_eq!(watch.renew_if_due(&auth(), &config).unwrap(), None);

        // A margin wider than the watch lifetime makes renewal due now
        let remaining = (watched_until - Utc::now()).num_seconds().max(0) as u64;
        let config = SyncConfig {
            watch_renewal_margin_secs: remaining + 3600,
            ..SyncConfig::default()
        };
        assert!(watch.renewal_due_for(&config));
        assert!(watch.renew_if_due(&auth(), &config).unwrap().is_some());
    }
}
