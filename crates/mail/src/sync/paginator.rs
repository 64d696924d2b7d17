//! Token-driven pagination with an item limit
//!
//! The paginator calls a page fetcher with no token, then with each
//! returned continuation token, until either the accumulated item count
//! reaches the limit or the server stops returning a token. Every request
//! asks for `min(limit, max_page_size)` items.

use log::debug;
use serde::{Deserialize, Serialize};

use super::CancelFlag;
use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::models::PageResult;

/// What happens to the items of the page that crosses the limit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitPolicy {
    /// Keep the whole final page; the result may exceed the limit by up to
    /// one page
    #[default]
    AllowOvershoot,
    /// Cut the result to exactly the limit
    Truncate,
}

/// Drives repeated list calls for one paging session
#[derive(Debug, Clone)]
pub struct Paginator {
    max_page_size: usize,
    policy: LimitPolicy,
    cancel: Option<CancelFlag>,
}

impl Paginator {
    pub fn new(max_page_size: usize) -> Self {
        Self {
            max_page_size: max_page_size.max(1),
            policy: LimitPolicy::default(),
            cancel: None,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.max_page_size).with_policy(config.limit_policy)
    }

    pub fn with_policy(mut self, policy: LimitPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Page size requested on every call for `limit`
    pub fn page_size(&self, limit: usize) -> usize {
        limit.min(self.max_page_size)
    }

    /// Collect up to `limit` items
    ///
    /// `fetch_page` receives the continuation token and the page size. Any
    /// fetch error fails the whole collection.
    pub fn collect<T, F>(&self, limit: usize, mut fetch_page: F) -> SyncResult<Vec<T>>
    where
        F: FnMut(Option<&str>, usize) -> SyncResult<PageResult<T>>,
    {
        let mut items = Vec::new();
        if limit == 0 {
            return Ok(items);
        }

        let page_size = self.page_size(limit);
        let mut token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            if let Some(cancel) = &self.cancel {
                cancel.check()?;
            }

            let page = fetch_page(token.as_deref(), page_size)?;
            pages += 1;
            debug!(
                "Page {} returned {} items (total {}, more={})",
                pages,
                page.items.len(),
                items.len() + page.items.len(),
                page.next_page_token.is_some()
            );
            items.extend(page.items);

            if items.len() >= limit {
                break;
            }
            match page.next_page_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        if self.policy == LimitPolicy::Truncate {
            items.truncate(limit);
        }
        Ok(items)
    }
}
