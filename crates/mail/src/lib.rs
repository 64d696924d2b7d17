//! Mailsync - incremental retrieval and change tracking for Gmail
//!
//! This crate provides the client-side sync layer for a paginated,
//! quota-limited mailbox API:
//! - Token-driven pagination with an item limit ([`Paginator`])
//! - Grouped fetches with per-request completion ([`BatchExecutor`])
//! - History reconciliation into a deduplicated change set ([`HistoryReconciler`])
//! - Push-notification subscription lifecycle ([`WatchController`])
//!
//! Every remote call goes through the [`MailboxApi`] trait and receives an
//! explicit [`Authorization`]. [`GmailClient`] talks to the real service;
//! [`InMemoryMailbox`] is a scripted stand-in for tests.

pub mod config;
pub mod error;
pub mod gmail;
pub mod models;
pub mod remote;
pub mod sync;

pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use gmail::{Authorization, GmailClient};
pub use models::{
    ChangeEvent, ChangeSet, Headers, HistoryCursor, LabelId, MessageId, MessageRef,
    MessageSummary, PageRequest, PageResult, Subscription, ThreadId, WatchState,
};
pub use remote::{
    BatchReply, HistoryPage, HistoryRequest, HistoryType, InMemoryMailbox, MailboxApi, Profile,
};
pub use sync::{
    BatchExecutor, BatchJob, BatchReport, CancelFlag, FetchOutcome, HistoryReconciler,
    LimitPolicy, Paginator, SyncMode, SyncOutcome, SyncSession, WatchController, WatchStatus,
};
