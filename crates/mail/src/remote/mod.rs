//! Remote mailbox abstraction
//!
//! Provides a trait-based abstraction over the mailbox service so the sync
//! engine can run against Gmail or an in-process mailbox.

mod memory;
mod traits;

pub use memory::InMemoryMailbox;
pub use traits::{BatchReply, HistoryPage, HistoryRequest, HistoryType, MailboxApi, Profile};
