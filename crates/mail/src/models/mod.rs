//! Domain models for mailbox retrieval and change tracking

mod history;
mod label;
mod message;
mod page;
mod subscription;
mod thread;

pub use history::{ChangeEvent, ChangeSet, HistoryCursor};
pub use label::LabelId;
pub use message::{Headers, MessageId, MessageRef, MessageSummary};
pub use page::{PageRequest, PageResult};
pub use subscription::{Subscription, WatchState};
pub use thread::ThreadId;
