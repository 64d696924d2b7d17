//! Sync engine for paging, batching and change tracking
//!
//! Every operation is synchronous and returns a fresh result; nothing here
//! holds state across calls except the watch controller.

mod batch;
mod cancel;
mod history;
mod paginator;
mod session;
mod timing;
mod watch;

pub use batch::{BatchExecutor, BatchJob, BatchReport, Completion};
pub use cancel::CancelFlag;
pub use history::HistoryReconciler;
pub use paginator::{LimitPolicy, Paginator};
pub use session::{FetchOutcome, SyncMode, SyncOutcome, SyncSession};
pub use timing::{expired, expired_at, renewal_due, renewal_due_at, time_remaining};
pub use watch::{WatchController, WatchStatus};
