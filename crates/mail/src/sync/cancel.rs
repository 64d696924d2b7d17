//! Coarse-grained cancellation checked between pages and batch chunks

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{SyncError, SyncResult};

/// Shared cancellation flag
///
/// Clones observe the same flag. In-flight requests are never interrupted;
/// work stops at the next page or chunk boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancelled
    pub fn check(&self) -> SyncResult<()> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}
