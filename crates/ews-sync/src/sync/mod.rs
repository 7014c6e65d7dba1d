//! Sync engines for mailbox and calendar reconciliation
//!
//! Provides idempotent, cookie-driven delta sync that can be safely
//! retried, plus the write-back path for locally-made flag changes.

mod calendar;
mod fetch;
mod folder;
mod hierarchy;
mod transfer;
mod writeback;

pub use calendar::{CalendarChangeReconciler, CalendarChanges, CalendarKind, FreeBusyDiff};
pub use fetch::{fetch_message, Acquire, FetchGuard, InFlightFetchRegistry};
pub use folder::FolderSyncEngine;
pub use hierarchy::{HierarchyChanges, HierarchySyncEngine};
pub use transfer::{copy_messages, delete_messages, move_messages, TransferOutcome};
pub use writeback::{FlagWriteBackQueue, MoveDestinations, WriteBackStats};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{EwsError, EwsResult};

/// How often accumulated change notifications are flushed to the listener
/// during a long-running sync. Rate-limits UI churn on large folders
/// without withholding everything until the end.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// Cooperative cancellation handle, checked at each RPC boundary and each
/// page-loop iteration. Cancellation never rolls back partial progress.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Error out if cancellation was requested.
    pub fn check(&self) -> EwsResult<()> {
        if self.is_cancelled() {
            Err(EwsError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Batch of cache changes reported to the host.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Receives change notifications while a sync is running.
pub trait SyncListener: Send + Sync {
    /// A batch of cache changes was applied for the folder.
    fn on_changes(&self, folder_id: &str, changes: &ChangeSet);

    /// A new sync cookie was persisted for the folder.
    fn on_cookie_updated(&self, _folder_id: &str, _cookie: &str) {}
}

/// Listener that ignores everything.
pub struct NullListener;

impl SyncListener for NullListener {
    fn on_changes(&self, _folder_id: &str, _changes: &ChangeSet) {}
}

/// Accumulates changes and flushes them to the listener at most once per
/// [`FLUSH_INTERVAL`], plus a final unconditional flush.
pub(crate) struct ChangeAccumulator {
    changes: ChangeSet,
    last_flush: Instant,
    interval: Duration,
}

impl ChangeAccumulator {
    pub fn new() -> Self {
        Self::with_interval(FLUSH_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            changes: ChangeSet::default(),
            last_flush: Instant::now(),
            interval,
        }
    }

    pub fn added(&mut self, uid: impl Into<String>) {
        self.changes.added.push(uid.into());
    }

    pub fn updated(&mut self, uid: impl Into<String>) {
        self.changes.updated.push(uid.into());
    }

    pub fn removed(&mut self, uid: impl Into<String>) {
        self.changes.removed.push(uid.into());
    }

    /// Flush if the interval has elapsed since the last flush.
    pub fn maybe_flush(&mut self, listener: &dyn SyncListener, folder_id: &str) {
        if self.last_flush.elapsed() >= self.interval {
            self.flush(listener, folder_id);
        }
    }

    /// Flush whatever has accumulated, resetting the accumulator.
    pub fn flush(&mut self, listener: &dyn SyncListener, folder_id: &str) {
        if !self.changes.is_empty() {
            let changes = std::mem::take(&mut self.changes);
            listener.on_changes(folder_id, &changes);
        }
        self.last_flush = Instant::now();
    }
}

/// Statistics from one sync run.
#[derive(Debug, Default, Clone)]
pub struct SyncStats {
    /// Items fetched from the server during the second round.
    pub items_fetched: usize,
    /// New items stored locally.
    pub items_stored: usize,
    /// Delta entries skipped (change-key match, duplicate create).
    pub items_skipped: usize,
    /// Items removed locally.
    pub items_deleted: usize,
    /// Per-item errors tolerated during the run.
    pub errors: usize,
    /// Duration of the sync operation.
    pub duration_ms: u64,
}
