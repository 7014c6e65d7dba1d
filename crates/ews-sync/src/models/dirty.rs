//! Dirty flag records queued for write-back

use crate::ews::types::FollowUpChange;
use crate::models::flags;

/// One message whose user-visible flags differ from the last-known server
/// flags. Collected by the write-back queue and flushed in bounded batches.
#[derive(Debug, Clone)]
pub struct DirtyFlagRecord {
    pub uid: String,
    pub local_flags: u32,
    pub server_flags: u32,
    /// Full label list when it differs from the server's category list.
    pub labels: Option<Vec<String>>,
    pub follow_up: Option<FollowUpChange>,
    /// A read receipt for this message must be suppressed before any flag
    /// update is pushed.
    pub suppress_read_receipt: bool,
}

impl DirtyFlagRecord {
    pub fn new(uid: impl Into<String>, local_flags: u32, server_flags: u32) -> Self {
        Self {
            uid: uid.into(),
            local_flags,
            server_flags,
            labels: None,
            follow_up: None,
            suppress_read_receipt: false,
        }
    }

    /// Bits that differ between local and server state.
    pub fn changed_bits(&self) -> u32 {
        self.local_flags ^ self.server_flags
    }

    /// True when the only flag change routes to a move-or-delete batch
    /// (deleted / junk / not-junk) rather than an UpdateItem diff.
    pub fn is_move_or_delete_only(&self) -> bool {
        let changed = self.changed_bits();
        changed != 0
            && changed & !flags::MOVE_OR_DELETE_MASK == 0
            && self.labels.is_none()
            && self.follow_up.is_none()
    }
}
