//! Message flag bits and their mapping to EWS properties

use crate::ews::types::RemoteMessage;

/// Flag bits stored in `server_flags` and `local_flags`.
///
/// The persisted metadata record stores the raw u32, so these values are
/// part of the on-disk format and must not be renumbered.
pub const SEEN: u32 = 1 << 0;
pub const ANSWERED: u32 = 1 << 1;
pub const FLAGGED: u32 = 1 << 2;
pub const DELETED: u32 = 1 << 3;
pub const DRAFT: u32 = 1 << 4;
pub const FORWARDED: u32 = 1 << 5;
pub const JUNK: u32 = 1 << 6;
pub const NOTJUNK: u32 = 1 << 7;
pub const HIGH_PRIORITY: u32 = 1 << 8;

/// Bits whose only effect is routing to a move-or-delete batch rather than
/// an UpdateItem flag diff.
pub const MOVE_OR_DELETE_MASK: u32 = DELETED | JUNK | NOTJUNK;

/// PidTagIconIndex values encoding replied/forwarded state.
pub const ICON_REPLIED: i32 = 261;
pub const ICON_FORWARDED: i32 = 262;

/// Derive the server flag bits from fetched message properties.
pub fn from_remote(msg: &RemoteMessage) -> u32 {
    let mut flags = 0;
    if msg.is_read {
        flags |= SEEN;
    }
    if msg.is_draft {
        flags |= DRAFT;
    }
    if msg.is_flagged {
        flags |= FLAGGED;
    }
    if msg.high_importance {
        flags |= HIGH_PRIORITY;
    }
    match msg.icon_index {
        Some(ICON_REPLIED) => flags |= ANSWERED,
        Some(ICON_FORWARDED) => flags |= FORWARDED,
        _ => {}
    }
    flags
}

/// Icon code for the answered/forwarded state of the given flags, if any.
///
/// EWS has no separate answered/forwarded properties; both are folded into
/// the one icon index, forwarded winning when both bits are set.
pub fn icon_index_for(flags: u32) -> Option<i32> {
    if flags & FORWARDED != 0 {
        Some(ICON_FORWARDED)
    } else if flags & ANSWERED != 0 {
        Some(ICON_REPLIED)
    } else {
        None
    }
}
