//! Wire-level types for the EWS operations consumed by the sync engines
//!
//! These mirror the structures the SOAP layer produces after parsing; the
//! XML encoding itself lives behind the codec seam in [`crate::ews::http`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EwsError;

/// Maximum number of items requested or mutated per RPC round.
///
/// EWS caps sync and fetch responses; batches above this size are rejected
/// or truncated by the server, so every paging and chunking loop in the
/// engines uses this bound.
pub const MAX_FETCH_COUNT: usize = 100;

/// Server-issued identifier plus version stamp for a remote item.
///
/// Two fetches of the same `id` with equal `change_key` are guaranteed to
/// return identical content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteItemId {
    pub id: String,
    pub change_key: String,
}

impl RemoteItemId {
    pub fn new(id: impl Into<String>, change_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            change_key: change_key.into(),
        }
    }
}

/// Item class as reported (or guessed) for a remote item.
///
/// The class decides which property set the second fetch round requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemClass {
    Message,
    /// Generic item with no more specific class.
    Generic,
    Post,
    Event,
    Task,
    Memo,
    /// The server embedded an error where an item was expected. Callers of
    /// get_items must check for this per returned item.
    Error,
}

impl ItemClass {
    /// Stable integer encoding used in the persisted per-message metadata.
    pub fn as_i32(self) -> i32 {
        match self {
            ItemClass::Message => 1,
            ItemClass::Generic => 2,
            ItemClass::Post => 3,
            ItemClass::Event => 4,
            ItemClass::Task => 5,
            ItemClass::Memo => 6,
            ItemClass::Error => 0,
        }
    }

    pub fn from_i32(value: i32) -> ItemClass {
        match value {
            1 => ItemClass::Message,
            3 => ItemClass::Post,
            4 => ItemClass::Event,
            5 => ItemClass::Task,
            6 => ItemClass::Memo,
            0 => ItemClass::Error,
            _ => ItemClass::Generic,
        }
    }
}

/// One change entry from a SyncFolderItems delta page.
///
/// Changes within a page arrive in the order the server recorded them; the
/// engines apply deletions first to free UID slots before creates.
#[derive(Debug, Clone)]
pub enum ItemChange {
    Create {
        item: RemoteItemId,
        class: ItemClass,
    },
    Update {
        item: RemoteItemId,
        class: ItemClass,
    },
    Delete {
        id: String,
    },
    /// Read-flag-only change; applied without a second fetch round.
    ReadFlagChange {
        id: String,
        is_read: bool,
    },
}

/// One page of the item delta protocol.
#[derive(Debug, Clone)]
pub struct ItemDeltaPage {
    /// The new opaque sync cookie; persist after applying the page.
    pub sync_state: String,
    /// True when the server has no further changes at this time.
    pub includes_last: bool,
    pub changes: Vec<ItemChange>,
}

/// One change entry from a SyncFolderHierarchy delta page.
#[derive(Debug, Clone)]
pub enum FolderChange {
    Create(RemoteFolder),
    Update(RemoteFolder),
    Delete { id: String },
}

/// One page of the hierarchy delta protocol.
#[derive(Debug, Clone)]
pub struct FolderDeltaPage {
    pub sync_state: String,
    pub includes_last: bool,
    pub changes: Vec<FolderChange>,
}

/// Which mailbox a folder belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FolderScope {
    /// The account's own mailbox.
    Personal,
    /// Organization-wide public folder.
    Public,
    /// Delegated folder owned by another mailbox.
    Foreign,
}

/// Folder descriptor as returned by hierarchy sync and FindFolder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFolder {
    pub id: String,
    pub parent_id: Option<String>,
    pub display_name: String,
    pub change_key: String,
    /// Well-known role name ("inbox", "sentitems", ...) when the server
    /// reports one. Only ever honored on folder creation.
    pub distinguished_id: Option<String>,
    pub scope: FolderScope,
    pub total_count: u32,
    pub unread_count: u32,
    pub child_count: u32,
}

/// Message properties fetched during the second sync round.
#[derive(Debug, Clone)]
pub struct RemoteMessage {
    pub item_id: RemoteItemId,
    pub class: ItemClass,
    pub is_read: bool,
    pub is_draft: bool,
    pub is_flagged: bool,
    pub high_importance: bool,
    /// PidTagIconIndex; encodes replied/forwarded state.
    pub icon_index: Option<i32>,
    pub categories: Vec<String>,
    pub subject: Option<String>,
}

/// Reference to a detached instance of a recurring event.
#[derive(Debug, Clone)]
pub struct OccurrenceRef {
    pub item_id: RemoteItemId,
    /// RECURRENCE-ID of the detached instance, derived from the original
    /// start of the occurrence it replaces.
    pub recurrence_id: String,
}

/// Calendar, task or memo item properties.
#[derive(Debug, Clone)]
pub struct RemoteCalendarItem {
    pub item_id: RemoteItemId,
    pub class: ItemClass,
    /// iCalendar UID; distinct from the EWS item id.
    pub uid: String,
    pub recurrence_id: Option<String>,
    pub summary: String,
    pub location: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Detached instances carried by a recurring master, to be fetched and
    /// merged as additional rows keyed by (uid, recurrence-id).
    pub modified_occurrences: Vec<OccurrenceRef>,
}

/// One item from a GetItems response.
///
/// The server may embed a per-item error rather than failing the call.
#[derive(Debug, Clone)]
pub enum FetchedItem {
    Message(RemoteMessage),
    Calendar(RemoteCalendarItem),
    Error { id: Option<String>, message: String },
}

/// Property set requested from GetItems, chosen by item class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchShape {
    /// IDs only; the sync call itself uses this for server-load reasons.
    IdOnly,
    /// Headers and flags for mail messages.
    MessageHeaders,
    /// Generic and post items; a reduced property set.
    ItemHeaders,
    /// Full calendar event properties including recurrence data.
    Event,
    /// Task and memo properties.
    TaskOrMemo,
}

impl FetchShape {
    /// The shape used to refresh an item of the given class.
    pub fn for_class(class: ItemClass) -> FetchShape {
        match class {
            ItemClass::Message => FetchShape::MessageHeaders,
            ItemClass::Event => FetchShape::Event,
            ItemClass::Task | ItemClass::Memo => FetchShape::TaskOrMemo,
            _ => FetchShape::ItemHeaders,
        }
    }
}

/// How CreateItem handles the new item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    SaveOnly,
    SendOnly,
    SendAndSaveCopy,
}

/// Follow-up flag metadata pushed alongside flag diffs.
#[derive(Debug, Clone, PartialEq)]
pub struct FollowUpChange {
    /// 0 = none, 1 = complete, 2 = flagged.
    pub status: i32,
    pub due: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
}

/// Per-message flag diff for one UpdateItem batch entry.
///
/// Every field is optional; only the bits that differ between the
/// last-known server flags and the current local flags are filled in.
#[derive(Debug, Clone, Default)]
pub struct FlagUpdate {
    pub item_id: Option<RemoteItemId>,
    pub set_read: Option<bool>,
    pub set_flagged: Option<bool>,
    pub set_high_importance: Option<bool>,
    /// Replied/forwarded icon code when either derived bit changed.
    pub icon_index: Option<i32>,
    /// Full replacement category list when the label set differs.
    pub categories: Option<Vec<String>>,
    pub follow_up: Option<FollowUpChange>,
}

impl FlagUpdate {
    /// True when no property change is encoded.
    pub fn is_empty(&self) -> bool {
        self.set_read.is_none()
            && self.set_flagged.is_none()
            && self.set_high_importance.is_none()
            && self.icon_index.is_none()
            && self.categories.is_none()
            && self.follow_up.is_none()
    }
}

/// Result of one entry in a batched mutation call.
#[derive(Debug)]
pub struct BatchOutcome {
    pub id: String,
    /// New item id (for move/copy) on success.
    pub outcome: Result<Option<RemoteItemId>, EwsError>,
}

/// Response to a batched mutation call.
///
/// The server can report an overall failure while still having processed a
/// subset of entries; callers must reconcile local state for exactly the
/// succeeded subset before propagating `error`.
#[derive(Debug, Default)]
pub struct BatchResponse {
    pub entries: Vec<BatchOutcome>,
    pub error: Option<EwsError>,
}

/// Synthetic event from a GetFreeBusy fetch.
///
/// These carry no server-side change key; the reconciler diffs them by
/// content equality instead.
#[derive(Debug, Clone, PartialEq)]
pub struct FreeBusyEvent {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub summary: String,
    pub location: Option<String>,
}

impl FreeBusyEvent {
    /// Content key used for set-difference against the cached event list.
    pub fn content_key(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}",
            self.start.timestamp(),
            self.end.timestamp(),
            self.summary,
            self.location.as_deref().unwrap_or("")
        )
    }
}
