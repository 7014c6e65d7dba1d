//! Remote operation surface consumed by the sync engines
//!
//! The trait wraps the EWS operations as blocking calls returning structured
//! results or classified [`EwsError`] kinds. Implementations decide how the
//! wire traffic happens; the engines only see this interface.

use chrono::{DateTime, Utc};

use super::types::{
    BatchResponse, Disposition, FetchShape, FetchedItem, FlagUpdate, FolderDeltaPage,
    FreeBusyEvent, ItemDeltaPage, RemoteFolder, RemoteItemId,
};
use crate::error::EwsResult;

/// Blocking client for the EWS operations used by synchronization.
///
/// Every method classifies failures into the closed [`crate::EwsError`]
/// taxonomy before returning; no raw transport error crosses this boundary.
pub trait RemoteItemClient: Send + Sync {
    /// SyncFolderItems: fetch one page of the item delta for a folder.
    ///
    /// Fails with `InvalidSyncState` on a stale cookie, which is the only
    /// error kind the caller recovers from internally.
    fn sync_folder_items(
        &self,
        folder_id: &str,
        sync_state: Option<&str>,
        max_changes: usize,
    ) -> EwsResult<ItemDeltaPage>;

    /// SyncFolderHierarchy: fetch one page of the folder tree delta.
    fn sync_folder_hierarchy(&self, sync_state: Option<&str>) -> EwsResult<FolderDeltaPage>;

    /// GetItems with a property set chosen by item class.
    ///
    /// A returned entry may itself be [`FetchedItem::Error`]; callers must
    /// check per item rather than assuming the call-level result covers all.
    fn get_items(&self, ids: &[String], shape: FetchShape) -> EwsResult<Vec<FetchedItem>>;

    /// Fetch the full MIME content of a single message.
    fn get_message_content(&self, id: &str) -> EwsResult<Vec<u8>>;

    /// CreateItem from MIME content with the given disposition.
    fn create_item(
        &self,
        folder_id: &str,
        content: &[u8],
        disposition: Disposition,
    ) -> EwsResult<RemoteItemId>;

    /// UpdateItem batch applying per-message flag diffs.
    fn update_flags(&self, updates: &[FlagUpdate]) -> EwsResult<BatchResponse>;

    /// DeleteItem batch. `hard` bypasses the deleted-items folder.
    fn delete_items(&self, ids: &[String], hard: bool) -> EwsResult<BatchResponse>;

    /// MoveItem batch into the destination folder.
    fn move_items(&self, dest_folder_id: &str, ids: &[String]) -> EwsResult<BatchResponse>;

    /// CopyItem batch into the destination folder.
    fn copy_items(&self, dest_folder_id: &str, ids: &[String]) -> EwsResult<BatchResponse>;

    /// FindFolder: full listing of a folder subtree.
    ///
    /// The public folder tree offers no delta protocol, so discovery under
    /// it always goes through this full listing.
    fn find_folder(&self, root_folder_id: &str) -> EwsResult<Vec<RemoteFolder>>;

    /// GetFreeBusy for a foreign mailbox over a time window.
    fn get_free_busy(
        &self,
        mailbox: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EwsResult<Vec<FreeBusyEvent>>;

    /// CreateItem-based suppression of a pending read receipt.
    ///
    /// Fails with `ReadReceiptNotPending` when there is nothing to
    /// suppress; callers treat that as success.
    fn suppress_read_receipt(&self, item_id: &RemoteItemId) -> EwsResult<()>;
}
