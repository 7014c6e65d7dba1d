//! Storage trait definitions

use anyhow::Result;

use crate::models::{CalendarComponent, MessageMeta, SyncHeader};

/// Per-folder metadata store for cached messages.
///
/// Abstracts over the host framework's summary database. Keys are message
/// UIDs (equal to the server item ids); values are the metadata records the
/// sync engines maintain. Mutations are individually atomic; callers never
/// hold a store lock across a network call.
pub trait MessageInfoStore: Send + Sync {
    /// Get the persisted sync header for a folder.
    fn get_header(&self, folder_id: &str) -> Result<Option<SyncHeader>>;

    /// Persist the sync header for a folder (upsert).
    fn put_header(&self, folder_id: &str, header: &SyncHeader) -> Result<()>;

    fn get_meta(&self, folder_id: &str, uid: &str) -> Result<Option<MessageMeta>>;

    fn put_meta(&self, folder_id: &str, uid: &str, meta: &MessageMeta) -> Result<()>;

    fn delete_meta(&self, folder_id: &str, uid: &str) -> Result<()>;

    fn has_uid(&self, folder_id: &str, uid: &str) -> Result<bool>;

    /// All cached UIDs for a folder, in no particular order.
    fn list_uids(&self, folder_id: &str) -> Result<Vec<String>>;

    fn count(&self, folder_id: &str) -> Result<usize>;

    /// Remove every cached record for a folder, header included.
    fn clear_folder(&self, folder_id: &str) -> Result<()>;
}

/// Component store backing one calendar (or task/memo list).
pub trait CalendarStore: Send + Sync {
    /// The calendar's persisted sync cookie, if any.
    fn get_cookie(&self) -> Result<Option<String>>;

    fn put_cookie(&self, cookie: Option<&str>) -> Result<()>;

    fn get_component(&self, uid: &str, recurrence_id: Option<&str>)
        -> Result<Option<CalendarComponent>>;

    /// Look a component up by its server item id.
    fn find_by_item_id(&self, item_id: &str) -> Result<Option<CalendarComponent>>;

    fn put_component(&self, component: CalendarComponent) -> Result<()>;

    /// Remove the master and all detached instances for a uid. Returns the
    /// number of rows removed.
    fn remove_uid(&self, uid: &str) -> Result<usize>;

    /// Remove a single `(uid, recurrence-id)` row, leaving the rest of the
    /// series in place.
    fn remove_component(&self, uid: &str, recurrence_id: Option<&str>) -> Result<()>;

    fn list_components(&self) -> Result<Vec<CalendarComponent>>;

    /// Drop all components and the cookie.
    fn clear(&self) -> Result<()>;
}
