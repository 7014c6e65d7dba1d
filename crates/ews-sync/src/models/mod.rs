//! Domain models for cached mailbox and calendar state

mod calendar;
mod dirty;
pub mod flags;
mod folder;
mod message;
mod sync_state;

pub use calendar::{fold_components, CalendarComponent, CalendarObject};
pub use dirty::DirtyFlagRecord;
pub use folder::{
    folder_flags, well_known_kind, FolderKind, FolderNode, FOREIGN_ROOT_ID, PUBLIC_ROOT_ID,
};
pub use message::{CachedMessage, MessageMeta};
pub use sync_state::{SyncHeader, CACHE_SCHEMA_VERSION};
