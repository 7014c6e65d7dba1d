//! EWS sync crate - Incremental mailbox and calendar synchronization
//!
//! This crate provides platform-independent Exchange Web Services sync
//! functionality including:
//! - Wire-level operation DTOs and a blocking HTTP transport shell
//! - Domain models (folders, message metadata, calendar components)
//! - Storage trait abstractions with in-memory and SQLite implementations
//! - Idempotent, cookie-driven sync engines for items and the folder tree
//! - On-demand body download with in-flight dedup
//! - Write-back of locally-made flag changes, moves and deletions
//!
//! This crate has zero UI dependencies; hosts observe sync progress through
//! the [`SyncListener`] seam.

pub mod config;
pub mod error;
pub mod ews;
pub mod models;
pub mod storage;
pub mod sync;

pub use config::{AccountSettings, EwsCredentials};
pub use error::{EwsError, EwsResult};
pub use ews::{
    AuthProvider, BatchOutcome, BatchResponse, Disposition, FetchShape, FetchedItem, FlagUpdate,
    FolderChange, FolderDeltaPage, FolderScope, FollowUpChange, FreeBusyEvent, HttpEwsClient,
    ItemChange, ItemClass, ItemDeltaPage, OccurrenceRef, RemoteCalendarItem, RemoteFolder,
    RemoteItemClient, RemoteItemId, RemoteMessage, SoapCodec, MAX_FETCH_COUNT,
};
pub use models::{
    fold_components, folder_flags, well_known_kind, CalendarComponent, CalendarObject,
    CachedMessage, DirtyFlagRecord, FolderKind, FolderNode, MessageMeta, SyncHeader,
    CACHE_SCHEMA_VERSION, FOREIGN_ROOT_ID, PUBLIC_ROOT_ID,
};
pub use storage::{
    BodyCache, CalendarStore, InMemoryCalendarStore, InMemoryInfoStore, MessageInfoStore,
    SqliteInfoStore,
};
pub use sync::{
    // Delta sync engines
    CalendarChangeReconciler, CalendarChanges, CalendarKind, FolderSyncEngine, FreeBusyDiff,
    HierarchyChanges, HierarchySyncEngine, SyncStats,
    // Progress observation and cancellation
    CancelToken, ChangeSet, NullListener, SyncListener,
    // Body download
    fetch_message, Acquire, InFlightFetchRegistry,
    // Local mutations pushed back to the server
    copy_messages, delete_messages, move_messages, FlagWriteBackQueue, MoveDestinations,
    TransferOutcome, WriteBackStats,
};
