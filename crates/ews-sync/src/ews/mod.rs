//! EWS remote operation surface
//!
//! This module provides:
//! - Wire-level DTOs for the delta, fetch and mutation operations
//! - The [`RemoteItemClient`] trait the sync engines run against
//! - A blocking HTTP transport shell with an injected SOAP codec

mod client;
mod http;
pub mod types;

pub use client::RemoteItemClient;
pub use http::{AuthProvider, HttpEwsClient, OperationRequest, OperationResponse, SoapCodec};
pub use types::{
    BatchOutcome, BatchResponse, Disposition, FetchShape, FetchedItem, FlagUpdate, FolderChange,
    FolderDeltaPage, FolderScope, FollowUpChange, FreeBusyEvent, ItemChange, ItemClass,
    ItemDeltaPage, OccurrenceRef, RemoteCalendarItem, RemoteFolder, RemoteItemId, RemoteMessage,
    MAX_FETCH_COUNT,
};
