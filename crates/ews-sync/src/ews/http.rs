//! Synchronous HTTP transport for EWS operations
//!
//! Uses blocking HTTP (ureq) to be executor-agnostic. The SOAP/XML encoding
//! itself is out of scope here: requests are built and responses parsed by
//! an injected [`SoapCodec`], so the transport owns exactly two concerns,
//! carrying bytes and classifying failures into [`EwsError`] kinds.

use chrono::{DateTime, Utc};
use log::debug;

use super::client::RemoteItemClient;
use super::types::{
    BatchResponse, Disposition, FetchShape, FetchedItem, FlagUpdate, FolderDeltaPage,
    FreeBusyEvent, ItemDeltaPage, RemoteFolder, RemoteItemId,
};
use crate::error::{EwsError, EwsResult};

/// Provides the Authorization header value for each request.
///
/// Token refresh, OAuth flows and credential storage are the host's
/// concern; the transport only asks for the current header.
pub trait AuthProvider: Send + Sync {
    fn authorization_header(&self) -> EwsResult<String>;
}

/// One EWS operation with its parameters, handed to the codec for encoding.
#[derive(Debug)]
pub enum OperationRequest<'a> {
    SyncFolderItems {
        folder_id: &'a str,
        sync_state: Option<&'a str>,
        max_changes: usize,
    },
    SyncFolderHierarchy {
        sync_state: Option<&'a str>,
    },
    GetItems {
        ids: &'a [String],
        shape: FetchShape,
    },
    GetMessageContent {
        id: &'a str,
    },
    CreateItem {
        folder_id: &'a str,
        content: &'a [u8],
        disposition: Disposition,
    },
    UpdateFlags {
        updates: &'a [FlagUpdate],
    },
    DeleteItems {
        ids: &'a [String],
        hard: bool,
    },
    MoveItems {
        dest_folder_id: &'a str,
        ids: &'a [String],
        copy: bool,
    },
    FindFolder {
        root_folder_id: &'a str,
    },
    GetFreeBusy {
        mailbox: &'a str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    SuppressReadReceipt {
        item_id: &'a RemoteItemId,
    },
}

impl OperationRequest<'_> {
    /// Operation name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            OperationRequest::SyncFolderItems { .. } => "SyncFolderItems",
            OperationRequest::SyncFolderHierarchy { .. } => "SyncFolderHierarchy",
            OperationRequest::GetItems { .. } => "GetItems",
            OperationRequest::GetMessageContent { .. } => "GetItem",
            OperationRequest::CreateItem { .. } => "CreateItem",
            OperationRequest::UpdateFlags { .. } => "UpdateItem",
            OperationRequest::DeleteItems { .. } => "DeleteItem",
            OperationRequest::MoveItems { copy: false, .. } => "MoveItem",
            OperationRequest::MoveItems { copy: true, .. } => "CopyItem",
            OperationRequest::FindFolder { .. } => "FindFolder",
            OperationRequest::GetFreeBusy { .. } => "GetUserAvailability",
            OperationRequest::SuppressReadReceipt { .. } => "SuppressReadReceipt",
        }
    }
}

/// Parsed response payload for one operation.
#[derive(Debug)]
pub enum OperationResponse {
    ItemDelta(ItemDeltaPage),
    FolderDelta(FolderDeltaPage),
    Items(Vec<FetchedItem>),
    MessageContent(Vec<u8>),
    CreatedItem(RemoteItemId),
    Batch(BatchResponse),
    Folders(Vec<RemoteFolder>),
    FreeBusy(Vec<FreeBusyEvent>),
    Empty,
}

/// Encodes operation requests to wire bytes and decodes response bodies.
///
/// Server-reported EWS response codes (InvalidSyncStateData, access denied,
/// not-found) are mapped to [`EwsError`] kinds by the codec, so this is the
/// one place wire-level codes exist.
pub trait SoapCodec: Send + Sync {
    fn encode(&self, request: &OperationRequest<'_>) -> EwsResult<Vec<u8>>;
    fn decode(&self, request: &OperationRequest<'_>, body: &[u8]) -> EwsResult<OperationResponse>;
}

/// Blocking EWS client speaking through a [`SoapCodec`].
pub struct HttpEwsClient<C> {
    endpoint: String,
    codec: C,
    auth: Box<dyn AuthProvider>,
}

impl<C: SoapCodec> HttpEwsClient<C> {
    pub fn new(endpoint: impl Into<String>, codec: C, auth: Box<dyn AuthProvider>) -> Self {
        Self {
            endpoint: endpoint.into(),
            codec,
            auth,
        }
    }

    fn call(&self, request: OperationRequest<'_>) -> EwsResult<OperationResponse> {
        let body = self.codec.encode(&request)?;
        let authorization = self.auth.authorization_header()?;

        debug!("{} request ({} bytes)", request.name(), body.len());

        let response = ureq::post(&self.endpoint)
            .header("Authorization", &authorization)
            .header("Content-Type", "text/xml; charset=utf-8")
            .send(&body[..]);

        let mut response = match response {
            Ok(response) => response,
            Err(err) => return Err(classify_http_error(err)),
        };

        let bytes = response
            .body_mut()
            .read_to_vec()
            .map_err(|err| EwsError::Transient(format!("failed to read response body: {err}")))?;

        self.codec.decode(&request, &bytes)
    }
}

/// Map HTTP-level failures onto the error taxonomy.
///
/// Server-level EWS errors arrive in a 200 response body and are handled by
/// the codec; only transport and authentication failures show up here.
fn classify_http_error(err: ureq::Error) -> EwsError {
    match err {
        ureq::Error::StatusCode(401) | ureq::Error::StatusCode(407) => EwsError::Auth,
        ureq::Error::StatusCode(403) => EwsError::AccessDenied,
        ureq::Error::StatusCode(code) => {
            EwsError::Transient(format!("server returned HTTP {code}"))
        }
        other => EwsError::Transient(other.to_string()),
    }
}

fn expect_item_delta(response: OperationResponse) -> EwsResult<ItemDeltaPage> {
    match response {
        OperationResponse::ItemDelta(page) => Ok(page),
        _ => Err(EwsError::processing("unexpected response body")),
    }
}

fn expect_batch(response: OperationResponse) -> EwsResult<BatchResponse> {
    match response {
        OperationResponse::Batch(batch) => Ok(batch),
        _ => Err(EwsError::processing("unexpected response body")),
    }
}

impl<C: SoapCodec> RemoteItemClient for HttpEwsClient<C> {
    fn sync_folder_items(
        &self,
        folder_id: &str,
        sync_state: Option<&str>,
        max_changes: usize,
    ) -> EwsResult<ItemDeltaPage> {
        expect_item_delta(self.call(OperationRequest::SyncFolderItems {
            folder_id,
            sync_state,
            max_changes,
        })?)
    }

    fn sync_folder_hierarchy(&self, sync_state: Option<&str>) -> EwsResult<FolderDeltaPage> {
        match self.call(OperationRequest::SyncFolderHierarchy { sync_state })? {
            OperationResponse::FolderDelta(page) => Ok(page),
            _ => Err(EwsError::processing("unexpected response body")),
        }
    }

    fn get_items(&self, ids: &[String], shape: FetchShape) -> EwsResult<Vec<FetchedItem>> {
        match self.call(OperationRequest::GetItems { ids, shape })? {
            OperationResponse::Items(items) => Ok(items),
            _ => Err(EwsError::processing("unexpected response body")),
        }
    }

    fn get_message_content(&self, id: &str) -> EwsResult<Vec<u8>> {
        match self.call(OperationRequest::GetMessageContent { id })? {
            OperationResponse::MessageContent(content) => Ok(content),
            _ => Err(EwsError::processing("unexpected response body")),
        }
    }

    fn create_item(
        &self,
        folder_id: &str,
        content: &[u8],
        disposition: Disposition,
    ) -> EwsResult<RemoteItemId> {
        match self.call(OperationRequest::CreateItem {
            folder_id,
            content,
            disposition,
        })? {
            OperationResponse::CreatedItem(id) => Ok(id),
            _ => Err(EwsError::processing("unexpected response body")),
        }
    }

    fn update_flags(&self, updates: &[FlagUpdate]) -> EwsResult<BatchResponse> {
        expect_batch(self.call(OperationRequest::UpdateFlags { updates })?)
    }

    fn delete_items(&self, ids: &[String], hard: bool) -> EwsResult<BatchResponse> {
        expect_batch(self.call(OperationRequest::DeleteItems { ids, hard })?)
    }

    fn move_items(&self, dest_folder_id: &str, ids: &[String]) -> EwsResult<BatchResponse> {
        expect_batch(self.call(OperationRequest::MoveItems {
            dest_folder_id,
            ids,
            copy: false,
        })?)
    }

    fn copy_items(&self, dest_folder_id: &str, ids: &[String]) -> EwsResult<BatchResponse> {
        expect_batch(self.call(OperationRequest::MoveItems {
            dest_folder_id,
            ids,
            copy: true,
        })?)
    }

    fn find_folder(&self, root_folder_id: &str) -> EwsResult<Vec<RemoteFolder>> {
        match self.call(OperationRequest::FindFolder { root_folder_id })? {
            OperationResponse::Folders(folders) => Ok(folders),
            _ => Err(EwsError::processing("unexpected response body")),
        }
    }

    fn get_free_busy(
        &self,
        mailbox: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EwsResult<Vec<FreeBusyEvent>> {
        match self.call(OperationRequest::GetFreeBusy {
            mailbox,
            start,
            end,
        })? {
            OperationResponse::FreeBusy(events) => Ok(events),
            _ => Err(EwsError::processing("unexpected response body")),
        }
    }

    fn suppress_read_receipt(&self, item_id: &RemoteItemId) -> EwsResult<()> {
        match self.call(OperationRequest::SuppressReadReceipt { item_id })? {
            OperationResponse::Empty => Ok(()),
            _ => Err(EwsError::processing("unexpected response body")),
        }
    }
}
