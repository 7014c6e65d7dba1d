//! Error taxonomy for EWS operations
//!
//! Raw transport and server response codes are classified exactly once, at
//! the client boundary. Everything above that layer (the sync engines, the
//! write-back queue) only ever matches on the closed set of kinds below, so
//! retry and self-heal decisions never depend on raw error codes.

use thiserror::Error;

/// Result alias for operations crossing the RPC boundary.
pub type EwsResult<T> = Result<T, EwsError>;

/// Error kinds for EWS operations.
#[derive(Debug, Error)]
pub enum EwsError {
    /// Timeouts, connection loss, 5xx responses. The caller's reconnection
    /// policy decides whether to retry.
    #[error("transient transport failure: {0}")]
    Transient(String),

    /// Credentials were rejected. Triggers a host-level "credentials
    /// required" notification; never retried internally.
    #[error("authentication required")]
    Auth,

    /// The server rejected the sync state token. Self-healing: the engines
    /// purge local state and restart with a null cookie.
    #[error("sync state token rejected by server")]
    InvalidSyncState,

    #[error("item not found on server")]
    ItemNotFound,

    #[error("folder not found on server")]
    FolderNotFound,

    /// Read-only public or foreign folder. Swallowed by the write-back
    /// queue as "saved locally only".
    #[error("access denied")]
    AccessDenied,

    /// Returned by suppress-read-receipt when no receipt is pending.
    /// Treated as success by callers.
    #[error("no read receipt is pending for this item")]
    ReadReceiptNotPending,

    /// A single hierarchy delta renamed and moved the same folder. Neither
    /// change is applied; the caller must resolve.
    #[error("folder {folder_id} was both renamed and moved in one sync step")]
    RenameMoveConflict { folder_id: String },

    #[error("missing item or folder ID in server response")]
    MissingIdInResponse,

    /// Cooperative cancellation observed at an RPC boundary.
    #[error("operation cancelled")]
    Cancelled,

    #[error("error processing server response: {message}")]
    Processing { message: String },
}

impl EwsError {
    pub fn processing(message: impl Into<String>) -> Self {
        EwsError::Processing {
            message: message.into(),
        }
    }

    /// True for the one error kind the delta loops recover from internally.
    pub fn is_invalid_sync_state(&self) -> bool {
        matches!(self, EwsError::InvalidSyncState)
    }

    pub fn is_access_denied(&self) -> bool {
        matches!(self, EwsError::AccessDenied)
    }

    /// "Not found" on a delete or move means the goal is already achieved.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EwsError::ItemNotFound | EwsError::FolderNotFound)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, EwsError::Cancelled)
    }
}
