//! Per-message metadata and its persisted encoding

use serde::{Deserialize, Serialize};

use crate::ews::types::ItemClass;

/// Metadata kept for every cached message.
///
/// Persisted as the space-joined string `"<flags> <type> <key>"`, the
/// format the summary store shares with the host framework.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMeta {
    /// Last-known server-side flag bits.
    pub server_flags: u32,
    pub item_type: ItemClass,
    /// Version stamp of the cached copy; equal change keys mean identical
    /// server-side content.
    pub change_key: String,
}

impl MessageMeta {
    pub fn new(server_flags: u32, item_type: ItemClass, change_key: impl Into<String>) -> Self {
        Self {
            server_flags,
            item_type,
            change_key: change_key.into(),
        }
    }

    /// Encode to the persisted record format.
    pub fn encode(&self) -> String {
        format!(
            "{} {} {}",
            self.server_flags,
            self.item_type.as_i32(),
            self.change_key
        )
    }

    /// Decode a persisted record. Returns None for unparseable input,
    /// which callers treat as "no cached metadata".
    pub fn decode(record: &str) -> Option<MessageMeta> {
        let mut parts = record.splitn(3, ' ');
        let flags: u32 = parts.next()?.parse().ok()?;
        let item_type: i32 = parts.next()?.parse().ok()?;
        let change_key = parts.next()?.to_string();
        Some(MessageMeta {
            server_flags: flags,
            item_type: ItemClass::from_i32(item_type),
            change_key,
        })
    }
}

/// A message as seen by the local cache: server metadata plus the
/// locally-edited flag state that may not have been written back yet.
#[derive(Debug, Clone)]
pub struct CachedMessage {
    pub uid: String,
    pub meta: MessageMeta,
    pub local_flags: u32,
    pub labels: Vec<String>,
}

impl CachedMessage {
    /// True when local flag edits have not reached the server.
    pub fn is_dirty(&self) -> bool {
        self.local_flags != self.meta.server_flags
    }
}
