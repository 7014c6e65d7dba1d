//! Per-folder sync header: schema version, settings stamp and sync cookie

use serde::{Deserialize, Serialize};

/// Current on-disk schema version for cached folder state.
///
/// Bumped when the cached metadata layout changes; a mismatch triggers a
/// full resync with garbage collection of stale entries.
pub const CACHE_SCHEMA_VERSION: u32 = 2;

/// Header persisted per folder, storing the opaque server-issued sync
/// cookie together with the invariants that decide whether it is usable.
///
/// Persisted as the space-joined string `"<version> <stamp> <cookie>"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncHeader {
    pub version: u32,
    /// Settings-generation counter. Certain account setting changes bump
    /// this, invalidating cached sync state without touching the schema.
    pub sync_tag_stamp: u32,
    /// None means "never synced" or "state forgotten": the next refresh
    /// starts from scratch.
    pub cookie: Option<String>,
}

impl SyncHeader {
    pub fn new(sync_tag_stamp: u32, cookie: Option<String>) -> Self {
        Self {
            version: CACHE_SCHEMA_VERSION,
            sync_tag_stamp,
            cookie,
        }
    }

    /// Whether the stored cookie may be presented to the server, given the
    /// current settings stamp. Any mismatch means a full resync.
    pub fn is_usable(&self, current_stamp: u32) -> bool {
        self.version == CACHE_SCHEMA_VERSION
            && self.sync_tag_stamp == current_stamp
            && self.cookie.is_some()
    }

    pub fn encode(&self) -> String {
        format!(
            "{} {} {}",
            self.version,
            self.sync_tag_stamp,
            self.cookie.as_deref().unwrap_or("")
        )
    }

    /// Decode a persisted header. Returns None for unparseable input,
    /// which callers treat exactly like a schema mismatch.
    pub fn decode(record: &str) -> Option<SyncHeader> {
        let mut parts = record.splitn(3, ' ');
        let version: u32 = parts.next()?.parse().ok()?;
        let stamp: u32 = parts.next()?.parse().ok()?;
        let cookie = match parts.next() {
            Some("") | None => None,
            Some(rest) => Some(rest.to_string()),
        };
        Some(SyncHeader {
            version,
            sync_tag_stamp: stamp,
            cookie,
        })
    }
}
