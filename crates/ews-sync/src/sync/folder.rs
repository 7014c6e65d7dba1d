//! Per-folder item synchronization
//!
//! Drives the create/update/delete reconciliation loop against the server
//! using the persisted opaque sync cookie, bringing the local cache in line
//! with the minimum number of round trips and without losing unsent local
//! flag edits.

use anyhow::Result;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::{CancelToken, ChangeAccumulator, SyncListener, SyncStats};
use crate::error::EwsError;
use crate::ews::types::{
    FetchShape, FetchedItem, ItemChange, ItemDeltaPage, RemoteItemId, MAX_FETCH_COUNT,
};
use crate::ews::RemoteItemClient;
use crate::models::{flags, MessageMeta, SyncHeader};
use crate::storage::{BodyCache, MessageInfoStore};

/// Reconciles one folder's cached message set against the server.
pub struct FolderSyncEngine {
    client: Arc<dyn RemoteItemClient>,
    store: Arc<dyn MessageInfoStore>,
    bodies: Arc<BodyCache>,
    /// Settings-generation stamp; a persisted header with a different
    /// stamp is treated like a schema mismatch.
    sync_tag_stamp: u32,
    /// Folders currently refreshing. A second refresh request for a folder
    /// already in this set is a silent no-op success.
    refreshing: Mutex<HashSet<String>>,
}

/// Releases the per-folder refresh flag on all exits.
struct RefreshGuard<'a> {
    refreshing: &'a Mutex<HashSet<String>>,
    folder_id: String,
}

impl<'a> RefreshGuard<'a> {
    fn acquire(refreshing: &'a Mutex<HashSet<String>>, folder_id: &str) -> Option<Self> {
        let mut set = refreshing.lock().unwrap();
        if !set.insert(folder_id.to_string()) {
            return None;
        }
        Some(Self {
            refreshing,
            folder_id: folder_id.to_string(),
        })
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.refreshing.lock().unwrap().remove(&self.folder_id);
    }
}

impl FolderSyncEngine {
    pub fn new(
        client: Arc<dyn RemoteItemClient>,
        store: Arc<dyn MessageInfoStore>,
        bodies: Arc<BodyCache>,
        sync_tag_stamp: u32,
    ) -> Self {
        Self {
            client,
            store,
            bodies,
            sync_tag_stamp,
            refreshing: Mutex::new(HashSet::new()),
        }
    }

    /// Bring the folder's cached message set in line with the server.
    ///
    /// Idempotent and cooperative: a refresh already running for this
    /// folder makes this call return success immediately without queueing.
    /// Partial progress (applied pages, persisted cookies) survives errors
    /// and cancellation; accumulated change notifications are always
    /// flushed before returning.
    pub fn refresh(
        &self,
        folder_id: &str,
        listener: &dyn SyncListener,
        cancel: &CancelToken,
    ) -> Result<SyncStats> {
        let Some(_guard) = RefreshGuard::acquire(&self.refreshing, folder_id) else {
            debug!("Refresh already running for folder {folder_id}, skipping");
            return Ok(SyncStats::default());
        };

        let start = Instant::now();
        let mut stats = SyncStats::default();
        let mut acc = ChangeAccumulator::new();

        let result = self.run_sync(folder_id, listener, cancel, &mut acc, &mut stats);

        // Partial progress is never silently discarded.
        acc.flush(listener, folder_id);
        stats.duration_ms = start.elapsed().as_millis() as u64;

        result.map(|_| stats)
    }

    fn run_sync(
        &self,
        folder_id: &str,
        listener: &dyn SyncListener,
        cancel: &CancelToken,
        acc: &mut ChangeAccumulator,
        stats: &mut SyncStats,
    ) -> Result<()> {
        let mut cookie: Option<String> = None;
        // UIDs cached locally before a full resync. Anything the server
        // does not re-confirm by the end of the run is stale and purged.
        let mut pending_removal: Option<HashSet<String>> = None;

        match self.store.get_header(folder_id)? {
            Some(header) if header.is_usable(self.sync_tag_stamp) => {
                cookie = header.cookie;
            }
            header => {
                if header.is_some() {
                    info!("Sync state for folder {folder_id} is outdated, full resync");
                }
                pending_removal = Some(self.store.list_uids(folder_id)?.into_iter().collect());
            }
        }

        let mut healed = false;
        loop {
            cancel.check()?;

            let page =
                match self
                    .client
                    .sync_folder_items(folder_id, cookie.as_deref(), MAX_FETCH_COUNT)
                {
                    Ok(page) => page,
                    Err(EwsError::InvalidSyncState) if !healed => {
                        // The one self-healing error kind: forget all local
                        // state for the folder and restart from scratch.
                        warn!("Server rejected sync state for folder {folder_id}, full resync");
                        healed = true;
                        self.purge_folder(folder_id, acc, stats)?;
                        pending_removal = None;
                        cookie = None;
                        self.store
                            .put_header(folder_id, &SyncHeader::new(self.sync_tag_stamp, None))?;
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                };

            self.apply_page(folder_id, &page, &mut pending_removal, acc, stats)?;

            // Persist the cookie after each successful round so a crash
            // mid-sync resumes from the last confirmed page.
            let header = SyncHeader::new(self.sync_tag_stamp, Some(page.sync_state.clone()));
            self.store.put_header(folder_id, &header)?;
            listener.on_cookie_updated(folder_id, &page.sync_state);
            cookie = Some(page.sync_state);

            acc.maybe_flush(listener, folder_id);

            if page.includes_last {
                break;
            }
        }

        // Everything still unconfirmed is gone from the server.
        if let Some(pending) = pending_removal {
            for uid in pending {
                debug!("Purging stale cached message {uid}");
                self.store.delete_meta(folder_id, &uid)?;
                self.bodies.delete(&uid)?;
                stats.items_deleted += 1;
                acc.removed(uid);
            }
        }

        Ok(())
    }

    /// Apply one delta page: deletions first (freeing UID slots), then
    /// creates, then updates and read-flag changes, then the second fetch
    /// round for whatever actually needs downloading.
    fn apply_page(
        &self,
        folder_id: &str,
        page: &ItemDeltaPage,
        pending_removal: &mut Option<HashSet<String>>,
        acc: &mut ChangeAccumulator,
        stats: &mut SyncStats,
    ) -> Result<()> {
        // Ids to fetch, grouped by property shape so the request for a
        // post item doesn't carry message-only properties. `queued`
        // dedupes an id appearing in both a create and an update.
        let mut to_fetch: HashMap<FetchShape, Vec<String>> = HashMap::new();
        let mut queued: HashSet<String> = HashSet::new();
        let mut new_uids: HashSet<String> = HashSet::new();

        for change in &page.changes {
            if let ItemChange::Delete { id } = change {
                if self.store.has_uid(folder_id, id)? {
                    self.store.delete_meta(folder_id, id)?;
                    self.bodies.delete(id)?;
                    stats.items_deleted += 1;
                    acc.removed(id.clone());
                }
                if let Some(set) = pending_removal.as_mut() {
                    set.remove(id);
                }
            }
        }

        for change in &page.changes {
            if let ItemChange::Create { item, class } = change {
                let confirmed = pending_removal
                    .as_mut()
                    .is_some_and(|set| set.remove(&item.id));

                match self.store.get_meta(folder_id, &item.id)? {
                    Some(meta) if meta.change_key == item.change_key => {
                        // Already cached with identical content.
                        stats.items_skipped += 1;
                    }
                    Some(_) if confirmed => {
                        // Known from before the resync, but changed since.
                        queue_fetch(&mut to_fetch, &mut queued, item, *class);
                    }
                    Some(_) => {
                        warn!(
                            "Message {} already exists in folder {folder_id}, skipping duplicate create",
                            item.id
                        );
                        stats.items_skipped += 1;
                    }
                    None => {
                        new_uids.insert(item.id.clone());
                        queue_fetch(&mut to_fetch, &mut queued, item, *class);
                    }
                }
            }
        }

        for change in &page.changes {
            match change {
                ItemChange::Update { item, class } => {
                    if let Some(set) = pending_removal.as_mut() {
                        set.remove(&item.id);
                    }
                    match self.store.get_meta(folder_id, &item.id)? {
                        Some(meta) if meta.change_key == item.change_key => {
                            // No-op protection: content is unchanged, skip
                            // the redundant network fetch.
                            stats.items_skipped += 1;
                        }
                        Some(_) => {
                            queue_fetch(&mut to_fetch, &mut queued, item, *class);
                        }
                        None => {
                            // A previous sync missed the creation event.
                            warn!(
                                "Cannot find message {} to update in folder {folder_id}, creating it instead",
                                item.id
                            );
                            new_uids.insert(item.id.clone());
                            queue_fetch(&mut to_fetch, &mut queued, item, *class);
                        }
                    }
                }
                ItemChange::ReadFlagChange { id, is_read } => {
                    if let Some(set) = pending_removal.as_mut() {
                        set.remove(id);
                    }
                    if let Some(mut meta) = self.store.get_meta(folder_id, id)? {
                        if *is_read {
                            meta.server_flags |= flags::SEEN;
                        } else {
                            meta.server_flags &= !flags::SEEN;
                        }
                        self.store.put_meta(folder_id, id, &meta)?;
                        acc.updated(id.clone());
                    }
                }
                _ => {}
            }
        }

        for (shape, ids) in to_fetch {
            let items = self.client.get_items(&ids, shape)?;
            stats.items_fetched += items.len();

            for item in items {
                match item {
                    FetchedItem::Message(msg) => {
                        let meta = MessageMeta::new(
                            flags::from_remote(&msg),
                            msg.class,
                            msg.item_id.change_key.clone(),
                        );
                        self.store.put_meta(folder_id, &msg.item_id.id, &meta)?;
                        if new_uids.contains(&msg.item_id.id) {
                            stats.items_stored += 1;
                            acc.added(msg.item_id.id.clone());
                        } else {
                            acc.updated(msg.item_id.id.clone());
                        }
                    }
                    FetchedItem::Calendar(cal) => {
                        // Calendar items in a mail folder keep their id and
                        // class but carry no message flags.
                        let meta = MessageMeta::new(0, cal.class, cal.item_id.change_key.clone());
                        self.store.put_meta(folder_id, &cal.item_id.id, &meta)?;
                        if new_uids.contains(&cal.item_id.id) {
                            stats.items_stored += 1;
                            acc.added(cal.item_id.id.clone());
                        } else {
                            acc.updated(cal.item_id.id.clone());
                        }
                    }
                    FetchedItem::Error { id, message } => {
                        warn!(
                            "Server returned error for item {}: {message}",
                            id.as_deref().unwrap_or("<unknown>")
                        );
                        stats.errors += 1;
                    }
                }
            }
        }

        Ok(())
    }

    /// Forget every cached message in the folder (full resync).
    fn purge_folder(
        &self,
        folder_id: &str,
        acc: &mut ChangeAccumulator,
        stats: &mut SyncStats,
    ) -> Result<()> {
        for uid in self.store.list_uids(folder_id)? {
            self.store.delete_meta(folder_id, &uid)?;
            self.bodies.delete(&uid)?;
            stats.items_deleted += 1;
            acc.removed(uid);
        }
        Ok(())
    }
}

fn queue_fetch(
    to_fetch: &mut HashMap<FetchShape, Vec<String>>,
    queued: &mut HashSet<String>,
    item: &RemoteItemId,
    class: crate::ews::types::ItemClass,
) {
    if queued.insert(item.id.clone()) {
        to_fetch
            .entry(FetchShape::for_class(class))
            .or_default()
            .push(item.id.clone());
    }
}
