//! Write-back of locally-made flag changes
//!
//! Collects dirty flag records per folder and flushes them in bounded
//! batches: deleted/junk/not-junk bits become MoveItem calls routed to the
//! right destination folder, everything else becomes diff-only UpdateItem
//! entries. A mailbox we cannot write to keeps the changes locally instead
//! of failing the flush.

use anyhow::Result;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::CancelToken;
use crate::error::EwsError;
use crate::ews::types::{FlagUpdate, RemoteItemId, MAX_FETCH_COUNT};
use crate::ews::RemoteItemClient;
use crate::models::{flags, DirtyFlagRecord};
use crate::storage::{BodyCache, MessageInfoStore};

/// Folder ids the move-or-delete bits route to.
#[derive(Debug, Clone)]
pub struct MoveDestinations {
    pub trash: String,
    pub junk: String,
    pub inbox: String,
}

/// Counters from one write-back flush.
#[derive(Debug, Default, Clone)]
pub struct WriteBackStats {
    /// Messages whose flag diff reached the server.
    pub flags_pushed: usize,
    /// Messages moved out of the folder (trash/junk/inbox routing).
    pub moved: usize,
    /// Changes kept locally because the server denied write access.
    pub saved_locally: usize,
}

/// Per-folder queue of unsent local flag changes.
pub struct FlagWriteBackQueue {
    client: Arc<dyn RemoteItemClient>,
    store: Arc<dyn MessageInfoStore>,
    bodies: Arc<BodyCache>,
    pending: Mutex<HashMap<String, DirtyFlagRecord>>,
}

impl FlagWriteBackQueue {
    pub fn new(
        client: Arc<dyn RemoteItemClient>,
        store: Arc<dyn MessageInfoStore>,
        bodies: Arc<BodyCache>,
    ) -> Self {
        Self {
            client,
            store,
            bodies,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Record a local flag change. A newer record for the same message
    /// replaces the older one, keeping any pending read receipt
    /// suppression.
    pub fn enqueue(&self, record: DirtyFlagRecord) {
        let mut pending = self.pending.lock().unwrap();
        let suppress = pending
            .get(&record.uid)
            .is_some_and(|old| old.suppress_read_receipt);
        let mut record = record;
        record.suppress_read_receipt |= suppress;
        pending.insert(record.uid.clone(), record);
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().unwrap().is_empty()
    }

    /// Push all pending changes for the folder to the server.
    ///
    /// Per-item failures and denied write access never abort the flush;
    /// transport-level errors re-queue the unsent remainder and propagate.
    pub fn flush(
        &self,
        folder_id: &str,
        destinations: &MoveDestinations,
        cancel: &CancelToken,
    ) -> Result<WriteBackStats> {
        let snapshot: Vec<DirtyFlagRecord> = {
            let mut pending = self.pending.lock().unwrap();
            std::mem::take(&mut *pending).into_values().collect()
        };
        if snapshot.is_empty() {
            return Ok(WriteBackStats::default());
        }

        let mut stats = WriteBackStats::default();
        let mut moves: Vec<DirtyFlagRecord> = Vec::new();
        let mut updates: Vec<DirtyFlagRecord> = Vec::new();
        for record in snapshot {
            if record.is_move_or_delete_only() {
                moves.push(record);
            } else {
                updates.push(record);
            }
        }

        // A failed move pass leaves the update partition unsent; it goes
        // back on the queue so the next flush retries it.
        let result = match self.flush_moves(folder_id, destinations, moves, cancel, &mut stats) {
            Ok(()) => self.flush_updates(folder_id, updates, cancel, &mut stats),
            Err(err) => {
                self.requeue(&updates);
                Err(err)
            }
        };

        match result {
            Ok(()) => Ok(stats),
            Err(err)
                if err
                    .downcast_ref::<EwsError>()
                    .is_some_and(EwsError::is_access_denied) =>
            {
                // Read-only mailbox (delegate/public). The changes stay in
                // the local cache and are simply never pushed.
                warn!("No write access to folder {folder_id}, keeping flag changes locally");
                stats.saved_locally += self.drain_as_saved(folder_id)?;
                Ok(stats)
            }
            Err(err) => Err(err),
        }
    }

    fn flush_moves(
        &self,
        folder_id: &str,
        destinations: &MoveDestinations,
        records: Vec<DirtyFlagRecord>,
        cancel: &CancelToken,
        stats: &mut WriteBackStats,
    ) -> Result<()> {
        let mut by_dest: HashMap<&str, Vec<DirtyFlagRecord>> = HashMap::new();
        for record in records {
            // Deletion wins over junk classification when both bits flip.
            let dest = if record.local_flags & flags::DELETED != 0 {
                destinations.trash.as_str()
            } else if record.local_flags & flags::JUNK != 0 {
                destinations.junk.as_str()
            } else {
                destinations.inbox.as_str()
            };
            by_dest.entry(dest).or_default().push(record);
        }

        // Flatten to bounded batches up front so an abort can requeue every
        // record that never reached the server, not just the failing chunk.
        let mut batches: Vec<(&str, Vec<DirtyFlagRecord>)> = Vec::new();
        for (dest, records) in by_dest {
            for chunk in records.chunks(MAX_FETCH_COUNT) {
                batches.push((dest, chunk.to_vec()));
            }
        }

        for i in 0..batches.len() {
            let (dest, chunk) = &batches[i];

            if let Err(err) = cancel.check() {
                self.requeue_batches(&batches[i..]);
                return Err(err.into());
            }

            let ids: Vec<String> = chunk.iter().map(|r| r.uid.clone()).collect();
            let response = match self.client.move_items(dest, &ids) {
                Ok(response) => response,
                Err(err) => {
                    self.requeue_batches(&batches[i..]);
                    return Err(err.into());
                }
            };

            let mut failed: Vec<DirtyFlagRecord> = Vec::new();
            for (record, entry) in chunk.iter().zip(&response.entries) {
                match &entry.outcome {
                    Ok(_) => {
                        // Gone from this folder either way.
                        self.store.delete_meta(folder_id, &record.uid)?;
                        self.bodies.delete(&record.uid)?;
                        stats.moved += 1;
                    }
                    Err(err) if err.is_not_found() => {
                        debug!("Message {} already gone, dropping move", record.uid);
                        self.store.delete_meta(folder_id, &record.uid)?;
                        self.bodies.delete(&record.uid)?;
                    }
                    Err(err) => {
                        warn!("Failed to move message {}: {err}", record.uid);
                        failed.push(record.clone());
                    }
                }
            }
            // A short response leaves trailing entries unprocessed.
            for record in chunk.iter().skip(response.entries.len()) {
                failed.push(record.clone());
            }

            if let Some(err) = response.error {
                self.requeue(&failed);
                self.requeue_batches(&batches[i + 1..]);
                return Err(err.into());
            }
        }
        Ok(())
    }

    fn requeue_batches(&self, batches: &[(&str, Vec<DirtyFlagRecord>)]) {
        for (_, chunk) in batches {
            self.requeue(chunk);
        }
    }

    fn flush_updates(
        &self,
        folder_id: &str,
        records: Vec<DirtyFlagRecord>,
        cancel: &CancelToken,
        stats: &mut WriteBackStats,
    ) -> Result<()> {
        // Build the diff entries up front; records whose message vanished
        // or whose diff is empty are dropped here.
        let mut batch: Vec<(DirtyFlagRecord, FlagUpdate)> = Vec::new();
        for record in records {
            let Some(meta) = self.store.get_meta(folder_id, &record.uid)? else {
                debug!("Message {} no longer cached, dropping flag change", record.uid);
                continue;
            };
            let update = build_update(&record, &meta.change_key);
            if record.suppress_read_receipt {
                self.suppress_receipt(&record.uid, &meta.change_key)?;
            }
            if update.is_empty() {
                continue;
            }
            batch.push((record, update));
        }

        let chunks: Vec<&[(DirtyFlagRecord, FlagUpdate)]> =
            batch.chunks(MAX_FETCH_COUNT).collect();
        for (i, chunk) in chunks.iter().enumerate() {
            if let Err(err) = cancel.check() {
                self.requeue_chunks(&chunks[i..]);
                return Err(err.into());
            }

            let updates: Vec<FlagUpdate> = chunk.iter().map(|(_, u)| u.clone()).collect();
            let response = match self.client.update_flags(&updates) {
                Ok(response) => response,
                Err(err) => {
                    self.requeue_chunks(&chunks[i..]);
                    return Err(err.into());
                }
            };

            let mut failed: Vec<&(DirtyFlagRecord, FlagUpdate)> = Vec::new();
            for (pair, entry) in chunk.iter().zip(&response.entries) {
                let (record, _) = pair;
                match &entry.outcome {
                    Ok(_) => {
                        // The server now agrees with the local flags.
                        if let Some(mut meta) = self.store.get_meta(folder_id, &record.uid)? {
                            meta.server_flags = record.local_flags;
                            self.store.put_meta(folder_id, &record.uid, &meta)?;
                        }
                        stats.flags_pushed += 1;
                    }
                    Err(err) if err.is_access_denied() => {
                        debug!("Flag change for {} denied, keeping locally", record.uid);
                        stats.saved_locally += 1;
                    }
                    Err(err) => {
                        warn!("Failed to update flags for {}: {err}", record.uid);
                        failed.push(pair);
                    }
                }
            }
            for pair in chunk.iter().skip(response.entries.len()) {
                failed.push(pair);
            }

            if let Some(err) = response.error {
                self.requeue_pairs_ref(&failed);
                self.requeue_chunks(&chunks[i + 1..]);
                return Err(err.into());
            }
        }
        Ok(())
    }

    fn requeue_chunks(&self, chunks: &[&[(DirtyFlagRecord, FlagUpdate)]]) {
        for chunk in chunks {
            self.requeue_pairs(chunk);
        }
    }

    /// Ask the server not to send a read receipt for the message. A receipt
    /// that is no longer pending is not an error.
    fn suppress_receipt(&self, uid: &str, change_key: &str) -> Result<()> {
        let item_id = RemoteItemId::new(uid, change_key);
        match self.client.suppress_read_receipt(&item_id) {
            Ok(()) | Err(EwsError::ReadReceiptNotPending) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Mark the remaining queue contents as locally saved: the server flags
    /// in the cache keep their old values, the queue empties.
    fn drain_as_saved(&self, _folder_id: &str) -> Result<usize> {
        let mut pending = self.pending.lock().unwrap();
        let n = pending.len();
        pending.clear();
        Ok(n)
    }

    fn requeue(&self, records: &[DirtyFlagRecord]) {
        let mut pending = self.pending.lock().unwrap();
        for record in records {
            // A change enqueued during the flush is newer; keep it.
            pending
                .entry(record.uid.clone())
                .or_insert_with(|| record.clone());
        }
    }

    fn requeue_pairs(&self, pairs: &[(DirtyFlagRecord, FlagUpdate)]) {
        let records: Vec<DirtyFlagRecord> = pairs.iter().map(|(r, _)| r.clone()).collect();
        self.requeue(&records);
    }

    fn requeue_pairs_ref(&self, pairs: &[&(DirtyFlagRecord, FlagUpdate)]) {
        let records: Vec<DirtyFlagRecord> = pairs.iter().map(|(r, _)| r.clone()).collect();
        self.requeue(&records);
    }
}

/// Build the diff-only update entry for one record: only bits that differ
/// between the last-known server flags and the local flags are encoded.
fn build_update(record: &DirtyFlagRecord, change_key: &str) -> FlagUpdate {
    let changed = record.changed_bits();
    let mut update = FlagUpdate {
        item_id: Some(RemoteItemId::new(record.uid.clone(), change_key)),
        ..FlagUpdate::default()
    };

    if changed & flags::SEEN != 0 {
        update.set_read = Some(record.local_flags & flags::SEEN != 0);
    }
    if changed & flags::FLAGGED != 0 {
        update.set_flagged = Some(record.local_flags & flags::FLAGGED != 0);
    }
    if changed & flags::HIGH_PRIORITY != 0 {
        update.set_high_importance = Some(record.local_flags & flags::HIGH_PRIORITY != 0);
    }
    if changed & (flags::ANSWERED | flags::FORWARDED) != 0 {
        update.icon_index = flags::icon_index_for(record.local_flags).or(Some(0));
    }
    update.categories = record.labels.clone();
    update.follow_up = record.follow_up.clone();
    update
}
