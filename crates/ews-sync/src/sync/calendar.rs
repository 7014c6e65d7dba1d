//! Calendar, task and memo reconciliation
//!
//! Runs the same cookie-driven delta loop as mail folders, but lands in a
//! component store keyed by `(uid, recurrence-id)` and verifies each delta
//! entry against the cache so our own round-tripped writes don't churn the
//! consumer. Free/busy calendars have no delta protocol and are diffed by
//! content instead.

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;

use super::CancelToken;
use crate::error::EwsError;
use crate::ews::types::{
    FetchShape, FetchedItem, FreeBusyEvent, ItemChange, ItemClass, RemoteCalendarItem,
    RemoteItemId, MAX_FETCH_COUNT,
};
use crate::ews::RemoteItemClient;
use crate::models::{fold_components, CalendarComponent, CalendarObject};
use crate::storage::CalendarStore;

/// What kind of component list a reconciler maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarKind {
    Events,
    Tasks,
    Memos,
}

impl CalendarKind {
    fn shape(self) -> FetchShape {
        match self {
            CalendarKind::Events => FetchShape::Event,
            CalendarKind::Tasks | CalendarKind::Memos => FetchShape::TaskOrMemo,
        }
    }
}

/// Composite objects touched by one reconciliation run.
#[derive(Debug, Default)]
pub struct CalendarChanges {
    pub upserted: Vec<CalendarObject>,
    pub removed_uids: Vec<String>,
}

impl CalendarChanges {
    pub fn is_empty(&self) -> bool {
        self.upserted.is_empty() && self.removed_uids.is_empty()
    }
}

/// Added/removed synthetic events from a free/busy refresh.
#[derive(Debug, Default)]
pub struct FreeBusyDiff {
    pub added: Vec<CalendarComponent>,
    pub removed_uids: Vec<String>,
}

/// Reconciles one calendar (or task/memo list) folder against the server.
pub struct CalendarChangeReconciler {
    client: Arc<dyn RemoteItemClient>,
    store: Arc<dyn CalendarStore>,
    folder_id: String,
    kind: CalendarKind,
}

impl CalendarChangeReconciler {
    pub fn new(
        client: Arc<dyn RemoteItemClient>,
        store: Arc<dyn CalendarStore>,
        folder_id: impl Into<String>,
        kind: CalendarKind,
    ) -> Self {
        Self {
            client,
            store,
            folder_id: folder_id.into(),
            kind,
        }
    }

    /// Pull pending changes from the server and apply them to the store.
    pub fn get_changes(&self, cancel: &CancelToken) -> Result<CalendarChanges> {
        let mut changes = CalendarChanges::default();
        let mut cookie = self.store.get_cookie()?;
        let mut healed = false;
        // UIDs whose composite object needs re-emitting after the run.
        let mut touched: HashSet<String> = HashSet::new();

        loop {
            cancel.check()?;

            let page = match self.client.sync_folder_items(
                &self.folder_id,
                cookie.as_deref(),
                MAX_FETCH_COUNT,
            ) {
                Ok(page) => page,
                Err(EwsError::InvalidSyncState) if !healed => {
                    warn!(
                        "Server rejected sync state for calendar folder {}, full resync",
                        self.folder_id
                    );
                    healed = true;
                    for comp in self.store.list_components()? {
                        if changes.removed_uids.iter().all(|uid| uid != &comp.uid) {
                            changes.removed_uids.push(comp.uid);
                        }
                    }
                    self.store.clear()?;
                    cookie = None;
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let mut fetch_ids: Vec<String> = Vec::new();
            for change in &page.changes {
                match change {
                    ItemChange::Delete { id } => {
                        if let Some(comp) = self.store.find_by_item_id(id)? {
                            if comp.recurrence_id.is_some() {
                                // A cancelled occurrence takes only its own
                                // row; the master and the other instances
                                // stay, and the composite is re-emitted.
                                self.store
                                    .remove_component(&comp.uid, comp.recurrence_id.as_deref())?;
                                touched.insert(comp.uid);
                            } else {
                                self.store.remove_uid(&comp.uid)?;
                                touched.remove(&comp.uid);
                                changes.removed_uids.push(comp.uid);
                            }
                        }
                    }
                    ItemChange::Create { item, .. } | ItemChange::Update { item, .. } => {
                        // Round-trip suppression: a delta entry matching
                        // what we already cached is our own write echoed
                        // back and produces no consumer-visible change.
                        match self.store.find_by_item_id(&item.id)? {
                            Some(comp) if comp.item_id.change_key == item.change_key => {
                                debug!("Calendar item {} unchanged, skipping", item.id);
                            }
                            _ => fetch_ids.push(item.id.clone()),
                        }
                    }
                    ItemChange::ReadFlagChange { .. } => {}
                }
            }

            self.fetch_and_store(&fetch_ids, &mut touched, cancel)?;

            self.store.put_cookie(Some(&page.sync_state))?;
            cookie = Some(page.sync_state);

            if page.includes_last {
                break;
            }
        }

        if !touched.is_empty() {
            let all = self.store.list_components()?;
            changes.upserted = fold_components(all)
                .into_iter()
                .filter(|obj| touched.contains(&obj.uid))
                .collect();
        }
        Ok(changes)
    }

    /// Fetch items by id and land them as components, following detached
    /// instances of recurring masters.
    fn fetch_and_store(
        &self,
        ids: &[String],
        touched: &mut HashSet<String>,
        cancel: &CancelToken,
    ) -> Result<()> {
        for chunk in ids.chunks(MAX_FETCH_COUNT) {
            cancel.check()?;
            let items = self.client.get_items(chunk, self.kind.shape())?;

            let mut occurrence_ids: Vec<String> = Vec::new();
            for item in items {
                match item {
                    FetchedItem::Calendar(cal) => {
                        occurrence_ids
                            .extend(cal.modified_occurrences.iter().map(|o| o.item_id.id.clone()));
                        self.store_component(&cal, touched)?;
                    }
                    FetchedItem::Message(msg) => {
                        warn!(
                            "Unexpected message item {} in calendar folder {}",
                            msg.item_id.id, self.folder_id
                        );
                    }
                    FetchedItem::Error { id, message } => {
                        warn!(
                            "Server returned error for calendar item {}: {message}",
                            id.as_deref().unwrap_or("<unknown>")
                        );
                    }
                }
            }

            // Detached instances arrive as their own items.
            for occ_chunk in occurrence_ids.chunks(MAX_FETCH_COUNT) {
                cancel.check()?;
                for item in self.client.get_items(occ_chunk, FetchShape::Event)? {
                    if let FetchedItem::Calendar(cal) = item {
                        self.store_component(&cal, touched)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn store_component(
        &self,
        item: &RemoteCalendarItem,
        touched: &mut HashSet<String>,
    ) -> Result<()> {
        self.store.put_component(CalendarComponent::from_remote(item))?;
        touched.insert(item.uid.clone());
        Ok(())
    }

    /// Replace the store with the current free/busy window for a foreign
    /// mailbox, diffing by content since these events carry no change keys.
    pub fn refresh_free_busy(
        &self,
        mailbox: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<FreeBusyDiff> {
        let remote = self.client.get_free_busy(mailbox, start, end)?;
        let remote_keys: HashSet<String> = remote.iter().map(|e| e.content_key()).collect();

        let mut diff = FreeBusyDiff::default();
        let mut cached_keys: HashSet<String> = HashSet::new();
        for comp in self.store.list_components()? {
            let key = component_content_key(&comp);
            if remote_keys.contains(&key) {
                cached_keys.insert(key);
            } else {
                self.store.remove_uid(&comp.uid)?;
                diff.removed_uids.push(comp.uid);
            }
        }

        for event in remote {
            if cached_keys.contains(&event.content_key()) {
                continue;
            }
            let comp = synthetic_component(&event);
            self.store.put_component(comp.clone())?;
            diff.added.push(comp);
        }
        Ok(diff)
    }
}

fn component_content_key(comp: &CalendarComponent) -> String {
    format!(
        "{}\n{}\n{}\n{}",
        comp.start.timestamp(),
        comp.end.timestamp(),
        comp.summary,
        comp.location.as_deref().unwrap_or("")
    )
}

/// Build a cacheable component for a free/busy event. The uid is derived
/// from the content so the same event always maps to the same row.
fn synthetic_component(event: &FreeBusyEvent) -> CalendarComponent {
    let digest = Sha256::digest(event.content_key().as_bytes());
    let mut uid = String::with_capacity(64);
    for byte in digest {
        uid.push_str(&format!("{byte:02x}"));
    }

    CalendarComponent {
        uid: uid.clone(),
        recurrence_id: None,
        item_id: RemoteItemId::new(uid, String::new()),
        class: ItemClass::Event,
        summary: event.summary.clone(),
        location: event.location.clone(),
        start: event.start,
        end: event.end,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(summary: &str) -> FreeBusyEvent {
        FreeBusyEvent {
            start: Utc.with_ymd_and_hms(2026, 9, 1, 10, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 9, 1, 11, 0, 0).unwrap(),
            summary: summary.to_string(),
            location: None,
        }
    }

    #[test]
    fn test_synthetic_uid_is_stable() {
        let a = synthetic_component(&event("Standup"));
        let b = synthetic_component(&event("Standup"));
        assert_eq!(a.uid, b.uid);
        assert_eq!(a.uid.len(), 64);

        let c = synthetic_component(&event("Retro"));
        assert_ne!(a.uid, c.uid);
    }

    #[test]
    fn test_component_content_key_matches_event_key() {
        let ev = event("Standup");
        let comp = synthetic_component(&ev);
        assert_eq!(component_content_key(&comp), ev.content_key());
    }

    #[test]
    fn test_kind_shapes() {
        assert_eq!(CalendarKind::Events.shape(), FetchShape::Event);
        assert_eq!(CalendarKind::Tasks.shape(), FetchShape::TaskOrMemo);
        assert_eq!(CalendarKind::Memos.shape(), FetchShape::TaskOrMemo);
    }
}
