//! Folder hierarchy synchronization
//!
//! Maintains the locally cached folder tree from SyncFolderHierarchy
//! deltas, decomposing folder updates into renames and moves, and
//! materializing the synthetic local roots that public and foreign
//! folders hang from.

use anyhow::Result;
use log::{info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use super::CancelToken;
use crate::error::EwsError;
use crate::ews::types::{FolderChange, RemoteFolder};
use crate::ews::RemoteItemClient;
use crate::models::{folder_flags, FolderNode, FOREIGN_ROOT_ID, PUBLIC_ROOT_ID};

/// Distinguished id of the public folder subtree root on the server.
const PUBLIC_FOLDERS_ROOT: &str = "publicfoldersroot";

/// Folder ids touched by one hierarchy refresh.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct HierarchyChanges {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

impl HierarchyChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Reconciles the local folder tree against the server.
pub struct HierarchySyncEngine {
    client: Arc<dyn RemoteItemClient>,
    folders: RwLock<HashMap<String, FolderNode>>,
    cookie: Mutex<Option<String>>,
    /// Held for the duration of a refresh; a second concurrent refresh is
    /// a silent no-op.
    refreshing: Mutex<()>,
    /// Session cache for the flat public folder listing used by path
    /// resolution; FindFolder against the public root is expensive.
    public_listing: Mutex<Option<Vec<RemoteFolder>>>,
    /// When set, unsubscribed public folders are shown under the public
    /// root instead of being hidden.
    show_public_folders: bool,
}

impl HierarchySyncEngine {
    pub fn new(client: Arc<dyn RemoteItemClient>, show_public_folders: bool) -> Self {
        Self {
            client,
            folders: RwLock::new(HashMap::new()),
            cookie: Mutex::new(None),
            refreshing: Mutex::new(()),
            public_listing: Mutex::new(None),
            show_public_folders,
        }
    }

    pub fn get(&self, folder_id: &str) -> Option<FolderNode> {
        self.folders.read().unwrap().get(folder_id).cloned()
    }

    pub fn list(&self) -> Vec<FolderNode> {
        self.folders.read().unwrap().values().cloned().collect()
    }

    pub fn children(&self, parent_id: &str) -> Vec<FolderNode> {
        self.folders
            .read()
            .unwrap()
            .values()
            .filter(|node| node.parent_id.as_deref() == Some(parent_id))
            .cloned()
            .collect()
    }

    /// Restore a previously persisted tree and cookie, e.g. at startup.
    pub fn restore(&self, nodes: Vec<FolderNode>, cookie: Option<String>) {
        let mut folders = self.folders.write().unwrap();
        folders.clear();
        for node in nodes {
            folders.insert(node.folder_id.clone(), node);
        }
        *self.cookie.lock().unwrap() = cookie;
    }

    pub fn cookie(&self) -> Option<String> {
        self.cookie.lock().unwrap().clone()
    }

    /// Bring the folder tree in line with the server.
    ///
    /// Idempotent; a refresh already in progress makes this return empty
    /// changes immediately.
    pub fn refresh(&self, cancel: &CancelToken) -> Result<HierarchyChanges> {
        let Ok(_guard) = self.refreshing.try_lock() else {
            return Ok(HierarchyChanges::default());
        };

        let mut changes = HierarchyChanges::default();
        let mut cookie = self.cookie.lock().unwrap().clone();
        let mut healed = false;

        loop {
            cancel.check()?;

            let page = match self.client.sync_folder_hierarchy(cookie.as_deref()) {
                Ok(page) => page,
                Err(EwsError::InvalidSyncState) if !healed => {
                    warn!("Server rejected folder hierarchy sync state, full resync");
                    healed = true;
                    let mut folders = self.folders.write().unwrap();
                    for id in folders.keys() {
                        changes.removed.push(id.clone());
                    }
                    folders.clear();
                    drop(folders);
                    cookie = None;
                    *self.cookie.lock().unwrap() = None;
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            for change in &page.changes {
                self.apply_change(change, &mut changes)?;
            }
            // Roots come and go with the folders that need them, so the
            // tree is consistent after every page.
            self.reconcile_synthetic_roots(&mut changes);

            *self.cookie.lock().unwrap() = Some(page.sync_state.clone());
            cookie = Some(page.sync_state);

            if page.includes_last {
                break;
            }
        }

        Ok(changes)
    }

    fn apply_change(&self, change: &FolderChange, changes: &mut HierarchyChanges) -> Result<()> {
        let mut folders = self.folders.write().unwrap();
        match change {
            FolderChange::Create(remote) => {
                if folders.contains_key(&remote.id) {
                    warn!("Folder {} already exists, treating create as update", remote.id);
                }
                let node = match folders.get(&remote.id) {
                    // The role was assigned at first creation; keep it.
                    Some(existing) => refreshed_node(existing, remote),
                    None => FolderNode::from_remote(remote),
                };
                let is_new = folders.insert(remote.id.clone(), node).is_none();
                if is_new {
                    changes.added.push(remote.id.clone());
                } else {
                    changes.updated.push(remote.id.clone());
                }
            }
            FolderChange::Update(remote) => {
                let Some(existing) = folders.get(&remote.id) else {
                    warn!("Cannot find folder {} to update, creating it instead", remote.id);
                    folders.insert(remote.id.clone(), FolderNode::from_remote(remote));
                    changes.added.push(remote.id.clone());
                    return Ok(());
                };

                if existing.change_key == remote.change_key {
                    return Ok(());
                }

                let renamed = existing.display_name != remote.display_name;
                let moved = existing.parent_id != remote.parent_id;
                if renamed && moved {
                    // A single delta entry cannot atomically express both;
                    // applying one half would leave the tree wrong either
                    // way, so refuse and let the caller resync.
                    return Err(EwsError::RenameMoveConflict {
                        folder_id: remote.id.clone(),
                    }
                    .into());
                }
                if renamed {
                    info!(
                        "Folder {} renamed from {:?} to {:?}",
                        remote.id, existing.display_name, remote.display_name
                    );
                }

                let node = refreshed_node(existing, remote);
                folders.insert(remote.id.clone(), node);
                changes.updated.push(remote.id.clone());
            }
            FolderChange::Delete { id } => {
                if folders.remove(id).is_some() {
                    changes.removed.push(id.clone());
                }
            }
        }
        Ok(())
    }

    /// Materialize or demolish the synthetic public/foreign roots based on
    /// what the tree currently contains, and reparent scope folders whose
    /// server-side parent is not part of the local tree.
    fn reconcile_synthetic_roots(&self, changes: &mut HierarchyChanges) {
        let mut folders = self.folders.write().unwrap();

        let need_foreign = folders
            .values()
            .any(|node| node.is_foreign() && !node.is_virtual());
        let need_public = folders.values().any(|node| {
            node.is_public()
                && !node.is_virtual()
                && (node.is_subscribed() || self.show_public_folders)
        });

        let known: HashSet<String> = folders.keys().cloned().collect();
        for node in folders.values_mut() {
            if node.is_virtual() {
                continue;
            }
            let orphaned = node
                .parent_id
                .as_ref()
                .is_none_or(|parent| !known.contains(parent));
            if !orphaned {
                continue;
            }
            // Only reparent onto a root that is (about to be) materialized;
            // a hidden folder keeps its server parent id instead of pointing
            // at a root that does not exist locally.
            if node.is_public() && need_public {
                node.parent_id = Some(PUBLIC_ROOT_ID.to_string());
            } else if node.is_foreign() && need_foreign {
                node.parent_id = Some(FOREIGN_ROOT_ID.to_string());
            }
        }

        for (id, name, flag, needed) in [
            (PUBLIC_ROOT_ID, "Public Folders", folder_flags::PUBLIC, need_public),
            (FOREIGN_ROOT_ID, "Other Mailboxes", folder_flags::FOREIGN, need_foreign),
        ] {
            let present = folders.contains_key(id);
            if needed && !present {
                folders.insert(id.to_string(), FolderNode::synthetic_root(id, name, flag));
                changes.added.push(id.to_string());
            } else if !needed && present {
                folders.remove(id);
                changes.removed.push(id.to_string());
            }
        }
    }

    /// Mark a public folder (un)subscribed and let the synthetic root
    /// follow.
    pub fn set_subscribed(&self, folder_id: &str, subscribed: bool) -> Result<HierarchyChanges> {
        let mut changes = HierarchyChanges::default();
        {
            let mut folders = self.folders.write().unwrap();
            let node = folders
                .get_mut(folder_id)
                .ok_or(EwsError::FolderNotFound)?;
            if subscribed {
                node.flags |= folder_flags::SUBSCRIBED;
            } else {
                node.flags &= !folder_flags::SUBSCRIBED;
            }
            changes.updated.push(folder_id.to_string());
        }
        self.reconcile_synthetic_roots(&mut changes);
        Ok(changes)
    }

    /// Resolve a `/`-free path of display names under the public root to
    /// the matching remote folder, using the session-cached listing.
    pub fn resolve_public_path(&self, path: &[&str]) -> Result<Option<RemoteFolder>> {
        if path.is_empty() {
            return Ok(None);
        }

        let mut cache = self.public_listing.lock().unwrap();
        if cache.is_none() {
            *cache = Some(self.client.find_folder(PUBLIC_FOLDERS_ROOT)?);
        }
        let listing = cache.as_ref().unwrap();
        let listed: HashSet<&str> = listing.iter().map(|f| f.id.as_str()).collect();

        let mut parent: Option<String> = None;
        let mut found: Option<RemoteFolder> = None;
        for segment in path {
            let next = listing.iter().find(|folder| {
                folder.display_name == *segment
                    && match &parent {
                        // Top level: the parent is the root itself, which
                        // is not part of the listing.
                        None => folder
                            .parent_id
                            .as_ref()
                            .is_none_or(|p| !listed.contains(p.as_str())),
                        Some(parent) => folder.parent_id.as_deref() == Some(parent),
                    }
            });
            match next {
                Some(folder) => {
                    parent = Some(folder.id.clone());
                    found = Some(folder.clone());
                }
                None => return Ok(None),
            }
        }
        Ok(found)
    }

    /// Drop the cached public folder listing so the next path resolution
    /// fetches a fresh one.
    pub fn invalidate_public_listing(&self) {
        *self.public_listing.lock().unwrap() = None;
    }
}

/// Rebuild a node from fresh remote data, preserving the locally-owned
/// pieces (role, subscription, virtual flag can't apply here).
fn refreshed_node(existing: &FolderNode, remote: &RemoteFolder) -> FolderNode {
    let mut node = FolderNode::from_remote(remote);
    node.kind = existing.kind;
    node.flags |= existing.flags & folder_flags::SUBSCRIBED;
    if existing.flags & folder_flags::SYSTEM != 0 {
        node.flags |= folder_flags::SYSTEM;
    }
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ews::types::FolderScope;

    fn remote(id: &str, parent: Option<&str>, name: &str, ck: &str) -> RemoteFolder {
        RemoteFolder {
            id: id.to_string(),
            parent_id: parent.map(|p| p.to_string()),
            display_name: name.to_string(),
            change_key: ck.to_string(),
            distinguished_id: None,
            scope: FolderScope::Personal,
            total_count: 0,
            unread_count: 0,
            child_count: 0,
        }
    }

    #[test]
    fn test_refreshed_node_preserves_role_and_subscription() {
        let mut first = FolderNode::from_remote(&remote("f1", Some("root"), "Inbox", "ck1"));
        first.kind = crate::models::FolderKind::Inbox;
        first.flags |= folder_flags::SUBSCRIBED | folder_flags::SYSTEM;

        let updated = refreshed_node(&first, &remote("f1", Some("root"), "Renamed", "ck2"));
        assert_eq!(updated.kind, crate::models::FolderKind::Inbox);
        assert!(updated.is_subscribed());
        assert_ne!(updated.flags & folder_flags::SYSTEM, 0);
        assert_eq!(updated.display_name, "Renamed");
    }
}
