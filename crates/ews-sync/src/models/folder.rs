//! Folder tree entries, well-known roles and synthetic roots

use serde::{Deserialize, Serialize};

use crate::ews::types::{FolderScope, RemoteFolder};

/// Local ids of the two synthetic roots. These folders exist only in the
/// local tree; they are materialized and demolished as real folders need
/// them as parents and are never sent to the server.
pub const PUBLIC_ROOT_ID: &str = ":public-folders";
pub const FOREIGN_ROOT_ID: &str = ":foreign-folders";

/// Well-known role of a folder.
///
/// Assigned at most once, from the fixed table in [`well_known_kind`], when
/// the folder is first created locally. Rename/move bookkeeping never
/// changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FolderKind {
    Mail,
    Inbox,
    Drafts,
    Sent,
    Trash,
    Junk,
    Outbox,
    Calendar,
    Contacts,
    Tasks,
    Notes,
}

/// Map a distinguished folder name to its role.
///
/// Unknown names fall back to plain mail folders; the table is closed by
/// design so roles cannot be invented from display names.
pub fn well_known_kind(distinguished_id: &str) -> Option<FolderKind> {
    match distinguished_id {
        "inbox" => Some(FolderKind::Inbox),
        "drafts" => Some(FolderKind::Drafts),
        "sentitems" => Some(FolderKind::Sent),
        "deleteditems" => Some(FolderKind::Trash),
        "junkemail" => Some(FolderKind::Junk),
        "outbox" => Some(FolderKind::Outbox),
        "calendar" => Some(FolderKind::Calendar),
        "contacts" => Some(FolderKind::Contacts),
        "tasks" => Some(FolderKind::Tasks),
        "notes" => Some(FolderKind::Notes),
        _ => None,
    }
}

/// Folder flag bits.
pub mod folder_flags {
    /// The folder has child folders.
    pub const CHILDREN: u32 = 1 << 0;
    /// Known to have no children (distinct from "unknown").
    pub const NOCHILDREN: u32 = 1 << 1;
    pub const SUBSCRIBED: u32 = 1 << 2;
    /// System folder (one of the well-known roles).
    pub const SYSTEM: u32 = 1 << 3;
    pub const PUBLIC: u32 = 1 << 4;
    pub const FOREIGN: u32 = 1 << 5;
    /// Exists only locally (the synthetic roots).
    pub const VIRTUAL: u32 = 1 << 6;
}

/// One entry in the locally cached folder tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderNode {
    pub folder_id: String,
    pub parent_id: Option<String>,
    pub display_name: String,
    pub kind: FolderKind,
    pub flags: u32,
    pub unread_count: u32,
    pub total_count: u32,
    pub change_key: String,
}

impl FolderNode {
    /// Build a node from a remote folder descriptor, assigning the
    /// well-known role exactly once at creation.
    pub fn from_remote(remote: &RemoteFolder) -> FolderNode {
        let kind = remote
            .distinguished_id
            .as_deref()
            .and_then(well_known_kind)
            .unwrap_or(FolderKind::Mail);

        let mut flags = 0;
        if kind != FolderKind::Mail {
            flags |= folder_flags::SYSTEM;
        }
        match remote.scope {
            FolderScope::Public => flags |= folder_flags::PUBLIC,
            FolderScope::Foreign => flags |= folder_flags::FOREIGN,
            FolderScope::Personal => {}
        }
        if remote.child_count > 0 {
            flags |= folder_flags::CHILDREN;
        } else {
            flags |= folder_flags::NOCHILDREN;
        }

        FolderNode {
            folder_id: remote.id.clone(),
            parent_id: remote.parent_id.clone(),
            display_name: remote.display_name.clone(),
            kind,
            flags,
            unread_count: remote.unread_count,
            total_count: remote.total_count,
            change_key: remote.change_key.clone(),
        }
    }

    /// Synthetic root node; parentless, local-only.
    pub fn synthetic_root(folder_id: &str, display_name: &str, scope_flag: u32) -> FolderNode {
        FolderNode {
            folder_id: folder_id.to_string(),
            parent_id: None,
            display_name: display_name.to_string(),
            kind: FolderKind::Mail,
            flags: folder_flags::VIRTUAL | folder_flags::CHILDREN | scope_flag,
            unread_count: 0,
            total_count: 0,
            change_key: String::new(),
        }
    }

    pub fn is_public(&self) -> bool {
        self.flags & folder_flags::PUBLIC != 0
    }

    pub fn is_foreign(&self) -> bool {
        self.flags & folder_flags::FOREIGN != 0
    }

    pub fn is_subscribed(&self) -> bool {
        self.flags & folder_flags::SUBSCRIBED != 0
    }

    pub fn is_virtual(&self) -> bool {
        self.flags & folder_flags::VIRTUAL != 0
    }
}
