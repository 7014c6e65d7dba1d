//! In-memory storage implementations
//!
//! Used for testing and as a stub before a host summary database is wired
//! in. HashMaps protected by RwLocks, same pattern as the on-disk stores.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::RwLock;

use super::traits::{CalendarStore, MessageInfoStore};
use crate::models::{CalendarComponent, MessageMeta, SyncHeader};

/// In-memory implementation of [`MessageInfoStore`].
pub struct InMemoryInfoStore {
    headers: RwLock<HashMap<String, SyncHeader>>,
    /// folder_id -> uid -> meta
    metas: RwLock<HashMap<String, HashMap<String, MessageMeta>>>,
}

impl InMemoryInfoStore {
    pub fn new() -> Self {
        Self {
            headers: RwLock::new(HashMap::new()),
            metas: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryInfoStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageInfoStore for InMemoryInfoStore {
    fn get_header(&self, folder_id: &str) -> Result<Option<SyncHeader>> {
        Ok(self.headers.read().unwrap().get(folder_id).cloned())
    }

    fn put_header(&self, folder_id: &str, header: &SyncHeader) -> Result<()> {
        self.headers
            .write()
            .unwrap()
            .insert(folder_id.to_string(), header.clone());
        Ok(())
    }

    fn get_meta(&self, folder_id: &str, uid: &str) -> Result<Option<MessageMeta>> {
        Ok(self
            .metas
            .read()
            .unwrap()
            .get(folder_id)
            .and_then(|folder| folder.get(uid))
            .cloned())
    }

    fn put_meta(&self, folder_id: &str, uid: &str, meta: &MessageMeta) -> Result<()> {
        self.metas
            .write()
            .unwrap()
            .entry(folder_id.to_string())
            .or_default()
            .insert(uid.to_string(), meta.clone());
        Ok(())
    }

    fn delete_meta(&self, folder_id: &str, uid: &str) -> Result<()> {
        if let Some(folder) = self.metas.write().unwrap().get_mut(folder_id) {
            folder.remove(uid);
        }
        Ok(())
    }

    fn has_uid(&self, folder_id: &str, uid: &str) -> Result<bool> {
        Ok(self
            .metas
            .read()
            .unwrap()
            .get(folder_id)
            .is_some_and(|folder| folder.contains_key(uid)))
    }

    fn list_uids(&self, folder_id: &str) -> Result<Vec<String>> {
        Ok(self
            .metas
            .read()
            .unwrap()
            .get(folder_id)
            .map(|folder| folder.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn count(&self, folder_id: &str) -> Result<usize> {
        Ok(self
            .metas
            .read()
            .unwrap()
            .get(folder_id)
            .map(|folder| folder.len())
            .unwrap_or(0))
    }

    fn clear_folder(&self, folder_id: &str) -> Result<()> {
        self.metas.write().unwrap().remove(folder_id);
        self.headers.write().unwrap().remove(folder_id);
        Ok(())
    }
}

/// In-memory implementation of [`CalendarStore`].
pub struct InMemoryCalendarStore {
    cookie: RwLock<Option<String>>,
    /// (uid, recurrence_id) -> component
    components: RwLock<HashMap<(String, Option<String>), CalendarComponent>>,
}

impl InMemoryCalendarStore {
    pub fn new() -> Self {
        Self {
            cookie: RwLock::new(None),
            components: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCalendarStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CalendarStore for InMemoryCalendarStore {
    fn get_cookie(&self) -> Result<Option<String>> {
        Ok(self.cookie.read().unwrap().clone())
    }

    fn put_cookie(&self, cookie: Option<&str>) -> Result<()> {
        *self.cookie.write().unwrap() = cookie.map(|c| c.to_string());
        Ok(())
    }

    fn get_component(
        &self,
        uid: &str,
        recurrence_id: Option<&str>,
    ) -> Result<Option<CalendarComponent>> {
        let key = (uid.to_string(), recurrence_id.map(|r| r.to_string()));
        Ok(self.components.read().unwrap().get(&key).cloned())
    }

    fn find_by_item_id(&self, item_id: &str) -> Result<Option<CalendarComponent>> {
        Ok(self
            .components
            .read()
            .unwrap()
            .values()
            .find(|c| c.item_id.id == item_id)
            .cloned())
    }

    fn put_component(&self, component: CalendarComponent) -> Result<()> {
        self.components
            .write()
            .unwrap()
            .insert(component.key(), component);
        Ok(())
    }

    fn remove_uid(&self, uid: &str) -> Result<usize> {
        let mut components = self.components.write().unwrap();
        let before = components.len();
        components.retain(|(u, _), _| u != uid);
        Ok(before - components.len())
    }

    fn remove_component(&self, uid: &str, recurrence_id: Option<&str>) -> Result<()> {
        let key = (uid.to_string(), recurrence_id.map(|r| r.to_string()));
        self.components.write().unwrap().remove(&key);
        Ok(())
    }

    fn list_components(&self) -> Result<Vec<CalendarComponent>> {
        Ok(self.components.read().unwrap().values().cloned().collect())
    }

    fn clear(&self) -> Result<()> {
        self.components.write().unwrap().clear();
        *self.cookie.write().unwrap() = None;
        Ok(())
    }
}
