//! Cached calendar components and composite objects

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ews::types::{ItemClass, RemoteCalendarItem, RemoteItemId};

/// One cached calendar row, keyed by `(uid, recurrence_id)`.
///
/// A non-recurring event or a recurring master has `recurrence_id: None`;
/// each detached instance of a recurring event gets its own row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarComponent {
    pub uid: String,
    pub recurrence_id: Option<String>,
    pub item_id: RemoteItemId,
    pub class: ItemClass,
    pub summary: String,
    pub location: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl CalendarComponent {
    pub fn from_remote(item: &RemoteCalendarItem) -> CalendarComponent {
        CalendarComponent {
            uid: item.uid.clone(),
            recurrence_id: item.recurrence_id.clone(),
            item_id: item.item_id.clone(),
            class: item.class,
            summary: item.summary.clone(),
            location: item.location.clone(),
            start: item.start,
            end: item.end,
        }
    }

    /// Cache key for this row.
    pub fn key(&self) -> (String, Option<String>) {
        (self.uid.clone(), self.recurrence_id.clone())
    }
}

/// Composite calendar object: the master component plus any detached
/// instances, folded together per uid before being handed to the cache
/// consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarObject {
    pub uid: String,
    pub master: CalendarComponent,
    pub instances: Vec<CalendarComponent>,
}

/// Fold a flat list of components into one composite object per uid.
///
/// Rows without a master (instances whose master was not part of the
/// input) are dropped; the caller is expected to fetch masters and
/// instances together.
pub fn fold_components(components: Vec<CalendarComponent>) -> Vec<CalendarObject> {
    let mut masters: HashMap<String, CalendarComponent> = HashMap::new();
    let mut instances: HashMap<String, Vec<CalendarComponent>> = HashMap::new();

    for comp in components {
        if comp.recurrence_id.is_none() {
            masters.insert(comp.uid.clone(), comp);
        } else {
            instances.entry(comp.uid.clone()).or_default().push(comp);
        }
    }

    let mut objects: Vec<CalendarObject> = masters
        .into_iter()
        .map(|(uid, master)| {
            let mut instances = instances.remove(&uid).unwrap_or_default();
            instances.sort_by(|a, b| a.recurrence_id.cmp(&b.recurrence_id));
            CalendarObject {
                uid,
                master,
                instances,
            }
        })
        .collect();
    objects.sort_by(|a, b| a.uid.cmp(&b.uid));
    objects
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(uid: &str, rid: Option<&str>) -> CalendarComponent {
        CalendarComponent {
            uid: uid.to_string(),
            recurrence_id: rid.map(|s| s.to_string()),
            item_id: RemoteItemId::new(format!("{uid}/{}", rid.unwrap_or("master")), "ck"),
            class: ItemClass::Event,
            summary: "Event".to_string(),
            location: None,
            start: Utc::now(),
            end: Utc::now(),
        }
    }

    #[test]
    fn test_fold_groups_instances_under_master() {
        let objects = fold_components(vec![
            component("a", None),
            component("a", Some("20260901T100000Z")),
            component("a", Some("20260908T100000Z")),
            component("b", None),
        ]);

        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].uid, "a");
        assert_eq!(objects[0].instances.len(), 2);
        assert_eq!(objects[1].uid, "b");
        assert!(objects[1].instances.is_empty());
    }

    #[test]
    fn test_fold_drops_orphan_instances() {
        let objects = fold_components(vec![component("a", Some("20260901T100000Z"))]);
        assert!(objects.is_empty());
    }
}
