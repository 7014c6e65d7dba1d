//! Integration tests for the sync engines against a scripted mock server.

use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ews_sync::models::flags;
use ews_sync::storage::{
    BodyCache, CalendarStore, InMemoryCalendarStore, InMemoryInfoStore, MessageInfoStore,
};
use ews_sync::sync::{
    fetch_message, move_messages, CalendarChangeReconciler, CalendarKind, CancelToken,
    FlagWriteBackQueue, FolderSyncEngine, HierarchySyncEngine, InFlightFetchRegistry,
    MoveDestinations, NullListener,
};
use ews_sync::{
    BatchOutcome, BatchResponse, Disposition, DirtyFlagRecord, EwsError, EwsResult, FetchShape,
    FetchedItem, FlagUpdate, FolderChange, FolderDeltaPage, FolderScope, FreeBusyEvent, ItemChange,
    ItemClass, ItemDeltaPage, MessageMeta, OccurrenceRef, RemoteCalendarItem, RemoteFolder,
    RemoteItemClient, RemoteItemId, RemoteMessage, SyncHeader, PUBLIC_ROOT_ID,
};

#[derive(Default)]
struct MockClient {
    item_pages: Mutex<VecDeque<EwsResult<ItemDeltaPage>>>,
    /// Cookie passed to each sync_folder_items call.
    sync_cookies: Mutex<Vec<Option<String>>>,
    messages: Mutex<HashMap<String, RemoteMessage>>,
    calendar_items: Mutex<HashMap<String, RemoteCalendarItem>>,
    get_items_calls: Mutex<Vec<Vec<String>>>,
    hierarchy_pages: Mutex<VecDeque<EwsResult<FolderDeltaPage>>>,
    move_responses: Mutex<VecDeque<EwsResult<BatchResponse>>>,
    move_calls: Mutex<Vec<(String, Vec<String>)>>,
    update_responses: Mutex<VecDeque<EwsResult<BatchResponse>>>,
    update_sizes: Mutex<Vec<usize>>,
    content: Mutex<HashMap<String, Vec<u8>>>,
    content_fetches: AtomicUsize,
    content_delay_ms: AtomicU64,
    free_busy: Mutex<Vec<FreeBusyEvent>>,
    /// Flat listing served by find_folder.
    public_folders: Mutex<Vec<RemoteFolder>>,
    find_folder_calls: AtomicUsize,
}

impl MockClient {
    fn push_page(&self, page: EwsResult<ItemDeltaPage>) {
        self.item_pages.lock().unwrap().push_back(page);
    }

    fn add_message(&self, msg: RemoteMessage) {
        self.messages.lock().unwrap().insert(msg.item_id.id.clone(), msg);
    }

    fn get_items_count(&self) -> usize {
        self.get_items_calls.lock().unwrap().len()
    }

    fn all_ok(ids: &[String]) -> BatchResponse {
        BatchResponse {
            entries: ids
                .iter()
                .map(|id| BatchOutcome {
                    id: id.clone(),
                    outcome: Ok(None),
                })
                .collect(),
            error: None,
        }
    }
}

impl RemoteItemClient for MockClient {
    fn sync_folder_items(
        &self,
        _folder_id: &str,
        sync_state: Option<&str>,
        _max_changes: usize,
    ) -> EwsResult<ItemDeltaPage> {
        self.sync_cookies
            .lock()
            .unwrap()
            .push(sync_state.map(|s| s.to_string()));
        match self.item_pages.lock().unwrap().pop_front() {
            Some(page) => page,
            None => Ok(ItemDeltaPage {
                sync_state: sync_state.unwrap_or("ck-idle").to_string(),
                includes_last: true,
                changes: Vec::new(),
            }),
        }
    }

    fn sync_folder_hierarchy(&self, sync_state: Option<&str>) -> EwsResult<FolderDeltaPage> {
        match self.hierarchy_pages.lock().unwrap().pop_front() {
            Some(page) => page,
            None => Ok(FolderDeltaPage {
                sync_state: sync_state.unwrap_or("hck-idle").to_string(),
                includes_last: true,
                changes: Vec::new(),
            }),
        }
    }

    fn get_items(&self, ids: &[String], _shape: FetchShape) -> EwsResult<Vec<FetchedItem>> {
        self.get_items_calls.lock().unwrap().push(ids.to_vec());
        let messages = self.messages.lock().unwrap();
        let calendar_items = self.calendar_items.lock().unwrap();
        Ok(ids
            .iter()
            .map(|id| {
                if let Some(cal) = calendar_items.get(id) {
                    return FetchedItem::Calendar(cal.clone());
                }
                match messages.get(id) {
                    Some(msg) => FetchedItem::Message(msg.clone()),
                    None => FetchedItem::Error {
                        id: Some(id.clone()),
                        message: "not found".to_string(),
                    },
                }
            })
            .collect())
    }

    fn get_message_content(&self, id: &str) -> EwsResult<Vec<u8>> {
        let delay = self.content_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        self.content_fetches.fetch_add(1, Ordering::SeqCst);
        self.content
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or(EwsError::ItemNotFound)
    }

    fn create_item(
        &self,
        _folder_id: &str,
        _content: &[u8],
        _disposition: Disposition,
    ) -> EwsResult<RemoteItemId> {
        Ok(RemoteItemId::new("created", "ck"))
    }

    fn update_flags(&self, updates: &[FlagUpdate]) -> EwsResult<BatchResponse> {
        self.update_sizes.lock().unwrap().push(updates.len());
        match self.update_responses.lock().unwrap().pop_front() {
            Some(response) => response,
            None => {
                let ids: Vec<String> = updates
                    .iter()
                    .map(|u| u.item_id.as_ref().map(|i| i.id.clone()).unwrap_or_default())
                    .collect();
                Ok(Self::all_ok(&ids))
            }
        }
    }

    fn delete_items(&self, ids: &[String], _hard: bool) -> EwsResult<BatchResponse> {
        Ok(Self::all_ok(ids))
    }

    fn move_items(&self, dest_folder_id: &str, ids: &[String]) -> EwsResult<BatchResponse> {
        self.move_calls
            .lock()
            .unwrap()
            .push((dest_folder_id.to_string(), ids.to_vec()));
        match self.move_responses.lock().unwrap().pop_front() {
            Some(response) => response,
            None => Ok(Self::all_ok(ids)),
        }
    }

    fn copy_items(&self, _dest_folder_id: &str, ids: &[String]) -> EwsResult<BatchResponse> {
        Ok(Self::all_ok(ids))
    }

    fn find_folder(&self, _root_folder_id: &str) -> EwsResult<Vec<RemoteFolder>> {
        self.find_folder_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.public_folders.lock().unwrap().clone())
    }

    fn get_free_busy(
        &self,
        _mailbox: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> EwsResult<Vec<FreeBusyEvent>> {
        Ok(self.free_busy.lock().unwrap().clone())
    }

    fn suppress_read_receipt(&self, _item_id: &RemoteItemId) -> EwsResult<()> {
        Ok(())
    }
}

fn msg(id: &str, ck: &str) -> RemoteMessage {
    RemoteMessage {
        item_id: RemoteItemId::new(id, ck),
        class: ItemClass::Message,
        is_read: false,
        is_draft: false,
        is_flagged: false,
        high_importance: false,
        icon_index: None,
        categories: Vec::new(),
        subject: Some("subject".to_string()),
    }
}

fn create(id: &str, ck: &str) -> ItemChange {
    ItemChange::Create {
        item: RemoteItemId::new(id, ck),
        class: ItemClass::Message,
    }
}

fn update(id: &str, ck: &str) -> ItemChange {
    ItemChange::Update {
        item: RemoteItemId::new(id, ck),
        class: ItemClass::Message,
    }
}

fn page(ck: &str, last: bool, changes: Vec<ItemChange>) -> ItemDeltaPage {
    ItemDeltaPage {
        sync_state: ck.to_string(),
        includes_last: last,
        changes,
    }
}

struct Fixture {
    client: Arc<MockClient>,
    store: Arc<InMemoryInfoStore>,
    engine: FolderSyncEngine,
    _dir: tempfile::TempDir,
}

fn fixture(stamp: u32) -> Fixture {
    let client = Arc::new(MockClient::default());
    let store = Arc::new(InMemoryInfoStore::new());
    let dir = tempfile::tempdir().unwrap();
    let bodies = Arc::new(BodyCache::new(dir.path()).unwrap());
    let engine = FolderSyncEngine::new(client.clone(), store.clone(), bodies, stamp);
    Fixture {
        client,
        store,
        engine,
        _dir: dir,
    }
}

#[test]
fn initial_sync_fetches_and_stores() {
    let f = fixture(0);
    f.client.add_message(msg("m1", "ck1"));
    f.client.add_message(msg("m2", "ck1"));
    f.client
        .push_page(Ok(page("ck-a", true, vec![create("m1", "ck1"), create("m2", "ck1")])));

    let stats = f
        .engine
        .refresh("inbox", &NullListener, &CancelToken::new())
        .unwrap();

    assert_eq!(stats.items_stored, 2);
    assert_eq!(f.store.count("inbox").unwrap(), 2);
    let header = f.store.get_header("inbox").unwrap().unwrap();
    assert_eq!(header.cookie.as_deref(), Some("ck-a"));
}

#[test]
fn refresh_with_no_changes_is_idempotent() {
    let f = fixture(0);
    f.client.add_message(msg("m1", "ck1"));
    f.client.push_page(Ok(page("ck-a", true, vec![create("m1", "ck1")])));
    f.engine
        .refresh("inbox", &NullListener, &CancelToken::new())
        .unwrap();
    let fetches = f.client.get_items_count();

    // Second refresh: the mock answers with an empty delta.
    let stats = f
        .engine
        .refresh("inbox", &NullListener, &CancelToken::new())
        .unwrap();

    assert_eq!(stats.items_fetched, 0);
    assert_eq!(f.client.get_items_count(), fetches);
    assert_eq!(f.store.count("inbox").unwrap(), 1);
    // The second run resumed from the persisted cookie.
    let cookies = f.client.sync_cookies.lock().unwrap();
    assert_eq!(cookies.as_slice(), &[None, Some("ck-a".to_string())]);
}

#[test]
fn matching_change_key_skips_the_fetch_round() {
    let f = fixture(0);
    f.store
        .put_header("inbox", &SyncHeader::new(0, Some("ck-a".to_string())))
        .unwrap();
    f.store
        .put_meta("inbox", "AAA", &MessageMeta::new(0, ItemClass::Message, "CK1"))
        .unwrap();
    f.client.push_page(Ok(page("ck-b", true, vec![update("AAA", "CK1")])));

    let stats = f
        .engine
        .refresh("inbox", &NullListener, &CancelToken::new())
        .unwrap();

    assert_eq!(stats.items_skipped, 1);
    assert_eq!(f.client.get_items_count(), 0);
}

#[test]
fn new_change_key_refetches_the_item() {
    let f = fixture(0);
    f.store
        .put_header("inbox", &SyncHeader::new(0, Some("ck-a".to_string())))
        .unwrap();
    f.store
        .put_meta("inbox", "AAA", &MessageMeta::new(0, ItemClass::Message, "CK1"))
        .unwrap();
    f.client.add_message(msg("AAA", "CK2"));
    f.client.push_page(Ok(page("ck-b", true, vec![update("AAA", "CK2")])));

    f.engine
        .refresh("inbox", &NullListener, &CancelToken::new())
        .unwrap();

    assert_eq!(f.client.get_items_count(), 1);
    let meta = f.store.get_meta("inbox", "AAA").unwrap().unwrap();
    assert_eq!(meta.change_key, "CK2");
}

#[test]
fn stale_cookie_self_heals_with_full_resync() {
    let f = fixture(0);
    f.store
        .put_header("inbox", &SyncHeader::new(0, Some("stale".to_string())))
        .unwrap();
    f.store
        .put_meta("inbox", "m-old", &MessageMeta::new(0, ItemClass::Message, "ck0"))
        .unwrap();

    f.client.push_page(Err(EwsError::InvalidSyncState));
    f.client.add_message(msg("m1", "ck1"));
    f.client.push_page(Ok(page("ck-new", true, vec![create("m1", "ck1")])));

    f.engine
        .refresh("inbox", &NullListener, &CancelToken::new())
        .unwrap();

    assert!(f.store.get_meta("inbox", "m-old").unwrap().is_none());
    assert!(f.store.get_meta("inbox", "m1").unwrap().is_some());
    // First call used the stale cookie, the retry used none.
    let cookies = f.client.sync_cookies.lock().unwrap();
    assert_eq!(cookies.as_slice(), &[Some("stale".to_string()), None]);
}

#[test]
fn settings_stamp_mismatch_purges_unconfirmed_items() {
    // Engine runs at stamp 1; the persisted header carries stamp 0.
    let f = fixture(1);
    f.store
        .put_header("inbox", &SyncHeader::new(0, Some("ck-a".to_string())))
        .unwrap();
    f.store
        .put_meta("inbox", "m1", &MessageMeta::new(0, ItemClass::Message, "ck1"))
        .unwrap();
    f.store
        .put_meta("inbox", "m2", &MessageMeta::new(0, ItemClass::Message, "ck1"))
        .unwrap();

    // The full resync only re-confirms m1.
    f.client.push_page(Ok(page("ck-b", true, vec![create("m1", "ck1")])));

    let stats = f
        .engine
        .refresh("inbox", &NullListener, &CancelToken::new())
        .unwrap();

    // m1 matched its cached change key (no fetch), m2 was garbage collected.
    assert_eq!(stats.items_skipped, 1);
    assert_eq!(stats.items_deleted, 1);
    assert!(f.store.get_meta("inbox", "m1").unwrap().is_some());
    assert!(f.store.get_meta("inbox", "m2").unwrap().is_none());
    // The resync ignored the outdated cookie.
    let cookies = f.client.sync_cookies.lock().unwrap();
    assert_eq!(cookies.as_slice(), &[None]);
}

#[test]
fn delete_then_create_of_same_uid_in_one_page() {
    let f = fixture(0);
    f.store
        .put_header("inbox", &SyncHeader::new(0, Some("ck-a".to_string())))
        .unwrap();
    f.store
        .put_meta("inbox", "m1", &MessageMeta::new(flags::SEEN, ItemClass::Message, "ck1"))
        .unwrap();
    f.client.add_message(msg("m1", "ck2"));
    f.client.push_page(Ok(page(
        "ck-b",
        true,
        vec![ItemChange::Delete { id: "m1".to_string() }, create("m1", "ck2")],
    )));

    let stats = f
        .engine
        .refresh("inbox", &NullListener, &CancelToken::new())
        .unwrap();

    assert_eq!(stats.items_deleted, 1);
    assert_eq!(stats.items_stored, 1);
    let meta = f.store.get_meta("inbox", "m1").unwrap().unwrap();
    assert_eq!(meta.change_key, "ck2");
    // The old seen flag did not leak into the recreated message.
    assert_eq!(meta.server_flags & flags::SEEN, 0);
}

#[test]
fn update_for_unknown_item_is_downgraded_to_create() {
    let f = fixture(0);
    f.store
        .put_header("inbox", &SyncHeader::new(0, Some("ck-a".to_string())))
        .unwrap();
    f.client.add_message(msg("m9", "ck1"));
    f.client.push_page(Ok(page("ck-b", true, vec![update("m9", "ck1")])));

    let stats = f
        .engine
        .refresh("inbox", &NullListener, &CancelToken::new())
        .unwrap();

    assert_eq!(stats.items_stored, 1);
    assert!(f.store.get_meta("inbox", "m9").unwrap().is_some());
}

#[test]
fn read_flag_change_applies_without_refetch() {
    let f = fixture(0);
    f.store
        .put_header("inbox", &SyncHeader::new(0, Some("ck-a".to_string())))
        .unwrap();
    f.store
        .put_meta("inbox", "m1", &MessageMeta::new(0, ItemClass::Message, "ck1"))
        .unwrap();
    f.client.push_page(Ok(page(
        "ck-b",
        true,
        vec![ItemChange::ReadFlagChange {
            id: "m1".to_string(),
            is_read: true,
        }],
    )));

    f.engine
        .refresh("inbox", &NullListener, &CancelToken::new())
        .unwrap();

    assert_eq!(f.client.get_items_count(), 0);
    let meta = f.store.get_meta("inbox", "m1").unwrap().unwrap();
    assert_ne!(meta.server_flags & flags::SEEN, 0);
}

#[test]
fn partial_move_reconciles_only_the_confirmed_subset() {
    let client = Arc::new(MockClient::default());
    let store: Arc<InMemoryInfoStore> = Arc::new(InMemoryInfoStore::new());
    let dir = tempfile::tempdir().unwrap();
    let bodies = Arc::new(BodyCache::new(dir.path()).unwrap());

    let uids: Vec<String> = (0..5).map(|i| format!("m{i}")).collect();
    for uid in &uids {
        store
            .put_meta("inbox", uid, &MessageMeta::new(0, ItemClass::Message, "ck"))
            .unwrap();
    }

    // The server moves 3 of 5, then reports an overall failure.
    client.move_responses.lock().unwrap().push_back(Ok(BatchResponse {
        entries: uids
            .iter()
            .enumerate()
            .map(|(i, uid)| BatchOutcome {
                id: uid.clone(),
                outcome: if i == 2 || i == 4 {
                    Err(EwsError::Transient("busy".to_string()))
                } else {
                    Ok(None)
                },
            })
            .collect(),
        error: Some(EwsError::Transient("batch aborted".to_string())),
    }));

    let client_dyn: Arc<dyn RemoteItemClient> = client.clone();
    let store_dyn: Arc<dyn MessageInfoStore> = store.clone();
    let result = move_messages(
        &client_dyn,
        &store_dyn,
        &bodies,
        "inbox",
        "archive",
        &uids,
        &CancelToken::new(),
    );

    assert!(result.is_err());
    // Exactly the confirmed subset is gone locally.
    assert!(store.get_meta("inbox", "m0").unwrap().is_none());
    assert!(store.get_meta("inbox", "m1").unwrap().is_none());
    assert!(store.get_meta("inbox", "m3").unwrap().is_none());
    assert!(store.get_meta("inbox", "m2").unwrap().is_some());
    assert!(store.get_meta("inbox", "m4").unwrap().is_some());
}

#[test]
fn writeback_chunks_at_the_batch_bound() {
    let client = Arc::new(MockClient::default());
    let store: Arc<InMemoryInfoStore> = Arc::new(InMemoryInfoStore::new());
    let dir = tempfile::tempdir().unwrap();
    let bodies = Arc::new(BodyCache::new(dir.path()).unwrap());
    let queue = FlagWriteBackQueue::new(client.clone(), store.clone(), bodies);

    for i in 0..250 {
        let uid = format!("m{i}");
        store
            .put_meta("inbox", &uid, &MessageMeta::new(0, ItemClass::Message, "ck"))
            .unwrap();
        queue.enqueue(DirtyFlagRecord::new(uid, flags::SEEN, 0));
    }

    let dests = MoveDestinations {
        trash: "trash".to_string(),
        junk: "junk".to_string(),
        inbox: "inbox".to_string(),
    };
    let stats = queue.flush("inbox", &dests, &CancelToken::new()).unwrap();

    assert_eq!(stats.flags_pushed, 250);
    let mut sizes = client.update_sizes.lock().unwrap().clone();
    sizes.sort_by(|a, b| b.cmp(a));
    assert_eq!(sizes, vec![100, 100, 50]);
    assert!(queue.is_empty());
    // The cache now records the pushed flags as the server's state.
    let meta = store.get_meta("inbox", "m0").unwrap().unwrap();
    assert_eq!(meta.server_flags, flags::SEEN);
}

#[test]
fn writeback_access_denied_keeps_changes_locally() {
    let client = Arc::new(MockClient::default());
    let store: Arc<InMemoryInfoStore> = Arc::new(InMemoryInfoStore::new());
    let dir = tempfile::tempdir().unwrap();
    let bodies = Arc::new(BodyCache::new(dir.path()).unwrap());
    let queue = FlagWriteBackQueue::new(client.clone(), store.clone(), bodies);

    store
        .put_meta("shared", "m1", &MessageMeta::new(0, ItemClass::Message, "ck"))
        .unwrap();
    queue.enqueue(DirtyFlagRecord::new("m1", flags::SEEN, 0));
    client
        .update_responses
        .lock()
        .unwrap()
        .push_back(Err(EwsError::AccessDenied));

    let dests = MoveDestinations {
        trash: "trash".to_string(),
        junk: "junk".to_string(),
        inbox: "inbox".to_string(),
    };
    let stats = queue.flush("shared", &dests, &CancelToken::new()).unwrap();

    assert_eq!(stats.flags_pushed, 0);
    assert_eq!(stats.saved_locally, 1);
    assert!(queue.is_empty());
    // The server flags in the cache are untouched.
    let meta = store.get_meta("shared", "m1").unwrap().unwrap();
    assert_eq!(meta.server_flags, 0);
}

#[test]
fn writeback_routes_deletions_to_trash() {
    let client = Arc::new(MockClient::default());
    let store: Arc<InMemoryInfoStore> = Arc::new(InMemoryInfoStore::new());
    let dir = tempfile::tempdir().unwrap();
    let bodies = Arc::new(BodyCache::new(dir.path()).unwrap());
    let queue = FlagWriteBackQueue::new(client.clone(), store.clone(), bodies);

    store
        .put_meta("inbox", "m1", &MessageMeta::new(flags::SEEN, ItemClass::Message, "ck"))
        .unwrap();
    queue.enqueue(DirtyFlagRecord::new(
        "m1",
        flags::SEEN | flags::DELETED,
        flags::SEEN,
    ));

    let dests = MoveDestinations {
        trash: "trash".to_string(),
        junk: "junk".to_string(),
        inbox: "inbox".to_string(),
    };
    let stats = queue.flush("inbox", &dests, &CancelToken::new()).unwrap();

    assert_eq!(stats.moved, 1);
    let calls = client.move_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "trash");
    assert!(store.get_meta("inbox", "m1").unwrap().is_none());
}

#[test]
fn failed_flush_requeues_unsent_flag_changes() {
    let client = Arc::new(MockClient::default());
    let store: Arc<InMemoryInfoStore> = Arc::new(InMemoryInfoStore::new());
    let dir = tempfile::tempdir().unwrap();
    let bodies = Arc::new(BodyCache::new(dir.path()).unwrap());
    let queue = FlagWriteBackQueue::new(client.clone(), store.clone(), bodies);

    for uid in ["m1", "m2", "m3"] {
        store
            .put_meta("inbox", uid, &MessageMeta::new(0, ItemClass::Message, "ck"))
            .unwrap();
    }
    // One deletion, one junk move, one plain flag diff.
    queue.enqueue(DirtyFlagRecord::new("m1", flags::DELETED, 0));
    queue.enqueue(DirtyFlagRecord::new("m2", flags::JUNK, 0));
    queue.enqueue(DirtyFlagRecord::new("m3", flags::SEEN, 0));

    client
        .move_responses
        .lock()
        .unwrap()
        .push_back(Err(EwsError::Transient("connection reset".to_string())));

    let dests = MoveDestinations {
        trash: "trash".to_string(),
        junk: "junk".to_string(),
        inbox: "inbox".to_string(),
    };
    assert!(queue.flush("inbox", &dests, &CancelToken::new()).is_err());

    // Nothing reached the server; every record survives for a later retry,
    // including the update partition that was never attempted.
    assert_eq!(queue.len(), 3);
    assert_eq!(client.update_sizes.lock().unwrap().len(), 0);
    assert!(store.get_meta("inbox", "m1").unwrap().is_some());

    // A retry with a healthy server drains the queue.
    let stats = queue.flush("inbox", &dests, &CancelToken::new()).unwrap();
    assert_eq!(stats.moved, 2);
    assert_eq!(stats.flags_pushed, 1);
    assert!(queue.is_empty());
}

#[test]
fn concurrent_readers_share_one_body_download() {
    let client = Arc::new(MockClient::default());
    let dir = tempfile::tempdir().unwrap();
    let bodies = Arc::new(BodyCache::new(dir.path()).unwrap());
    let registry = Arc::new(InFlightFetchRegistry::new());

    client
        .content
        .lock()
        .unwrap()
        .insert("m1".to_string(), b"raw mime".to_vec());
    client.content_delay_ms.store(100, Ordering::SeqCst);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let client = client.clone();
            let bodies = bodies.clone();
            let registry = registry.clone();
            std::thread::spawn(move || {
                fetch_message(
                    &registry,
                    client.as_ref(),
                    &bodies,
                    "m1",
                    &CancelToken::new(),
                )
                .unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), b"raw mime");
    }
    assert_eq!(client.content_fetches.load(Ordering::SeqCst), 1);
}

fn remote_folder(id: &str, parent: Option<&str>, name: &str, ck: &str) -> RemoteFolder {
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
fn simultaneous_rename_and_move_is_rejected_without_applying_either() {
    let client = Arc::new(MockClient::default());
    let engine = HierarchySyncEngine::new(client.clone(), false);

    client
        .hierarchy_pages
        .lock()
        .unwrap()
        .push_back(Ok(FolderDeltaPage {
            sync_state: "hck-1".to_string(),
            includes_last: true,
            changes: vec![FolderChange::Create(remote_folder(
                "f1",
                Some("root"),
                "Projects",
                "ck1",
            ))],
        }));
    engine.refresh(&CancelToken::new()).unwrap();

    client
        .hierarchy_pages
        .lock()
        .unwrap()
        .push_back(Ok(FolderDeltaPage {
            sync_state: "hck-2".to_string(),
            includes_last: true,
            changes: vec![FolderChange::Update(remote_folder(
                "f1",
                Some("elsewhere"),
                "Renamed",
                "ck2",
            ))],
        }));

    let err = engine.refresh(&CancelToken::new()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EwsError>(),
        Some(EwsError::RenameMoveConflict { folder_id }) if folder_id == "f1"
    ));

    // Neither half of the conflicting update was applied.
    let node = engine.get("f1").unwrap();
    assert_eq!(node.display_name, "Projects");
    assert_eq!(node.parent_id.as_deref(), Some("root"));
}

#[test]
fn public_folders_hang_from_a_synthetic_root() {
    let client = Arc::new(MockClient::default());
    let engine = HierarchySyncEngine::new(client.clone(), true);

    let mut public = remote_folder("pf1", Some("server-public-root"), "All Hands", "ck1");
    public.scope = FolderScope::Public;
    client
        .hierarchy_pages
        .lock()
        .unwrap()
        .push_back(Ok(FolderDeltaPage {
            sync_state: "hck-1".to_string(),
            includes_last: true,
            changes: vec![FolderChange::Create(public)],
        }));

    let changes = engine.refresh(&CancelToken::new()).unwrap();
    assert!(changes.added.contains(&"pf1".to_string()));
    assert!(changes.added.contains(&PUBLIC_ROOT_ID.to_string()));

    let node = engine.get("pf1").unwrap();
    assert_eq!(node.parent_id.as_deref(), Some(PUBLIC_ROOT_ID));

    // Deleting the only public folder demolishes the root again.
    client
        .hierarchy_pages
        .lock()
        .unwrap()
        .push_back(Ok(FolderDeltaPage {
            sync_state: "hck-2".to_string(),
            includes_last: true,
            changes: vec![FolderChange::Delete {
                id: "pf1".to_string(),
            }],
        }));
    let changes = engine.refresh(&CancelToken::new()).unwrap();
    assert!(changes.removed.contains(&PUBLIC_ROOT_ID.to_string()));
    assert!(engine.get(PUBLIC_ROOT_ID).is_none());
}

#[test]
fn hidden_public_folders_keep_their_server_parent() {
    // Public folders are not shown and none are subscribed, so no synthetic
    // root exists to hang the folder from.
    let client = Arc::new(MockClient::default());
    let engine = HierarchySyncEngine::new(client.clone(), false);

    let mut public = remote_folder("pf1", Some("server-public-root"), "All Hands", "ck1");
    public.scope = FolderScope::Public;
    client
        .hierarchy_pages
        .lock()
        .unwrap()
        .push_back(Ok(FolderDeltaPage {
            sync_state: "hck-1".to_string(),
            includes_last: true,
            changes: vec![FolderChange::Create(public)],
        }));

    engine.refresh(&CancelToken::new()).unwrap();

    assert!(engine.get(PUBLIC_ROOT_ID).is_none());
    // The folder was not reparented onto the absent root.
    let node = engine.get("pf1").unwrap();
    assert_eq!(node.parent_id.as_deref(), Some("server-public-root"));
}

#[test]
fn public_path_resolution_caches_the_listing() {
    let client = Arc::new(MockClient::default());
    let engine = HierarchySyncEngine::new(client.clone(), true);

    let mut listing = vec![
        remote_folder("p1", Some("server-public-root"), "Teams", "ck1"),
        remote_folder("p2", Some("p1"), "Announcements", "ck1"),
        remote_folder("p3", Some("p1"), "Archive", "ck1"),
    ];
    for folder in &mut listing {
        folder.scope = FolderScope::Public;
    }
    *client.public_folders.lock().unwrap() = listing;

    let found = engine
        .resolve_public_path(&["Teams", "Announcements"])
        .unwrap()
        .unwrap();
    assert_eq!(found.id, "p2");

    // Further resolutions reuse the session-cached listing.
    let missing = engine.resolve_public_path(&["Teams", "Nonexistent"]).unwrap();
    assert!(missing.is_none());
    assert_eq!(client.find_folder_calls.load(Ordering::SeqCst), 1);

    // Invalidation forces a fresh fetch.
    engine.invalidate_public_listing();
    engine.resolve_public_path(&["Teams"]).unwrap();
    assert_eq!(client.find_folder_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn free_busy_refresh_diffs_by_content() {
    fn event(summary: &str, hour: u32) -> FreeBusyEvent {
        FreeBusyEvent {
            start: Utc.with_ymd_and_hms(2026, 9, 1, hour, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 9, 1, hour + 1, 0, 0).unwrap(),
            summary: summary.to_string(),
            location: None,
        }
    }

    let client = Arc::new(MockClient::default());
    let store = Arc::new(InMemoryCalendarStore::new());
    let reconciler =
        CalendarChangeReconciler::new(client.clone(), store.clone(), "fb", CalendarKind::Events);

    let window_start = Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap();
    let window_end = Utc.with_ymd_and_hms(2026, 9, 2, 0, 0, 0).unwrap();

    *client.free_busy.lock().unwrap() = vec![event("Standup", 9), event("Review", 14)];
    let diff = reconciler
        .refresh_free_busy("boss@example.com", window_start, window_end)
        .unwrap();
    assert_eq!(diff.added.len(), 2);
    assert!(diff.removed_uids.is_empty());

    // One event vanishes, one appears, one stays.
    *client.free_busy.lock().unwrap() = vec![event("Review", 14), event("Retro", 16)];
    let diff = reconciler
        .refresh_free_busy("boss@example.com", window_start, window_end)
        .unwrap();
    assert_eq!(diff.added.len(), 1);
    assert_eq!(diff.added[0].summary, "Retro");
    assert_eq!(diff.removed_uids.len(), 1);
    assert_eq!(store.list_components().unwrap().len(), 2);
}

#[test]
fn deleting_one_occurrence_keeps_the_series() {
    let client = Arc::new(MockClient::default());
    let store = Arc::new(InMemoryCalendarStore::new());
    let reconciler = CalendarChangeReconciler::new(
        client.clone(),
        store.clone(),
        "calendar",
        CalendarKind::Events,
    );

    let master = ews_sync::CalendarComponent {
        uid: "uid-1".to_string(),
        recurrence_id: None,
        item_id: RemoteItemId::new("item-master", "ck1"),
        class: ItemClass::Event,
        summary: "Weekly".to_string(),
        location: None,
        start: Utc.with_ymd_and_hms(2026, 9, 1, 10, 0, 0).unwrap(),
        end: Utc.with_ymd_and_hms(2026, 9, 1, 11, 0, 0).unwrap(),
    };
    let mut instance = master.clone();
    instance.recurrence_id = Some("20260908T100000Z".to_string());
    instance.item_id = RemoteItemId::new("item-occ", "ck1");
    instance.start = Utc.with_ymd_and_hms(2026, 9, 8, 10, 0, 0).unwrap();
    instance.end = Utc.with_ymd_and_hms(2026, 9, 8, 11, 0, 0).unwrap();
    store.put_component(master).unwrap();
    store.put_component(instance).unwrap();

    // The server cancels only the detached occurrence.
    client.push_page(Ok(page(
        "cck-1",
        true,
        vec![ItemChange::Delete {
            id: "item-occ".to_string(),
        }],
    )));

    let changes = reconciler.get_changes(&CancelToken::new()).unwrap();

    assert!(changes.removed_uids.is_empty());
    assert!(store.get_component("uid-1", None).unwrap().is_some());
    assert!(store
        .get_component("uid-1", Some("20260908T100000Z"))
        .unwrap()
        .is_none());
    // The surviving composite is re-emitted to the consumer.
    assert_eq!(changes.upserted.len(), 1);
    assert_eq!(changes.upserted[0].uid, "uid-1");
}

#[test]
fn calendar_delta_suppresses_round_tripped_writes() {
    let client = Arc::new(MockClient::default());
    let store = Arc::new(InMemoryCalendarStore::new());
    let reconciler = CalendarChangeReconciler::new(
        client.clone(),
        store.clone(),
        "calendar",
        CalendarKind::Events,
    );

    // Pre-cache the component exactly as the server will echo it.
    store
        .put_component(ews_sync::CalendarComponent {
            uid: "uid-1".to_string(),
            recurrence_id: None,
            item_id: RemoteItemId::new("item-1", "ck1"),
            class: ItemClass::Event,
            summary: "Planning".to_string(),
            location: None,
            start: Utc.with_ymd_and_hms(2026, 9, 1, 10, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 9, 1, 11, 0, 0).unwrap(),
        })
        .unwrap();

    client.push_page(Ok(page(
        "cck-1",
        true,
        vec![ItemChange::Update {
            item: RemoteItemId::new("item-1", "ck1"),
            class: ItemClass::Event,
        }],
    )));

    let changes = reconciler.get_changes(&CancelToken::new()).unwrap();
    assert!(changes.is_empty());
    assert_eq!(client.get_items_count(), 0);
    assert_eq!(store.get_cookie().unwrap().as_deref(), Some("cck-1"));

    // A genuinely new change key is fetched and re-emitted.
    client.calendar_items.lock().unwrap().insert(
        "item-1".to_string(),
        RemoteCalendarItem {
            item_id: RemoteItemId::new("item-1", "ck2"),
            class: ItemClass::Event,
            uid: "uid-1".to_string(),
            recurrence_id: None,
            summary: "Planning (moved)".to_string(),
            location: None,
            start: Utc.with_ymd_and_hms(2026, 9, 1, 12, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 9, 1, 13, 0, 0).unwrap(),
            modified_occurrences: Vec::<OccurrenceRef>::new(),
        },
    );
    client.push_page(Ok(page(
        "cck-2",
        true,
        vec![ItemChange::Update {
            item: RemoteItemId::new("item-1", "ck2"),
            class: ItemClass::Event,
        }],
    )));

    let changes = reconciler.get_changes(&CancelToken::new()).unwrap();
    assert_eq!(changes.upserted.len(), 1);
    assert_eq!(changes.upserted[0].uid, "uid-1");
    assert_eq!(changes.upserted[0].master.summary, "Planning (moved)");
    let cached = store.get_component("uid-1", None).unwrap().unwrap();
    assert_eq!(cached.item_id.change_key, "ck2");
}
