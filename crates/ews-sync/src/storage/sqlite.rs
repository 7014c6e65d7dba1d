//! SQLite-backed message info store
//!
//! Persists the per-folder sync headers and per-message metadata records in
//! their shared space-joined string encodings, so the database stays
//! readable by the host framework's tooling.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use rusqlite_migration::{Migrations, M};
use std::path::Path;
use std::sync::Mutex;

use super::traits::MessageInfoStore;
use crate::models::{MessageMeta, SyncHeader};

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        "CREATE TABLE folder_header (
            folder_id TEXT PRIMARY KEY,
            header TEXT NOT NULL
        );
        CREATE TABLE message_meta (
            folder_id TEXT NOT NULL,
            uid TEXT NOT NULL,
            meta TEXT NOT NULL,
            PRIMARY KEY (folder_id, uid)
        );
        CREATE INDEX idx_message_meta_folder ON message_meta (folder_id);",
    )])
}

/// SQLite implementation of [`MessageInfoStore`].
pub struct SqliteInfoStore {
    conn: Mutex<Connection>,
}

impl SqliteInfoStore {
    /// Open (or create) the store at the given path and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path.as_ref())
            .with_context(|| format!("Failed to open database: {}", path.as_ref().display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl MessageInfoStore for SqliteInfoStore {
    fn get_header(&self, folder_id: &str) -> Result<Option<SyncHeader>> {
        let conn = self.conn.lock().unwrap();
        let record: Option<String> = conn
            .query_row(
                "SELECT header FROM folder_header WHERE folder_id = ?1",
                params![folder_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(record.as_deref().and_then(SyncHeader::decode))
    }

    fn put_header(&self, folder_id: &str, header: &SyncHeader) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO folder_header (folder_id, header) VALUES (?1, ?2)
             ON CONFLICT (folder_id) DO UPDATE SET header = excluded.header",
            params![folder_id, header.encode()],
        )?;
        Ok(())
    }

    fn get_meta(&self, folder_id: &str, uid: &str) -> Result<Option<MessageMeta>> {
        let conn = self.conn.lock().unwrap();
        let record: Option<String> = conn
            .query_row(
                "SELECT meta FROM message_meta WHERE folder_id = ?1 AND uid = ?2",
                params![folder_id, uid],
                |row| row.get(0),
            )
            .optional()?;
        Ok(record.as_deref().and_then(MessageMeta::decode))
    }

    fn put_meta(&self, folder_id: &str, uid: &str, meta: &MessageMeta) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO message_meta (folder_id, uid, meta) VALUES (?1, ?2, ?3)
             ON CONFLICT (folder_id, uid) DO UPDATE SET meta = excluded.meta",
            params![folder_id, uid, meta.encode()],
        )?;
        Ok(())
    }

    fn delete_meta(&self, folder_id: &str, uid: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM message_meta WHERE folder_id = ?1 AND uid = ?2",
            params![folder_id, uid],
        )?;
        Ok(())
    }

    fn has_uid(&self, folder_id: &str, uid: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM message_meta WHERE folder_id = ?1 AND uid = ?2",
            params![folder_id, uid],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn list_uids(&self, folder_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT uid FROM message_meta WHERE folder_id = ?1")?;
        let uids = stmt
            .query_map(params![folder_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(uids)
    }

    fn count(&self, folder_id: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM message_meta WHERE folder_id = ?1",
            params![folder_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn clear_folder(&self, folder_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM message_meta WHERE folder_id = ?1",
            params![folder_id],
        )?;
        conn.execute(
            "DELETE FROM folder_header WHERE folder_id = ?1",
            params![folder_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ews::types::ItemClass;
    use crate::models::{flags, CACHE_SCHEMA_VERSION};
    use tempfile::tempdir;

    #[test]
    fn test_migrations_are_valid() {
        assert!(migrations().validate().is_ok());
    }

    #[test]
    fn test_meta_roundtrip_on_disk() {
        let dir = tempdir().unwrap();
        let store = SqliteInfoStore::open(dir.path().join("meta.db")).unwrap();

        let meta = MessageMeta::new(flags::SEEN, ItemClass::Message, "ck1");
        store.put_meta("folder", "m1", &meta).unwrap();
        assert_eq!(store.get_meta("folder", "m1").unwrap(), Some(meta.clone()));

        // Upsert replaces.
        let meta2 = MessageMeta::new(flags::SEEN | flags::FLAGGED, ItemClass::Message, "ck2");
        store.put_meta("folder", "m1", &meta2).unwrap();
        assert_eq!(store.get_meta("folder", "m1").unwrap(), Some(meta2));
        assert_eq!(store.count("folder").unwrap(), 1);
    }

    #[test]
    fn test_header_roundtrip() {
        let store = SqliteInfoStore::open_in_memory().unwrap();
        let header = SyncHeader::new(9, Some("token".to_string()));
        store.put_header("folder", &header).unwrap();

        let loaded = store.get_header("folder").unwrap().unwrap();
        assert_eq!(loaded.version, CACHE_SCHEMA_VERSION);
        assert_eq!(loaded.sync_tag_stamp, 9);
        assert_eq!(loaded.cookie.as_deref(), Some("token"));
    }

    #[test]
    fn test_clear_folder_removes_header_and_metas() {
        let store = SqliteInfoStore::open_in_memory().unwrap();
        let meta = MessageMeta::new(0, ItemClass::Message, "ck");
        store.put_meta("a", "m1", &meta).unwrap();
        store.put_meta("b", "m2", &meta).unwrap();
        store.put_header("a", &SyncHeader::new(0, None)).unwrap();

        store.clear_folder("a").unwrap();
        assert_eq!(store.count("a").unwrap(), 0);
        assert!(store.get_header("a").unwrap().is_none());
        assert_eq!(store.count("b").unwrap(), 1);
    }

    #[test]
    fn test_list_uids() {
        let store = SqliteInfoStore::open_in_memory().unwrap();
        let meta = MessageMeta::new(0, ItemClass::Message, "ck");
        store.put_meta("f", "m1", &meta).unwrap();
        store.put_meta("f", "m2", &meta).unwrap();

        let mut uids = store.list_uids("f").unwrap();
        uids.sort();
        assert_eq!(uids, vec!["m1", "m2"]);
    }
}
