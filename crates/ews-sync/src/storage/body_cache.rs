//! Content-addressed message body cache
//!
//! Bodies are stored as zstd-compressed files named by the hex SHA-256 of
//! the message UID, under a `cur` namespace directory. Writes go through a
//! temp file and rename so readers never observe a partial body.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

/// Filesystem-backed body cache for one account.
pub struct BodyCache {
    cur: PathBuf,
    compression_level: i32,
}

impl BodyCache {
    /// Create a body cache rooted at the given directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let cur = root.as_ref().join("cur");
        fs::create_dir_all(&cur).context("Failed to create body cache directory")?;
        Ok(Self {
            cur,
            compression_level: 3,
        })
    }

    /// Content-addressed file path for a UID.
    fn body_path(&self, uid: &str) -> PathBuf {
        let digest = Sha256::digest(uid.as_bytes());
        let mut name = String::with_capacity(64);
        for byte in digest {
            name.push_str(&format!("{byte:02x}"));
        }
        self.cur.join(name)
    }

    pub fn put(&self, uid: &str, data: &[u8]) -> Result<()> {
        let path = self.body_path(uid);
        let compressed = zstd::encode_all(data, self.compression_level)
            .context("Failed to compress message body")?;

        // Write atomically (write to temp, then rename)
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &compressed)?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    pub fn get(&self, uid: &str) -> Result<Option<Vec<u8>>> {
        let path = self.body_path(uid);
        if !path.exists() {
            return Ok(None);
        }

        let compressed = fs::read(&path)?;
        let mut decoder = zstd::Decoder::new(compressed.as_slice())?;
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .context("Failed to decompress message body")?;
        Ok(Some(decompressed))
    }

    pub fn exists(&self, uid: &str) -> bool {
        self.body_path(uid).exists()
    }

    pub fn delete(&self, uid: &str) -> Result<()> {
        let path = self.body_path(uid);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Drop every cached body.
    pub fn clear(&self) -> Result<()> {
        if self.cur.exists() {
            fs::remove_dir_all(&self.cur)?;
            fs::create_dir_all(&self.cur)?;
        }
        Ok(())
    }
}
