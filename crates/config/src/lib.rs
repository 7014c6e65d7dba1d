//! Shared on-disk configuration for ewsmail components
//!
//! Every component reads and writes JSON documents under one directory,
//! `~/.config/ewsmail/` by default. [`ConfigDir`] owns that directory:
//! reads distinguish "file missing" from "file broken", and writes go
//! through a temp file so a concurrent reader never sees a half-written
//! document.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Handle to a configuration directory.
pub struct ConfigDir {
    root: PathBuf,
}

impl ConfigDir {
    /// Open the default ewsmail config directory, creating it if needed.
    pub fn open() -> Result<Self> {
        let root = dirs::config_dir()
            .context("Could not determine the user config directory")?
            .join("ewsmail");
        Self::at(root)
    }

    /// Open a config directory at an explicit root. Used by tests and by
    /// hosts that relocate their configuration.
    pub fn at(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create config directory: {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full path of a document within the directory.
    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path(name).exists()
    }

    /// Read and parse a JSON document. A missing file is `None`; a file
    /// that exists but fails to parse is an error.
    pub fn read<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.path(name);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read config file: {}", path.display()));
            }
        };
        let value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(Some(value))
    }

    /// Serialize a value as pretty JSON and replace the document
    /// atomically (write to temp, then rename).
    pub fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.path(name);
        let content = serde_json::to_string_pretty(value)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, content)
            .with_context(|| format!("Failed to write config file: {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace config file: {}", path.display()))?;
        Ok(())
    }

    /// Remove a document. Removing a missing document is not an error.
    pub fn remove(&self, name: &str) -> Result<()> {
        let path = self.path(name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("Failed to remove: {}", path.display()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        name: String,
        count: u32,
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let config = ConfigDir::at(dir.path().join("ewsmail")).unwrap();

        let doc = Doc {
            name: "a".to_string(),
            count: 3,
        };
        config.write("doc.json", &doc).unwrap();
        assert!(config.exists("doc.json"));
        assert_eq!(config.read::<Doc>("doc.json").unwrap(), Some(doc));
    }

    #[test]
    fn test_missing_file_reads_as_none() {
        let dir = tempdir().unwrap();
        let config = ConfigDir::at(dir.path()).unwrap();
        assert_eq!(config.read::<Doc>("absent.json").unwrap(), None);
    }

    #[test]
    fn test_broken_file_is_an_error() {
        let dir = tempdir().unwrap();
        let config = ConfigDir::at(dir.path()).unwrap();
        std::fs::write(config.path("bad.json"), "{not json").unwrap();
        assert!(config.read::<Doc>("bad.json").is_err());
    }

    #[test]
    fn test_write_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let config = ConfigDir::at(dir.path()).unwrap();
        let doc = Doc {
            name: "a".to_string(),
            count: 1,
        };
        config.write("doc.json", &doc).unwrap();
        assert!(!config.path("doc.tmp").exists());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let config = ConfigDir::at(dir.path()).unwrap();
        let doc = Doc {
            name: "a".to_string(),
            count: 1,
        };
        config.write("doc.json", &doc).unwrap();
        config.remove("doc.json").unwrap();
        assert!(!config.exists("doc.json"));
        config.remove("doc.json").unwrap();
    }

    #[test]
    fn test_at_creates_the_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let config = ConfigDir::at(&nested).unwrap();
        assert_eq!(config.root(), nested.as_path());
    }
}
