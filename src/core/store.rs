//! Purpose: Durable key-value store of JSON documents, one plain file per key.
//! Exports: `FileStore`.
//! Role: The relay's only persistence layer; callers compose their own keys.
//! Invariants: Writes go through a temp file and rename, so readers of a key
//! observe either the old or the new document, never a partial write.
//! Invariants: No multi-key transactions; read-after-write holds per key.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens the store rooted at `dir`, creating the directory if absent.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to create store directory")
                .with_path(&dir)
                .with_source(err)
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>, Error> {
        let path = self.entry_path(key)?;
        let contents = match std::fs::read(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(Error::new(ErrorKind::Io)
                    .with_message("failed to read store entry")
                    .with_path(&path)
                    .with_source(err));
            }
        };
        let value = serde_json::from_slice(&contents).map_err(|err| {
            Error::new(ErrorKind::Corrupt)
                .with_message("store entry is not valid JSON")
                .with_path(&path)
                .with_source(err)
        })?;
        Ok(Some(value))
    }

    pub fn put(&self, key: &str, value: &Value) -> Result<(), Error> {
        let path = self.entry_path(key)?;
        let contents = serde_json::to_vec(value).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode store entry")
                .with_source(err)
        })?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &contents).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to write store entry")
                .with_path(&tmp)
                .with_source(err)
        })?;
        std::fs::rename(&tmp, &path).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to commit store entry")
                .with_path(&path)
                .with_source(err)
        })
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf, Error> {
        if key.is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("store key must not be empty"));
        }
        let safe = key
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_'));
        if !safe {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("store key contains unsupported characters")
                .with_hint("Keys are limited to [A-Za-z0-9._-]."));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}
