//! Purpose: On-disk cache generations for the asset cache manager.
//! Exports: `Generation`, `list_generations`, `delete_generation`.
//! Role: A generation is a directory of entry pairs (metadata JSON + raw
//! body) keyed by the SHA-256 of the request identity (method + URL).
//! Invariants: The body file is committed before its metadata, so a visible
//! entry always has a readable body.
//! Invariants: Entries have no per-item expiry; they live until the whole
//! generation directory is deleted.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cache::fetch::{FetchRequest, FetchResponse};
use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Debug)]
pub struct Generation {
    dir: PathBuf,
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    method: String,
    url: String,
    status: u16,
    headers: Vec<(String, String)>,
}

impl Generation {
    /// Opens (creating if absent) the generation named `name` under `root`.
    pub fn open(root: impl AsRef<Path>, name: &str) -> Result<Self, Error> {
        validate_generation_name(name)?;
        let dir = root.as_ref().join(name);
        std::fs::create_dir_all(&dir).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to create cache generation")
                .with_path(&dir)
                .with_source(err)
        })?;
        Ok(Self {
            dir,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Exact-match lookup on the request identity.
    pub fn lookup(&self, request: &FetchRequest) -> Result<Option<FetchResponse>, Error> {
        let stem = entry_stem(request);
        let meta_path = self.dir.join(format!("{stem}.meta.json"));
        let contents = match std::fs::read(&meta_path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(Error::new(ErrorKind::Io)
                    .with_message("failed to read cache entry metadata")
                    .with_path(&meta_path)
                    .with_source(err));
            }
        };
        let meta: EntryMeta = serde_json::from_slice(&contents).map_err(|err| {
            Error::new(ErrorKind::Corrupt)
                .with_message("cache entry metadata is not valid JSON")
                .with_path(&meta_path)
                .with_source(err)
        })?;
        let body_path = self.dir.join(format!("{stem}.body"));
        let body = std::fs::read(&body_path).map_err(|err| {
            Error::new(ErrorKind::Corrupt)
                .with_message("cache entry body is missing")
                .with_path(&body_path)
                .with_source(err)
        })?;
        Ok(Some(FetchResponse {
            status: meta.status,
            headers: meta.headers,
            body,
        }))
    }

    /// Stores a captured response under the request identity, replacing any
    /// existing entry for it.
    pub fn store(&self, request: &FetchRequest, response: &FetchResponse) -> Result<(), Error> {
        let stem = entry_stem(request);
        let body_path = self.dir.join(format!("{stem}.body"));
        write_atomic(&body_path, &response.body)?;

        let meta = EntryMeta {
            method: request.method.clone(),
            url: request.url.as_str().to_string(),
            status: response.status,
            headers: response.headers.clone(),
        };
        let encoded = serde_json::to_vec(&meta).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode cache entry metadata")
                .with_source(err)
        })?;
        write_atomic(&self.dir.join(format!("{stem}.meta.json")), &encoded)
    }
}

/// Names of every generation directory under the cache root.
pub fn list_generations(root: impl AsRef<Path>) -> Result<Vec<String>, Error> {
    let root = root.as_ref();
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(Error::new(ErrorKind::Io)
                .with_message("failed to read cache root")
                .with_path(root)
                .with_source(err));
        }
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read cache root entry")
                .with_path(root)
                .with_source(err)
        })?;
        let is_dir = entry
            .file_type()
            .map(|file_type| file_type.is_dir())
            .unwrap_or(false);
        if !is_dir {
            continue;
        }
        if let Ok(name) = entry.file_name().into_string() {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Deletes a whole generation; deleting an absent generation is not an error.
pub fn delete_generation(root: impl AsRef<Path>, name: &str) -> Result<(), Error> {
    validate_generation_name(name)?;
    let dir = root.as_ref().join(name);
    match std::fs::remove_dir_all(&dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(Error::new(ErrorKind::Io)
            .with_message("failed to delete cache generation")
            .with_path(&dir)
            .with_source(err)),
    }
}

fn validate_generation_name(name: &str) -> Result<(), Error> {
    let safe = !name.is_empty()
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_'));
    if !safe {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("generation name contains unsupported characters")
            .with_hint("Names are limited to [A-Za-z0-9._-]."));
    }
    Ok(())
}

fn entry_stem(request: &FetchRequest) -> String {
    let digest = Sha256::digest(format!("{} {}", request.method, request.url).as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), Error> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to write cache entry")
            .with_path(&tmp)
            .with_source(err)
    })?;
    std::fs::rename(&tmp, path).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to commit cache entry")
            .with_path(path)
            .with_source(err)
    })
}
