//! Purpose: Sync relay operations over the durable key-value store.
//! Exports: `SyncService`.
//! Role: Stateless per call; owns the hash-keyed read/write/recover contract.
//! Invariants: Keys are validated and hashed before any store access; the
//! plaintext secret never reaches disk or logs.
//! Invariants: At most one current and one previous record exist per hash.

use serde_json::Value;

use crate::core::error::{Error, ErrorKind};
use crate::core::keys::{key_hash, validate_sync_key};
use crate::core::record::{SyncRecord, now_rfc3339, validate_document};
use crate::core::store::FileStore;

#[derive(Clone, Debug)]
pub struct SyncService {
    store: FileStore,
}

impl SyncService {
    /// Opens the service over a store rooted at `dir`.
    pub fn open(dir: impl Into<std::path::PathBuf>) -> Result<Self, Error> {
        Ok(Self {
            store: FileStore::open(dir)?,
        })
    }

    pub fn with_store(store: FileStore) -> Self {
        Self { store }
    }

    /// Reads the current record for `key`, or `None` if nothing was stored.
    pub fn fetch_current(&self, key: &str) -> Result<Option<SyncRecord>, Error> {
        validate_sync_key(key)?;
        self.read_record(&key_hash(key))
    }

    /// Reads the one-generation-old record for `key`.
    pub fn fetch_previous(&self, key: &str) -> Result<Option<SyncRecord>, Error> {
        validate_sync_key(key)?;
        self.read_record(&previous_slot(&key_hash(key)))
    }

    /// Validates and stores `document` as the new current record, first
    /// copying the existing current record (if any) into the previous slot.
    ///
    /// The copy is a non-transactional read-then-write: two concurrent
    /// writers to the same key can interleave so the previous slot holds
    /// either writer's prior value, and near-simultaneous writes can skip an
    /// intermediate state. The slot is a best-effort safety net, not a
    /// strict undo log.
    pub fn store_document(&self, key: &str, document: Value) -> Result<SyncRecord, Error> {
        validate_sync_key(key)?;
        validate_document(&document)?;
        let hash = key_hash(key);

        if let Some(current) = self.store.get(&hash)? {
            self.store.put(&previous_slot(&hash), &current)?;
        }

        let record = SyncRecord {
            data: document,
            server_updated_at: now_rfc3339()?,
        };
        let encoded = serde_json::to_value(&record).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode sync record")
                .with_source(err)
        })?;
        self.store.put(&hash, &encoded)?;
        Ok(record)
    }

    fn read_record(&self, slot: &str) -> Result<Option<SyncRecord>, Error> {
        let Some(value) = self.store.get(slot)? else {
            return Ok(None);
        };
        let record = serde_json::from_value(value).map_err(|err| {
            Error::new(ErrorKind::Corrupt)
                .with_message("stored record has an unexpected shape")
                .with_source(err)
        })?;
        Ok(Some(record))
    }
}

fn previous_slot(hash: &str) -> String {
    format!("{hash}.previous")
}
