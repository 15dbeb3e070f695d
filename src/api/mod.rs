//! Purpose: Define the stable public Rust API boundary for synclite.
//! Exports: Relay service, record types, and error types used by the CLI.
//! Role: Public surface; internal storage stays behind this module.

mod relay;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::keys::{MIN_SYNC_KEY_CHARS, key_hash, validate_sync_key};
pub use crate::core::record::{MAX_DOCUMENT_BYTES, SyncRecord};
pub use crate::core::store::FileStore;
pub use relay::SyncService;
