//! Purpose: Shared data-directory resolution for the CLI.
//! Exports: `default_data_dir`, `records_dir`, `cache_root`.
//! Invariants: Default data directory remains `~/.synclite`; the relay store
//! and the cache generations live in separate subdirectories.

use std::path::{Path, PathBuf};

pub(crate) fn default_data_dir() -> PathBuf {
    let home = std::env::var_os("HOME").unwrap_or_default();
    PathBuf::from(home).join(".synclite")
}

pub(crate) fn records_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("records")
}

pub(crate) fn cache_root(data_dir: &Path) -> PathBuf {
    data_dir.join("cache")
}
