//! Purpose: Asset cache manager for the application shell.
//! Exports: Configuration, fetch seam, generation storage, and the manager.
//! Role: Serves shell requests cache-first so the application works offline;
//! sync traffic always bypasses this layer.

mod config;
mod fetch;
mod generation;
mod manager;

pub use config::{CacheConfig, SHELL_GENERATION};
pub use fetch::{Fetch, FetchRequest, FetchResponse, UreqFetcher};
pub use generation::{Generation, delete_generation, list_generations};
pub use manager::{ActivateReport, CacheManager, InstallReport};
