//! Purpose: Shared core library crate used by the `synclite` CLI and tests.
//! Exports: `api` (sync relay service), `cache` (asset cache manager),
//! `core` (store, records, keys, errors).
//! Role: Internal library backing the binary; not yet a stable public SDK.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod cache;
pub mod core;
