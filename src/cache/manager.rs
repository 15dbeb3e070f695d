//! Purpose: Offline-first request handling for the application shell.
//! Exports: `CacheManager`, `InstallReport`, `ActivateReport`.
//! Role: Install/activate the shell's cache generation and answer requests
//! cache-first, with a hard bypass for sync traffic.
//! Invariants: Sync requests (path containing `/sync`) never touch the cache.
//! Invariants: Mandatory precache is all-or-nothing; font precache and
//! runtime font writes are best-effort and observed only via logging.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use url::Url;

use crate::cache::config::CacheConfig;
use crate::cache::fetch::{Fetch, FetchRequest, FetchResponse};
use crate::cache::generation::{Generation, delete_generation, list_generations};
use crate::core::error::{Error, ErrorKind};

const SYNC_PATH_MARKER: &str = "/sync";

pub struct CacheManager {
    config: CacheConfig,
    root: PathBuf,
    fetcher: Arc<dyn Fetch>,
}

/// What install managed to cache. Shell assets are mandatory; the rest is
/// best-effort, so the counts can be lower than configured without the
/// install having failed.
#[derive(Clone, Copy, Debug)]
pub struct InstallReport {
    pub shell_assets: usize,
    pub stylesheets: usize,
    pub fonts: usize,
}

#[derive(Clone, Debug)]
pub struct ActivateReport {
    pub removed: Vec<String>,
}

impl CacheManager {
    pub fn new(config: CacheConfig, root: impl Into<PathBuf>, fetcher: Arc<dyn Fetch>) -> Self {
        Self {
            config,
            root: root.into(),
            fetcher,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Builds the cache generation for the current shell version.
    ///
    /// The manifest of shell assets must fetch and store completely or the
    /// staged generation is discarded and the install fails. Stylesheet and
    /// font precaching afterwards never fails the install. On success the
    /// staged tree atomically replaces any prior copy of this generation.
    pub fn install(&self) -> Result<InstallReport, Error> {
        let staging_name = format!("{}.partial", self.config.generation);
        delete_generation(&self.root, &staging_name)?;
        let staging = Generation::open(&self.root, &staging_name)?;

        let shell_assets = match self.precache_shell(&staging) {
            Ok(count) => count,
            Err(err) => {
                let _ = delete_generation(&self.root, &staging_name);
                return Err(err);
            }
        };
        let (stylesheets, fonts) = self.precache_fonts(&staging);

        delete_generation(&self.root, &self.config.generation)?;
        std::fs::rename(staging.dir(), self.root.join(&self.config.generation)).map_err(
            |err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to commit cache generation")
                    .with_path(staging.dir())
                    .with_source(err)
            },
        )?;

        Ok(InstallReport {
            shell_assets,
            stylesheets,
            fonts,
        })
    }

    /// Deletes every generation that is not the current one. Run once at
    /// startup; returns the removed names.
    pub fn activate(&self) -> Result<ActivateReport, Error> {
        let mut removed = Vec::new();
        for name in list_generations(&self.root)? {
            if name != self.config.generation {
                delete_generation(&self.root, &name)?;
                removed.push(name);
            }
        }
        Ok(ActivateReport { removed })
    }

    /// Answers one request from the shell.
    ///
    /// Sync traffic bypasses the cache entirely. Everything else is served
    /// cache-first; on a miss the network response is returned and, for OK
    /// GETs from a trusted font origin, copied into the cache on a detached
    /// thread. When the network is unreachable, navigations fall back to the
    /// cached shell document and all other requests propagate the failure.
    pub fn handle(&self, request: &FetchRequest) -> Result<FetchResponse, Error> {
        if request.url.path().contains(SYNC_PATH_MARKER) {
            return self.fetcher.fetch(request);
        }

        let generation = Generation::open(&self.root, &self.config.generation)?;
        if let Some(hit) = generation.lookup(request)? {
            return Ok(hit);
        }

        match self.fetcher.fetch(request) {
            Ok(response) => {
                if request.method == "GET"
                    && response.ok()
                    && self.config.is_font_origin(&request.url)
                {
                    spawn_cache_write(generation, request.clone(), response.clone());
                }
                Ok(response)
            }
            Err(err) => {
                if request.navigate {
                    let shell = FetchRequest::get(self.config.shell_document_url()?);
                    if let Some(fallback) = generation.lookup(&shell)? {
                        tracing::debug!(url = %request.url, "serving cached shell for offline navigation");
                        return Ok(fallback);
                    }
                }
                Err(err)
            }
        }
    }

    fn precache_shell(&self, staging: &Generation) -> Result<usize, Error> {
        let mut stored = 0;
        for asset in &self.config.shell_assets {
            let url = self.config.resolve(asset)?;
            let request = FetchRequest::get(url);
            let response = self.fetcher.fetch(&request)?;
            if !response.ok() {
                return Err(Error::new(ErrorKind::Network)
                    .with_message(format!(
                        "shell asset fetch returned status {}",
                        response.status
                    ))
                    .with_url(request.url.as_str()));
            }
            staging.store(&request, &response)?;
            stored += 1;
        }
        Ok(stored)
    }

    // Failures here must never fail the install; they are logged and counted
    // as skipped.
    fn precache_fonts(&self, staging: &Generation) -> (usize, usize) {
        let mut stylesheets = 0;
        let mut fonts = 0;
        for stylesheet in &self.config.stylesheet_urls {
            let url = match Url::parse(stylesheet) {
                Ok(url) => url,
                Err(err) => {
                    tracing::warn!(url = %stylesheet, error = %err, "skipping unparsable stylesheet url");
                    continue;
                }
            };
            let request = FetchRequest::get(url);
            let response = match self.fetcher.fetch(&request) {
                Ok(response) if response.ok() => response,
                Ok(response) => {
                    tracing::warn!(url = %request.url, status = response.status, "stylesheet precache skipped");
                    continue;
                }
                Err(err) => {
                    tracing::warn!(url = %request.url, error = %err, "stylesheet precache failed");
                    continue;
                }
            };
            if let Err(err) = staging.store(&request, &response) {
                tracing::warn!(url = %request.url, error = %err, "stylesheet cache write failed");
                continue;
            }
            stylesheets += 1;

            for font_url in stylesheet_font_urls(&response.body_text(), &self.config) {
                let font_request = FetchRequest::get(font_url);
                match self.fetcher.fetch(&font_request) {
                    Ok(font_response) if font_response.ok() => {
                        match staging.store(&font_request, &font_response) {
                            Ok(()) => fonts += 1,
                            Err(err) => {
                                tracing::warn!(url = %font_request.url, error = %err, "font cache write failed");
                            }
                        }
                    }
                    Ok(font_response) => {
                        tracing::warn!(url = %font_request.url, status = font_response.status, "font precache skipped");
                    }
                    Err(err) => {
                        tracing::warn!(url = %font_request.url, error = %err, "font precache failed");
                    }
                }
            }
        }
        (stylesheets, fonts)
    }
}

// Fire-and-forget: the caller already has its response; a failed write is
// only a missed cache fill.
fn spawn_cache_write(generation: Generation, request: FetchRequest, response: FetchResponse) {
    std::thread::spawn(move || {
        if let Err(err) = generation.store(&request, &response) {
            tracing::warn!(url = %request.url, error = %err, "background cache write failed");
        }
    });
}

/// Pulls `url(...)` references out of a stylesheet body, keeping only
/// absolute URLs on a trusted font origin.
fn stylesheet_font_urls(css: &str, config: &CacheConfig) -> Vec<Url> {
    let mut found: Vec<Url> = Vec::new();
    let mut rest = css;
    while let Some(start) = rest.find("url(") {
        rest = &rest[start + 4..];
        let Some(end) = rest.find(')') else {
            break;
        };
        let candidate = rest[..end].trim().trim_matches(|ch| ch == '"' || ch == '\'');
        rest = &rest[end + 1..];
        let Ok(url) = Url::parse(candidate) else {
            continue;
        };
        if config.is_font_origin(&url) && !found.contains(&url) {
            found.push(url);
        }
    }
    found
}
