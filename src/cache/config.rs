//! Purpose: Deployment-fixed configuration for the asset cache manager.
//! Exports: `CacheConfig`.
//! Invariants: The generation identifier changes only with a shell deploy;
//! bumping it supersedes every older generation at the next activate.

use url::Url;

use crate::core::error::{Error, ErrorKind};

/// Cache generation identifier for the current shell deploy.
pub const SHELL_GENERATION: &str = "shell-cache-v1";

const SHELL_ASSETS: &[&str] = &[
    "./",
    "./iron_log.html",
    "./manifest.json",
    "./icons/icon-192.png",
    "./icons/icon-512.png",
];

const SHELL_DOCUMENT: &str = "./iron_log.html";

const STYLESHEET_URLS: &[&str] = &[
    "https://fonts.googleapis.com/css2?family=JetBrains+Mono:wght@400;500;600;700;800&display=swap",
];

const FONT_ORIGINS: &[&str] = &["https://fonts.googleapis.com", "https://fonts.gstatic.com"];

const DEFAULT_BASE_URL: &str = "https://ironlog.app/";

#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Name of the active cache generation.
    pub generation: String,
    /// Base the shell is deployed under; manifest entries resolve against it.
    pub base_url: Url,
    /// Local assets precached at install. Install fails if any is missing.
    pub shell_assets: Vec<String>,
    /// Manifest entry served as the offline fallback for navigations.
    pub shell_document: String,
    /// External stylesheets precached best-effort at install.
    pub stylesheet_urls: Vec<String>,
    /// Origins whose GET responses are eligible for runtime caching.
    pub font_origins: Vec<String>,
}

impl CacheConfig {
    /// The baked-in deployment configuration.
    pub fn builtin() -> Self {
        let base_url = Url::parse(DEFAULT_BASE_URL).expect("builtin base url parses");
        Self::for_shell(base_url)
    }

    /// The baked manifest and origins against a caller-supplied base URL.
    pub fn for_shell(base_url: Url) -> Self {
        Self {
            generation: SHELL_GENERATION.to_string(),
            base_url,
            shell_assets: SHELL_ASSETS.iter().map(|s| s.to_string()).collect(),
            shell_document: SHELL_DOCUMENT.to_string(),
            stylesheet_urls: STYLESHEET_URLS.iter().map(|s| s.to_string()).collect(),
            font_origins: FONT_ORIGINS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Resolves a manifest entry against the deployment base.
    pub fn resolve(&self, asset: &str) -> Result<Url, Error> {
        self.base_url.join(asset).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("manifest entry {asset:?} does not resolve"))
                .with_url(self.base_url.as_str())
                .with_source(err)
        })
    }

    pub fn shell_document_url(&self) -> Result<Url, Error> {
        self.resolve(&self.shell_document)
    }

    pub fn is_font_origin(&self, url: &Url) -> bool {
        let origin = url.origin().ascii_serialization();
        self.font_origins.iter().any(|allowed| *allowed == origin)
    }
}
