//! Browser tab extraction
//!
//! Two sources feed the browser handler:
//! - Chromium family: the local remote-debugging endpoint (`/json/list`)
//! - Firefox family: the profile's session-recovery store, read from disk
//!
//! Either source failing is reported as `Unavailable` so the caller can
//! degrade to an empty tab list plus a warning.

use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;
use crate::error::{KeeperError, Result};
use crate::model::{BrowserFamily, BrowserTab, TabSource};
use crate::process::ProcessInfo;

pub mod chromium;
pub mod firefox;

/// What an extraction pass is allowed to spend time on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Fetch favicons into `data:` URIs
    pub favicons: bool,
    /// Read the Firefox session store (disk + decompression)
    pub session_store: bool,
}

impl ExtractOptions {
    pub fn full() -> Self {
        Self {
            favicons: true,
            session_store: true,
        }
    }

    pub fn quick() -> Self {
        Self {
            favicons: false,
            session_store: false,
        }
    }

    /// URLs only, for checking what a running browser already shows
    pub fn urls_only() -> Self {
        Self {
            favicons: false,
            session_store: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedTabs {
    pub tabs: Vec<BrowserTab>,
    pub source: TabSource,
}

/// Source of the tabs a browser window shows
pub trait TabExtractor: Send + Sync {
    /// `window_title` helps pick the right session window when a browser
    /// has several open.
    fn extract(
        &self,
        family: BrowserFamily,
        process: &ProcessInfo,
        window_title: &str,
        options: &ExtractOptions,
    ) -> Result<ExtractedTabs>;
}

/// Production extractor over the debugging endpoint and the session store
#[derive(Debug, Clone)]
pub struct BrowserTabExtractor {
    pub http_timeout: Duration,
    pub debug_ports: Vec<u16>,
    /// Firefox data root holding `profiles.ini`; platform default when None
    pub firefox_root: Option<PathBuf>,
}

impl BrowserTabExtractor {
    pub fn from_config(config: &Config) -> Self {
        Self {
            http_timeout: config.http_timeout,
            debug_ports: config.debug_ports.clone(),
            firefox_root: None,
        }
    }

    pub fn with_firefox_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.firefox_root = Some(root.into());
        self
    }
}

impl TabExtractor for BrowserTabExtractor {
    fn extract(
        &self,
        family: BrowserFamily,
        process: &ProcessInfo,
        window_title: &str,
        options: &ExtractOptions,
    ) -> Result<ExtractedTabs> {
        if family.is_chromium() {
            let client = chromium::DebugClient::new(self.http_timeout)?;
            let port = client
                .discover_port(family, process, &self.debug_ports)
                .ok_or_else(|| {
                    KeeperError::Unavailable(format!(
                        "no debugging endpoint for {:?} (start it with --remote-debugging-port)",
                        family
                    ))
                })?;
            let tabs = client.page_tabs(port, options.favicons)?;
            return Ok(ExtractedTabs {
                tabs,
                source: TabSource::DebuggingEndpoint,
            });
        }

        if !options.session_store {
            return Err(KeeperError::Unavailable(
                "session store skipped in quick mode".to_string(),
            ));
        }
        let root = self
            .firefox_root
            .clone()
            .or_else(firefox::default_root)
            .ok_or_else(|| KeeperError::Unavailable("no Firefox data directory".to_string()))?;
        let tabs = firefox::extract_tabs(&root, window_title)?;
        Ok(ExtractedTabs {
            tabs,
            source: TabSource::SessionStore,
        })
    }
}
