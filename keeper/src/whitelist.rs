//! Applications exempt from bulk minimize/close
//!
//! Stored as `{"whitelist": [...]}` in `<root>/whitelist.json`, created with
//! defaults on first use. An entry ending in `.exe` matches a process name
//! exactly; any other entry also matches as a substring of the window title.
//! All comparisons ignore case.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{KeeperError, Result};
use crate::store::{ensure_dir, write_atomic};

pub const DEFAULT_WHITELIST: &[&str] = &[
    "NVIDIA App.exe",
    "NVIDIA GeForce Overlay.exe",
    "Project G-Assist",
    "G-Assist",
    "explorer.exe",
    "dwm.exe",
    "ShellExperienceHost.exe",
    "SearchHost.exe",
    "TextInputHost.exe",
];

/// Entries that can never be removed
pub const PROTECTED: &[&str] = &["explorer.exe", "dwm.exe"];

#[derive(Debug, Serialize, Deserialize)]
struct WhitelistFile {
    whitelist: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Whitelist {
    path: PathBuf,
}

fn contains(entries: &[String], item: &str) -> bool {
    entries.iter().any(|e| e.eq_ignore_ascii_case(item))
}

impl Whitelist {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn defaults() -> Vec<String> {
        DEFAULT_WHITELIST.iter().map(|s| s.to_string()).collect()
    }

    fn load(&self) -> Result<Vec<String>> {
        match fs::read(&self.path) {
            Ok(bytes) => match serde_json::from_slice::<WhitelistFile>(&bytes) {
                Ok(file) => {
                    let mut entries: Vec<String> = Vec::new();
                    for entry in file.whitelist {
                        let entry = entry.trim().to_string();
                        if !entry.is_empty() && !contains(&entries, &entry) {
                            entries.push(entry);
                        }
                    }
                    Ok(entries)
                }
                Err(e) => {
                    log::error!(
                        "Whitelist {} is unreadable ({}); using defaults",
                        self.path.display(),
                        e
                    );
                    Ok(Self::defaults())
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let defaults = Self::defaults();
                self.save(&defaults)?;
                Ok(defaults)
            }
            Err(e) => Err(KeeperError::from_io("read whitelist", e)),
        }
    }

    fn save(&self, entries: &[String]) -> Result<()> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| KeeperError::InvalidName(self.path.display().to_string()))?;
        ensure_dir(dir).map_err(|e| KeeperError::from_io("create whitelist directory", e))?;
        let file_name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| KeeperError::InvalidName(self.path.display().to_string()))?;
        let bytes = serde_json::to_vec_pretty(&WhitelistFile {
            whitelist: entries.to_vec(),
        })?;
        write_atomic(dir, file_name, &bytes)?;
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<String>> {
        self.load()
    }

    /// Returns false when the entry was already present
    pub fn add(&self, item: &str) -> Result<bool> {
        let item = item.trim();
        if item.is_empty() {
            return Err(KeeperError::InvalidName("empty whitelist entry".to_string()));
        }
        let mut entries = self.load()?;
        if contains(&entries, item) {
            log::info!("'{}' already in whitelist", item);
            return Ok(false);
        }
        entries.push(item.to_string());
        self.save(&entries)?;
        log::info!("Added '{}' to whitelist", item);
        Ok(true)
    }

    /// Returns false when the entry was absent or is protected
    pub fn remove(&self, item: &str) -> Result<bool> {
        let item = item.trim();
        if PROTECTED.iter().any(|p| p.eq_ignore_ascii_case(item)) {
            log::warn!("Cannot remove protected entry '{}' from whitelist", item);
            return Ok(false);
        }
        let mut entries = self.load()?;
        let before = entries.len();
        entries.retain(|e| !e.eq_ignore_ascii_case(item));
        if entries.len() == before {
            return Ok(false);
        }
        self.save(&entries)?;
        log::info!("Removed '{}' from whitelist", item);
        Ok(true)
    }

    pub fn is_whitelisted(&self, process_name: &str, window_title: &str) -> Result<bool> {
        Ok(matches_any(&self.load()?, process_name, window_title))
    }

    /// Snapshot of the entries for repeated checks during one operation
    pub fn matcher(&self) -> Result<WhitelistMatcher> {
        Ok(WhitelistMatcher {
            entries: self.load()?,
        })
    }
}

fn matches_any(entries: &[String], process_name: &str, window_title: &str) -> bool {
    if contains(entries, process_name) {
        return true;
    }
    if window_title.is_empty() {
        return false;
    }
    let title = window_title.to_lowercase();
    entries
        .iter()
        .filter(|e| !e.to_ascii_lowercase().ends_with(".exe"))
        .any(|e| title.contains(&e.to_lowercase()))
}

#[derive(Debug, Clone)]
pub struct WhitelistMatcher {
    entries: Vec<String>,
}

impl WhitelistMatcher {
    pub fn is_whitelisted(&self, process_name: &str, window_title: &str) -> bool {
        matches_any(&self.entries, process_name, window_title)
    }
}
