//! Environment variable snapshots per context
//!
//! Each `keep` writes an append-only `env_YYYYMMDD_HHMMSS.json` into the
//! context directory. Retention and restore always order files by the
//! timestamp embedded in the name, never by file metadata.
//!
//! Restore is two-tier: the current process environment is replaced
//! wholesale (clear, then set), and a script carrying the same variables is
//! written next to the snapshot for applying outside this process.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, SystemTime};

use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::clock::{file_stamp, format_timestamp, Clock};
use crate::error::{KeeperError, Result};
use crate::model::EnvironmentSummary;
use crate::store::{write_atomic, ContextStore};

pub type EnvMap = BTreeMap<String, String>;

/// A whole-process environment that can be read and replaced
pub trait EnvTarget: Send + Sync {
    fn vars(&self) -> EnvMap;

    /// Remove every variable, then set exactly `vars`
    fn replace_all(&self, vars: &EnvMap);
}

/// The environment of this process
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnvironment;

fn settable(key: &str, value: &str) -> bool {
    !key.is_empty() && !key.contains(['=', '\0']) && !value.contains('\0')
}

/// Only variables that can be set again, so a capture restores exactly.
/// Drops Windows' hidden per-drive `=C:` entries.
fn restorable<I>(vars: I) -> EnvMap
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .map(|(k, v)| {
            (
                k.to_string_lossy().into_owned(),
                v.to_string_lossy().into_owned(),
            )
        })
        .filter(|(k, v)| settable(k, v))
        .collect()
}

impl EnvTarget for ProcessEnvironment {
    fn vars(&self) -> EnvMap {
        restorable(std::env::vars_os())
    }

    // Runs on a blocking-pool thread; other runtime threads reading the
    // environment concurrently may observe a partial replacement.
    fn replace_all(&self, vars: &EnvMap) {
        for (key, _) in std::env::vars_os() {
            if !key.is_empty() {
                std::env::remove_var(key);
            }
        }
        for (key, value) in vars {
            if settable(key, value) {
                std::env::set_var(key, value);
            } else {
                log::warn!("Skipping environment variable that cannot be set: {:?}", key);
            }
        }
    }
}

/// Environment held in memory, for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryEnvironment {
    vars: Mutex<EnvMap>,
}

impl MemoryEnvironment {
    pub fn new(vars: EnvMap) -> Self {
        Self {
            vars: Mutex::new(vars),
        }
    }

    pub fn set(&self, key: &str, value: &str) {
        self.vars
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
    }
}

impl EnvTarget for MemoryEnvironment {
    fn vars(&self) -> EnvMap {
        self.vars.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn replace_all(&self, vars: &EnvMap) {
        *self.vars.lock().unwrap_or_else(|e| e.into_inner()) = vars
            .iter()
            .filter(|(k, v)| settable(k, v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
    }
}

/// Script format for applying a snapshot outside this process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptFlavor {
    /// `restore_env_<ts>.bat` with `set "K=V"` lines
    Batch,
    /// `restore_env_<ts>.sh` with `export K='V'` lines
    Posix,
}

impl ScriptFlavor {
    pub fn native() -> Self {
        if cfg!(windows) {
            ScriptFlavor::Batch
        } else {
            ScriptFlavor::Posix
        }
    }

    fn extension(self) -> &'static str {
        match self {
            ScriptFlavor::Batch => "bat",
            ScriptFlavor::Posix => "sh",
        }
    }
}

/// On-disk form of one environment snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvDocument {
    captured_at: String,
    variables: EnvMap,
}

/// One stored environment snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvSnapshotFile {
    pub file_name: String,
    pub path: PathBuf,
    /// `YYYYMMDD_HHMMSS` taken from the file name
    pub stamp: String,
    /// Disambiguates snapshots taken within the same second
    pub seq: u32,
    pub size: u64,
    /// Time since the embedded timestamp
    #[serde(skip)]
    pub age: Option<Duration>,
}

impl EnvSnapshotFile {
    fn sort_key(&self) -> (&str, u32) {
        (&self.stamp, self.seq)
    }
}

/// The audit record of one in-process environment replacement
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentRestore {
    pub source: PathBuf,
    #[serde(skip)]
    pub before: EnvMap,
    #[serde(skip)]
    pub after: EnvMap,
    pub script_path: PathBuf,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl EnvironmentRestore {
    fn new(source: PathBuf, before: EnvMap, after: EnvMap, script_path: PathBuf) -> Self {
        let added = after
            .keys()
            .filter(|k| !before.contains_key(*k))
            .cloned()
            .collect();
        let removed = before
            .keys()
            .filter(|k| !after.contains_key(*k))
            .cloned()
            .collect();
        let changed = after
            .iter()
            .filter(|(k, v)| before.get(*k).map_or(false, |old| old != *v))
            .map(|(k, _)| k.clone())
            .collect();
        Self {
            source,
            before,
            after,
            script_path,
            added,
            removed,
            changed,
        }
    }
}

fn env_file_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^env_(\d{8}_\d{6})(?:_(\d+))?\.json$").ok())
        .as_ref()
}

/// `(stamp, seq)` embedded in an environment snapshot file name
pub fn parse_env_file_name(name: &str) -> Option<(String, u32)> {
    let caps = env_file_pattern()?.captures(name)?;
    let stamp = caps.get(1)?.as_str().to_string();
    let seq = caps
        .get(2)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(1);
    Some((stamp, seq))
}

fn stamp_to_time(stamp: &str) -> Option<SystemTime> {
    NaiveDateTime::parse_from_str(stamp, "%Y%m%d_%H%M%S")
        .ok()
        .map(|dt| dt.and_utc().into())
}

pub fn summarize(vars: &EnvMap) -> EnvironmentSummary {
    EnvironmentSummary {
        count: vars.len(),
        names: vars.keys().cloned().collect(),
    }
}

/// Render `vars` as a script in the given flavor
pub fn render_script(flavor: ScriptFlavor, vars: &EnvMap, source: &Path) -> String {
    let mut out = String::new();
    match flavor {
        ScriptFlavor::Batch => {
            out.push_str("@echo off\r\n");
            out.push_str(&format!("rem Restores environment from {}\r\n", source.display()));
            for (key, value) in vars {
                let value = value.replace('%', "%%").replace('"', "\"\"");
                out.push_str(&format!("set \"{}={}\"\r\n", key, value));
            }
        }
        ScriptFlavor::Posix => {
            out.push_str("#!/bin/sh\n");
            out.push_str(&format!(
                "# Restores environment from {}; source it: . ./script\n",
                source.display()
            ));
            for (key, value) in vars {
                if !is_shell_identifier(key) {
                    out.push_str(&format!("# skipped {:?}: not a shell identifier\n", key));
                    continue;
                }
                let value = value.replace('\'', "'\\''");
                out.push_str(&format!("export {}='{}'\n", key, value));
            }
        }
    }
    out
}

fn is_shell_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Captures, lists, prunes and restores environment snapshots
#[derive(Clone)]
pub struct EnvironmentManager {
    store: ContextStore,
    clock: Arc<dyn Clock>,
    target: Arc<dyn EnvTarget>,
    flavor: ScriptFlavor,
}

impl EnvironmentManager {
    pub fn new(store: ContextStore, clock: Arc<dyn Clock>, target: Arc<dyn EnvTarget>) -> Self {
        Self {
            store,
            clock,
            target,
            flavor: ScriptFlavor::native(),
        }
    }

    pub fn with_flavor(mut self, flavor: ScriptFlavor) -> Self {
        self.flavor = flavor;
        self
    }

    /// Capture the whole current environment into a new snapshot file
    pub fn keep(&self, name: &str) -> Result<(EnvSnapshotFile, EnvMap)> {
        let dir = self.store.ensure_context_dir(name)?;
        let now = self.clock.now_utc();
        let stamp = file_stamp(now);

        let mut seq = 1;
        let mut file_name = format!("env_{}.json", stamp);
        while dir.join(&file_name).exists() {
            seq += 1;
            file_name = format!("env_{}_{}.json", stamp, seq);
        }

        let variables = self.target.vars();
        let doc = EnvDocument {
            captured_at: format_timestamp(now),
            variables,
        };
        let bytes = serde_json::to_vec_pretty(&doc)?;
        let path = write_atomic(&dir, &file_name, &bytes)?;
        log::info!(
            "Captured {} environment variable(s) for {} into {}",
            doc.variables.len(),
            name,
            file_name
        );

        Ok((
            EnvSnapshotFile {
                file_name,
                path,
                stamp,
                seq,
                size: bytes.len() as u64,
                age: Some(Duration::ZERO),
            },
            doc.variables,
        ))
    }

    /// Snapshots for a context, newest first
    pub fn list(&self, name: &str) -> Result<Vec<EnvSnapshotFile>> {
        let dir = self.store.context_dir(name);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(KeeperError::from_io(&format!("list {}", dir.display()), e)),
        };

        let now = self.clock.now_utc();
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some((stamp, seq)) = parse_env_file_name(&file_name) else {
                continue;
            };
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let age = stamp_to_time(&stamp).and_then(|t| now.duration_since(t).ok());
            files.push(EnvSnapshotFile {
                path: entry.path(),
                file_name,
                stamp,
                seq,
                size,
                age,
            });
        }

        files.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
        Ok(files)
    }

    /// The single most recent snapshot by embedded timestamp
    pub fn latest(&self, name: &str) -> Result<EnvSnapshotFile> {
        self.list(name)?.into_iter().next().ok_or_else(|| {
            KeeperError::NotFound(format!("environment snapshot for context '{}'", name))
        })
    }

    /// Delete all but the `keep_last` most recent snapshots, returning how many went
    pub fn cleanup(&self, name: &str, keep_last: usize) -> Result<usize> {
        let files = self.list(name)?;
        let mut deleted = 0;
        for file in files.iter().skip(keep_last) {
            match fs::remove_file(&file.path) {
                Ok(()) => deleted += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(KeeperError::from_io(
                        &format!("delete {}", file.path.display()),
                        e,
                    ))
                }
            }
        }
        if deleted > 0 {
            log::info!(
                "Pruned {} environment snapshot(s) for {}, kept {}",
                deleted,
                name,
                keep_last
            );
        }
        Ok(deleted)
    }

    pub fn load(&self, path: &Path) -> Result<EnvMap> {
        let bytes =
            fs::read(path).map_err(|e| KeeperError::from_io(&format!("read {}", path.display()), e))?;
        let doc: EnvDocument =
            serde_json::from_slice(&bytes).map_err(|e| KeeperError::corrupt(path, e))?;
        Ok(doc.variables)
    }

    /// Replace this process's environment with the latest snapshot and
    /// write the matching script
    pub fn restore(&self, name: &str) -> Result<EnvironmentRestore> {
        let latest = self.latest(name)?;
        let variables = self.load(&latest.path)?;

        let dir = self.store.ensure_context_dir(name)?;
        let script_name = format!(
            "restore_env_{}.{}",
            file_stamp(self.clock.now_utc()),
            self.flavor.extension()
        );
        let script = render_script(self.flavor, &variables, &latest.path);
        let script_path = write_atomic(&dir, &script_name, script.as_bytes())?;

        let before = self.target.vars();
        self.target.replace_all(&variables);
        let after = self.target.vars();

        let restore = EnvironmentRestore::new(latest.path, before, after, script_path);
        log::info!(
            "Restored environment for {}: {} added, {} removed, {} changed; script at {}",
            name,
            restore.added.len(),
            restore.removed.len(),
            restore.changed.len(),
            restore.script_path.display()
        );
        Ok(restore)
    }
}
