//! Context store: disk I/O, paths, atomic writes, per-context locks
//!
//! Layout under the data root:
//! - `contexts/<name>/context.json`: the snapshot document
//! - `contexts/<name>/summary.json`: listing record written beside it
//! - `contexts/<name>/clipboard_cache.txt`: optional clipboard text
//! - `contexts/<name>/env_*.json`, `restore_env_*`: environment snapshots and scripts
//! - `locks/<name>.lock`: advisory lock serialising keep/restore per name
//!
//! Writes are atomic (temp file + fsync + rename); files are 0600 and
//! directories 0700 on Unix.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use fs2::FileExt;

use crate::config::Config;
use crate::error::{KeeperError, Result};
use crate::model::{ContextSnapshot, ContextSummary, SNAPSHOT_VERSION};

pub const SNAPSHOT_FILE: &str = "context.json";
pub const SUMMARY_FILE: &str = "summary.json";
pub const CLIPBOARD_FILE: &str = "clipboard_cache.txt";

/// Maximum number of files scanned during stale temp cleanup
const CLEANUP_SCAN_LIMIT: usize = 1000;

/// Age threshold for temp file cleanup (1 hour)
const CLEANUP_AGE_THRESHOLD: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct ContextStore {
    contexts_dir: PathBuf,
    locks_dir: PathBuf,
    /// Whether the contexts directory could be created
    available: bool,
}

/// Held for the duration of a keep or restore; released on drop
#[derive(Debug)]
pub struct ContextLock {
    _file: File,
    name: String,
}

impl ContextLock {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl ContextStore {
    /// Attempts to create the contexts directory; on failure the store is
    /// marked unavailable and every operation reports `Unavailable`.
    pub fn new(config: &Config) -> Self {
        let contexts_dir = config.contexts_dir();
        let available = match ensure_dir(&contexts_dir) {
            Ok(()) => true,
            Err(e) => {
                log::error!(
                    "Failed to create context directory {}: {}",
                    contexts_dir.display(),
                    e
                );
                false
            }
        };
        Self {
            contexts_dir,
            locks_dir: config.locks_dir(),
            available,
        }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    fn check_available(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(KeeperError::Unavailable(format!(
                "context store at {} is unavailable",
                self.contexts_dir.display()
            )))
        }
    }

    pub fn contexts_dir(&self) -> &Path {
        &self.contexts_dir
    }

    pub fn context_dir(&self, name: &str) -> PathBuf {
        self.contexts_dir.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.context_dir(name).join(SNAPSHOT_FILE).is_file()
    }

    /// Create the context's directory with strict permissions
    pub fn ensure_context_dir(&self, name: &str) -> Result<PathBuf> {
        self.check_available()?;
        let dir = self.context_dir(name);
        ensure_dir(&dir).map_err(|e| KeeperError::from_io(&format!("create {}", dir.display()), e))?;
        Ok(dir)
    }

    /// Write the snapshot and its summary; a re-save replaces both whole
    pub fn write_snapshot(&self, snapshot: &ContextSnapshot) -> Result<PathBuf> {
        let dir = self.ensure_context_dir(&snapshot.context_name)?;
        let json = serde_json::to_vec_pretty(snapshot)?;
        let path = write_atomic(&dir, SNAPSHOT_FILE, &json)?;

        let summary = serde_json::to_vec_pretty(&snapshot.to_summary())?;
        write_atomic(&dir, SUMMARY_FILE, &summary)?;

        log::debug!("Wrote {}", path.display());
        Ok(path)
    }

    pub fn read_snapshot(&self, name: &str) -> Result<ContextSnapshot> {
        self.check_available()?;
        let path = self.context_dir(name).join(SNAPSHOT_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(KeeperError::NotFound(format!("context '{}'", name)));
            }
            Err(e) => return Err(KeeperError::from_io(&format!("read {}", path.display()), e)),
        };
        let snapshot: ContextSnapshot =
            serde_json::from_slice(&bytes).map_err(|e| KeeperError::corrupt(&path, e))?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(KeeperError::corrupt(
                &path,
                format!("unsupported snapshot version {}", snapshot.version),
            ));
        }
        Ok(snapshot)
    }

    /// Summaries of every stored context, newest first
    ///
    /// Reads `summary.json` and only falls back to the full document when
    /// the summary is missing, older than the document, or unreadable.
    /// Unreadable contexts are skipped.
    pub fn list(&self) -> Result<Vec<ContextSummary>> {
        self.check_available()?;
        let mut summaries = Vec::new();

        for entry in fs::read_dir(&self.contexts_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            let from_summary = summary_is_current(&path)
                .then(|| fs::read(path.join(SUMMARY_FILE)).ok())
                .flatten()
                .and_then(|bytes| serde_json::from_slice::<ContextSummary>(&bytes).ok());
            match from_summary {
                Some(summary) => summaries.push(summary),
                None => match self.read_snapshot(name) {
                    Ok(snapshot) => summaries.push(snapshot.to_summary()),
                    Err(KeeperError::NotFound(_)) => {}
                    Err(e) => log::warn!("Skipping context {}: {}", name, e),
                },
            }
        }

        summaries.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(summaries)
    }

    /// Remove a context directory; a missing context is a no-op returning false
    pub fn delete(&self, name: &str) -> Result<bool> {
        self.check_available()?;
        let dir = self.context_dir(name);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                log::info!("Deleted context {}", name);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(KeeperError::from_io(&format!("delete {}", dir.display()), e)),
        }
    }

    /// Remove every context directory, returning how many were removed
    pub fn delete_all(&self) -> Result<usize> {
        self.check_available()?;
        let mut deleted = 0;
        for entry in fs::read_dir(&self.contexts_dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            match fs::remove_dir_all(&path) {
                Ok(()) => deleted += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(KeeperError::from_io(
                        &format!("delete {}", path.display()),
                        e,
                    ))
                }
            }
        }
        log::info!("Deleted {} context(s)", deleted);
        Ok(deleted)
    }

    /// Cache clipboard text beside the snapshot, returning the file name
    pub fn write_clipboard(&self, name: &str, text: &str) -> Result<String> {
        let dir = self.ensure_context_dir(name)?;
        write_atomic(&dir, CLIPBOARD_FILE, text.as_bytes())?;
        Ok(CLIPBOARD_FILE.to_string())
    }

    pub fn read_clipboard(&self, name: &str, file: &str) -> Result<Option<String>> {
        self.check_available()?;
        match fs::read_to_string(self.context_dir(name).join(file)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(KeeperError::from_io("read clipboard cache", e)),
        }
    }

    /// Delete `*.tmp.*` files older than an hour left by interrupted writes
    ///
    /// Scans at most CLEANUP_SCAN_LIMIT files. Returns (deleted, scanned, hit_limit).
    pub fn cleanup_stale_temps(&self) -> (usize, usize, bool) {
        if !self.available {
            return (0, 0, false);
        }

        let mut scanned = 0;
        let mut deleted = 0;
        let now = SystemTime::now();

        for entry in walkdir::WalkDir::new(&self.contexts_dir)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if scanned >= CLEANUP_SCAN_LIMIT {
                log::warn!(
                    "Hit cleanup scan limit ({}) under {}",
                    CLEANUP_SCAN_LIMIT,
                    self.contexts_dir.display()
                );
                return (deleted, scanned, true);
            }

            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            scanned += 1;

            let is_temp = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.contains(".tmp."));
            if !is_temp {
                continue;
            }
            let age = fs::metadata(path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok());
            if age.map_or(false, |age| age > CLEANUP_AGE_THRESHOLD) {
                match fs::remove_file(path) {
                    Ok(()) => deleted += 1,
                    Err(e) => log::warn!("Failed to delete stale temp {}: {}", path.display(), e),
                }
            }
        }

        (deleted, scanned, false)
    }

    /// Take the advisory lock for `name`, failing fast with `Busy`
    pub fn acquire_lock(&self, name: &str) -> Result<ContextLock> {
        ensure_dir(&self.locks_dir)
            .map_err(|e| KeeperError::from_io("create lock directory", e))?;
        let path = self.locks_dir.join(format!("{}.lock", name));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| KeeperError::from_io(&format!("open {}", path.display()), e))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(ContextLock {
                _file: file,
                name: name.to_string(),
            }),
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.raw_os_error() == fs2::lock_contended_error().raw_os_error() =>
            {
                Err(KeeperError::Busy(name.to_string()))
            }
            Err(e) => Err(KeeperError::from_io("lock context", e)),
        }
    }
}

/// Create a directory tree, 0700 on Unix
pub(crate) fn ensure_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Write `file_name` in `dir` so readers never see a partial file
fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// The summary is written after the document, so an older summary means
/// the second write never happened
fn summary_is_current(dir: &Path) -> bool {
    match (modified(&dir.join(SUMMARY_FILE)), modified(&dir.join(SNAPSHOT_FILE))) {
        (Some(summary), Some(document)) => summary >= document,
        _ => false,
    }
}

pub(crate) fn write_atomic(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
    let final_path = dir.join(file_name);
    let temp_path = dir.join(format!("{}.tmp.{}", file_name, std::process::id()));

    let write = || -> io::Result<()> {
        let mut file = File::create(&temp_path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp_path, &final_path)
    };

    if let Err(e) = write() {
        let _ = fs::remove_file(&temp_path);
        return Err(KeeperError::from_io(
            &format!("write {}", final_path.display()),
            e,
        ));
    }
    Ok(final_path)
}
