// Environment configuration for the keeper
// Resolves the data root and tuning knobs, each overridable by a KEEPER_* variable

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for paths and capture/restore limits
#[derive(Debug, Clone)]
pub struct Config {
    /// Data root: contexts/, whitelist.json, index.json, locks/
    pub root_dir: PathBuf,
    /// Concurrent handler invocations during capture and restore
    pub max_parallelism: usize,
    /// Per-window capture deadline
    pub capture_timeout: Duration,
    /// Environment snapshots retained after each keep
    pub env_keep_last: usize,
    /// Window placement attempts per restored window
    pub restore_attempts: u32,
    /// Base delay between placement attempts (grows linearly)
    pub restore_backoff: Duration,
    /// Debugging-endpoint and favicon request deadline
    pub http_timeout: Duration,
    /// Well-known Chromium debugging ports tried first
    pub debug_ports: Vec<u16>,
}

impl Config {
    /// Create configuration using default paths
    pub fn default_paths() -> Self {
        Self::with_root(Self::default_root_dir())
    }

    /// Defaults rooted at an explicit directory
    pub fn with_root(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            max_parallelism: 4,
            capture_timeout: Duration::from_millis(5000),
            env_keep_last: 10,
            restore_attempts: 5,
            restore_backoff: Duration::from_millis(200),
            http_timeout: Duration::from_millis(2000),
            debug_ports: vec![9222, 9223, 9224, 9225],
        }
    }

    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let mut config = match std::env::var("KEEPER_HOME") {
            Ok(dir) if !dir.trim().is_empty() => Self::with_root(dir),
            _ => Self::default_paths(),
        };

        if let Some(n) = env_parse::<usize>("KEEPER_MAX_PARALLELISM") {
            config.max_parallelism = n.max(1);
        }
        if let Some(ms) = env_parse::<u64>("KEEPER_CAPTURE_TIMEOUT_MS") {
            config.capture_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = env_parse::<usize>("KEEPER_ENV_KEEP_LAST") {
            config.env_keep_last = n;
        }
        if let Some(n) = env_parse::<u32>("KEEPER_RESTORE_ATTEMPTS") {
            config.restore_attempts = n.max(1);
        }
        if let Some(ms) = env_parse::<u64>("KEEPER_RESTORE_BACKOFF_MS") {
            config.restore_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("KEEPER_HTTP_TIMEOUT_MS") {
            config.http_timeout = Duration::from_millis(ms);
        }
        if let Ok(raw) = std::env::var("KEEPER_DEBUG_PORTS") {
            match parse_ports(&raw) {
                Some(ports) => config.debug_ports = ports,
                None => log::warn!("Ignoring unparseable KEEPER_DEBUG_PORTS={:?}", raw),
            }
        }

        config
    }

    /// ~/.keeper (or <tmp>/keeper if home unavailable)
    fn default_root_dir() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".keeper"))
            .unwrap_or_else(|| std::env::temp_dir().join("keeper"))
    }

    pub fn contexts_dir(&self) -> PathBuf {
        self.root_dir.join("contexts")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root_dir.join("locks")
    }

    pub fn whitelist_file(&self) -> PathBuf {
        self.root_dir.join("whitelist.json")
    }

    pub fn recent_index_file(&self) -> PathBuf {
        self.root_dir.join("index.json")
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("Ignoring unparseable {}={:?}", key, raw);
            None
        }
    }
}

fn parse_ports(raw: &str) -> Option<Vec<u16>> {
    let ports: Result<Vec<u16>, _> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse::<u16>)
        .collect();
    match ports {
        Ok(p) if !p.is_empty() => Some(p),
        _ => None,
    }
}
