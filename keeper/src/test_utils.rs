//! Fixtures for unit tests: window records, an in-memory desktop wired to
//! a temporary data root, and scripted process and tab sources.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

use tempfile::TempDir;

use crate::browser_tabs::{ExtractOptions, ExtractedTabs, TabExtractor};
use crate::clock::ManualClock;
use crate::config::Config;
use crate::desktop::InMemoryDesktop;
use crate::environment::{EnvironmentManager, MemoryEnvironment};
use crate::error::{KeeperError, Result};
use crate::handlers::{HandlerRegistry, RestoreContext, RestoreScope, WaitPolicy};
use crate::keeper::{ContextKeeper, KeeperParts};
use crate::model::{
    AppInfo, ApplicationEntry, BrowserFamily, BrowserTab, GenericEntry, Rect, TabSource,
    WindowHandle, WindowRecord, WindowState,
};
use crate::process::{ProcessInfo, ProcessSource, ProcessTable};
use crate::restore::RestoreOrchestrator;
use crate::snapshot::SnapshotBuilder;
use crate::store::ContextStore;

/// 2023-11-14T22:13:20Z
pub const EPOCH_SECS: u64 = 1_700_000_000;

pub fn window(z: usize, process: &str, title: &str) -> WindowRecord {
    WindowRecord {
        handle: WindowHandle(100 + z as u64),
        pid: 1000 + z as u32,
        process_name: process.to_string(),
        title: title.to_string(),
        rect: Rect::new(10, 20, 800, 600),
        state: WindowState::Normal,
        z_order: z,
        virtual_desktop: None,
    }
}

pub fn entry(record: &WindowRecord) -> ApplicationEntry {
    ApplicationEntry::Generic(GenericEntry {
        app: AppInfo::from_record(record, None),
        degraded_from: None,
    })
}

/// Restore context over a fresh desktop with a short launch wait
pub fn restore_context(scope: RestoreScope) -> (RestoreContext, Arc<InMemoryDesktop>) {
    let desktop = Arc::new(InMemoryDesktop::new());
    let ctx = RestoreContext {
        desktop: desktop.clone(),
        processes: Arc::new(ProcessTable::new()),
        scope,
        existing: None,
        known: Arc::new(HashSet::new()),
        claimed: Arc::new(Mutex::new(HashSet::new())),
        wait: WaitPolicy {
            attempts: 3,
            interval: Duration::from_millis(1),
        },
    };
    (ctx, desktop)
}

/// Process table that tests can grow after wiring
#[derive(Debug, Default)]
pub struct SharedProcesses {
    table: Mutex<ProcessTable>,
}

impl SharedProcesses {
    pub fn insert(&self, info: ProcessInfo) {
        self.table
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(info);
    }
}

impl ProcessSource for SharedProcesses {
    fn snapshot(&self) -> ProcessTable {
        self.table.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Tabs keyed by lowercase process name; unknown browsers are unavailable
#[derive(Debug, Default)]
pub struct ScriptedTabs {
    tabs: Mutex<HashMap<String, Vec<String>>>,
}

impl ScriptedTabs {
    pub fn set(&self, process_name: &str, urls: &[&str]) {
        self.tabs.lock().unwrap_or_else(|e| e.into_inner()).insert(
            process_name.to_ascii_lowercase(),
            urls.iter().map(|u| u.to_string()).collect(),
        );
    }
}

impl TabExtractor for ScriptedTabs {
    fn extract(
        &self,
        _family: BrowserFamily,
        process: &ProcessInfo,
        _window_title: &str,
        _options: &ExtractOptions,
    ) -> Result<ExtractedTabs> {
        let tabs = self.tabs.lock().unwrap_or_else(|e| e.into_inner());
        let urls = tabs
            .get(&process.name.to_ascii_lowercase())
            .ok_or_else(|| KeeperError::Unavailable("no debugging endpoint".to_string()))?;
        Ok(ExtractedTabs {
            tabs: urls
                .iter()
                .enumerate()
                .map(|(index, url)| BrowserTab {
                    url: url.clone(),
                    title: url.clone(),
                    favicon: None,
                    active: index == 0,
                    group_id: None,
                    group_name: None,
                    index,
                })
                .collect(),
            source: TabSource::DebuggingEndpoint,
        })
    }
}

/// Everything a capture or restore needs, rooted in a temp directory
pub struct Harness {
    pub temp: TempDir,
    pub config: Config,
    pub desktop: Arc<InMemoryDesktop>,
    pub processes: Arc<SharedProcesses>,
    pub env: Arc<MemoryEnvironment>,
    pub clock: ManualClock,
    pub tabs: Arc<ScriptedTabs>,
}

impl Harness {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let mut config = Config::with_root(temp.path());
        config.capture_timeout = Duration::from_secs(2);
        config.restore_backoff = Duration::from_millis(1);
        config.env_keep_last = 3;

        let env: BTreeMap<String, String> = [("PATH", "C:\\Windows"), ("HOME", "C:\\Users\\me")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        Self {
            temp,
            config,
            desktop: Arc::new(InMemoryDesktop::new()),
            processes: Arc::new(SharedProcesses::default()),
            env: Arc::new(MemoryEnvironment::new(env)),
            clock: ManualClock::at(UNIX_EPOCH + Duration::from_secs(EPOCH_SECS)),
            tabs: Arc::new(ScriptedTabs::default()),
        }
    }

    /// Add a window behind the existing ones, with a matching process
    pub fn add_window(&self, pid: u32, process: &str, title: &str) -> WindowHandle {
        self.processes.insert(ProcessInfo {
            exe: Some(format!("C:\\Apps\\{}", process)),
            ..ProcessInfo::named(pid, process)
        });
        self.desktop
            .push_window(pid, process, title, Rect::new(10, 20, 800, 600), WindowState::Normal)
    }

    pub fn store(&self) -> ContextStore {
        ContextStore::new(&self.config)
    }

    pub fn environment(&self) -> EnvironmentManager {
        EnvironmentManager::new(self.store(), Arc::new(self.clock.clone()), self.env.clone())
    }

    pub fn registry(&self) -> Arc<HandlerRegistry> {
        Arc::new(HandlerRegistry::new(self.tabs.clone()))
    }

    pub fn builder(&self) -> SnapshotBuilder {
        SnapshotBuilder::new(
            self.config.clone(),
            self.desktop.clone(),
            self.processes.clone(),
            self.registry(),
            self.environment(),
            self.store(),
            Arc::new(self.clock.clone()),
        )
    }

    pub fn orchestrator(&self) -> RestoreOrchestrator {
        RestoreOrchestrator::new(
            self.config.clone(),
            self.desktop.clone(),
            self.processes.clone(),
            self.registry(),
        )
    }

    pub fn keeper(&self) -> ContextKeeper {
        ContextKeeper::with_parts(
            self.config.clone(),
            KeeperParts {
                desktop: self.desktop.clone(),
                processes: self.processes.clone(),
                registry: self.registry(),
                clock: Arc::new(self.clock.clone()),
                env: self.env.clone(),
            },
        )
    }
}
