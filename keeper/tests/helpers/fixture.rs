use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

use context_keeper::browser_tabs::{ExtractOptions, ExtractedTabs, TabExtractor};
use context_keeper::clock::ManualClock;
use context_keeper::config::Config;
use context_keeper::desktop::InMemoryDesktop;
use context_keeper::environment::MemoryEnvironment;
use context_keeper::handlers::HandlerRegistry;
use context_keeper::model::{BrowserFamily, BrowserTab, Rect, TabSource, WindowHandle, WindowState};
use context_keeper::process::{ProcessInfo, ProcessSource, ProcessTable};
use context_keeper::{ContextKeeper, KeeperError, KeeperParts, Result};
use tempfile::TempDir;

/// Processes the test can add to after the keeper is built
#[derive(Default)]
pub struct LiveProcesses(Mutex<ProcessTable>);

impl LiveProcesses {
    pub fn insert(&self, info: ProcessInfo) {
        self.0.lock().unwrap().insert(info);
    }
}

impl ProcessSource for LiveProcesses {
    fn snapshot(&self) -> ProcessTable {
        self.0.lock().unwrap().clone()
    }
}

/// Debugging-endpoint stand-in: URLs per browser process name
#[derive(Default)]
pub struct UrlTabs(Mutex<HashMap<String, Vec<String>>>);

impl UrlTabs {
    pub fn set(&self, process_name: &str, urls: &[&str]) {
        self.0.lock().unwrap().insert(
            process_name.to_ascii_lowercase(),
            urls.iter().map(|u| u.to_string()).collect(),
        );
    }
}

impl TabExtractor for UrlTabs {
    fn extract(
        &self,
        _family: BrowserFamily,
        process: &ProcessInfo,
        _window_title: &str,
        _options: &ExtractOptions,
    ) -> Result<ExtractedTabs> {
        let urls = self
            .0
            .lock()
            .unwrap()
            .get(&process.name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| KeeperError::Unavailable("debugging port closed".into()))?;
        Ok(ExtractedTabs {
            tabs: urls
                .into_iter()
                .enumerate()
                .map(|(index, url)| BrowserTab {
                    title: url.clone(),
                    url,
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

pub struct Fixture {
    pub temp: TempDir,
    pub config: Config,
    pub desktop: Arc<InMemoryDesktop>,
    pub processes: Arc<LiveProcesses>,
    pub tabs: Arc<UrlTabs>,
    pub env: Arc<MemoryEnvironment>,
    pub clock: ManualClock,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let mut config = Config::with_root(temp.path());
        config.capture_timeout = Duration::from_secs(2);
        config.restore_backoff = Duration::from_millis(1);

        let env: BTreeMap<String, String> = [
            ("PATH", "C:\\Windows;C:\\Tools"),
            ("PROJECT", "demo"),
            ("HOME", "C:\\Users\\me"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            temp,
            config,
            desktop: Arc::new(InMemoryDesktop::new()),
            processes: Arc::new(LiveProcesses::default()),
            tabs: Arc::new(UrlTabs::default()),
            env: Arc::new(MemoryEnvironment::new(env)),
            clock: ManualClock::at(UNIX_EPOCH + Duration::from_secs(1_700_000_000)),
        }
    }

    /// Window behind the existing ones, owned by a process with a known executable
    pub fn window(&self, pid: u32, process: &str, title: &str, rect: Rect) -> WindowHandle {
        self.processes.insert(ProcessInfo {
            exe: Some(format!("C:\\Apps\\{}", process)),
            ..ProcessInfo::named(pid, process)
        });
        self.desktop
            .push_window(pid, process, title, rect, WindowState::Normal)
    }

    /// Shell process parented to `parent`, i.e. a terminal tab
    pub fn shell(&self, pid: u32, parent: u32, name: &str, cwd: &str) {
        self.processes.insert(ProcessInfo {
            parent: Some(parent),
            cwd: Some(cwd.to_string()),
            ..ProcessInfo::named(pid, name)
        });
    }

    pub fn registry(&self) -> HandlerRegistry {
        HandlerRegistry::new(self.tabs.clone())
    }

    pub fn keeper(&self) -> ContextKeeper {
        self.keeper_with(self.registry())
    }

    pub fn keeper_with(&self, registry: HandlerRegistry) -> ContextKeeper {
        ContextKeeper::with_parts(
            self.config.clone(),
            KeeperParts {
                desktop: self.desktop.clone(),
                processes: self.processes.clone(),
                registry: Arc::new(registry),
                clock: Arc::new(self.clock.clone()),
                env: self.env.clone(),
            },
        )
    }
}
