//! One full capture pass
//!
//! Enumerate, gate on unsaved documents, fan handler captures out over a
//! bounded set of blocking tasks, then add environment and system state.
//! A handler that errors or overruns its deadline leaves a Generic entry
//! and exactly one warning; the pass always continues.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::classify::classify;
use crate::clear::ClearMode;
use crate::clock::{format_timestamp, Clock};
use crate::config::Config;
use crate::desktop::Desktop;
use crate::environment::{self, EnvironmentManager};
use crate::error::{KeeperError, Result};
use crate::handlers::{CaptureOptions, HandlerRegistry};
use crate::inventory::{self, UnsavedDocument};
use crate::model::{
    sanitize_context_name, AppType, ApplicationEntry, BrowserFamily, ContextSnapshot,
    EnvironmentSummary, WindowRecord,
};
use crate::outcome::{Outcome, Warning, WarningKind};
use crate::process::{ProcessInfo, ProcessSource, ProcessTable};
use crate::store::ContextStore;
use crate::system;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeepOptions {
    /// Skip the unsaved gate, Firefox sessions, favicons and env cleanup
    pub quick: bool,
}

/// Asked before capturing while documents have unsaved edits
pub trait Confirm: Send + Sync {
    fn confirm_unsaved(&self, unsaved: &[UnsavedDocument]) -> bool;

    /// Asked before a restore minimizes or closes the current windows
    fn confirm_clear(&self, _mode: ClearMode) -> bool {
        true
    }
}

/// Proceeds without asking
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysProceed;

impl Confirm for AlwaysProceed {
    fn confirm_unsaved(&self, _unsaved: &[UnsavedDocument]) -> bool {
        true
    }
}

/// Run blocking work on the blocking pool with a deadline
pub(crate) async fn run_blocking<T, F>(what: &str, timeout: Duration, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(KeeperError::Unavailable(format!("{} failed: {}", what, join))),
        Err(_) => Err(KeeperError::TimedOut(format!(
            "{} exceeded {}ms",
            what,
            timeout.as_millis()
        ))),
    }
}

enum WindowCapture {
    Done {
        record: WindowRecord,
        app_type: AppType,
        executable: Option<String>,
        result: Result<Outcome<ApplicationEntry>>,
    },
    NotStarted,
}

pub struct SnapshotBuilder {
    config: Config,
    desktop: Arc<dyn Desktop>,
    processes: Arc<dyn ProcessSource>,
    registry: Arc<HandlerRegistry>,
    environment: EnvironmentManager,
    store: ContextStore,
    clock: Arc<dyn Clock>,
}

impl SnapshotBuilder {
    pub fn new(
        config: Config,
        desktop: Arc<dyn Desktop>,
        processes: Arc<dyn ProcessSource>,
        registry: Arc<HandlerRegistry>,
        environment: EnvironmentManager,
        store: ContextStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            desktop,
            processes,
            registry,
            environment,
            store,
            clock,
        }
    }

    /// Capture the live desktop into a snapshot named `raw_name`
    ///
    /// Writes the environment snapshot and clipboard cache as side effects;
    /// the snapshot document itself is written by [`SnapshotBuilder::persist`].
    pub async fn build(
        &self,
        raw_name: &str,
        options: KeepOptions,
        confirm: &dyn Confirm,
        cancel: &CancellationToken,
    ) -> Result<Outcome<ContextSnapshot>> {
        let name = sanitize_context_name(raw_name)?;
        if cancel.is_cancelled() {
            return Err(KeeperError::Cancelled);
        }
        log::info!(
            "Capturing context {}{}",
            name,
            if options.quick { " (quick)" } else { "" }
        );

        let desktop = self.desktop.clone();
        let records = run_blocking("window enumeration", self.config.capture_timeout, move || {
            inventory::enumerate(&*desktop)
        })
        .await?;

        if !options.quick {
            let unsaved = inventory::detect_unsaved(&records);
            if !unsaved.is_empty() {
                log::info!("{} window(s) have unsaved edits", unsaved.len());
                if !confirm.confirm_unsaved(&unsaved) {
                    return Err(KeeperError::Declined(format!(
                        "{} document(s) have unsaved changes",
                        unsaved.len()
                    )));
                }
            }
        }

        let processes = self.processes.clone();
        let table = run_blocking("process snapshot", self.config.capture_timeout, move || {
            Ok(processes.snapshot())
        })
        .await
        .unwrap_or_else(|e| {
            log::warn!("Process table unavailable: {}", e);
            ProcessTable::new()
        });

        let (mut entries, mut warnings) = self.capture_windows(records, &table, options, cancel).await;
        dedupe_browser_tabs(&mut entries);

        let (env_summary, env_path) = self.capture_environment(&name, options, &mut warnings).await;

        let desktop = self.desktop.clone();
        let store = self.store.clone();
        let system_name = name.clone();
        let system = run_blocking("system state", self.config.capture_timeout, move || {
            Ok(system::capture(&*desktop, &store, &system_name))
        })
        .await;
        let system = match system {
            Ok((state, system_warnings)) => {
                warnings.extend(system_warnings);
                state
            }
            Err(e) => {
                warnings.push(Warning::from_error("system", &e));
                Default::default()
            }
        };

        let timestamp = format_timestamp(self.clock.now_utc());
        let snapshot = ContextSnapshot::new(
            name,
            timestamp,
            entries,
            system,
            env_summary,
            env_path,
            warnings.clone(),
        );
        log::info!(
            "Captured {}: {} application(s), {} browser(s), {} tab(s), {} warning(s)",
            snapshot.context_name,
            snapshot.summary.applications,
            snapshot.summary.browsers,
            snapshot.summary.tabs,
            snapshot.summary.warnings
        );
        Ok(Outcome::new(snapshot, warnings))
    }

    /// Write the snapshot atomically under its context name
    pub fn persist(&self, snapshot: &ContextSnapshot) -> Result<std::path::PathBuf> {
        self.store.write_snapshot(snapshot)
    }

    async fn capture_windows(
        &self,
        records: Vec<WindowRecord>,
        table: &ProcessTable,
        options: KeepOptions,
        cancel: &CancellationToken,
    ) -> (Vec<ApplicationEntry>, Vec<Warning>) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallelism.max(1)));
        let capture_options = CaptureOptions {
            quick: options.quick,
        };
        let mut tasks = JoinSet::new();

        for record in records {
            let handler = self.registry.get(classify(&record));
            let process = table
                .info_with_children(record.pid)
                .unwrap_or_else(|| ProcessInfo::named(record.pid, &record.process_name));
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let timeout = self.config.capture_timeout;

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return WindowCapture::NotStarted;
                };
                if cancel.is_cancelled() {
                    return WindowCapture::NotStarted;
                }
                let app_type = handler.app_type();
                let executable = process.exe.clone();
                let what = format!("{} capture of {}", app_type.as_str(), record.process_name);
                let task_record = record.clone();
                let result = run_blocking(&what, timeout, move || {
                    handler.capture(&task_record, &process, &capture_options)
                })
                .await;
                WindowCapture::Done {
                    record,
                    app_type,
                    executable,
                    result,
                }
            });
        }

        let mut captured: Vec<(usize, ApplicationEntry, Vec<Warning>)> = Vec::new();
        let mut not_started = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(WindowCapture::Done {
                    record,
                    result: Ok(outcome),
                    ..
                }) => captured.push((record.z_order, outcome.value, outcome.warnings)),
                Ok(WindowCapture::Done {
                    record,
                    app_type,
                    executable,
                    result: Err(e),
                }) => {
                    log::warn!(
                        "{}: {} capture degraded to generic: {}",
                        record.process_name,
                        app_type.as_str(),
                        e
                    );
                    let mut entry = ApplicationEntry::degraded(&record, app_type);
                    entry.app_mut().executable = executable;
                    let warning = Warning::from_error(record.process_name.clone(), &e);
                    captured.push((record.z_order, entry, vec![warning]));
                }
                Ok(WindowCapture::NotStarted) => not_started += 1,
                Err(e) => log::error!("Capture task failed: {}", e),
            }
        }

        captured.sort_by_key(|(z, _, _)| *z);
        let mut entries = Vec::with_capacity(captured.len());
        let mut warnings = Vec::new();
        for (_, entry, entry_warnings) in captured {
            entries.push(entry);
            warnings.extend(entry_warnings);
        }
        if not_started > 0 {
            warnings.push(Warning::new(
                "capture",
                WarningKind::Cancelled,
                format!("cancelled; {} window(s) not captured", not_started),
            ));
        }
        (entries, warnings)
    }

    async fn capture_environment(
        &self,
        name: &str,
        options: KeepOptions,
        warnings: &mut Vec<Warning>,
    ) -> (EnvironmentSummary, Option<String>) {
        let manager = self.environment.clone();
        let keep_name = name.to_string();
        let keep_last = self.config.env_keep_last;
        let quick = options.quick;

        let kept = run_blocking("environment snapshot", self.config.capture_timeout, move || {
            let kept = manager.keep(&keep_name)?;
            if !quick {
                if let Err(e) = manager.cleanup(&keep_name, keep_last) {
                    log::warn!("Environment cleanup for {} failed: {}", keep_name, e);
                }
            }
            Ok(kept)
        })
        .await;

        match kept {
            Ok((file, vars)) => (
                environment::summarize(&vars),
                Some(file.path.display().to_string()),
            ),
            Err(e) => {
                log::warn!("{}: environment not captured: {}", name, e);
                warnings.push(Warning::from_error("environment", &e));
                (EnvironmentSummary::default(), None)
            }
        }
    }
}

/// Chromium's debugging endpoint lists every tab of a profile, so each
/// window of one profile would repeat them. Keep each URL only on the
/// frontmost window that shows it. Entries must be in Z-order.
pub fn dedupe_browser_tabs(entries: &mut [ApplicationEntry]) {
    let mut seen: HashMap<(BrowserFamily, String), HashSet<String>> = HashMap::new();
    for entry in entries.iter_mut() {
        let ApplicationEntry::Browser(browser) = entry else {
            continue;
        };
        let earlier = seen
            .entry((browser.family, browser.profile.clone()))
            .or_default();
        let before = browser.tabs.len();
        browser.tabs.retain(|t| !earlier.contains(&t.url));
        earlier.extend(browser.tabs.iter().map(|t| t.url.clone()));
        if browser.tabs.len() != before {
            for (i, tab) in browser.tabs.iter_mut().enumerate() {
                tab.index = i;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AppInfo, BrowserEntry, BrowserTab};
    use crate::test_utils::{window, Harness};

    fn browser(z: usize, urls: &[&str]) -> ApplicationEntry {
        ApplicationEntry::Browser(BrowserEntry {
            app: AppInfo::from_record(&window(z, "chrome.exe", "Chrome"), None),
            family: BrowserFamily::Chrome,
            profile: "Default".into(),
            tabs: urls
                .iter()
                .enumerate()
                .map(|(i, u)| BrowserTab {
                    url: u.to_string(),
                    title: String::new(),
                    favicon: None,
                    active: i == 0,
                    group_id: None,
                    group_name: None,
                    index: i,
                })
                .collect(),
            tab_source: None,
        })
    }

    fn urls(entry: &ApplicationEntry) -> Vec<(String, usize)> {
        match entry {
            ApplicationEntry::Browser(b) => b.tabs.iter().map(|t| (t.url.clone(), t.index)).collect(),
            _ => vec![],
        }
    }

    #[test]
    fn test_dedupe_keeps_tabs_on_frontmost_window() {
        let mut entries = vec![browser(0, &["a", "b"]), browser(1, &["a", "b", "c"])];
        dedupe_browser_tabs(&mut entries);
        assert_eq!(urls(&entries[0]), vec![("a".into(), 0), ("b".into(), 1)]);
        assert_eq!(urls(&entries[1]), vec![("c".into(), 0)]);
    }

    struct Decline;

    impl Confirm for Decline {
        fn confirm_unsaved(&self, _unsaved: &[UnsavedDocument]) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_unsaved_gate_declines_unless_quick() {
        let harness = Harness::new();
        harness.add_window(1, "notepad.exe", "*notes.txt - Notepad");
        let builder = harness.builder();
        let cancel = CancellationToken::new();

        let declined = builder
            .build("demo", KeepOptions::default(), &Decline, &cancel)
            .await;
        assert!(matches!(declined, Err(KeeperError::Declined(_))));

        let quick = builder
            .build("demo", KeepOptions { quick: true }, &Decline, &cancel)
            .await
            .unwrap();
        assert_eq!(quick.value.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_run_blocking_timeout_names_the_work() {
        let err = run_blocking("document capture of notepad.exe", Duration::from_millis(20), || {
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, KeeperError::TimedOut(_)));
        assert_eq!(
            err.to_string(),
            "timed out: document capture of notepad.exe exceeded 20ms"
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let harness = Harness::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = harness
            .builder()
            .build("demo", KeepOptions::default(), &AlwaysProceed, &cancel)
            .await;
        assert!(matches!(result, Err(KeeperError::Cancelled)));
    }

    #[tokio::test]
    async fn test_invalid_name_is_rejected() {
        let harness = Harness::new();
        let result = harness
            .builder()
            .build("///", KeepOptions::default(), &AlwaysProceed, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(KeeperError::InvalidName(_))));
    }

    #[tokio::test]
    async fn test_entries_follow_z_order_and_env_is_recorded() {
        let harness = Harness::new();
        harness.add_window(1, "notepad.exe", "a.txt - Notepad");
        harness.add_window(2, "Slack.exe", "Slack");
        harness.add_window(3, "mystery.exe", "Mystery");
        let outcome = harness
            .builder()
            .build("demo", KeepOptions::default(), &AlwaysProceed, &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.is_success(), "warnings: {:?}", outcome.warnings);
        let snapshot = outcome.value;
        let z: Vec<usize> = snapshot.entries_in_z_order().iter().map(|e| e.z_order()).collect();
        assert_eq!(z, vec![0, 1, 2]);
        let types: Vec<AppType> = snapshot
            .entries_in_z_order()
            .iter()
            .map(|e| e.app_type())
            .collect();
        assert_eq!(
            types,
            vec![AppType::Document, AppType::Communication, AppType::Generic]
        );
        assert!(snapshot.environment_snapshot.is_some());
        assert!(snapshot.windows.environment_variables.count > 0);
    }
}
