//! Browsers: family, profile and the open tabs

use std::collections::HashSet;
use std::sync::Arc;

use super::{launched, CaptureOptions, Handler, RestoreContext, RestoreResult, RestoreScope};
use crate::browser_tabs::{ExtractOptions, TabExtractor};
use crate::classify;
use crate::desktop::LaunchSpec;
use crate::error::Result;
use crate::model::{
    AppInfo, AppType, ApplicationEntry, BrowserEntry, BrowserFamily, WindowHandle, WindowRecord,
};
use crate::outcome::{Outcome, Warning};
use crate::process::ProcessInfo;

const DEFAULT_PROFILE: &str = "Default";

pub struct BrowserHandler {
    tabs: Arc<dyn TabExtractor>,
}

impl BrowserHandler {
    pub fn new(tabs: Arc<dyn TabExtractor>) -> Self {
        Self { tabs }
    }

    /// URLs the live browser behind `handle` already shows
    fn open_urls(
        &self,
        ctx: &RestoreContext,
        entry: &BrowserEntry,
        handle: WindowHandle,
    ) -> Result<HashSet<String>> {
        let window = ctx
            .desktop
            .windows()?
            .into_iter()
            .find(|w| w.handle == handle);
        let (pid, title) = match window {
            Some(w) => (w.pid, w.title),
            None => return Ok(HashSet::new()),
        };
        let process = ctx
            .processes
            .snapshot()
            .info_with_children(pid)
            .unwrap_or_else(|| ProcessInfo::named(pid, &entry.app.process_name));
        let extracted = self
            .tabs
            .extract(entry.family, &process, &title, &ExtractOptions::urls_only())?;
        Ok(extracted.tabs.into_iter().map(|t| t.url).collect())
    }
}

/// Profile from the command line, else from the window title
pub fn detect_profile(process: &ProcessInfo, title: &str) -> String {
    if let Some(dir) = process.flag_value("--profile-directory") {
        let dir = dir.trim_matches('"');
        if !dir.is_empty() {
            return dir.to_string();
        }
    }
    // "<page> - <profile> - <browser>": only the segment before the browser name
    let mut segments = title.rsplit(" - ");
    let _browser = segments.next();
    let candidate = match (segments.next(), segments.next()) {
        (Some(profile), Some(_page)) => profile.trim(),
        _ => return DEFAULT_PROFILE.to_string(),
    };
    let lower = candidate.to_ascii_lowercase();
    if lower.starts_with("profile ") && candidate.len() > "profile ".len() {
        candidate.to_string()
    } else if lower == "personal" {
        "Personal".to_string()
    } else if lower == "work" {
        "Work".to_string()
    } else {
        DEFAULT_PROFILE.to_string()
    }
}

/// Only real Chromium profile directory names are passed back on launch
fn is_profile_directory(profile: &str) -> bool {
    profile == DEFAULT_PROFILE || profile.starts_with("Profile ")
}

fn program_of(entry: &BrowserEntry) -> String {
    entry
        .app
        .executable
        .clone()
        .unwrap_or_else(|| entry.app.process_name.clone())
}

/// Launch command opening `urls` in the recorded browser and profile
pub fn launch_spec(entry: &BrowserEntry, urls: &[&str]) -> LaunchSpec {
    let mut spec = LaunchSpec::new(program_of(entry), entry.app.process_name.clone());
    if entry.family == BrowserFamily::Firefox {
        for url in urls {
            spec = spec.args(["-new-tab", *url]);
        }
        return spec;
    }
    if is_profile_directory(&entry.profile) {
        spec = spec.arg(format!("--profile-directory={}", entry.profile));
    }
    spec.args(urls.iter().copied())
}

impl Handler for BrowserHandler {
    fn app_type(&self) -> AppType {
        AppType::Browser
    }

    fn capture(
        &self,
        record: &WindowRecord,
        process: &ProcessInfo,
        options: &CaptureOptions,
    ) -> Result<Outcome<ApplicationEntry>> {
        let family = classify::browser_family(&record.process_name, &record.title);
        let extract = if options.quick {
            ExtractOptions::quick()
        } else {
            ExtractOptions::full()
        };

        let mut warnings = Vec::new();
        let (tabs, tab_source) = match self.tabs.extract(family, process, &record.title, &extract) {
            Ok(extracted) => (extracted.tabs, Some(extracted.source)),
            Err(e) => {
                log::warn!("{}: tabs unavailable: {}", record.process_name, e);
                warnings.push(Warning::from_error(record.process_name.clone(), &e));
                (Vec::new(), None)
            }
        };

        Ok(Outcome::new(
            ApplicationEntry::Browser(BrowserEntry {
                app: AppInfo::from_record(record, process.exe.clone()),
                family,
                profile: detect_profile(process, &record.title),
                tabs,
                tab_source,
            }),
            warnings,
        ))
    }

    fn restore(&self, entry: &ApplicationEntry, ctx: &RestoreContext) -> Result<RestoreResult> {
        let ApplicationEntry::Browser(browser) = entry else {
            return Ok(RestoreResult::skipped("not a browser entry"));
        };
        let urls: Vec<&str> = browser.tabs.iter().map(|t| t.url.as_str()).collect();

        match ctx.existing {
            Some(handle) => {
                let mut result = RestoreResult::reused(handle);
                if ctx.scope == RestoreScope::LayoutOnly || urls.is_empty() {
                    return Ok(result);
                }
                let open = self.open_urls(ctx, browser, handle).unwrap_or_else(|e| {
                    result
                        .warnings
                        .push(Warning::from_error(browser.app.process_name.clone(), &e));
                    HashSet::new()
                });
                let missing: Vec<&str> = urls
                    .iter()
                    .copied()
                    .filter(|u| !open.contains(*u))
                    .collect();
                if missing.is_empty() {
                    return Ok(result);
                }
                log::info!(
                    "Opening {} missing tab(s) in {}",
                    missing.len(),
                    entry.label()
                );
                if browser.app.executable.is_some() {
                    ctx.desktop.launch(&launch_spec(browser, &missing))?;
                } else {
                    for url in missing {
                        if let Err(e) = ctx.desktop.open_target(url) {
                            result
                                .warnings
                                .push(Warning::from_error(browser.app.process_name.clone(), &e));
                        }
                    }
                }
                Ok(result)
            }
            None if ctx.scope == RestoreScope::LayoutOnly => {
                Ok(RestoreResult::skipped("not running"))
            }
            None => {
                let spec = launch_spec(browser, &urls);
                log::info!("Launching {} for {}", spec.display(), entry.label());
                let pid = ctx.desktop.launch(&spec)?;
                Ok(launched(ctx, Some(pid), &spec.process_name))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser_tabs::ExtractedTabs;
    use crate::error::KeeperError;
    use crate::model::{BrowserTab, TabSource};
    use crate::outcome::WarningKind;
    use crate::test_utils::{restore_context, window};

    struct FixedTabs(Vec<&'static str>);

    impl TabExtractor for FixedTabs {
        fn extract(
            &self,
            _family: BrowserFamily,
            _process: &ProcessInfo,
            _window_title: &str,
            _options: &ExtractOptions,
        ) -> Result<ExtractedTabs> {
            if self.0.is_empty() {
                return Err(KeeperError::Unavailable("debugging disabled".into()));
            }
            Ok(ExtractedTabs {
                tabs: self
                    .0
                    .iter()
                    .enumerate()
                    .map(|(i, url)| BrowserTab {
                        url: url.to_string(),
                        title: url.to_string(),
                        favicon: None,
                        active: i == 0,
                        group_id: None,
                        group_name: None,
                        index: i,
                    })
                    .collect(),
                source: TabSource::DebuggingEndpoint,
            })
        }
    }

    fn chrome_entry(handler: &BrowserHandler) -> (WindowRecord, Outcome<ApplicationEntry>) {
        let record = window(0, "chrome.exe", "Example - Google Chrome");
        let process = ProcessInfo {
            exe: Some("C:\\Chrome\\chrome.exe".into()),
            ..ProcessInfo::named(record.pid, "chrome.exe")
        };
        let outcome = handler
            .capture(&record, &process, &CaptureOptions::default())
            .unwrap();
        (record, outcome)
    }

    #[test]
    fn test_detect_profile() {
        let flagged = ProcessInfo {
            cmdline: vec!["chrome.exe".into(), "--profile-directory=Profile 2".into()],
            ..ProcessInfo::named(1, "chrome.exe")
        };
        assert_eq!(detect_profile(&flagged, "x"), "Profile 2");

        let plain = ProcessInfo::named(1, "msedge.exe");
        assert_eq!(
            detect_profile(&plain, "News - Profile 3 - Microsoft Edge"),
            "Profile 3"
        );
        assert_eq!(detect_profile(&plain, "Inbox - Work - Microsoft Edge"), "Work");
        assert_eq!(detect_profile(&plain, "New Tab - Google Chrome"), "Default");
    }

    #[test]
    fn test_profile_words_in_page_titles_are_ignored() {
        let plain = ProcessInfo::named(1, "chrome.exe");
        assert_eq!(
            detect_profile(&plain, "Network settings - Google Chrome"),
            "Default"
        );
        assert_eq!(
            detect_profile(&plain, "Personal finance - Budget - Google Chrome"),
            "Default"
        );
        assert_eq!(
            detect_profile(&plain, "Remote work tips - Work - Google Chrome"),
            "Work"
        );
    }

    #[test]
    fn test_capture_degrades_to_empty_tabs_with_warning() {
        let handler = BrowserHandler::new(Arc::new(FixedTabs(vec![])));
        let (_, outcome) = chrome_entry(&handler);
        let ApplicationEntry::Browser(b) = &outcome.value else {
            panic!("expected a browser entry");
        };
        assert!(b.tabs.is_empty());
        assert_eq!(b.tab_source, None);
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].kind, WarningKind::Unavailable);
    }

    #[test]
    fn test_restore_launches_with_all_urls() {
        let handler = BrowserHandler::new(Arc::new(FixedTabs(vec![
            "https://example.com/a",
            "https://example.com/b",
        ])));
        let (_, outcome) = chrome_entry(&handler);
        let (ctx, desktop) = restore_context(RestoreScope::Full);

        let result = handler.restore(&outcome.value, &ctx).unwrap();
        assert_eq!(result.action, super::super::RestoreAction::Launched);
        assert!(result.window.is_some());
        let launches = desktop.launches();
        assert_eq!(
            launches[0].args,
            vec![
                "--profile-directory=Default",
                "https://example.com/a",
                "https://example.com/b"
            ]
        );
    }

    #[test]
    fn test_restore_into_running_browser_opens_only_missing_tabs() {
        let capture = BrowserHandler::new(Arc::new(FixedTabs(vec![
            "https://example.com/a",
            "https://example.com/b",
        ])));
        let (_, outcome) = chrome_entry(&capture);

        let (mut ctx, desktop) = restore_context(RestoreScope::TabsOnly);
        let live = desktop.push_window(
            77,
            "chrome.exe",
            "A - Google Chrome",
            crate::model::Rect::new(0, 0, 800, 600),
            crate::model::WindowState::Normal,
        );
        ctx.existing = Some(live);

        let running = BrowserHandler::new(Arc::new(FixedTabs(vec!["https://example.com/a"])));
        let result = running.restore(&outcome.value, &ctx).unwrap();
        assert_eq!(result.window, Some(live));
        let launches = desktop.launches();
        assert_eq!(launches.len(), 1);
        assert_eq!(
            launches[0].args,
            vec!["--profile-directory=Default", "https://example.com/b"]
        );
    }

    #[test]
    fn test_firefox_launch_uses_new_tab_pairs() {
        let entry = BrowserEntry {
            app: AppInfo::from_record(&window(0, "firefox.exe", "Mozilla Firefox"), None),
            family: BrowserFamily::Firefox,
            profile: DEFAULT_PROFILE.into(),
            tabs: vec![],
            tab_source: None,
        };
        let spec = launch_spec(&entry, &["https://a", "https://b"]);
        assert_eq!(spec.program, "firefox.exe");
        assert_eq!(spec.args, vec!["-new-tab", "https://a", "-new-tab", "https://b"]);
    }

    #[test]
    fn test_layout_only_never_launches() {
        let handler = BrowserHandler::new(Arc::new(FixedTabs(vec!["https://a"])));
        let (_, outcome) = chrome_entry(&handler);
        let (ctx, desktop) = restore_context(RestoreScope::LayoutOnly);
        let result = handler.restore(&outcome.value, &ctx).unwrap();
        assert!(matches!(result.action, super::super::RestoreAction::Skipped(_)));
        assert!(desktop.launches().is_empty());
    }
}
