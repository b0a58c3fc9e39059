//! Per-application-type capture and restore
//!
//! Each [`Handler`] turns a live window plus its process into an
//! [`ApplicationEntry`] and, later, replays that entry onto the desktop.
//! Handlers run on blocking threads; they may sleep and do blocking I/O.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::browser_tabs::TabExtractor;
use crate::desktop::{Desktop, LaunchSpec};
use crate::error::Result;
use crate::model::{AppType, ApplicationEntry, WindowHandle, WindowRecord};
use crate::outcome::{Outcome, Warning};
use crate::process::{ProcessInfo, ProcessSource};

pub mod browser;
pub mod communication;
pub mod document;
pub mod generic;
pub mod ide;
pub mod terminal;

/// Which sub-state a restore replays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreScope {
    #[default]
    Full,
    /// Browser tabs only; nothing is moved or launched besides browsers
    TabsOnly,
    /// Window placement only; nothing is launched and no tabs are opened
    LayoutOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CaptureOptions {
    /// Skip slow best-effort sources (favicons, session store)
    pub quick: bool,
}

/// How long to wait for a launched application's window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

/// Shared state for one restore pass
#[derive(Clone)]
pub struct RestoreContext {
    pub desktop: Arc<dyn Desktop>,
    pub processes: Arc<dyn ProcessSource>,
    pub scope: RestoreScope,
    /// Live window claimed for this entry before restore began
    pub existing: Option<WindowHandle>,
    /// Windows present before any launch; never mistaken for a new window
    pub known: Arc<HashSet<WindowHandle>>,
    /// Windows already bound to an entry in this pass
    pub claimed: Arc<Mutex<HashSet<WindowHandle>>>,
    pub wait: WaitPolicy,
}

impl RestoreContext {
    fn claim(&self, handle: WindowHandle) -> bool {
        self.claimed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle)
    }

    fn is_claimed(&self, handle: WindowHandle) -> bool {
        self.claimed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&handle)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case", tag = "action", content = "reason")]
pub enum RestoreAction {
    /// An already-running window was bound to the entry
    Reused,
    /// The application was started
    Launched,
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreResult {
    /// Window to place, when one was found
    pub window: Option<WindowHandle>,
    pub action: RestoreAction,
    /// Sub-item degradations (e.g. tabs that could not be checked)
    pub warnings: Vec<Warning>,
}

impl RestoreResult {
    pub fn reused(window: WindowHandle) -> Self {
        Self {
            window: Some(window),
            action: RestoreAction::Reused,
            warnings: Vec::new(),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            window: None,
            action: RestoreAction::Skipped(reason.into()),
            warnings: Vec::new(),
        }
    }
}

pub trait Handler: Send + Sync {
    fn app_type(&self) -> AppType;

    fn capture(
        &self,
        record: &WindowRecord,
        process: &ProcessInfo,
        options: &CaptureOptions,
    ) -> Result<Outcome<ApplicationEntry>>;

    /// Whether a live window can stand in for a captured entry
    fn matches(
        &self,
        entry: &ApplicationEntry,
        window: &WindowRecord,
        _process: Option<&ProcessInfo>,
    ) -> bool {
        entry
            .app()
            .process_name
            .eq_ignore_ascii_case(&window.process_name)
    }

    fn restore(&self, entry: &ApplicationEntry, ctx: &RestoreContext) -> Result<RestoreResult>;
}

/// Bind the claimed window, or launch and wait for the new one
pub(crate) fn reuse_or_launch(
    ctx: &RestoreContext,
    entry: &ApplicationEntry,
    spec: Option<LaunchSpec>,
) -> Result<RestoreResult> {
    if let Some(handle) = ctx.existing {
        return Ok(RestoreResult::reused(handle));
    }
    if ctx.scope == RestoreScope::LayoutOnly {
        return Ok(RestoreResult::skipped("not running"));
    }
    let Some(spec) = spec else {
        return Ok(RestoreResult::skipped("no launch command recorded"));
    };

    log::info!("Launching {} for {}", spec.display(), entry.label());
    let pid = ctx.desktop.launch(&spec)?;
    Ok(launched(ctx, Some(pid), &spec.process_name))
}

/// Result for a launch whose window may or may not have appeared
pub(crate) fn launched(ctx: &RestoreContext, pid: Option<u32>, process_name: &str) -> RestoreResult {
    let window = wait_for_window(ctx, pid, process_name);
    let mut warnings = Vec::new();
    if window.is_none() {
        warnings.push(Warning::new(
            process_name,
            crate::outcome::WarningKind::Timeout,
            "launched but no window appeared; layout not applied",
        ));
    }
    RestoreResult {
        window,
        action: RestoreAction::Launched,
        warnings,
    }
}

/// Poll for a new window owned by `pid`, then any new one with the process name
pub(crate) fn wait_for_window(
    ctx: &RestoreContext,
    pid: Option<u32>,
    process_name: &str,
) -> Option<WindowHandle> {
    for attempt in 0..ctx.wait.attempts.max(1) {
        if attempt > 0 {
            std::thread::sleep(ctx.wait.interval);
        }
        let Ok(windows) = ctx.desktop.windows() else {
            continue;
        };
        let fresh = |w: &&crate::desktop::RawWindow| {
            !ctx.known.contains(&w.handle) && !ctx.is_claimed(w.handle)
        };
        let found = windows
            .iter()
            .filter(fresh)
            .find(|w| Some(w.pid) == pid)
            .or_else(|| {
                windows
                    .iter()
                    .filter(fresh)
                    .find(|w| w.process_name.eq_ignore_ascii_case(process_name))
            })
            .map(|w| w.handle);
        if let Some(handle) = found {
            if ctx.claim(handle) {
                return Some(handle);
            }
        }
    }
    None
}

/// One handler per application type, Generic as the fallback
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn Handler>>,
    fallback: Arc<dyn Handler>,
}

impl HandlerRegistry {
    pub fn new(tabs: Arc<dyn TabExtractor>) -> Self {
        Self {
            handlers: vec![
                Arc::new(ide::IdeHandler),
                Arc::new(terminal::TerminalHandler),
                Arc::new(browser::BrowserHandler::new(tabs)),
                Arc::new(document::DocumentHandler),
                Arc::new(communication::CommunicationHandler),
            ],
            fallback: Arc::new(generic::GenericHandler),
        }
    }

    /// Replace the handler for its type
    pub fn with_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        let app_type = handler.app_type();
        if app_type == AppType::Generic {
            self.fallback = handler;
        } else {
            self.handlers.retain(|h| h.app_type() != app_type);
            self.handlers.push(handler);
        }
        self
    }

    pub fn get(&self, app_type: AppType) -> Arc<dyn Handler> {
        self.handlers
            .iter()
            .find(|h| h.app_type() == app_type)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    pub fn generic(&self) -> Arc<dyn Handler> {
        self.fallback.clone()
    }
}

/// File name of a path-like string, tolerating both separators
pub(crate) fn file_name_of(path: &str) -> &str {
    path.rsplit(['\\', '/'])
        .find(|s| !s.is_empty())
        .unwrap_or(path)
}

/// Split a window title on ` - ` (and the em-dash variant Firefox uses)
pub(crate) fn title_segments(title: &str) -> Vec<&str> {
    title
        .split(" - ")
        .flat_map(|s| s.split(" — "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Drop unsaved markers from a title segment
pub(crate) fn strip_unsaved(segment: &str) -> &str {
    segment
        .trim()
        .trim_start_matches(['●', '*'])
        .trim_end_matches(['●', '*'])
        .trim()
}
