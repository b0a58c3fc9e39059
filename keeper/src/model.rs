//! Context snapshot models (v1 schema)
//!
//! The persisted document is camelCase JSON. `ApplicationEntry` is internally
//! tagged by `type`; every variant flattens the shared [`AppInfo`] so layout
//! fields sit beside the type-specific ones.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{KeeperError, Result};
use crate::outcome::Warning;

/// Current snapshot schema version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Longest sanitized context name
pub const MAX_CONTEXT_NAME: usize = 64;

/// Opaque OS window identity, unique within one capture pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowState {
    #[default]
    Normal,
    Maximized,
    Minimized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppType {
    Ide,
    Terminal,
    Browser,
    Document,
    Communication,
    Generic,
}

impl AppType {
    pub const ALL: [AppType; 6] = [
        AppType::Ide,
        AppType::Terminal,
        AppType::Browser,
        AppType::Document,
        AppType::Communication,
        AppType::Generic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AppType::Ide => "ide",
            AppType::Terminal => "terminal",
            AppType::Browser => "browser",
            AppType::Document => "document",
            AppType::Communication => "communication",
            AppType::Generic => "generic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> i64 {
        i64::from(self.width.max(0)) * i64::from(self.height.max(0))
    }
}

/// One visible top-level window, built during capture and never persisted standalone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowRecord {
    pub handle: WindowHandle,
    pub pid: u32,
    pub process_name: String,
    pub title: String,
    pub rect: Rect,
    pub state: WindowState,
    /// 0 = topmost within the snapshot
    pub z_order: usize,
    pub virtual_desktop: Option<String>,
}

/// Persisted layout of a window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowLayout {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub state: WindowState,
    pub z_order: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_desktop: Option<String>,
}

impl WindowLayout {
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }
}

impl From<&WindowRecord> for WindowLayout {
    fn from(record: &WindowRecord) -> Self {
        Self {
            x: record.rect.x,
            y: record.rect.y,
            width: record.rect.width,
            height: record.rect.height,
            state: record.state,
            z_order: record.z_order,
            virtual_desktop: record.virtual_desktop.clone(),
        }
    }
}

/// Fields every application entry carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    pub process_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,
    pub title: String,
    pub window: WindowLayout,
}

impl AppInfo {
    pub fn from_record(record: &WindowRecord, executable: Option<String>) -> Self {
        Self {
            process_name: record.process_name.clone(),
            executable,
            title: record.title.clone(),
            window: WindowLayout::from(record),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdeKind {
    VsCode,
    VsCodeInsiders,
    Cursor,
    JetBrains,
    SublimeText,
    NotepadPlusPlus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdeEntry {
    #[serde(flatten)]
    pub app: AppInfo,
    pub kind: IdeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
    #[serde(default)]
    pub open_files: Vec<String>,
    #[serde(default)]
    pub has_unsaved: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalKind {
    WindowsTerminal,
    Cmd,
    PowerShell,
    Pwsh,
    ConEmu,
    Termius,
    Unix,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalTab {
    /// Shell process name, e.g. `pwsh.exe`
    pub shell: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalEntry {
    #[serde(flatten)]
    pub app: AppInfo,
    pub kind: TerminalKind,
    #[serde(default)]
    pub tabs: Vec<TerminalTab>,
}

impl TerminalEntry {
    /// Working directory of the first tab that has one
    pub fn primary_cwd(&self) -> Option<&str> {
        self.tabs
            .iter()
            .find_map(|t| t.working_directory.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserFamily {
    Chrome,
    Edge,
    Brave,
    Chromium,
    Opera,
    Vivaldi,
    Firefox,
}

impl BrowserFamily {
    pub fn is_chromium(self) -> bool {
        !matches!(self, BrowserFamily::Firefox)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TabSource {
    DebuggingEndpoint,
    SessionStore,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserTab {
    pub url: String,
    pub title: String,
    /// `data:` URI, best-effort
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserEntry {
    #[serde(flatten)]
    pub app: AppInfo,
    pub family: BrowserFamily,
    pub profile: String,
    #[serde(default)]
    pub tabs: Vec<BrowserTab>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_source: Option<TabSource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Word,
    Excel,
    PowerPoint,
    Notepad,
    Obsidian,
    OneNote,
    Notion,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentEntry {
    #[serde(flatten)]
    pub app: AppInfo,
    pub kind: DocumentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default)]
    pub unsaved: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunicationKind {
    Slack,
    Teams,
    Discord,
    Zoom,
    Telegram,
    WhatsApp,
    Outlook,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationEntry {
    #[serde(flatten)]
    pub app: AppInfo,
    pub kind: CommunicationKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericEntry {
    #[serde(flatten)]
    pub app: AppInfo,
    /// Set when a richer handler timed out or failed and this entry stands in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded_from: Option<AppType>,
}

/// Captured application state, tagged by application type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ApplicationEntry {
    Ide(IdeEntry),
    Terminal(TerminalEntry),
    Browser(BrowserEntry),
    Document(DocumentEntry),
    Communication(CommunicationEntry),
    Generic(GenericEntry),
}

impl ApplicationEntry {
    pub fn app(&self) -> &AppInfo {
        match self {
            ApplicationEntry::Ide(e) => &e.app,
            ApplicationEntry::Terminal(e) => &e.app,
            ApplicationEntry::Browser(e) => &e.app,
            ApplicationEntry::Document(e) => &e.app,
            ApplicationEntry::Communication(e) => &e.app,
            ApplicationEntry::Generic(e) => &e.app,
        }
    }

    pub fn app_mut(&mut self) -> &mut AppInfo {
        match self {
            ApplicationEntry::Ide(e) => &mut e.app,
            ApplicationEntry::Terminal(e) => &mut e.app,
            ApplicationEntry::Browser(e) => &mut e.app,
            ApplicationEntry::Document(e) => &mut e.app,
            ApplicationEntry::Communication(e) => &mut e.app,
            ApplicationEntry::Generic(e) => &mut e.app,
        }
    }

    pub fn app_type(&self) -> AppType {
        match self {
            ApplicationEntry::Ide(_) => AppType::Ide,
            ApplicationEntry::Terminal(_) => AppType::Terminal,
            ApplicationEntry::Browser(_) => AppType::Browser,
            ApplicationEntry::Document(_) => AppType::Document,
            ApplicationEntry::Communication(_) => AppType::Communication,
            ApplicationEntry::Generic(_) => AppType::Generic,
        }
    }

    pub fn z_order(&self) -> usize {
        self.app().window.z_order
    }

    /// Generic stand-in for a window whose richer capture did not finish
    pub fn degraded(record: &WindowRecord, from: AppType) -> Self {
        ApplicationEntry::Generic(GenericEntry {
            app: AppInfo::from_record(record, None),
            degraded_from: Some(from),
        })
    }

    /// `process.exe "title"` for warnings and reports
    pub fn label(&self) -> String {
        let app = self.app();
        let title: String = app.title.chars().take(40).collect();
        format!("{} \"{}\"", app.process_name, title)
    }
}

/// Machine-level state beside the windows
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemState {
    /// Master volume, 0-100
    #[serde(default)]
    pub volume: Option<u8>,
    #[serde(default)]
    pub do_not_disturb: Option<bool>,
    /// File name of the clipboard cache inside the context directory
    #[serde(default)]
    pub clipboard_cache: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSummary {
    pub count: usize,
    #[serde(default)]
    pub names: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotWindows {
    pub system: SystemState,
    pub applications: Vec<ApplicationEntry>,
    pub browsers: Vec<ApplicationEntry>,
    pub environment_variables: EnvironmentSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotCounts {
    pub applications: usize,
    pub browsers: usize,
    pub tabs: usize,
    pub warnings: usize,
    #[serde(default)]
    pub by_type: BTreeMap<AppType, usize>,
    /// Hash over entries, ignoring timestamp and best-effort fields
    #[serde(default)]
    pub fingerprint: String,
}

/// Context snapshot (v1 schema)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    pub version: u32,
    pub context_name: String,
    /// ISO8601 UTC
    pub timestamp: String,
    pub windows: SnapshotWindows,
    #[serde(default)]
    pub environment_snapshot: Option<String>,
    #[serde(default)]
    pub warnings: Vec<Warning>,
    #[serde(default)]
    pub summary: SnapshotCounts,
}

impl ContextSnapshot {
    /// Split entries into applications and browsers, both kept in Z-order
    pub fn new(
        context_name: String,
        timestamp: String,
        mut entries: Vec<ApplicationEntry>,
        system: SystemState,
        environment_variables: EnvironmentSummary,
        environment_snapshot: Option<String>,
        warnings: Vec<Warning>,
    ) -> Self {
        entries.sort_by_key(ApplicationEntry::z_order);
        let fingerprint = fingerprint(&entries);

        let mut by_type = BTreeMap::new();
        for entry in &entries {
            *by_type.entry(entry.app_type()).or_insert(0) += 1;
        }

        let (browsers, applications): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .partition(|e| matches!(e, ApplicationEntry::Browser(_)));

        let tabs = browsers
            .iter()
            .map(|e| match e {
                ApplicationEntry::Browser(b) => b.tabs.len(),
                _ => 0,
            })
            .sum();

        let summary = SnapshotCounts {
            applications: applications.len(),
            browsers: browsers.len(),
            tabs,
            warnings: warnings.len(),
            by_type,
            fingerprint,
        };

        Self {
            version: SNAPSHOT_VERSION,
            context_name,
            timestamp,
            windows: SnapshotWindows {
                system,
                applications,
                browsers,
                environment_variables,
            },
            environment_snapshot,
            warnings,
            summary,
        }
    }

    /// All entries merged back into one front-to-back sequence
    pub fn entries_in_z_order(&self) -> Vec<&ApplicationEntry> {
        let mut all: Vec<&ApplicationEntry> = self
            .windows
            .applications
            .iter()
            .chain(self.windows.browsers.iter())
            .collect();
        all.sort_by_key(|e| e.z_order());
        all
    }

    pub fn entry_count(&self) -> usize {
        self.windows.applications.len() + self.windows.browsers.len()
    }

    pub fn to_summary(&self) -> ContextSummary {
        ContextSummary {
            name: self.context_name.clone(),
            timestamp: self.timestamp.clone(),
            applications: self.summary.applications,
            browsers: self.summary.browsers,
            tabs: self.summary.tabs,
            warnings: self.summary.warnings,
        }
    }
}

/// Lightweight listing record, stored beside each snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSummary {
    pub name: String,
    pub timestamp: String,
    pub applications: usize,
    pub browsers: usize,
    pub tabs: usize,
    pub warnings: usize,
}

/// SHA-256 over the serialized entries with favicons stripped, 16 hex chars
pub fn fingerprint(entries: &[ApplicationEntry]) -> String {
    let mut hasher = Sha256::new();
    for entry in entries {
        let mut stable = entry.clone();
        if let ApplicationEntry::Browser(b) = &mut stable {
            for tab in &mut b.tabs {
                tab.favicon = None;
            }
        }
        if let Ok(bytes) = serde_json::to_vec(&stable) {
            hasher.update(&bytes);
        }
        hasher.update(b"\n");
    }
    hex::encode(&hasher.finalize()[..8])
}

/// Normalize a user-supplied context name into a directory-safe key
///
/// Trims, replaces characters outside `[A-Za-z0-9 _.-]` with `_`, strips
/// leading dots, caps the length. An empty result is rejected.
pub fn sanitize_context_name(raw: &str) -> Result<String> {
    let replaced: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned: String = replaced
        .trim_start_matches('.')
        .chars()
        .take(MAX_CONTEXT_NAME)
        .collect();
    let cleaned = cleaned.trim().to_string();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        return Err(KeeperError::InvalidName(raw.to_string()));
    }
    Ok(cleaned)
}
