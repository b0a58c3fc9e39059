//! Application classification: process-name tables first, then title patterns
//!
//! Pure and deterministic: the same process name and title always yield the
//! same [`AppType`] and sub-kind.

use std::sync::OnceLock;

use regex::Regex;

use crate::model::{
    AppType, BrowserFamily, CommunicationKind, DocumentKind, IdeKind, TerminalKind, WindowRecord,
};

const IDE_PROCESSES: &[(&str, IdeKind)] = &[
    ("code.exe", IdeKind::VsCode),
    ("code", IdeKind::VsCode),
    ("code-insiders.exe", IdeKind::VsCodeInsiders),
    ("cursor.exe", IdeKind::Cursor),
    ("cursor", IdeKind::Cursor),
    ("pycharm.exe", IdeKind::JetBrains),
    ("pycharm64.exe", IdeKind::JetBrains),
    ("idea.exe", IdeKind::JetBrains),
    ("idea64.exe", IdeKind::JetBrains),
    ("webstorm.exe", IdeKind::JetBrains),
    ("webstorm64.exe", IdeKind::JetBrains),
    ("clion.exe", IdeKind::JetBrains),
    ("clion64.exe", IdeKind::JetBrains),
    ("rider.exe", IdeKind::JetBrains),
    ("rider64.exe", IdeKind::JetBrains),
    ("goland.exe", IdeKind::JetBrains),
    ("goland64.exe", IdeKind::JetBrains),
    ("datagrip.exe", IdeKind::JetBrains),
    ("datagrip64.exe", IdeKind::JetBrains),
    ("rustrover64.exe", IdeKind::JetBrains),
    ("sublime_text.exe", IdeKind::SublimeText),
    ("notepad++.exe", IdeKind::NotepadPlusPlus),
];

const TERMINAL_PROCESSES: &[(&str, TerminalKind)] = &[
    ("windowsterminal.exe", TerminalKind::WindowsTerminal),
    ("wt.exe", TerminalKind::WindowsTerminal),
    ("cmd.exe", TerminalKind::Cmd),
    ("powershell.exe", TerminalKind::PowerShell),
    ("pwsh.exe", TerminalKind::Pwsh),
    ("conemu.exe", TerminalKind::ConEmu),
    ("conemu64.exe", TerminalKind::ConEmu),
    ("termius.exe", TerminalKind::Termius),
    ("gnome-terminal-server", TerminalKind::Unix),
    ("konsole", TerminalKind::Unix),
    ("alacritty", TerminalKind::Unix),
    ("kitty", TerminalKind::Unix),
    ("wezterm-gui", TerminalKind::Unix),
    ("xterm", TerminalKind::Unix),
];

const BROWSER_PROCESSES: &[(&str, BrowserFamily)] = &[
    ("chrome.exe", BrowserFamily::Chrome),
    ("chrome", BrowserFamily::Chrome),
    ("msedge.exe", BrowserFamily::Edge),
    ("brave.exe", BrowserFamily::Brave),
    ("chromium.exe", BrowserFamily::Chromium),
    ("chromium", BrowserFamily::Chromium),
    ("opera.exe", BrowserFamily::Opera),
    ("vivaldi.exe", BrowserFamily::Vivaldi),
    ("firefox.exe", BrowserFamily::Firefox),
    ("firefox", BrowserFamily::Firefox),
];

const DOCUMENT_PROCESSES: &[(&str, DocumentKind)] = &[
    ("winword.exe", DocumentKind::Word),
    ("excel.exe", DocumentKind::Excel),
    ("powerpnt.exe", DocumentKind::PowerPoint),
    ("notepad.exe", DocumentKind::Notepad),
    ("obsidian.exe", DocumentKind::Obsidian),
    ("onenote.exe", DocumentKind::OneNote),
    ("notion.exe", DocumentKind::Notion),
    ("acrord32.exe", DocumentKind::Other),
    ("wordpad.exe", DocumentKind::Other),
];

const COMMUNICATION_PROCESSES: &[(&str, CommunicationKind)] = &[
    ("slack.exe", CommunicationKind::Slack),
    ("teams.exe", CommunicationKind::Teams),
    ("ms-teams.exe", CommunicationKind::Teams),
    ("discord.exe", CommunicationKind::Discord),
    ("zoom.exe", CommunicationKind::Zoom),
    ("telegram.exe", CommunicationKind::Telegram),
    ("whatsapp.exe", CommunicationKind::WhatsApp),
    ("outlook.exe", CommunicationKind::Outlook),
    ("olk.exe", CommunicationKind::Outlook),
];

fn lookup<T: Copy>(table: &[(&str, T)], process_name: &str) -> Option<T> {
    let lower = process_name.to_ascii_lowercase();
    table
        .iter()
        .find(|(name, _)| *name == lower)
        .map(|(_, kind)| *kind)
}

struct TitlePattern {
    regex: Regex,
    app_type: AppType,
}

fn title_patterns() -> &'static [TitlePattern] {
    static PATTERNS: OnceLock<Vec<TitlePattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"(?i)- (Visual Studio Code|Cursor|Sublime Text|Notepad\+\+)( - Insiders)?$", AppType::Ide),
            (r"(?i)- (IntelliJ IDEA|PyCharm|WebStorm|CLion|Rider|GoLand|DataGrip|RustRover)", AppType::Ide),
            (r"(?i)- (Google Chrome|Microsoft.? Edge|Mozilla Firefox|Brave|Chromium|Opera|Vivaldi)$", AppType::Browser),
            (r"(?i)^(Windows PowerShell|Command Prompt|Administrator: |PowerShell|Terminal$)", AppType::Terminal),
            (r"(?i)- (Word|Excel|PowerPoint|Notepad|Obsidian|OneNote|Notion)$", AppType::Document),
            (r"(?i)(\| Microsoft Teams$|- Slack$|- Discord$|^Zoom( Meeting| Workplace)?$)", AppType::Communication),
        ]
        .into_iter()
        .filter_map(|(pattern, app_type)| match Regex::new(pattern) {
            Ok(regex) => Some(TitlePattern { regex, app_type }),
            Err(e) => {
                log::error!("Invalid title pattern {:?}: {}", pattern, e);
                None
            }
        })
        .collect()
    })
}

/// Application type for a process name and window title
pub fn classify_parts(process_name: &str, title: &str) -> AppType {
    if lookup(IDE_PROCESSES, process_name).is_some() {
        return AppType::Ide;
    }
    if lookup(TERMINAL_PROCESSES, process_name).is_some() {
        return AppType::Terminal;
    }
    if lookup(BROWSER_PROCESSES, process_name).is_some() {
        return AppType::Browser;
    }
    if lookup(DOCUMENT_PROCESSES, process_name).is_some() {
        return AppType::Document;
    }
    if lookup(COMMUNICATION_PROCESSES, process_name).is_some() {
        return AppType::Communication;
    }

    title_patterns()
        .iter()
        .find(|p| p.regex.is_match(title))
        .map(|p| p.app_type)
        .unwrap_or(AppType::Generic)
}

pub fn classify(record: &WindowRecord) -> AppType {
    classify_parts(&record.process_name, &record.title)
}

pub fn ide_kind(process_name: &str, title: &str) -> IdeKind {
    lookup(IDE_PROCESSES, process_name).unwrap_or_else(|| {
        let t = title.to_ascii_lowercase();
        if t.ends_with("cursor") {
            IdeKind::Cursor
        } else if t.contains("insiders") {
            IdeKind::VsCodeInsiders
        } else if t.ends_with("sublime text") {
            IdeKind::SublimeText
        } else if t.ends_with("notepad++") {
            IdeKind::NotepadPlusPlus
        } else if t.ends_with("visual studio code") {
            IdeKind::VsCode
        } else {
            IdeKind::JetBrains
        }
    })
}

pub fn terminal_kind(process_name: &str, title: &str) -> TerminalKind {
    lookup(TERMINAL_PROCESSES, process_name).unwrap_or_else(|| {
        let t = title.to_ascii_lowercase();
        if t.contains("command prompt") {
            TerminalKind::Cmd
        } else if t.contains("powershell") {
            TerminalKind::PowerShell
        } else if cfg!(windows) {
            TerminalKind::WindowsTerminal
        } else {
            TerminalKind::Unix
        }
    })
}

pub fn browser_family(process_name: &str, title: &str) -> BrowserFamily {
    lookup(BROWSER_PROCESSES, process_name).unwrap_or_else(|| {
        let t = title.to_ascii_lowercase();
        if t.ends_with("mozilla firefox") {
            BrowserFamily::Firefox
        } else if t.contains("edge") {
            BrowserFamily::Edge
        } else if t.ends_with("brave") {
            BrowserFamily::Brave
        } else if t.ends_with("opera") {
            BrowserFamily::Opera
        } else if t.ends_with("vivaldi") {
            BrowserFamily::Vivaldi
        } else if t.ends_with("chromium") {
            BrowserFamily::Chromium
        } else {
            BrowserFamily::Chrome
        }
    })
}

pub fn document_kind(process_name: &str, title: &str) -> DocumentKind {
    lookup(DOCUMENT_PROCESSES, process_name).unwrap_or_else(|| {
        let t = title.to_ascii_lowercase();
        [
            ("- word", DocumentKind::Word),
            ("- excel", DocumentKind::Excel),
            ("- powerpoint", DocumentKind::PowerPoint),
            ("- notepad", DocumentKind::Notepad),
            ("- obsidian", DocumentKind::Obsidian),
            ("- onenote", DocumentKind::OneNote),
            ("- notion", DocumentKind::Notion),
        ]
        .into_iter()
        .find(|(suffix, _)| t.ends_with(suffix))
        .map(|(_, kind)| kind)
        .unwrap_or(DocumentKind::Other)
    })
}

pub fn communication_kind(process_name: &str, title: &str) -> CommunicationKind {
    lookup(COMMUNICATION_PROCESSES, process_name).unwrap_or_else(|| {
        let t = title.to_ascii_lowercase();
        if t.contains("teams") {
            CommunicationKind::Teams
        } else if t.ends_with("slack") {
            CommunicationKind::Slack
        } else if t.ends_with("discord") {
            CommunicationKind::Discord
        } else if t.starts_with("zoom") {
            CommunicationKind::Zoom
        } else {
            CommunicationKind::Other
        }
    })
}
