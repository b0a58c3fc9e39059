//! Terminals: one tab per shell child, each with its working directory

use super::{reuse_or_launch, CaptureOptions, Handler, RestoreContext, RestoreResult};
use crate::classify;
use crate::desktop::LaunchSpec;
use crate::error::Result;
use crate::model::{
    AppInfo, AppType, ApplicationEntry, TerminalEntry, TerminalKind, TerminalTab, WindowRecord,
};
use crate::outcome::Outcome;
use crate::process::ProcessInfo;

const SHELLS: &[&str] = &[
    "cmd.exe",
    "powershell.exe",
    "pwsh.exe",
    "bash.exe",
    "wsl.exe",
    "nu.exe",
    "bash",
    "zsh",
    "fish",
    "sh",
    "nu",
    "pwsh",
];

pub struct TerminalHandler;

fn is_shell(name: &str) -> bool {
    SHELLS.iter().any(|s| s.eq_ignore_ascii_case(name))
}

fn tab_of(process: &ProcessInfo) -> TerminalTab {
    TerminalTab {
        shell: process.name.clone(),
        working_directory: process.cwd.clone(),
        title: None,
    }
}

/// Shell children become tabs; a bare shell window is its own single tab
pub fn tabs_for(process: &ProcessInfo) -> Vec<TerminalTab> {
    let tabs: Vec<TerminalTab> = process
        .children
        .iter()
        .filter(|c| is_shell(&c.name))
        .map(tab_of)
        .collect();
    if tabs.is_empty() && is_shell(&process.name) {
        return vec![tab_of(process)];
    }
    tabs
}

fn normalize_dir(dir: &str) -> String {
    dir.trim_end_matches(['\\', '/']).to_ascii_lowercase()
}

fn same_dir(a: &str, b: &str) -> bool {
    normalize_dir(a) == normalize_dir(b)
}

/// Single-quoted PowerShell literal
fn ps_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Launch command that reopens every recorded tab where the terminal supports it
pub fn launch_spec(entry: &TerminalEntry) -> Option<LaunchSpec> {
    let dirs: Vec<&str> = entry
        .tabs
        .iter()
        .filter_map(|t| t.working_directory.as_deref())
        .collect();
    let first = dirs.first().copied();
    let process_name = entry.app.process_name.clone();
    let exe = entry.app.executable.clone();

    let spec = match entry.kind {
        TerminalKind::WindowsTerminal => {
            let mut spec = LaunchSpec::new("wt.exe", "WindowsTerminal.exe");
            for (i, dir) in dirs.iter().enumerate() {
                if i > 0 {
                    spec = spec.args([";", "new-tab"]);
                }
                spec = spec.args(["-d", *dir]);
            }
            spec
        }
        TerminalKind::Cmd => {
            let mut spec = LaunchSpec::new("cmd.exe", process_name).arg("/K").new_console();
            if let Some(dir) = first {
                spec = spec.args(["cd", "/d", dir]);
            }
            spec
        }
        TerminalKind::PowerShell | TerminalKind::Pwsh => {
            let program = if entry.kind == TerminalKind::Pwsh {
                "pwsh.exe"
            } else {
                "powershell.exe"
            };
            let mut spec = LaunchSpec::new(program, process_name)
                .arg("-NoExit")
                .new_console();
            if let Some(dir) = first {
                spec = spec.args([
                    "-Command".to_string(),
                    format!("Set-Location -LiteralPath {}", ps_literal(dir)),
                ]);
            }
            spec
        }
        TerminalKind::ConEmu => {
            let mut spec =
                LaunchSpec::new(exe.unwrap_or_else(|| "ConEmu64.exe".to_string()), process_name);
            if let Some(dir) = first {
                spec = spec.args(["-Dir", dir]);
            }
            spec
        }
        TerminalKind::Termius => LaunchSpec::new(exe?, process_name),
        TerminalKind::Unix => LaunchSpec::new(exe.unwrap_or_else(|| process_name.clone()), process_name),
    };

    Some(match first {
        Some(dir) => spec.cwd(dir),
        None => spec,
    })
}

impl Handler for TerminalHandler {
    fn app_type(&self) -> AppType {
        AppType::Terminal
    }

    fn capture(
        &self,
        record: &WindowRecord,
        process: &ProcessInfo,
        _options: &CaptureOptions,
    ) -> Result<Outcome<ApplicationEntry>> {
        let mut tabs = tabs_for(process);
        if let Some(first) = tabs.first_mut() {
            first.title = Some(record.title.clone());
        }
        if tabs.is_empty() {
            log::debug!(
                "{}: no shell processes found under pid {}",
                record.process_name,
                record.pid
            );
        }

        Ok(Outcome::new(
            ApplicationEntry::Terminal(TerminalEntry {
                app: AppInfo::from_record(record, process.exe.clone()),
                kind: classify::terminal_kind(&record.process_name, &record.title),
                tabs,
            }),
            vec![],
        ))
    }

    /// Same terminal program, and some shell in it sits in the recorded directory
    fn matches(
        &self,
        entry: &ApplicationEntry,
        window: &WindowRecord,
        process: Option<&ProcessInfo>,
    ) -> bool {
        let ApplicationEntry::Terminal(term) = entry else {
            return false;
        };
        if !term.app.process_name.eq_ignore_ascii_case(&window.process_name) {
            return false;
        }
        let (Some(wanted), Some(process)) = (term.primary_cwd(), process) else {
            return true;
        };
        tabs_for(process)
            .iter()
            .filter_map(|t| t.working_directory.as_deref())
            .any(|dir| same_dir(dir, wanted))
    }

    fn restore(&self, entry: &ApplicationEntry, ctx: &RestoreContext) -> Result<RestoreResult> {
        let spec = match entry {
            ApplicationEntry::Terminal(term) => launch_spec(term),
            _ => None,
        };
        reuse_or_launch(ctx, entry, spec)
    }
}
