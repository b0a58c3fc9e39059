//! Code editors and IDEs: project folder plus the file shown in the title

use std::path::{Path, PathBuf};

use super::{
    file_name_of, reuse_or_launch, strip_unsaved, title_segments, CaptureOptions, Handler,
    RestoreContext, RestoreResult,
};
use crate::classify;
use crate::desktop::LaunchSpec;
use crate::error::Result;
use crate::inventory::title_has_unsaved_marker;
use crate::model::{AppInfo, AppType, ApplicationEntry, IdeEntry, IdeKind, WindowRecord};
use crate::outcome::Outcome;
use crate::process::ProcessInfo;

pub struct IdeHandler;

/// Decode `file:///c%3A/work/proj` into a local path
pub fn file_uri_to_path(uri: &str) -> Option<String> {
    let rest = uri.strip_prefix("file://")?;
    let decoded = percent_decode(rest);
    let bytes = decoded.as_bytes();
    // `/c:/...` is a Windows drive path
    if bytes.len() >= 3 && bytes[0] == b'/' && bytes[1].is_ascii_alphabetic() && bytes[2] == b':' {
        return Some(decoded[1..].replace('/', "\\"));
    }
    Some(decoded)
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hi = (bytes[i + 1] as char).to_digit(16);
            let lo = (bytes[i + 2] as char).to_digit(16);
            if let (Some(hi), Some(lo)) = (hi, lo) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn project_from_cmdline(process: &ProcessInfo) -> Option<String> {
    if let Some(uri) = process.flag_value("--folder-uri") {
        if let Some(path) = file_uri_to_path(&uri) {
            return Some(path);
        }
    }
    process
        .cmdline
        .iter()
        .skip(1)
        .map(|a| a.trim_matches('"'))
        .filter(|a| !a.starts_with('-'))
        .filter(|a| Path::new(a).is_dir())
        .last()
        .map(String::from)
}

/// (file, workspace) named by the title, app name removed
fn parse_title(kind: IdeKind, title: &str) -> (Option<String>, Option<String>) {
    if kind == IdeKind::JetBrains {
        // `project – file` with an en dash
        let mut parts = title.split(" – ").map(str::trim);
        let project = parts.next().filter(|s| !s.is_empty()).map(String::from);
        let file = parts.next().map(|f| strip_unsaved(f).to_string());
        return (file, project);
    }

    let mut segments = title_segments(title);
    if segments.len() >= 2 {
        segments.pop();
    }
    match (kind, segments.as_slice()) {
        (IdeKind::SublimeText, [first, ..]) | (IdeKind::NotepadPlusPlus, [first, ..]) => {
            let file = strip_unsaved(first);
            // Sublime appends ` (project)`
            let file = file.split(" (").next().unwrap_or(file).trim();
            (Some(file.to_string()), None)
        }
        (_, [file, workspace, ..]) => (
            Some(strip_unsaved(file).to_string()),
            Some(workspace.to_string()),
        ),
        (_, [workspace]) => (None, Some(strip_unsaved(workspace).to_string())),
        _ => (None, None),
    }
}

fn default_command(kind: IdeKind) -> Option<&'static str> {
    match kind {
        IdeKind::VsCode => Some("code"),
        IdeKind::VsCodeInsiders => Some("code-insiders"),
        IdeKind::Cursor => Some("cursor"),
        IdeKind::SublimeText => Some("subl"),
        IdeKind::NotepadPlusPlus => Some("notepad++"),
        IdeKind::JetBrains => None,
    }
}

/// Open files that still exist, absolute or relative to the project
fn reopenable_files(entry: &IdeEntry) -> Vec<String> {
    entry
        .open_files
        .iter()
        .filter_map(|f| {
            let path = Path::new(f);
            if path.is_absolute() && path.is_file() {
                return Some(f.clone());
            }
            let joined: PathBuf = Path::new(entry.project_path.as_deref()?).join(f);
            joined.is_file().then(|| joined.display().to_string())
        })
        .collect()
}

impl Handler for IdeHandler {
    fn app_type(&self) -> AppType {
        AppType::Ide
    }

    fn capture(
        &self,
        record: &WindowRecord,
        process: &ProcessInfo,
        _options: &CaptureOptions,
    ) -> Result<Outcome<ApplicationEntry>> {
        let kind = classify::ide_kind(&record.process_name, &record.title);
        let (file, _workspace) = parse_title(kind, &record.title);
        let project_path = project_from_cmdline(process);

        let open_files = file
            .filter(|f| !f.is_empty() && (f.contains('.') || f.contains(['\\', '/'])))
            .into_iter()
            .collect();

        Ok(Outcome::new(
            ApplicationEntry::Ide(IdeEntry {
                app: AppInfo::from_record(record, process.exe.clone()),
                kind,
                project_path,
                open_files,
                has_unsaved: title_has_unsaved_marker(&record.title),
            }),
            vec![],
        ))
    }

    fn matches(
        &self,
        entry: &ApplicationEntry,
        window: &WindowRecord,
        _process: Option<&ProcessInfo>,
    ) -> bool {
        let ApplicationEntry::Ide(ide) = entry else {
            return false;
        };
        if !ide.app.process_name.eq_ignore_ascii_case(&window.process_name) {
            return false;
        }
        match ide.project_path.as_deref() {
            Some(project) => {
                let (_, workspace) = parse_title(ide.kind, &window.title);
                let folder = file_name_of(project);
                workspace.map_or(false, |w| w.eq_ignore_ascii_case(folder))
                    || window.title.contains(folder)
            }
            None => true,
        }
    }

    fn restore(&self, entry: &ApplicationEntry, ctx: &RestoreContext) -> Result<RestoreResult> {
        let ApplicationEntry::Ide(ide) = entry else {
            return reuse_or_launch(ctx, entry, None);
        };
        let program = ide
            .app
            .executable
            .clone()
            .or_else(|| default_command(ide.kind).map(String::from));

        let spec = program.map(|program| {
            let mut spec = LaunchSpec::new(program, ide.app.process_name.clone());
            if let Some(project) = ide.project_path.as_deref() {
                if Path::new(project).is_dir() {
                    spec = spec.arg(project).cwd(project);
                } else {
                    log::warn!("Project {} no longer exists", project);
                }
            }
            spec.args(reopenable_files(ide))
        });
        reuse_or_launch(ctx, entry, spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::window;

    #[test]
    fn test_file_uri_to_path() {
        assert_eq!(
            file_uri_to_path("file:///c%3A/Users/me/my%20proj").as_deref(),
            Some("c:\\Users\\me\\my proj")
        );
        assert_eq!(
            file_uri_to_path("file:///home/me/proj").as_deref(),
            Some("/home/me/proj")
        );
        assert_eq!(file_uri_to_path("vscode-remote://x"), None);
    }

    #[test]
    fn test_parse_vscode_title() {
        let (file, workspace) =
            parse_title(IdeKind::VsCode, "● main.rs - keeper - Visual Studio Code");
        assert_eq!(file.as_deref(), Some("main.rs"));
        assert_eq!(workspace.as_deref(), Some("keeper"));

        let (file, workspace) = parse_title(IdeKind::VsCode, "keeper - Visual Studio Code");
        assert_eq!(file, None);
        assert_eq!(workspace.as_deref(), Some("keeper"));
    }

    #[test]
    fn test_parse_other_titles() {
        let (file, project) = parse_title(IdeKind::JetBrains, "backend – UserService.kt");
        assert_eq!(file.as_deref(), Some("UserService.kt"));
        assert_eq!(project.as_deref(), Some("backend"));

        let (file, _) = parse_title(
            IdeKind::NotepadPlusPlus,
            "*C:\\notes\\todo.txt - Notepad++",
        );
        assert_eq!(file.as_deref(), Some("C:\\notes\\todo.txt"));
    }

    #[test]
    fn test_capture_project_from_folder_uri() {
        let record = window(0, "Code.exe", "● lib.rs - proj - Visual Studio Code");
        let process = ProcessInfo {
            cmdline: vec![
                "Code.exe".into(),
                "--folder-uri".into(),
                "file:///c%3A/work/proj".into(),
            ],
            ..ProcessInfo::named(record.pid, "Code.exe")
        };
        let entry = IdeHandler
            .capture(&record, &process, &CaptureOptions::default())
            .unwrap()
            .value;
        let ApplicationEntry::Ide(ide) = entry else {
            panic!("expected an IDE entry");
        };
        assert_eq!(ide.kind, IdeKind::VsCode);
        assert_eq!(ide.project_path.as_deref(), Some("c:\\work\\proj"));
        assert_eq!(ide.open_files, vec!["lib.rs".to_string()]);
        assert!(ide.has_unsaved);
    }

    #[test]
    fn test_matches_by_workspace_folder() {
        let record = window(0, "Code.exe", "lib.rs - proj - Visual Studio Code");
        let process = ProcessInfo {
            cmdline: vec!["Code.exe".into(), "--folder-uri=file:///c%3A/work/proj".into()],
            ..ProcessInfo::named(record.pid, "Code.exe")
        };
        let entry = IdeHandler
            .capture(&record, &process, &CaptureOptions::default())
            .unwrap()
            .value;

        assert!(IdeHandler.matches(&entry, &record, None));
        let other = window(1, "Code.exe", "x.rs - other - Visual Studio Code");
        assert!(!IdeHandler.matches(&entry, &other, None));
    }
}
