//! Office documents, notes apps and plain editors
//!
//! The file name comes from the window title; the full path only when the
//! process was started with it on the command line.

use std::path::Path;

use super::{
    file_name_of, launched, reuse_or_launch, strip_unsaved, title_segments, CaptureOptions,
    Handler, RestoreContext, RestoreResult, RestoreScope,
};
use crate::classify;
use crate::desktop::LaunchSpec;
use crate::error::Result;
use crate::inventory::title_has_unsaved_marker;
use crate::model::{AppInfo, AppType, ApplicationEntry, DocumentEntry, WindowRecord};
use crate::outcome::Outcome;
use crate::process::ProcessInfo;

pub struct DocumentHandler;

fn document_file_name(title: &str) -> Option<String> {
    let segments = title_segments(title);
    if segments.len() < 2 {
        return None;
    }
    let name = strip_unsaved(segments[0]);
    (!name.is_empty()).then(|| name.to_string())
}

fn path_from_cmdline(process: &ProcessInfo, file_name: &str) -> Option<String> {
    process
        .cmdline
        .iter()
        .skip(1)
        .map(|a| a.trim_matches('"'))
        .filter(|a| !a.starts_with('-') && !a.starts_with('/'))
        .find(|a| file_name_of(a).eq_ignore_ascii_case(file_name))
        .map(String::from)
}

impl Handler for DocumentHandler {
    fn app_type(&self) -> AppType {
        AppType::Document
    }

    fn capture(
        &self,
        record: &WindowRecord,
        process: &ProcessInfo,
        _options: &CaptureOptions,
    ) -> Result<Outcome<ApplicationEntry>> {
        let file_name = document_file_name(&record.title);
        let file_path = file_name
            .as_deref()
            .and_then(|name| path_from_cmdline(process, name));

        Ok(Outcome::new(
            ApplicationEntry::Document(DocumentEntry {
                app: AppInfo::from_record(record, process.exe.clone()),
                kind: classify::document_kind(&record.process_name, &record.title),
                file_name,
                file_path,
                unsaved: title_has_unsaved_marker(&record.title),
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
        let ApplicationEntry::Document(doc) = entry else {
            return false;
        };
        doc.app.process_name.eq_ignore_ascii_case(&window.process_name)
            && doc
                .file_name
                .as_deref()
                .map_or(true, |name| window.title.contains(name))
    }

    fn restore(&self, entry: &ApplicationEntry, ctx: &RestoreContext) -> Result<RestoreResult> {
        let ApplicationEntry::Document(doc) = entry else {
            return reuse_or_launch(ctx, entry, None);
        };
        let existing_file = doc
            .file_path
            .as_deref()
            .filter(|p| Path::new(p).is_file());

        let spec = match (&doc.app.executable, existing_file) {
            (Some(exe), Some(file)) => {
                Some(LaunchSpec::new(exe.clone(), doc.app.process_name.clone()).arg(file))
            }
            (Some(exe), None) => Some(LaunchSpec::new(exe.clone(), doc.app.process_name.clone())),
            (None, Some(file)) if ctx.existing.is_none() && ctx.scope != RestoreScope::LayoutOnly => {
                log::info!("Opening {} with its default application", file);
                ctx.desktop.open_target(file)?;
                return Ok(launched(ctx, None, &doc.app.process_name));
            }
            (None, _) => None,
        };
        reuse_or_launch(ctx, entry, spec)
    }
}
