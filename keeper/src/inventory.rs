//! Window inventory: visible top-level windows as front-to-back records

use std::collections::HashSet;

use crate::desktop::{Desktop, RawWindow};
use crate::error::Result;
use crate::model::WindowRecord;

/// Markers editors put in titles while a buffer has unsaved edits
const UNSAVED_MARKERS: &[char] = &['●', '*'];

/// Enumerate the desktop and number the kept windows 0..n, front-to-back
///
/// Windows with an empty title or zero area are dropped unless they are the
/// only window of the foreground process. Duplicate handles keep their first
/// (frontmost) occurrence.
pub fn enumerate(desktop: &dyn Desktop) -> Result<Vec<WindowRecord>> {
    let raw = desktop.windows()?;
    let foreground = desktop.foreground_pid();
    Ok(build_records(raw, foreground))
}

fn is_presentable(w: &RawWindow) -> bool {
    !w.title.trim().is_empty() && w.rect.area() > 0
}

fn build_records(raw: Vec<RawWindow>, foreground: Option<u32>) -> Vec<WindowRecord> {
    let foreground_sole = foreground.filter(|pid| {
        raw.iter().filter(|w| w.pid == *pid).count() == 1
    });

    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(raw.len());
    for window in raw {
        if !seen.insert(window.handle) {
            continue;
        }
        if !is_presentable(&window) && foreground_sole != Some(window.pid) {
            continue;
        }
        let z_order = records.len();
        records.push(WindowRecord {
            handle: window.handle,
            pid: window.pid,
            process_name: window.process_name,
            title: window.title,
            rect: window.rect,
            state: window.state,
            z_order,
            virtual_desktop: window.virtual_desktop,
        });
    }
    log::debug!("Inventory: {} windows", records.len());
    records
}

/// A window whose title says it holds unsaved edits
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsavedDocument {
    pub process_name: String,
    pub title: String,
}

pub fn title_has_unsaved_marker(title: &str) -> bool {
    let t = title.trim();
    t.starts_with(UNSAVED_MARKERS) || t.contains('●') || t.contains("* -")
}

pub fn detect_unsaved(records: &[WindowRecord]) -> Vec<UnsavedDocument> {
    records
        .iter()
        .filter(|r| title_has_unsaved_marker(&r.title))
        .map(|r| UnsavedDocument {
            process_name: r.process_name.clone(),
            title: r.title.clone(),
        })
        .collect()
}
