//! Machine-level state kept beside the windows: volume, do-not-disturb, clipboard

use crate::desktop::Desktop;
use crate::model::SystemState;
use crate::outcome::Warning;
use crate::store::ContextStore;

const VOLUME: &str = "system.volume";
const DND: &str = "system.do_not_disturb";
const CLIPBOARD: &str = "system.clipboard";

/// Read system state; each unreadable part becomes a warning
pub fn capture(desktop: &dyn Desktop, store: &ContextStore, name: &str) -> (SystemState, Vec<Warning>) {
    let mut warnings = Vec::new();
    let mut state = SystemState::default();

    match desktop.volume() {
        Ok(volume) => state.volume = volume,
        Err(e) => warnings.push(Warning::from_error(VOLUME, &e)),
    }
    match desktop.do_not_disturb() {
        Ok(dnd) => state.do_not_disturb = dnd,
        Err(e) => warnings.push(Warning::from_error(DND, &e)),
    }

    match desktop.clipboard_text() {
        Ok(Some(text)) if !text.is_empty() => match store.write_clipboard(name, &text) {
            Ok(file) => state.clipboard_cache = Some(file),
            Err(e) => warnings.push(Warning::from_error(CLIPBOARD, &e)),
        },
        Ok(_) => {}
        Err(e) => warnings.push(Warning::from_error(CLIPBOARD, &e)),
    }

    for w in &warnings {
        log::warn!("{}: {}", name, w);
    }
    (state, warnings)
}

/// Reapply volume and the cached clipboard; do-not-disturb is informational
pub fn restore(
    desktop: &dyn Desktop,
    store: &ContextStore,
    name: &str,
    state: &SystemState,
) -> Vec<Warning> {
    let mut warnings = Vec::new();

    if let Some(volume) = state.volume {
        if let Err(e) = desktop.set_volume(volume) {
            warnings.push(Warning::from_error(VOLUME, &e));
        }
    }

    if let Some(file) = state.clipboard_cache.as_deref() {
        let applied = store
            .read_clipboard(name, file)
            .and_then(|text| match text {
                Some(text) => desktop.set_clipboard_text(&text),
                None => {
                    log::debug!("{}: clipboard cache {} is gone", name, file);
                    Ok(())
                }
            });
        if let Err(e) = applied {
            warnings.push(Warning::from_error(CLIPBOARD, &e));
        }
    }

    for w in &warnings {
        log::warn!("{}: {}", name, w);
    }
    warnings
}
