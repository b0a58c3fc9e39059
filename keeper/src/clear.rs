//! Bulk minimize or close of the current desktop

use serde::{Deserialize, Serialize};

use crate::desktop::Desktop;
use crate::error::Result;
use crate::model::WindowState;
use crate::whitelist::WhitelistMatcher;

/// Processes never closed, whatever the whitelist says
pub const SYSTEM_EXCLUSIONS: &[&str] = &[
    "explorer.exe",
    "dwm.exe",
    "taskmgr.exe",
    "systemsettings.exe",
    "shellexperiencehost.exe",
    "searchui.exe",
    "cortana.exe",
    "runtimebroker.exe",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearMode {
    Minimize,
    Close,
}

impl std::str::FromStr for ClearMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "minimize" => Ok(ClearMode::Minimize),
            "close" => Ok(ClearMode::Close),
            other => Err(format!("unknown clear mode '{}' (minimize|close)", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearCounts {
    /// Windows minimized or closed
    pub affected: usize,
    pub skipped_whitelisted: usize,
    /// System processes and this process
    pub excluded: usize,
    pub failed: usize,
}

/// Minimize or close every visible, non-minimized window not protected
///
/// `force` terminates processes whose windows ignore the close request.
pub fn clear_desktop(
    desktop: &dyn Desktop,
    whitelist: &WhitelistMatcher,
    mode: ClearMode,
    force: bool,
) -> Result<ClearCounts> {
    let own_pid = std::process::id();
    let mut counts = ClearCounts::default();

    for window in desktop.windows()? {
        if window.state == WindowState::Minimized {
            continue;
        }
        if mode == ClearMode::Close
            && (window.pid == own_pid
                || SYSTEM_EXCLUSIONS
                    .iter()
                    .any(|s| s.eq_ignore_ascii_case(&window.process_name)))
        {
            log::debug!("Excluded {}: {}", window.process_name, window.title);
            counts.excluded += 1;
            continue;
        }
        if whitelist.is_whitelisted(&window.process_name, &window.title) {
            log::info!(
                "Skipping whitelisted window: {} [{}]",
                window.title,
                window.process_name
            );
            counts.skipped_whitelisted += 1;
            continue;
        }

        let result = match mode {
            ClearMode::Minimize => desktop.minimize(window.handle).map(|()| true),
            ClearMode::Close => desktop.close(window.handle, window.pid, force),
        };
        match result {
            Ok(true) => counts.affected += 1,
            Ok(false) => {
                log::warn!("{} did not close: {}", window.process_name, window.title);
                counts.failed += 1;
            }
            Err(e) => {
                log::warn!("Failed to clear {}: {}", window.process_name, e);
                counts.failed += 1;
            }
        }
    }

    log::info!("Cleared desktop ({:?}): {:?}", mode, counts);
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desktop::InMemoryDesktop;
    use crate::model::Rect;
    use crate::whitelist::Whitelist;
    use tempfile::TempDir;

    fn setup() -> (TempDir, InMemoryDesktop, WhitelistMatcher) {
        let temp = TempDir::new().unwrap();
        let whitelist = Whitelist::new(temp.path().join("whitelist.json"));
        whitelist.add("Spotify.exe").unwrap();
        let matcher = whitelist.matcher().unwrap();

        let desktop = InMemoryDesktop::new();
        let rect = Rect::new(0, 0, 800, 600);
        desktop.push_window(1, "notepad.exe", "a.txt - Notepad", rect, WindowState::Normal);
        desktop.push_window(2, "Spotify.exe", "Spotify", rect, WindowState::Normal);
        desktop.push_window(3, "explorer.exe", "Downloads", rect, WindowState::Normal);
        desktop.push_window(4, "taskmgr.exe", "Task Manager", rect, WindowState::Normal);
        desktop.push_window(5, "Code.exe", "VS Code", rect, WindowState::Minimized);
        (temp, desktop, matcher)
    }

    #[test]
    fn test_minimize_respects_whitelist() {
        let (_temp, desktop, matcher) = setup();
        let counts = clear_desktop(&desktop, &matcher, ClearMode::Minimize, false).unwrap();
        // explorer.exe is whitelisted by default
        assert_eq!(counts.skipped_whitelisted, 2);
        assert_eq!(counts.excluded, 0);
        assert_eq!(counts.affected, 2);
        assert_eq!(desktop.windows().unwrap().len(), 5);
    }

    #[test]
    fn test_close_skips_system_processes() {
        let (_temp, desktop, matcher) = setup();
        let counts = clear_desktop(&desktop, &matcher, ClearMode::Close, false).unwrap();
        assert_eq!(counts.excluded, 2);
        assert_eq!(counts.skipped_whitelisted, 1);
        assert_eq!(counts.affected, 1);
        let left: Vec<String> = desktop
            .windows()
            .unwrap()
            .into_iter()
            .map(|w| w.process_name)
            .collect();
        assert!(!left.contains(&"notepad.exe".to_string()));
        assert!(left.contains(&"Code.exe".to_string()));
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!("Close".parse::<ClearMode>().unwrap(), ClearMode::Close);
        assert!("wipe".parse::<ClearMode>().is_err());
    }
}
