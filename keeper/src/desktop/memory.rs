//! In-memory desktop used by tests and dry runs
//!
//! Windows are kept front-to-back. Launches create a window owned by a fresh
//! pid so restore paths can find what they started.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{Desktop, LaunchSpec, RawWindow};
use crate::error::{KeeperError, Result};
use crate::model::{Rect, WindowHandle, WindowLayout, WindowState};

#[derive(Debug, Default)]
struct MemoryState {
    windows: Vec<RawWindow>,
    next_handle: u64,
    next_pid: u32,
    launches: Vec<LaunchSpec>,
    opened: Vec<String>,
    placements: Vec<(WindowHandle, WindowLayout)>,
    /// Remaining placement failures per handle
    unplaceable: HashMap<WindowHandle, u32>,
    /// Placement failures given to every newly launched window
    launch_unplaceable_attempts: u32,
    launch_creates_window: bool,
    foreground: Option<u32>,
    volume: Option<u8>,
    clipboard: Option<String>,
}

#[derive(Debug)]
pub struct InMemoryDesktop {
    state: Mutex<MemoryState>,
}

impl Default for InMemoryDesktop {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDesktop {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                next_handle: 0x1000,
                next_pid: 40_000,
                launch_creates_window: true,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a window behind every existing one
    pub fn push_window(
        &self,
        pid: u32,
        process_name: &str,
        title: &str,
        rect: Rect,
        state: WindowState,
    ) -> WindowHandle {
        let mut s = self.lock();
        s.next_handle += 1;
        let handle = WindowHandle(s.next_handle);
        s.windows.push(RawWindow {
            handle,
            pid,
            process_name: process_name.to_string(),
            title: title.to_string(),
            rect,
            state,
            virtual_desktop: None,
        });
        handle
    }

    pub fn window(&self, handle: WindowHandle) -> Option<RawWindow> {
        self.lock().windows.iter().find(|w| w.handle == handle).cloned()
    }

    /// Current front-to-back order
    pub fn stacking(&self) -> Vec<WindowHandle> {
        self.lock().windows.iter().map(|w| w.handle).collect()
    }

    pub fn set_title(&self, handle: WindowHandle, title: &str) {
        if let Some(w) = self.lock().windows.iter_mut().find(|w| w.handle == handle) {
            w.title = title.to_string();
        }
    }

    pub fn set_virtual_desktop(&self, handle: WindowHandle, desktop: &str) {
        if let Some(w) = self.lock().windows.iter_mut().find(|w| w.handle == handle) {
            w.virtual_desktop = Some(desktop.to_string());
        }
    }

    pub fn remove_window(&self, handle: WindowHandle) {
        self.lock().windows.retain(|w| w.handle != handle);
    }

    pub fn clear_windows(&self) {
        self.lock().windows.clear();
    }

    pub fn set_foreground(&self, pid: Option<u32>) {
        self.lock().foreground = pid;
    }

    pub fn set_volume_level(&self, volume: Option<u8>) {
        self.lock().volume = volume;
    }

    /// Every launched window rejects this many placement attempts first
    pub fn set_launch_unplaceable_attempts(&self, attempts: u32) {
        self.lock().launch_unplaceable_attempts = attempts;
    }

    pub fn set_unplaceable(&self, handle: WindowHandle, attempts: u32) {
        self.lock().unplaceable.insert(handle, attempts);
    }

    /// When false, launches start a process but no window appears
    pub fn set_launch_creates_window(&self, creates: bool) {
        self.lock().launch_creates_window = creates;
    }

    pub fn launches(&self) -> Vec<LaunchSpec> {
        self.lock().launches.clone()
    }

    pub fn opened_targets(&self) -> Vec<String> {
        self.lock().opened.clone()
    }

    pub fn placements(&self) -> Vec<(WindowHandle, WindowLayout)> {
        self.lock().placements.clone()
    }
}

impl Desktop for InMemoryDesktop {
    fn windows(&self) -> Result<Vec<RawWindow>> {
        Ok(self.lock().windows.clone())
    }

    fn foreground_pid(&self) -> Option<u32> {
        let s = self.lock();
        s.foreground.or_else(|| s.windows.first().map(|w| w.pid))
    }

    fn apply_layout(&self, handle: WindowHandle, layout: &WindowLayout) -> Result<()> {
        let mut s = self.lock();
        if let Some(remaining) = s.unplaceable.get_mut(&handle) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(KeeperError::Unavailable(format!(
                    "window {:#x} not ready for placement",
                    handle.0
                )));
            }
        }
        let window = s
            .windows
            .iter_mut()
            .find(|w| w.handle == handle)
            .ok_or_else(|| KeeperError::NotFound(format!("window {:#x}", handle.0)))?;
        window.rect = layout.rect();
        window.state = layout.state;
        if layout.virtual_desktop.is_some() {
            window.virtual_desktop = layout.virtual_desktop.clone();
        }
        s.placements.push((handle, layout.clone()));
        Ok(())
    }

    fn bring_to_front(&self, handle: WindowHandle) -> Result<()> {
        let mut s = self.lock();
        let index = s
            .windows
            .iter()
            .position(|w| w.handle == handle)
            .ok_or_else(|| KeeperError::NotFound(format!("window {:#x}", handle.0)))?;
        let window = s.windows.remove(index);
        s.windows.insert(0, window);
        Ok(())
    }

    fn minimize(&self, handle: WindowHandle) -> Result<()> {
        let mut s = self.lock();
        let window = s
            .windows
            .iter_mut()
            .find(|w| w.handle == handle)
            .ok_or_else(|| KeeperError::NotFound(format!("window {:#x}", handle.0)))?;
        window.state = WindowState::Minimized;
        Ok(())
    }

    fn close(&self, handle: WindowHandle, _pid: u32, _force: bool) -> Result<bool> {
        let mut s = self.lock();
        let before = s.windows.len();
        s.windows.retain(|w| w.handle != handle);
        Ok(s.windows.len() < before)
    }

    fn launch(&self, spec: &LaunchSpec) -> Result<u32> {
        let mut s = self.lock();
        s.launches.push(spec.clone());
        s.next_pid += 1;
        let pid = s.next_pid;

        if s.launch_creates_window {
            s.next_handle += 1;
            let handle = WindowHandle(s.next_handle);
            let title = spec
                .cwd
                .as_ref()
                .map(|c| c.display().to_string())
                .unwrap_or_else(|| spec.process_name.clone());
            s.windows.insert(
                0,
                RawWindow {
                    handle,
                    pid,
                    process_name: spec.process_name.clone(),
                    title,
                    rect: Rect::new(100, 100, 1024, 768),
                    state: WindowState::Normal,
                    virtual_desktop: None,
                },
            );
            let attempts = s.launch_unplaceable_attempts;
            if attempts > 0 {
                s.unplaceable.insert(handle, attempts);
            }
        }
        Ok(pid)
    }

    fn open_target(&self, target: &str) -> Result<()> {
        self.lock().opened.push(target.to_string());
        Ok(())
    }

    fn volume(&self) -> Result<Option<u8>> {
        Ok(self.lock().volume)
    }

    fn set_volume(&self, volume: u8) -> Result<()> {
        self.lock().volume = Some(volume.min(100));
        Ok(())
    }

    fn do_not_disturb(&self) -> Result<Option<bool>> {
        Ok(None)
    }

    fn clipboard_text(&self) -> Result<Option<String>> {
        Ok(self.lock().clipboard.clone())
    }

    fn set_clipboard_text(&self, text: &str) -> Result<()> {
        self.lock().clipboard = Some(text.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bring_to_front_reorders() {
        let desktop = InMemoryDesktop::new();
        let a = desktop.push_window(1, "a.exe", "A", Rect::new(0, 0, 10, 10), WindowState::Normal);
        let b = desktop.push_window(2, "b.exe", "B", Rect::new(0, 0, 10, 10), WindowState::Normal);
        assert_eq!(desktop.stacking(), vec![a, b]);

        desktop.bring_to_front(b).unwrap();
        assert_eq!(desktop.stacking(), vec![b, a]);
    }

    #[test]
    fn test_launch_creates_topmost_window() {
        let desktop = InMemoryDesktop::new();
        let pid = desktop
            .launch(&LaunchSpec::new("notepad", "notepad.exe"))
            .unwrap();
        let windows = desktop.windows().unwrap();
        assert_eq!(windows[0].pid, pid);
        assert_eq!(windows[0].process_name, "notepad.exe");
        assert_eq!(desktop.launches().len(), 1);
    }

    #[test]
    fn test_unplaceable_window_fails_then_succeeds() {
        let desktop = InMemoryDesktop::new();
        let h = desktop.push_window(1, "a.exe", "A", Rect::new(0, 0, 10, 10), WindowState::Normal);
        desktop.set_unplaceable(h, 2);

        let layout = WindowLayout {
            x: 5,
            y: 6,
            width: 70,
            height: 80,
            state: WindowState::Maximized,
            z_order: 0,
            virtual_desktop: None,
        };
        assert!(desktop.apply_layout(h, &layout).is_err());
        assert!(desktop.apply_layout(h, &layout).is_err());
        desktop.apply_layout(h, &layout).unwrap();

        let w = desktop.window(h).unwrap();
        assert_eq!(w.rect, Rect::new(5, 6, 70, 80));
        assert_eq!(w.state, WindowState::Maximized);
    }
}
