//! Win32 backend: window enumeration and placement, virtual desktops, volume
//!
//! EnumWindows visits top-level windows in Z-order, so the enumeration order
//! is used directly as the front-to-back order.

use std::ffi::c_void;
use std::path::Path;

use windows::core::{GUID, PWSTR};
use windows::Win32::Foundation::{
    CloseHandle, BOOL, E_ACCESSDENIED, HANDLE, HWND, LPARAM, RECT, TRUE, WPARAM,
};
use windows::Win32::Graphics::Dwm::{DwmGetWindowAttribute, DWMWA_CLOAKED};
use windows::Win32::Media::Audio::Endpoints::IAudioEndpointVolume;
use windows::Win32::Media::Audio::{
    eConsole, eRender, IMMDeviceEnumerator, MMDeviceEnumerator,
};
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoUninitialize, CLSCTX_ALL, COINIT_MULTITHREADED,
};
use windows::Win32::System::Threading::{
    OpenProcess, QueryFullProcessImageNameW, TerminateProcess, PROCESS_NAME_WIN32,
    PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_TERMINATE,
};
use windows::Win32::UI::Shell::{IVirtualDesktopManager, VirtualDesktopManager};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetForegroundWindow, GetWindowLongW, GetWindowPlacement, GetWindowTextW,
    GetWindowThreadProcessId, IsIconic, IsWindow, IsWindowVisible, IsZoomed, PostMessageW,
    SetForegroundWindow, SetWindowPos, ShowWindow, GWL_EXSTYLE, HWND_TOP, SWP_NOACTIVATE,
    SWP_NOMOVE, SWP_NOSIZE, SWP_NOZORDER, SW_MAXIMIZE, SW_MINIMIZE, SW_RESTORE,
    WINDOWPLACEMENT, WM_CLOSE, WS_EX_TOOLWINDOW,
};

use super::{opener_spec, read_clipboard, spawn, write_clipboard, Desktop, LaunchSpec, RawWindow};
use crate::error::{KeeperError, Result};
use crate::model::{Rect, WindowHandle, WindowLayout, WindowState};

/// Polls for WM_CLOSE to take effect
const CLOSE_POLLS: u32 = 10;
const CLOSE_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(50);

#[derive(Debug, Default)]
pub struct Win32Desktop;

impl Win32Desktop {
    pub fn new() -> Self {
        Self
    }
}

fn hwnd(handle: WindowHandle) -> HWND {
    HWND(handle.0 as usize as *mut c_void)
}

fn handle_of(hwnd: HWND) -> WindowHandle {
    WindowHandle(hwnd.0 as usize as u64)
}

fn map_err(what: &str, err: windows::core::Error) -> KeeperError {
    if err.code() == E_ACCESSDENIED {
        KeeperError::AccessDenied(format!("{}: {}", what, err.message()))
    } else {
        KeeperError::Unavailable(format!("{}: {}", what, err.message()))
    }
}

/// COM initialised for the current thread until dropped
struct ComGuard {
    initialized: bool,
}

impl ComGuard {
    fn new() -> Self {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        Self {
            initialized: hr.is_ok(),
        }
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        if self.initialized {
            unsafe { CoUninitialize() };
        }
    }
}

unsafe extern "system" fn collect_window(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let list = &mut *(lparam.0 as *mut Vec<HWND>);
    list.push(hwnd);
    TRUE
}

unsafe fn window_title(hwnd: HWND) -> String {
    let mut buf = [0u16; 512];
    let len = GetWindowTextW(hwnd, &mut buf);
    String::from_utf16_lossy(&buf[..len.max(0) as usize])
}

unsafe fn is_cloaked(hwnd: HWND) -> bool {
    let mut cloaked: u32 = 0;
    DwmGetWindowAttribute(
        hwnd,
        DWMWA_CLOAKED,
        &mut cloaked as *mut u32 as *mut c_void,
        std::mem::size_of::<u32>() as u32,
    )
    .is_ok()
        && cloaked != 0
}

unsafe fn is_tool_window(hwnd: HWND) -> bool {
    let ex_style = GetWindowLongW(hwnd, GWL_EXSTYLE) as u32;
    ex_style & WS_EX_TOOLWINDOW.0 != 0
}

unsafe fn process_image(pid: u32) -> Option<String> {
    let handle: HANDLE = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid).ok()?;
    let mut buf = [0u16; 1024];
    let mut size = buf.len() as u32;
    let result = QueryFullProcessImageNameW(
        handle,
        PROCESS_NAME_WIN32,
        PWSTR(buf.as_mut_ptr()),
        &mut size,
    );
    let _ = CloseHandle(handle);
    result.ok()?;
    Some(String::from_utf16_lossy(&buf[..size as usize]))
}

fn image_file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

unsafe fn window_state_and_rect(hwnd: HWND) -> (WindowState, Rect) {
    let mut placement = WINDOWPLACEMENT {
        length: std::mem::size_of::<WINDOWPLACEMENT>() as u32,
        ..Default::default()
    };
    let rect = if GetWindowPlacement(hwnd, &mut placement).is_ok() {
        rect_from(placement.rcNormalPosition)
    } else {
        Rect::default()
    };

    let state = if IsIconic(hwnd).as_bool() {
        WindowState::Minimized
    } else if IsZoomed(hwnd).as_bool() {
        WindowState::Maximized
    } else {
        WindowState::Normal
    };
    (state, rect)
}

fn rect_from(r: RECT) -> Rect {
    Rect::new(r.left, r.top, r.right - r.left, r.bottom - r.top)
}

fn guid_string(guid: GUID) -> String {
    format!("{:032x}", guid.to_u128())
}

fn parse_guid(s: &str) -> Option<GUID> {
    u128::from_str_radix(s, 16).ok().map(GUID::from_u128)
}

fn desktop_manager() -> Option<IVirtualDesktopManager> {
    unsafe { CoCreateInstance(&VirtualDesktopManager, None, CLSCTX_ALL).ok() }
}

fn endpoint_volume() -> Result<IAudioEndpointVolume> {
    unsafe {
        let enumerator: IMMDeviceEnumerator =
            CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                .map_err(|e| map_err("audio device enumerator", e))?;
        let device = enumerator
            .GetDefaultAudioEndpoint(eRender, eConsole)
            .map_err(|e| map_err("default audio endpoint", e))?;
        device
            .Activate::<IAudioEndpointVolume>(CLSCTX_ALL, None)
            .map_err(|e| map_err("endpoint volume", e))
    }
}

impl Desktop for Win32Desktop {
    fn windows(&self) -> Result<Vec<RawWindow>> {
        let _com = ComGuard::new();
        let mut handles: Vec<HWND> = Vec::new();
        unsafe {
            EnumWindows(
                Some(collect_window),
                LPARAM(&mut handles as *mut Vec<HWND> as isize),
            )
            .map_err(|e| map_err("EnumWindows", e))?;
        }

        let manager = desktop_manager();
        let mut windows = Vec::new();
        for h in handles {
            unsafe {
                if !IsWindowVisible(h).as_bool() || is_cloaked(h) || is_tool_window(h) {
                    continue;
                }
                let mut pid = 0u32;
                GetWindowThreadProcessId(h, Some(&mut pid));
                let process_name = process_image(pid)
                    .map(|p| image_file_name(&p))
                    .unwrap_or_default();
                let (state, rect) = window_state_and_rect(h);
                let virtual_desktop = manager
                    .as_ref()
                    .and_then(|m| m.GetWindowDesktopId(h).ok())
                    .map(guid_string);

                windows.push(RawWindow {
                    handle: handle_of(h),
                    pid,
                    process_name,
                    title: window_title(h),
                    rect,
                    state,
                    virtual_desktop,
                });
            }
        }
        Ok(windows)
    }

    fn foreground_pid(&self) -> Option<u32> {
        unsafe {
            let h = GetForegroundWindow();
            if h.0.is_null() {
                return None;
            }
            let mut pid = 0u32;
            GetWindowThreadProcessId(h, Some(&mut pid));
            Some(pid)
        }
    }

    fn apply_layout(&self, handle: WindowHandle, layout: &WindowLayout) -> Result<()> {
        let h = hwnd(handle);
        unsafe {
            if !IsWindow(h).as_bool() {
                return Err(KeeperError::NotFound(format!("window {:#x}", handle.0)));
            }
            // Placement only sticks on a restored window
            let _ = ShowWindow(h, SW_RESTORE);
            SetWindowPos(
                h,
                HWND::default(),
                layout.x,
                layout.y,
                layout.width,
                layout.height,
                SWP_NOZORDER | SWP_NOACTIVATE,
            )
            .map_err(|e| map_err("SetWindowPos", e))?;

            match layout.state {
                WindowState::Maximized => {
                    let _ = ShowWindow(h, SW_MAXIMIZE);
                }
                WindowState::Minimized => {
                    let _ = ShowWindow(h, SW_MINIMIZE);
                }
                WindowState::Normal => {}
            }
        }

        if let Some(target) = layout.virtual_desktop.as_deref().and_then(parse_guid) {
            let _com = ComGuard::new();
            if let Some(manager) = desktop_manager() {
                unsafe {
                    if let Err(e) = manager.MoveWindowToDesktop(h, &target) {
                        log::debug!("MoveWindowToDesktop failed for {:#x}: {}", handle.0, e);
                    }
                }
            }
        }
        Ok(())
    }

    fn bring_to_front(&self, handle: WindowHandle) -> Result<()> {
        let h = hwnd(handle);
        unsafe {
            SetWindowPos(h, HWND_TOP, 0, 0, 0, 0, SWP_NOMOVE | SWP_NOSIZE)
                .map_err(|e| map_err("SetWindowPos(HWND_TOP)", e))?;
            let _ = SetForegroundWindow(h);
        }
        Ok(())
    }

    fn minimize(&self, handle: WindowHandle) -> Result<()> {
        unsafe {
            let _ = ShowWindow(hwnd(handle), SW_MINIMIZE);
        }
        Ok(())
    }

    fn close(&self, handle: WindowHandle, pid: u32, force: bool) -> Result<bool> {
        let h = hwnd(handle);
        unsafe {
            PostMessageW(h, WM_CLOSE, WPARAM(0), LPARAM(0))
                .map_err(|e| map_err("PostMessage(WM_CLOSE)", e))?;
        }
        for _ in 0..CLOSE_POLLS {
            std::thread::sleep(CLOSE_POLL_INTERVAL);
            if unsafe { !IsWindow(h).as_bool() } {
                return Ok(true);
            }
        }
        if !force {
            return Ok(false);
        }
        unsafe {
            let process = OpenProcess(PROCESS_TERMINATE, false, pid)
                .map_err(|e| map_err("OpenProcess", e))?;
            let result = TerminateProcess(process, 1);
            let _ = CloseHandle(process);
            result.map_err(|e| map_err("TerminateProcess", e))?;
        }
        Ok(true)
    }

    fn launch(&self, spec: &LaunchSpec) -> Result<u32> {
        spawn(spec)
    }

    fn open_target(&self, target: &str) -> Result<()> {
        spawn(&opener_spec(target)).map(|_| ())
    }

    fn volume(&self) -> Result<Option<u8>> {
        let _com = ComGuard::new();
        let endpoint = endpoint_volume()?;
        let level = unsafe {
            endpoint
                .GetMasterVolumeLevelScalar()
                .map_err(|e| map_err("GetMasterVolumeLevelScalar", e))?
        };
        Ok(Some((level * 100.0).round().clamp(0.0, 100.0) as u8))
    }

    fn set_volume(&self, volume: u8) -> Result<()> {
        let _com = ComGuard::new();
        let endpoint = endpoint_volume()?;
        let level = f32::from(volume.min(100)) / 100.0;
        unsafe {
            endpoint
                .SetMasterVolumeLevelScalar(level, std::ptr::null())
                .map_err(|e| map_err("SetMasterVolumeLevelScalar", e))
        }
    }

    fn do_not_disturb(&self) -> Result<Option<bool>> {
        // Focus assist state has no public API
        Ok(None)
    }

    fn clipboard_text(&self) -> Result<Option<String>> {
        read_clipboard()
    }

    fn set_clipboard_text(&self, text: &str) -> Result<()> {
        write_clipboard(text)
    }
}
