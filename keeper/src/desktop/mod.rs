//! Live desktop seam
//!
//! Everything that touches OS windows, launches programs, or reads
//! machine-level state (volume, clipboard) goes through [`Desktop`] so the
//! capture and restore paths run unchanged against the in-memory backend.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;

use crate::error::{KeeperError, Result};
use crate::model::{Rect, WindowHandle, WindowLayout, WindowState};

mod memory;
pub use memory::InMemoryDesktop;

#[cfg(windows)]
mod win32;
#[cfg(windows)]
pub use win32::Win32Desktop;

#[cfg(not(windows))]
mod headless;
#[cfg(not(windows))]
pub use headless::HeadlessDesktop;

/// A top-level window as the OS reports it, before inventory filtering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawWindow {
    pub handle: WindowHandle,
    pub pid: u32,
    pub process_name: String,
    pub title: String,
    pub rect: Rect,
    pub state: WindowState,
    pub virtual_desktop: Option<String>,
}

/// How to start an application during restore
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Process name the new window is expected to belong to
    pub process_name: String,
    /// Give console programs their own console window
    pub new_console: bool,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>, process_name: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            process_name: process_name.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn new_console(mut self) -> Self {
        self.new_console = true;
        self
    }

    /// Human-readable command line for logs
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Operations the capture and restore engine needs from the desktop
///
/// Window lists are front-to-back: index 0 is the topmost window.
pub trait Desktop: Send + Sync {
    /// Visible top-level windows, front-to-back
    fn windows(&self) -> Result<Vec<RawWindow>>;

    fn foreground_pid(&self) -> Option<u32>;

    /// Move/resize, set state, and move to the recorded virtual desktop
    fn apply_layout(&self, handle: WindowHandle, layout: &WindowLayout) -> Result<()>;

    fn bring_to_front(&self, handle: WindowHandle) -> Result<()>;

    fn minimize(&self, handle: WindowHandle) -> Result<()>;

    /// Ask the window to close; `force` terminates the owning process.
    /// Returns whether the window is gone afterwards.
    fn close(&self, handle: WindowHandle, pid: u32, force: bool) -> Result<bool>;

    /// Start a program, returning its pid
    fn launch(&self, spec: &LaunchSpec) -> Result<u32>;

    /// Hand a URL or file path to the shell's default opener
    fn open_target(&self, target: &str) -> Result<()>;

    /// Master volume 0-100, `None` when the backend cannot read it
    fn volume(&self) -> Result<Option<u8>>;

    fn set_volume(&self, volume: u8) -> Result<()>;

    fn do_not_disturb(&self) -> Result<Option<bool>>;

    fn clipboard_text(&self) -> Result<Option<String>>;

    fn set_clipboard_text(&self, text: &str) -> Result<()>;
}

/// Backend for the machine this process runs on
pub fn native() -> Arc<dyn Desktop> {
    #[cfg(windows)]
    {
        Arc::new(Win32Desktop::new())
    }
    #[cfg(not(windows))]
    {
        Arc::new(HeadlessDesktop::new())
    }
}

/// Spawn a detached child with null stdio
pub(crate) fn spawn(spec: &LaunchSpec) -> Result<u32> {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    if let Some(cwd) = &spec.cwd {
        if cwd.is_dir() {
            command.current_dir(cwd);
        } else {
            log::warn!(
                "Working directory {} no longer exists; launching {} without it",
                cwd.display(),
                spec.program
            );
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NEW_CONSOLE: u32 = 0x0000_0010;
        if spec.new_console {
            command.creation_flags(CREATE_NEW_CONSOLE);
        }
    }

    let child = command
        .spawn()
        .map_err(|e| KeeperError::from_io(&format!("launch {}", spec.program), e))?;
    log::debug!("Launched {} (pid {})", spec.display(), child.id());
    Ok(child.id())
}

/// Platform opener command for a URL or file
pub(crate) fn opener_spec(target: &str) -> LaunchSpec {
    if cfg!(windows) {
        LaunchSpec::new("cmd", "cmd.exe").args(["/C", "start", "", target])
    } else if cfg!(target_os = "macos") {
        LaunchSpec::new("open", "open").arg(target)
    } else {
        LaunchSpec::new("xdg-open", "xdg-open").arg(target)
    }
}

/// Clipboard access shared by the native backends
pub(crate) fn read_clipboard() -> Result<Option<String>> {
    let mut clipboard = arboard::Clipboard::new()
        .map_err(|e| KeeperError::Unavailable(format!("clipboard: {}", e)))?;
    match clipboard.get_text() {
        Ok(text) => Ok(Some(text)),
        Err(arboard::Error::ContentNotAvailable) => Ok(None),
        Err(e) => Err(KeeperError::Unavailable(format!("clipboard: {}", e))),
    }
}

pub(crate) fn write_clipboard(text: &str) -> Result<()> {
    let mut clipboard = arboard::Clipboard::new()
        .map_err(|e| KeeperError::Unavailable(format!("clipboard: {}", e)))?;
    clipboard
        .set_text(text.to_string())
        .map_err(|e| KeeperError::Unavailable(format!("clipboard: {}", e)))
}
