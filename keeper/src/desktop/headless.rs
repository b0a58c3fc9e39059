//! Non-Windows backend: launching and clipboard work, window control does not

use super::{opener_spec, read_clipboard, spawn, write_clipboard, Desktop, LaunchSpec, RawWindow};
use crate::error::{KeeperError, Result};
use crate::model::{WindowHandle, WindowLayout};

#[derive(Debug, Default)]
pub struct HeadlessDesktop;

impl HeadlessDesktop {
    pub fn new() -> Self {
        Self
    }
}

fn unsupported(what: &str) -> KeeperError {
    KeeperError::Unavailable(format!("{} is only supported on Windows", what))
}

impl Desktop for HeadlessDesktop {
    fn windows(&self) -> Result<Vec<RawWindow>> {
        Err(unsupported("window enumeration"))
    }

    fn foreground_pid(&self) -> Option<u32> {
        None
    }

    fn apply_layout(&self, _handle: WindowHandle, _layout: &WindowLayout) -> Result<()> {
        Err(unsupported("window placement"))
    }

    fn bring_to_front(&self, _handle: WindowHandle) -> Result<()> {
        Err(unsupported("window activation"))
    }

    fn minimize(&self, _handle: WindowHandle) -> Result<()> {
        Err(unsupported("window minimize"))
    }

    fn close(&self, _handle: WindowHandle, _pid: u32, _force: bool) -> Result<bool> {
        Err(unsupported("window close"))
    }

    fn launch(&self, spec: &LaunchSpec) -> Result<u32> {
        spawn(spec)
    }

    fn open_target(&self, target: &str) -> Result<()> {
        spawn(&opener_spec(target)).map(|_| ())
    }

    fn volume(&self) -> Result<Option<u8>> {
        Ok(None)
    }

    fn set_volume(&self, _volume: u8) -> Result<()> {
        Err(unsupported("volume control"))
    }

    fn do_not_disturb(&self) -> Result<Option<bool>> {
        Ok(None)
    }

    fn clipboard_text(&self) -> Result<Option<String>> {
        read_clipboard()
    }

    fn set_clipboard_text(&self, text: &str) -> Result<()> {
        write_clipboard(text)
    }
}
