//! Process table snapshot: names, command lines, working directories, children
//!
//! Handlers need a process's command line (IDE project folders, browser
//! profile flags) and its shell children's working directories (terminal
//! tabs). One table is taken per capture pass and shared read-only.

use std::collections::HashMap;
use std::sync::Arc;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub parent: Option<u32>,
    pub name: String,
    pub exe: Option<String>,
    pub cwd: Option<String>,
    pub cmdline: Vec<String>,
    /// Direct children, in pid order
    pub children: Vec<ProcessInfo>,
}

impl ProcessInfo {
    pub fn named(pid: u32, name: &str) -> Self {
        Self {
            pid,
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Value of `--flag=value` or `--flag value` on the command line
    pub fn flag_value(&self, flag: &str) -> Option<String> {
        let prefix = format!("{}=", flag);
        let mut args = self.cmdline.iter().skip(1);
        while let Some(arg) = args.next() {
            if let Some(value) = arg.strip_prefix(&prefix) {
                return Some(value.trim_matches('"').to_string());
            }
            if arg == flag {
                return args.next().cloned();
            }
        }
        None
    }
}

/// Snapshot of the machine's processes, keyed by pid
#[derive(Debug, Clone, Default)]
pub struct ProcessTable {
    processes: HashMap<u32, ProcessInfo>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, info: ProcessInfo) {
        self.processes.insert(info.pid, info);
    }

    pub fn with(mut self, info: ProcessInfo) -> Self {
        self.insert(info);
        self
    }

    pub fn get(&self, pid: u32) -> Option<&ProcessInfo> {
        self.processes.get(&pid)
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    fn children_of(&self, pid: u32) -> Vec<ProcessInfo> {
        let mut children: Vec<ProcessInfo> = self
            .processes
            .values()
            .filter(|p| p.parent == Some(pid) && p.pid != pid)
            .cloned()
            .collect();
        children.sort_by_key(|p| p.pid);
        children
    }

    /// The process with its direct children filled in
    pub fn info_with_children(&self, pid: u32) -> Option<ProcessInfo> {
        let mut info = self.get(pid)?.clone();
        info.children = self.children_of(pid);
        Some(info)
    }

    /// Pids of every running process whose name matches, case-insensitively
    pub fn pids_named(&self, name: &str) -> Vec<u32> {
        let mut pids: Vec<u32> = self
            .processes
            .values()
            .filter(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| p.pid)
            .collect();
        pids.sort_unstable();
        pids
    }
}

/// Source of process tables, swapped for a fixed table in tests
pub trait ProcessSource: Send + Sync {
    fn snapshot(&self) -> ProcessTable;
}

impl ProcessSource for ProcessTable {
    fn snapshot(&self) -> ProcessTable {
        self.clone()
    }
}

/// Live processes via sysinfo
#[derive(Debug, Default)]
pub struct SystemProcesses;

impl SystemProcesses {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessSource for SystemProcesses {
    fn snapshot(&self) -> ProcessTable {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            ProcessRefreshKind::everything(),
        );

        let mut table = ProcessTable::new();
        for (pid, process) in system.processes() {
            table.insert(ProcessInfo {
                pid: pid.as_u32(),
                parent: process.parent().map(Pid::as_u32),
                name: process.name().to_string_lossy().into_owned(),
                exe: process.exe().map(|p| p.display().to_string()),
                cwd: process.cwd().map(|p| p.display().to_string()),
                cmdline: process
                    .cmd()
                    .iter()
                    .map(|a| a.to_string_lossy().into_owned())
                    .collect(),
                children: Vec::new(),
            });
        }
        log::debug!("Process table: {} processes", table.len());
        table
    }
}

pub fn native() -> Arc<dyn ProcessSource> {
    Arc::new(SystemProcesses::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(pid: u32, parent: u32, name: &str) -> ProcessInfo {
        ProcessInfo {
            pid,
            parent: Some(parent),
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_children_are_attached_in_pid_order() {
        let table = ProcessTable::new()
            .with(ProcessInfo::named(10, "WindowsTerminal.exe"))
            .with(child(30, 10, "cmd.exe"))
            .with(child(20, 10, "pwsh.exe"))
            .with(child(40, 99, "other.exe"));

        let info = table.info_with_children(10).unwrap();
        let names: Vec<&str> = info.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["pwsh.exe", "cmd.exe"]);
        assert!(table.info_with_children(999).is_none());
    }

    #[test]
    fn test_flag_value_forms() {
        let info = ProcessInfo {
            cmdline: vec![
                "chrome.exe".into(),
                "--profile-directory=Profile 1".into(),
                "--remote-debugging-port".into(),
                "9229".into(),
            ],
            ..ProcessInfo::named(1, "chrome.exe")
        };
        assert_eq!(
            info.flag_value("--profile-directory").as_deref(),
            Some("Profile 1")
        );
        assert_eq!(
            info.flag_value("--remote-debugging-port").as_deref(),
            Some("9229")
        );
        assert_eq!(info.flag_value("--user-data-dir"), None);
    }

    #[test]
    fn test_pids_named_is_case_insensitive() {
        let table = ProcessTable::new()
            .with(ProcessInfo::named(2, "Code.exe"))
            .with(ProcessInfo::named(1, "code.exe"));
        assert_eq!(table.pids_named("CODE.EXE"), vec![1, 2]);
    }
}
