//! Most-recently kept context names, newest first, in `<root>/index.json`

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{KeeperError, Result};
use crate::store::{ensure_dir, write_atomic};

pub const MAX_RECENT: usize = 10;

#[derive(Debug, Clone)]
pub struct RecentIndex {
    path: PathBuf,
}

impl RecentIndex {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Names newest first; a missing or unreadable index is empty
    pub fn list(&self) -> Vec<String> {
        match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                log::warn!("Recent index {} is unreadable: {}", self.path.display(), e);
                Vec::new()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                log::warn!("Cannot read recent index {}: {}", self.path.display(), e);
                Vec::new()
            }
        }
    }

    /// Move `name` to the front, keeping at most MAX_RECENT names
    pub fn touch(&self, name: &str) -> Result<()> {
        let mut names = self.list();
        names.retain(|n| n != name);
        names.insert(0, name.to_string());
        names.truncate(MAX_RECENT);
        self.save(&names)
    }

    /// Returns whether the name was present
    pub fn remove(&self, name: &str) -> Result<bool> {
        let mut names = self.list();
        let before = names.len();
        names.retain(|n| n != name);
        if names.len() == before {
            return Ok(false);
        }
        self.save(&names)?;
        Ok(true)
    }

    pub fn clear(&self) -> Result<()> {
        self.save(&[])
    }

    fn save(&self, names: &[String]) -> Result<()> {
        let (dir, file) = split(&self.path)?;
        ensure_dir(dir).map_err(|e| KeeperError::from_io("create index directory", e))?;
        write_atomic(dir, file, &serde_json::to_vec_pretty(names)?)?;
        Ok(())
    }
}

fn split(path: &Path) -> Result<(&Path, &str)> {
    let dir = path.parent();
    let file = path.file_name().and_then(|f| f.to_str());
    match (dir, file) {
        (Some(dir), Some(file)) => Ok((dir, file)),
        _ => Err(KeeperError::InvalidName(path.display().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_touch_moves_to_front_and_caps() {
        let temp = TempDir::new().unwrap();
        let index = RecentIndex::new(temp.path().join("index.json"));
        assert!(index.list().is_empty());

        for i in 0..12 {
            index.touch(&format!("ctx{}", i)).unwrap();
        }
        index.touch("ctx5").unwrap();

        let names = index.list();
        assert_eq!(names.len(), MAX_RECENT);
        assert_eq!(names[0], "ctx5");
        assert_eq!(names[1], "ctx11");
        assert_eq!(names.iter().filter(|n| *n == "ctx5").count(), 1);
    }

    #[test]
    fn test_remove_and_corrupt_index() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("index.json");
        let index = RecentIndex::new(&path);
        index.touch("a").unwrap();
        assert!(index.remove("a").unwrap());
        assert!(!index.remove("a").unwrap());

        fs::write(&path, "not json").unwrap();
        assert!(index.list().is_empty());
        index.touch("b").unwrap();
        assert_eq!(index.list(), vec!["b".to_string()]);
    }
}
