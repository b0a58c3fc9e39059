//! Firefox session-store reader
//!
//! The session store is read straight from the active profile; the running
//! browser is never contacted. Files use the `mozlz4` framing: an 8-byte
//! magic, a little-endian u32 decompressed size, then one raw LZ4 block.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{KeeperError, Result};
use crate::model::BrowserTab;

pub const MOZLZ4_MAGIC: &[u8; 8] = b"mozLz40\0";

/// Session files, freshest first
const STORE_CANDIDATES: &[&str] = &[
    "sessionstore-backups/recovery.jsonlz4",
    "sessionstore-backups/recovery.baklz4",
    "sessionstore.jsonlz4",
];

/// Upper bound on a declared decompressed size
const MAX_SESSION_BYTES: usize = 256 * 1024 * 1024;

/// Platform Firefox data root (the directory holding `profiles.ini`)
pub fn default_root() -> Option<PathBuf> {
    if cfg!(windows) {
        dirs::data_dir().map(|d| d.join("Mozilla").join("Firefox"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir().map(|d| d.join("Firefox"))
    } else {
        dirs::home_dir().map(|h| h.join(".mozilla").join("firefox"))
    }
}

/// Decode a `mozlz4` buffer
pub fn decode_mozlz4(bytes: &[u8]) -> Result<Vec<u8>> {
    if bytes.len() < 12 || &bytes[..8] != MOZLZ4_MAGIC {
        return Err(KeeperError::corrupt("session store", "missing mozLz40 header"));
    }
    let size = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    if size > MAX_SESSION_BYTES {
        return Err(KeeperError::corrupt(
            "session store",
            format!("declared size {} too large", size),
        ));
    }
    lz4_flex::block::decompress(&bytes[12..], size)
        .map_err(|e| KeeperError::corrupt("session store", e))
}

/// Encode a buffer in `mozlz4` framing
pub fn encode_mozlz4(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() / 2 + 16);
    out.extend_from_slice(MOZLZ4_MAGIC);
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(&lz4_flex::block::compress(data));
    out
}

#[derive(Debug, Default)]
struct IniSection {
    name: String,
    values: HashMap<String, String>,
}

fn parse_ini(contents: &str) -> Vec<IniSection> {
    let mut sections: Vec<IniSection> = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            sections.push(IniSection {
                name: name.to_string(),
                values: HashMap::new(),
            });
        } else if let Some((key, value)) = line.split_once('=') {
            if let Some(section) = sections.last_mut() {
                section
                    .values
                    .insert(key.trim().to_string(), value.trim().to_string());
            }
        }
    }
    sections
}

fn resolve_profile_path(root: &Path, path: &str, relative: bool) -> PathBuf {
    if relative {
        path.split('/').fold(root.to_path_buf(), |acc, part| acc.join(part))
    } else {
        PathBuf::from(path)
    }
}

/// Active profile: install default, then `Default=1`, then a `*.default-release` directory
pub fn find_profile(root: &Path) -> Option<PathBuf> {
    if let Ok(contents) = fs::read_to_string(root.join("profiles.ini")) {
        let sections = parse_ini(&contents);

        let install_default = sections
            .iter()
            .filter(|s| s.name.starts_with("Install"))
            .find_map(|s| s.values.get("Default"))
            .map(|p| resolve_profile_path(root, p, true));
        if let Some(path) = install_default.filter(|p| p.is_dir()) {
            return Some(path);
        }

        let marked = sections
            .iter()
            .filter(|s| s.name.starts_with("Profile"))
            .find(|s| s.values.get("Default").map(String::as_str) == Some("1"))
            .and_then(|s| {
                let path = s.values.get("Path")?;
                let relative = s.values.get("IsRelative").map(String::as_str) != Some("0");
                Some(resolve_profile_path(root, path, relative))
            });
        if let Some(path) = marked.filter(|p| p.is_dir()) {
            return Some(path);
        }
    }

    for dir in [root.join("Profiles"), root.to_path_buf()] {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        let mut names: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        names.sort();
        if let Some(found) = names.iter().find(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.ends_with(".default-release"))
        }) {
            return Some(found.clone());
        }
    }
    None
}

/// Tabs of one session window, with the title of its selected tab
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionWindow {
    pub selected_title: Option<String>,
    pub tabs: Vec<BrowserTab>,
}

fn as_index(value: Option<&Value>) -> Option<usize> {
    value.and_then(Value::as_u64).map(|v| v as usize)
}

fn parse_window(window: &Value) -> SessionWindow {
    let groups: HashMap<String, String> = window
        .get("groups")
        .and_then(Value::as_array)
        .map(|groups| {
            groups
                .iter()
                .filter_map(|g| {
                    let id = g.get("id")?.as_str()?.to_string();
                    let name = g.get("name").and_then(Value::as_str).unwrap_or("");
                    Some((id, name.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    // `selected` is 1-based
    let selected = as_index(window.get("selected")).unwrap_or(1);
    let mut tabs = Vec::new();
    let mut selected_title = None;

    let raw_tabs = window.get("tabs").and_then(Value::as_array);
    for (position, tab) in raw_tabs.into_iter().flatten().enumerate() {
        let entries = match tab.get("entries").and_then(Value::as_array) {
            Some(e) if !e.is_empty() => e,
            _ => continue,
        };
        // `index` is 1-based into the back/forward history
        let current = as_index(tab.get("index"))
            .unwrap_or(entries.len())
            .clamp(1, entries.len());
        let entry = &entries[current - 1];
        let url = entry.get("url").and_then(Value::as_str).unwrap_or("");
        if url.is_empty() {
            continue;
        }
        let title = entry
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or(url)
            .to_string();
        let active = position + 1 == selected;
        if active {
            selected_title = Some(title.clone());
        }
        let group_id = tab
            .get("groupId")
            .and_then(Value::as_str)
            .map(String::from);
        let group_name = group_id.as_ref().and_then(|id| groups.get(id).cloned());

        tabs.push(BrowserTab {
            url: url.to_string(),
            title,
            favicon: tab
                .get("image")
                .and_then(Value::as_str)
                .filter(|i| i.starts_with("data:"))
                .map(String::from),
            active,
            group_id,
            group_name,
            index: tabs.len(),
        });
    }

    SessionWindow {
        selected_title,
        tabs,
    }
}

/// Parse the decompressed session document into per-window tab lists
pub fn parse_session(json: &[u8]) -> Result<Vec<SessionWindow>> {
    let doc: Value =
        serde_json::from_slice(json).map_err(|e| KeeperError::corrupt("session store", e))?;
    let windows = doc
        .get("windows")
        .and_then(Value::as_array)
        .ok_or_else(|| KeeperError::corrupt("session store", "no windows array"))?;
    Ok(windows.iter().map(parse_window).collect())
}

/// Pick the session window whose selected tab titles the OS window; all tabs otherwise
pub fn select_window_tabs(windows: Vec<SessionWindow>, window_title: &str) -> Vec<BrowserTab> {
    let matching = windows.iter().position(|w| {
        w.selected_title
            .as_deref()
            .map_or(false, |t| !t.is_empty() && window_title.starts_with(t))
    });
    match matching {
        Some(i) => windows.into_iter().nth(i).map(|w| w.tabs).unwrap_or_default(),
        None => {
            let mut all: Vec<BrowserTab> = windows.into_iter().flat_map(|w| w.tabs).collect();
            for (i, tab) in all.iter_mut().enumerate() {
                tab.index = i;
            }
            all
        }
    }
}

/// Read the active profile's session store
pub fn extract_tabs(root: &Path, window_title: &str) -> Result<Vec<BrowserTab>> {
    let profile = find_profile(root).ok_or_else(|| {
        KeeperError::Unavailable(format!("no Firefox profile under {}", root.display()))
    })?;

    let store = STORE_CANDIDATES
        .iter()
        .map(|c| c.split('/').fold(profile.clone(), |acc, part| acc.join(part)))
        .find(|p| p.is_file())
        .ok_or_else(|| {
            KeeperError::Unavailable(format!(
                "no session store in profile {}",
                profile.display()
            ))
        })?;

    let bytes = fs::read(&store).map_err(|e| {
        KeeperError::Unavailable(format!("read {}: {}", store.display(), e))
    })?;
    let json = decode_mozlz4(&bytes)?;
    let windows = parse_session(&json)?;
    log::debug!(
        "Firefox session {}: {} windows",
        store.display(),
        windows.len()
    );
    Ok(select_window_tabs(windows, window_title))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn session_json() -> serde_json::Value {
        serde_json::json!({
            "windows": [
                {
                    "selected": 2,
                    "groups": [{"id": "g1", "name": "Research"}],
                    "tabs": [
                        {
                            "index": 2,
                            "entries": [
                                {"url": "https://old.example", "title": "Old"},
                                {"url": "https://example.com/a", "title": "A"}
                            ],
                            "groupId": "g1"
                        },
                        {
                            "index": 1,
                            "entries": [{"url": "https://example.com/b", "title": "B"}],
                            "image": "data:image/png;base64,AAAA"
                        }
                    ]
                },
                {
                    "selected": 1,
                    "tabs": [
                        {"index": 1, "entries": [{"url": "https://other.example", "title": "Other"}]}
                    ]
                }
            ]
        })
    }

    fn write_profile(root: &Path, ini: &str, profile_rel: &str) -> PathBuf {
        fs::write(root.join("profiles.ini"), ini).unwrap();
        let profile = root.join(profile_rel);
        fs::create_dir_all(profile.join("sessionstore-backups")).unwrap();
        let bytes = encode_mozlz4(&serde_json::to_vec(&session_json()).unwrap());
        fs::write(
            profile.join("sessionstore-backups").join("recovery.jsonlz4"),
            bytes,
        )
        .unwrap();
        profile
    }

    #[test]
    fn test_decode_rejects_bad_header() {
        assert!(matches!(
            decode_mozlz4(b"notmozlz4data"),
            Err(KeeperError::Corrupt { .. })
        ));
        assert!(decode_mozlz4(b"short").is_err());
    }

    #[test]
    fn test_decode_round_trips_session() {
        let raw = serde_json::to_vec(&session_json()).unwrap();
        assert_eq!(decode_mozlz4(&encode_mozlz4(&raw)).unwrap(), raw);
    }

    #[test]
    fn test_parse_session_maps_history_index_selection_and_groups() {
        let raw = serde_json::to_vec(&session_json()).unwrap();
        let windows = parse_session(&raw).unwrap();
        assert_eq!(windows.len(), 2);

        let first = &windows[0];
        assert_eq!(first.tabs[0].url, "https://example.com/a");
        assert_eq!(first.tabs[0].group_name.as_deref(), Some("Research"));
        assert!(!first.tabs[0].active);
        assert!(first.tabs[1].active);
        assert!(first.tabs[1].favicon.is_some());
        assert_eq!(first.selected_title.as_deref(), Some("B"));
    }

    #[test]
    fn test_select_window_by_title() {
        let raw = serde_json::to_vec(&session_json()).unwrap();
        let tabs = select_window_tabs(parse_session(&raw).unwrap(), "Other — Mozilla Firefox");
        assert_eq!(tabs.len(), 1);
        assert_eq!(tabs[0].url, "https://other.example");

        let all = select_window_tabs(parse_session(&raw).unwrap(), "Unrelated");
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].index, 2);
    }

    #[test]
    fn test_profile_from_install_section() {
        let root = TempDir::new().unwrap();
        write_profile(
            root.path(),
            "[Install4F96D1932A9F858E]\nDefault=Profiles/abcd.default-release\nLocked=1\n\n[Profile0]\nName=default\nIsRelative=1\nPath=Profiles/zzzz.default\nDefault=1\n",
            "Profiles/abcd.default-release",
        );
        let profile = find_profile(root.path()).unwrap();
        assert!(profile.ends_with("abcd.default-release"));

        let tabs = extract_tabs(root.path(), "B — Mozilla Firefox").unwrap();
        let urls: Vec<&str> = tabs.iter().map(|t| t.url.as_str()).collect();
        assert_eq!(urls, vec!["https://example.com/a", "https://example.com/b"]);
    }

    #[test]
    fn test_profile_from_default_flag_then_directory_scan() {
        let root = TempDir::new().unwrap();
        write_profile(
            root.path(),
            "[Profile0]\nName=main\nIsRelative=1\nPath=Profiles/main.profile\nDefault=1\n",
            "Profiles/main.profile",
        );
        assert!(find_profile(root.path()).unwrap().ends_with("main.profile"));

        let bare = TempDir::new().unwrap();
        fs::create_dir_all(bare.path().join("Profiles").join("x1.default-release")).unwrap();
        assert!(find_profile(bare.path())
            .unwrap()
            .ends_with("x1.default-release"));
    }

    #[test]
    fn test_missing_profile_is_unavailable() {
        let root = TempDir::new().unwrap();
        assert!(matches!(
            extract_tabs(root.path(), ""),
            Err(KeeperError::Unavailable(_))
        ));
    }
}
