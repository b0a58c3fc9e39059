//! Chromium remote-debugging endpoint client
//!
//! Port discovery order: `--remote-debugging-port=` on the browser's command
//! line, the `DevToolsActivePort` file in its user-data directory, then the
//! configured well-known ports. Every candidate is verified with
//! `GET /json/version` before use.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine as _;
use serde::Deserialize;

use crate::error::{KeeperError, Result};
use crate::model::{BrowserFamily, BrowserTab};
use crate::process::ProcessInfo;

/// Favicons larger than this are dropped
const MAX_FAVICON_BYTES: usize = 64 * 1024;

const LOOPBACK: &str = "127.0.0.1";

/// One entry of `/json/list`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevToolsTarget {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub favicon_url: Option<String>,
}

/// Page targets as tabs; DevTools lists the most recently focused page first
pub fn targets_to_tabs(targets: &[DevToolsTarget]) -> Vec<BrowserTab> {
    targets
        .iter()
        .filter(|t| t.kind == "page" && !t.url.starts_with("devtools://"))
        .enumerate()
        .map(|(index, t)| BrowserTab {
            url: t.url.clone(),
            title: t.title.clone(),
            favicon: t
                .favicon_url
                .as_ref()
                .filter(|f| f.starts_with("data:"))
                .cloned(),
            active: index == 0,
            group_id: None,
            group_name: None,
            index,
        })
        .collect()
}

/// First line of `DevToolsActivePort` is the port, second the browser path
pub fn parse_active_port(contents: &str) -> Option<u16> {
    contents
        .lines()
        .next()?
        .trim()
        .parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
}

/// Default user-data directory for a Chromium-family browser
pub fn default_user_data_dir(family: BrowserFamily) -> Option<PathBuf> {
    if cfg!(windows) {
        let local = dirs::data_local_dir()?;
        let roaming = dirs::data_dir()?;
        Some(match family {
            BrowserFamily::Chrome => local.join("Google").join("Chrome").join("User Data"),
            BrowserFamily::Edge => local.join("Microsoft").join("Edge").join("User Data"),
            BrowserFamily::Brave => local
                .join("BraveSoftware")
                .join("Brave-Browser")
                .join("User Data"),
            BrowserFamily::Chromium => local.join("Chromium").join("User Data"),
            BrowserFamily::Vivaldi => local.join("Vivaldi").join("User Data"),
            BrowserFamily::Opera => roaming.join("Opera Software").join("Opera Stable"),
            BrowserFamily::Firefox => return None,
        })
    } else {
        let config = if cfg!(target_os = "macos") {
            dirs::data_dir()?
        } else {
            dirs::config_dir()?
        };
        let relative = match (family, cfg!(target_os = "macos")) {
            (BrowserFamily::Chrome, true) => "Google/Chrome",
            (BrowserFamily::Chrome, false) => "google-chrome",
            (BrowserFamily::Edge, true) => "Microsoft Edge",
            (BrowserFamily::Edge, false) => "microsoft-edge",
            (BrowserFamily::Brave, _) => "BraveSoftware/Brave-Browser",
            (BrowserFamily::Chromium, true) => "Chromium",
            (BrowserFamily::Chromium, false) => "chromium",
            (BrowserFamily::Vivaldi, true) => "Vivaldi",
            (BrowserFamily::Vivaldi, false) => "vivaldi",
            (BrowserFamily::Opera, true) => "com.operasoftware.Opera",
            (BrowserFamily::Opera, false) => "opera",
            (BrowserFamily::Firefox, _) => return None,
        };
        Some(config.join(relative))
    }
}

fn user_data_dir(family: BrowserFamily, process: &ProcessInfo) -> Option<PathBuf> {
    process
        .flag_value("--user-data-dir")
        .map(PathBuf::from)
        .or_else(|| default_user_data_dir(family))
}

fn read_active_port(dir: &Path) -> Option<u16> {
    let contents = std::fs::read_to_string(dir.join("DevToolsActivePort")).ok()?;
    parse_active_port(&contents)
}

/// Ports worth probing, most specific first, without duplicates
pub fn candidate_ports(
    process: &ProcessInfo,
    active_port_file: Option<u16>,
    well_known: &[u16],
) -> Vec<u16> {
    let mut ports = Vec::new();
    let flag = process
        .flag_value("--remote-debugging-port")
        .and_then(|v| v.parse::<u16>().ok())
        .filter(|p| *p != 0);
    for port in flag
        .into_iter()
        .chain(active_port_file)
        .chain(well_known.iter().copied())
    {
        if !ports.contains(&port) {
            ports.push(port);
        }
    }
    ports
}

/// Blocking HTTP client for one extraction; create and drop it off the async runtime
pub struct DebugClient {
    http: reqwest::blocking::Client,
}

impl DebugClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| KeeperError::Unavailable(format!("http client: {}", e)))?;
        Ok(Self { http })
    }

    /// True when `/json/version` answers with JSON
    pub fn is_listening(&self, port: u16) -> bool {
        let url = format!("http://{}:{}/json/version", LOOPBACK, port);
        match self.http.get(&url).send() {
            Ok(resp) if resp.status().is_success() => resp.json::<serde_json::Value>().is_ok(),
            _ => false,
        }
    }

    pub fn discover_port(
        &self,
        family: BrowserFamily,
        process: &ProcessInfo,
        well_known: &[u16],
    ) -> Option<u16> {
        let file_port = user_data_dir(family, process).and_then(|d| read_active_port(&d));
        let port = candidate_ports(process, file_port, well_known)
            .into_iter()
            .find(|p| self.is_listening(*p));
        match port {
            Some(p) => log::debug!("{:?} debugging endpoint on port {}", family, p),
            None => log::debug!("{:?}: no debugging endpoint answered", family),
        }
        port
    }

    pub fn targets(&self, port: u16) -> Result<Vec<DevToolsTarget>> {
        let url = format!("http://{}:{}/json/list", LOOPBACK, port);
        let resp = self
            .http
            .get(&url)
            .send()
            .map_err(|e| KeeperError::Unavailable(format!("GET {}: {}", url, e)))?;
        if !resp.status().is_success() {
            return Err(KeeperError::Unavailable(format!(
                "GET {}: status {}",
                url,
                resp.status()
            )));
        }
        resp.json::<Vec<DevToolsTarget>>()
            .map_err(|e| KeeperError::Unavailable(format!("GET {}: {}", url, e)))
    }

    /// Page tabs, optionally with favicons fetched into `data:` URIs
    pub fn page_tabs(&self, port: u16, favicons: bool) -> Result<Vec<BrowserTab>> {
        let targets = self.targets(port)?;
        let mut tabs = targets_to_tabs(&targets);
        if favicons {
            let pages = targets
                .iter()
                .filter(|t| t.kind == "page" && !t.url.starts_with("devtools://"));
            for (tab, target) in tabs.iter_mut().zip(pages) {
                if tab.favicon.is_none() {
                    tab.favicon = target
                        .favicon_url
                        .as_deref()
                        .and_then(|u| self.favicon_data_uri(u));
                }
            }
        }
        Ok(tabs)
    }

    /// Best-effort: any failure yields None
    pub fn favicon_data_uri(&self, url: &str) -> Option<String> {
        if url.starts_with("data:") {
            return Some(url.to_string());
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return None;
        }
        let resp = self.http.get(url).send().ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/x-icon")
            .to_string();
        let bytes = resp.bytes().ok()?;
        if bytes.is_empty() || bytes.len() > MAX_FAVICON_BYTES {
            return None;
        }
        Some(format!(
            "data:{};base64,{}",
            content_type,
            base64::engine::general_purpose::STANDARD.encode(&bytes)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;

    fn target(kind: &str, url: &str, title: &str) -> DevToolsTarget {
        DevToolsTarget {
            id: url.to_string(),
            kind: kind.to_string(),
            title: title.to_string(),
            url: url.to_string(),
            favicon_url: None,
        }
    }

    #[test]
    fn test_only_pages_become_tabs() {
        let tabs = targets_to_tabs(&[
            target("page", "https://example.com/a", "A"),
            target("service_worker", "https://example.com/sw.js", ""),
            target("page", "devtools://devtools/inspector.html", "DevTools"),
            target("page", "https://example.com/b", "B"),
        ]);
        assert_eq!(tabs.len(), 2);
        assert_eq!(tabs[0].url, "https://example.com/a");
        assert!(tabs[0].active);
        assert!(!tabs[1].active);
        assert_eq!(tabs[1].index, 1);
    }

    #[test]
    fn test_parse_active_port() {
        assert_eq!(
            parse_active_port("9333\n/devtools/browser/abc\n"),
            Some(9333)
        );
        assert_eq!(parse_active_port("0\n"), None);
        assert_eq!(parse_active_port("garbage"), None);
        assert_eq!(parse_active_port(""), None);
    }

    #[test]
    fn test_candidate_ports_order_and_dedupe() {
        let process = ProcessInfo {
            cmdline: vec![
                "chrome.exe".into(),
                "--remote-debugging-port=9223".into(),
            ],
            ..ProcessInfo::named(1, "chrome.exe")
        };
        assert_eq!(
            candidate_ports(&process, Some(9400), &[9222, 9223]),
            vec![9223, 9400, 9222]
        );
    }

    /// Serve canned JSON for `/json/version` and `/json/list`, one request per connection
    fn serve(listener: TcpListener, requests: usize, list_body: &'static str) {
        std::thread::spawn(move || {
            for stream in listener.incoming().take(requests) {
                let mut stream = match stream {
                    Ok(s) => s,
                    Err(_) => return,
                };
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut request_line = String::new();
                reader.read_line(&mut request_line).unwrap();
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
                        break;
                    }
                }
                let body = if request_line.contains("/json/version") {
                    r#"{"Browser":"Chrome/120.0"}"#
                } else {
                    list_body
                };
                write!(
                    stream,
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                )
                .unwrap();
            }
        });
    }

    #[test]
    fn test_page_tabs_over_http() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        serve(
            listener,
            2,
            r#"[
                {"id":"1","type":"page","title":"A","url":"https://example.com/a"},
                {"id":"2","type":"iframe","title":"x","url":"https://ads.example"},
                {"id":"3","type":"page","title":"B","url":"https://example.com/b"}
            ]"#,
        );

        let client = DebugClient::new(Duration::from_secs(2)).unwrap();
        let process = ProcessInfo::named(1, "chrome.exe");
        let found = client.discover_port(BrowserFamily::Chromium, &process, &[port]);
        assert_eq!(found, Some(port));

        let tabs = client.page_tabs(port, false).unwrap();
        let urls: Vec<&str> = tabs.iter().map(|t| t.url.as_str()).collect();
        assert_eq!(urls, vec!["https://example.com/a", "https://example.com/b"]);
    }

    #[test]
    fn test_closed_port_is_not_discovered() {
        // Bind then drop to get a port nothing listens on
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let client = DebugClient::new(Duration::from_millis(300)).unwrap();
        assert!(!client.is_listening(port));
    }
}
