//! Per-address raw output artifacts.
//!
//! Successful collections are written below the raw directory, grouped by
//! site and zone when the device hostname follows the `SITE-...-ZONE`
//! convention:
//!
//! ```text
//! data/raw/MSK/02/10.0.0.1.txt   hostname msk-core-02
//! data/raw/unknown/10.0.0.2.txt  hostname without a site prefix
//! data/raw/10.0.0.3.txt          fallback when the directory cannot be made
//! ```

use std::path::{Path, PathBuf};

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::fs;

static HOSTNAME_LINE: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(r"(?m)^\s*hostname\s+([\w\-.]+)") {
        Ok(re) => re,
        Err(err) => panic!("invalid hostname regex: {err}"),
    }
});

static UPTIME_LINE: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(r"(?m)^\s*([\w\-.]+)\s+uptime is\s+") {
        Ok(re) => re,
        Err(err) => panic!("invalid uptime regex: {err}"),
    }
});

/// Directory for devices whose hostname carries no site.
const UNKNOWN_SITE: &str = "unknown";

/// Device hostname from collected output, else from the prompt.
pub fn hostname_of(text: &str, prompt: &str) -> Option<String> {
    if let Some(caps) = HOSTNAME_LINE.captures(text) {
        return Some(caps[1].to_string());
    }
    if let Some(caps) = UPTIME_LINE.captures(text) {
        return Some(caps[1].to_string());
    }
    let trimmed = prompt.trim().trim_end_matches(['#', '>']);
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Relative directory for a hostname: `<SITE>[/<zone>]` or `unknown`.
///
/// The site is the first dash-separated token when it is alphabetic and at
/// least three characters long. The zone is the first later token made of
/// one to four digits.
pub fn site_dir(hostname: Option<&str>) -> PathBuf {
    let Some(name) = hostname.filter(|h| h.contains('-')) else {
        return PathBuf::from(UNKNOWN_SITE);
    };
    let mut parts = name.split('-');
    let site = parts
        .next()
        .filter(|p| p.chars().count() >= 3 && p.chars().all(|c| c.is_alphabetic()));
    let Some(site) = site else {
        return PathBuf::from(UNKNOWN_SITE);
    };
    let mut dir = PathBuf::from(site.to_uppercase());
    if let Some(zone) =
        parts.find(|p| (1..=4).contains(&p.len()) && p.chars().all(|c| c.is_ascii_digit()))
    {
        dir.push(zone);
    }
    dir
}

/// Raw output store rooted at one directory.
#[derive(Debug, Clone)]
pub struct RawStore {
    root: PathBuf,
}

impl RawStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Writes the artifact for `address`, replacing any earlier one.
    pub async fn persist(
        &self,
        address: &str,
        text: &str,
        prompt: &str,
    ) -> std::io::Result<PathBuf> {
        let file_name = format!("{address}.txt");
        let dir = self.root.join(site_dir(hostname_of(text, prompt).as_deref()));
        match fs::create_dir_all(&dir).await {
            Ok(()) => {
                let path = dir.join(&file_name);
                if fs::write(&path, text).await.is_ok() {
                    debug!("{address} output written to {}", path.display());
                    return Ok(path);
                }
                warn!("{address} could not write {}, using raw root", path.display());
            }
            Err(e) => warn!("{address} could not create {}: {e}", dir.display()),
        }
        fs::create_dir_all(&self.root).await?;
        let path = self.root.join(file_name);
        fs::write(&path, text).await?;
        Ok(path)
    }

    /// Location of a prior artifact: the root first, then up to two
    /// directory levels below it.
    pub async fn find(&self, address: &str) -> Option<PathBuf> {
        let file_name = format!("{address}.txt");
        let mut level = vec![self.root.clone()];
        for _ in 0..3 {
            let mut next = Vec::new();
            for dir in &level {
                let candidate = dir.join(&file_name);
                if fs::metadata(&candidate)
                    .await
                    .map(|m| m.is_file())
                    .unwrap_or(false)
                {
                    return Some(candidate);
                }
                next.extend(subdirs(dir).await);
            }
            level = next;
        }
        None
    }

    /// First `limit` characters of the prior artifact, if one exists.
    pub async fn read_head(&self, address: &str, limit: usize) -> Option<String> {
        let path = self.find(address).await?;
        match fs::read(&path).await {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).chars().take(limit).collect()),
            Err(e) => {
                debug!("{address} prior output unreadable: {e}");
                None
            }
        }
    }
}

async fn subdirs(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let Ok(mut entries) = fs::read_dir(dir).await else {
        return found;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
            found.push(entry.path());
        }
    }
    found.sort();
    found
}
