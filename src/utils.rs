//! Utility functions for naming and addressing stored payloads

use crate::error::{QuarantineError, Result};
use crate::storage::Disk;
use chrono::{DateTime, Datelike, Utc};
use regex::Regex;
use std::sync::OnceLock;

/// Longest sanitized filename, in characters
pub const MAX_FILENAME_LEN: usize = 200;

/// Maximum number of rename attempts when resolving key collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Name used when nothing better can be derived
const FALLBACK_NAME: &str = "download";

fn unsafe_chars() -> &'static Regex {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    UNSAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]").expect("static pattern is valid"))
}

/// Reduce a title to a safe filename
///
/// Every character outside `[A-Za-z0-9._-]` becomes `_` and the result is cut
/// to [`MAX_FILENAME_LEN`] characters. Leading dots are dropped so the name
/// can never be `.` or `..`.
///
/// # Examples
///
/// ```
/// use torrent_quarantine::utils::sanitize_filename;
///
/// assert_eq!(sanitize_filename("My Movie/2024"), "My_Movie_2024");
/// assert_eq!(sanitize_filename("Amélie"), "Am_lie");
/// ```
pub fn sanitize_filename(name: &str) -> String {
    let replaced = unsafe_chars().replace_all(name.trim(), "_");
    let trimmed = replaced.trim_start_matches('.');
    // Only ASCII survives the replacement, so byte slicing is char-safe
    let truncated = &trimmed[..trimmed.len().min(MAX_FILENAME_LEN)];
    if truncated.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        truncated.to_string()
    }
}

/// Quarantine key of a payload: `torrents/YYYY/MM/DD/<name>.<ext>`
pub fn storage_key(name: &str, extension: &str, at: DateTime<Utc>) -> String {
    format!(
        "torrents/{:04}/{:02}/{:02}/{}.{}",
        at.year(),
        at.month(),
        at.day(),
        name,
        extension
    )
}

/// First key not yet taken on `disk`: `key`, then `<stem>_1.<ext>`, `<stem>_2.<ext>`, ...
pub async fn unique_key(disk: &Disk, key: &str) -> Result<String> {
    if !disk.exists(key).await? {
        return Ok(key.to_string());
    }

    let (dir, file) = match key.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, key),
    };
    let (stem, extension) = match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (file, None),
    };

    for i in 1..=MAX_RENAME_ATTEMPTS {
        let name = match extension {
            Some(ext) => format!("{}_{}.{}", stem, i, ext),
            None => format!("{}_{}", stem, i),
        };
        let candidate = match dir {
            Some(dir) => format!("{}/{}", dir, name),
            None => name,
        };
        if !disk.exists(&candidate).await? {
            return Ok(candidate);
        }
    }

    Err(QuarantineError::InvalidKey {
        key: format!("{} (no free name after {} attempts)", key, MAX_RENAME_ATTEMPTS),
    }
    .into())
}

/// Lowercased host of a URL
pub fn extract_domain(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()?
        .host_str()
        .map(|host| host.to_ascii_lowercase())
}

/// Display name (`dn`) carried by a magnet URI
pub fn magnet_display_name(magnet: &str) -> Option<String> {
    let parsed = url::Url::parse(magnet).ok()?;
    if parsed.scheme() != "magnet" {
        return None;
    }
    parsed
        .query_pairs()
        .find(|(key, _)| key == "dn")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.trim().is_empty())
}

/// Name of a download: the title, else the magnet name, else the torrent file stem
pub fn download_name(
    title: Option<&str>,
    magnet_link: Option<&str>,
    torrent_link: Option<&str>,
) -> String {
    if let Some(title) = title.map(str::trim).filter(|t| !t.is_empty()) {
        return title.to_string();
    }
    if let Some(name) = magnet_link.and_then(magnet_display_name) {
        return name;
    }
    torrent_link
        .and_then(|link| url::Url::parse(link).ok())
        .and_then(|url| {
            url.path_segments()?
                .next_back()
                .filter(|segment| !segment.is_empty())
                .map(|segment| {
                    segment
                        .strip_suffix(".torrent")
                        .unwrap_or(segment)
                        .to_string()
                })
        })
        .unwrap_or_else(|| FALLBACK_NAME.to_string())
}

/// MIME type stored for a payload extension
pub fn mime_for_extension(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "torrent" => "application/x-bittorrent",
        "magnet" | "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}
