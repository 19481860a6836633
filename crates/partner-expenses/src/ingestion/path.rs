//! Object key normalization

use crate::error::{Error, Result};

/// Normalize a stored-file path so Windows-style names work.
///
/// Backslashes become forward slashes, then the path is normalized the POSIX
/// way (`.` segments dropped, `..` resolved, repeated slashes collapsed). A
/// trailing slash on the input is kept, and a path that normalizes to `.`
/// becomes the empty string.
pub fn clean_name(name: &str) -> String {
    let slashed = name.replace('\\', "/");
    let mut cleaned = normalize_posix(&slashed);

    if slashed.ends_with('/') && !cleaned.ends_with('/') {
        cleaned.push('/');
    }

    if cleaned == "." {
        cleaned.clear();
    }

    cleaned
}

/// Object key for a message path: cleaned, without a leading slash.
///
/// Keys that name nothing (empty) or a directory (trailing slash) are
/// rejected.
pub fn object_key(path: &str) -> Result<String> {
    let cleaned = clean_name(path);
    let key = cleaned.trim_start_matches('/');

    if key.is_empty() || key.ends_with('/') {
        return Err(Error::InvalidMessage(format!(
            "path '{}' does not name a file",
            path
        )));
    }

    Ok(key.to_string())
}

/// Lexical normalization in the style of `posixpath.normpath`
fn normalize_posix(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }

    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}
