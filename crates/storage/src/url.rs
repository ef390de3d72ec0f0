//! Local file URL helpers.

use crate::error::{StorageError, StorageResult};
use std::path::{Path, PathBuf};

/// Resolve a `file://` URL or an absolute path to a local path.
pub fn local_path(url: &str) -> StorageResult<PathBuf> {
    let raw = match url.split_once("://") {
        Some(("file", rest)) => rest,
        Some((scheme, _)) => {
            return Err(StorageError::InvalidUrl(format!(
                "unsupported scheme '{scheme}' in {url}"
            )));
        }
        None => url,
    };
    // file://localhost/path is equivalent to file:///path
    let raw = raw.strip_prefix("localhost").unwrap_or(raw);

    let path = PathBuf::from(raw);
    if !path.is_absolute() {
        return Err(StorageError::InvalidUrl(format!(
            "expected an absolute path: {url}"
        )));
    }
    Ok(path)
}

/// Render a local path as a `file://` URL.
pub fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}
