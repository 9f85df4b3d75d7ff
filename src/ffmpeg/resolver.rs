//! Maps a clip's source reference (plain path or file:// URL) to a local
//! file path. Remote schemes are rejected; the caller degrades to the
//! fallback tier instead of surfacing an error.

use anyhow::{anyhow, ensure, Result};
use std::path::PathBuf;

pub fn resolve_source(src: &str) -> Result<PathBuf> {
    let path = if let Some(rest) = src.strip_prefix("file://") {
        PathBuf::from(rest)
    } else if src.contains("://") {
        return Err(anyhow!("unsupported source scheme: {}", src));
    } else {
        PathBuf::from(src)
    };

    let meta = std::fs::metadata(&path)
        .map_err(|e| anyhow!("cannot access source {:?}: {}", path, e))?;
    ensure!(meta.is_file(), "source is not a file: {:?}", path);

    Ok(path)
}
