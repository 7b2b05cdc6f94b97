//! Artifact persistence: atomic file writes and JSON load.
//!
//! Every model, checkpoint and manifest a job writes goes through
//! [`atomic_write`], so an interrupted job never leaves a half-written file
//! under its save path.

use std::io;
use std::path::Path;

/// Serialize `data` as pretty JSON and write it atomically.
///
/// Returns the bytes written so callers can hash them.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> io::Result<Vec<u8>> {
    let json = serde_json::to_vec_pretty(data).map_err(io::Error::other)?;
    atomic_write(path, &json)?;
    Ok(json)
}

/// Write to a `.tmp` sibling, then rename onto `path`. Creates parent directories.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load JSON from `path`, `Ok(None)` if the file does not exist.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    let value =
        serde_json::from_str(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}
