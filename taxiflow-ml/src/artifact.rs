//! Artifact files: atomic writes, JSON stores, and gzip-compressed blobs.
//!
//! Fitted encoders and models are stored as gzip-compressed JSON so they can
//! be inspected with `zcat` and reloaded without the process that wrote them.

use crate::error::MlError;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::Path;

/// Write bytes to a `.tmp` sibling, then rename over `path`.
///
/// Creates parent directories if they don't exist.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<(), MlError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Atomically write pretty-printed JSON.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> Result<(), MlError> {
    let json = serde_json::to_string_pretty(data)?;
    atomic_write(path, json.as_bytes())
}

/// Load JSON from `path`, or `None` when the file doesn't exist.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, MlError> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&data)?))
}

/// Serialize `value` as gzip-compressed JSON at `path`.
pub fn save_gz_json<T: Serialize>(path: &Path, value: &T) -> Result<(), MlError> {
    let json = serde_json::to_vec(value)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;
    atomic_write(path, &compressed)
}

/// Inverse of [`save_gz_json`].
pub fn load_gz_json<T: DeserializeOwned>(path: &Path) -> Result<T, MlError> {
    if !path.exists() {
        return Err(MlError::not_found(format!("artifact {}", path.display())));
    }
    let file = std::fs::File::open(path)?;
    let mut json = Vec::new();
    GzDecoder::new(file).read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}

/// Hex SHA-256 digest of a file's contents.
pub fn sha256_file(path: &Path) -> Result<String, MlError> {
    let data = std::fs::read(path)?;
    let digest = Sha256::digest(&data);
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}
