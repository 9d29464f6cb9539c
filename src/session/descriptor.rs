//! Discovery descriptors: one JSON file per session, named by content hash.

use super::types::ConnectionDescriptor;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("Descriptor I/O failed for {path}: {source}")]
    Io { path: String, source: io::Error },

    #[error("Malformed descriptor {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("No descriptor for session {0}")]
    NotFound(String),

    #[error("Descriptor {path} names session {found}, expected {expected}")]
    HashMismatch {
        path: String,
        expected: String,
        found: String,
    },
}

fn io_error(path: &Path, source: io::Error) -> DescriptorError {
    DescriptorError::Io {
        path: path.display().to_string(),
        source,
    }
}

pub fn descriptor_path(dir: &Path, content_hash: &str) -> PathBuf {
    dir.join(format!("{}.json", content_hash.to_ascii_lowercase()))
}

/// Publish a descriptor.
///
/// An identical existing file is left untouched; otherwise the file is
/// replaced atomically.
pub fn write_descriptor(
    dir: &Path,
    descriptor: &ConnectionDescriptor,
) -> Result<PathBuf, DescriptorError> {
    fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;
    let path = descriptor_path(dir, &descriptor.content_hash);

    if let Ok(existing) = read_descriptor(&path) {
        if &existing == descriptor {
            debug!(path = %path.display(), "Descriptor unchanged");
            return Ok(path);
        }
    }

    let text = serde_json::to_string_pretty(descriptor).map_err(|source| {
        DescriptorError::Parse {
            path: path.display().to_string(),
            source,
        }
    })?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, text).map_err(|e| io_error(&tmp, e))?;
    fs::rename(&tmp, &path).map_err(|e| io_error(&path, e))?;
    Ok(path)
}

pub fn read_descriptor(path: &Path) -> Result<ConnectionDescriptor, DescriptorError> {
    let text = fs::read_to_string(path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            DescriptorError::NotFound(path.display().to_string())
        } else {
            io_error(path, e)
        }
    })?;
    serde_json::from_str(&text).map_err(|source| DescriptorError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Look up the descriptor of the session with `content_hash`.
pub fn find_descriptor(
    dir: &Path,
    content_hash: &str,
) -> Result<ConnectionDescriptor, DescriptorError> {
    let path = descriptor_path(dir, content_hash);
    let descriptor = read_descriptor(&path)?;
    if !descriptor.content_hash.eq_ignore_ascii_case(content_hash) {
        return Err(DescriptorError::HashMismatch {
            path: path.display().to_string(),
            expected: content_hash.to_string(),
            found: descriptor.content_hash,
        });
    }
    Ok(descriptor)
}

/// All readable descriptors in `dir`, sorted by content hash.
///
/// Unreadable entries are skipped with a warning.
pub fn list_descriptors(dir: &Path) -> Result<Vec<ConnectionDescriptor>, DescriptorError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error(dir, e)),
    };

    let mut descriptors = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| io_error(dir, e))?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        match read_descriptor(&path) {
            Ok(descriptor) => descriptors.push(descriptor),
            Err(e) => warn!(error = %e, "Skipping descriptor"),
        }
    }
    descriptors.sort_by(|a, b| a.content_hash.cmp(&b.content_hash));
    Ok(descriptors)
}
