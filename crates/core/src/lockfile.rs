//! `devcontainer-lock.json` reading and writing
//!
//! Tracks resolved feature versions so a launch can pin a mutable OCI tag to
//! the digest it previously resolved to.
//!
//! ## Path derivation
//!
//! Lockfile name follows the config file's basename convention: a config
//! starting with `.` gets `.devcontainer-lock.json`; otherwise
//! `devcontainer-lock.json`. Always in the same directory as the config
//! file.

use crate::errors::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A single feature's pinned resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockEntry {
    pub version: String,
    pub resolved: String,
}

/// `devcontainer-lock.json`'s full shape.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LockFile {
    #[serde(default)]
    pub features: HashMap<String, LockEntry>,
}

/// Derive the lockfile path that sits alongside a given config file.
pub fn get_lockfile_path(config_path: &Path) -> PathBuf {
    let dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = config_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("devcontainer.json");

    let lockfile_name = if file_name.starts_with('.') {
        ".devcontainer-lock.json"
    } else {
        "devcontainer-lock.json"
    };

    dir.join(lockfile_name)
}

/// Read and parse a lockfile. Returns `Ok(None)` if the file doesn't exist.
pub fn read_lockfile(path: &Path) -> Result<Option<LockFile>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
    let lockfile: LockFile = serde_json::from_str(&content).map_err(|e| ConfigError::Parsing {
        message: format!("failed to parse lockfile: {e}"),
    })?;
    debug!("loaded lockfile with {} feature entries", lockfile.features.len());
    Ok(Some(lockfile))
}

/// Write a lockfile atomically (write to a sibling temp file, then rename).
pub fn write_lockfile(path: &Path, lockfile: &LockFile) -> Result<()> {
    let json = serde_json::to_string_pretty(lockfile).map_err(|e| ConfigError::Validation {
        message: format!("failed to serialize lockfile: {e}"),
    })?;

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, json).map_err(ConfigError::Io)?;
    std::fs::rename(&tmp_path, path).map_err(ConfigError::Io)?;
    Ok(())
}
