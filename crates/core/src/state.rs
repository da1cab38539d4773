//! Lifecycle state store
//!
//! Persists, per container id, which lifecycle phases have run and with
//! which command-content hash, so that one-shot phases (`onCreate`,
//! `updateContent`, `postCreate`, `postAttach`) do not re-run across
//! reconnects unless their command content changes, while `postStart`
//! always runs.
//!
//! Storage layout: one JSON file per container id under
//! `${XDG_DATA_HOME:-$HOME/.local/share}/packnplay/metadata/<container_id>.json`,
//! mode 0644, directory created on demand (0755). A missing file is an
//! empty record; a malformed file is a hard error — the store never
//! silently resets state out from under a caller.

use crate::errors::{Result, StateError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// The five lifecycle phases tracked by the state store. `initialize` runs
/// on the host before a container exists and is never recorded here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    OnCreate,
    UpdateContent,
    PostCreate,
    PostStart,
    PostAttach,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::OnCreate => "onCreate",
            Phase::UpdateContent => "updateContent",
            Phase::PostCreate => "postCreate",
            Phase::PostStart => "postStart",
            Phase::PostAttach => "postAttach",
        }
    }
}

/// Record of one phase's last execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseRecord {
    pub executed: bool,
    pub timestamp: DateTime<Utc>,
    pub command_hash: String,
}

/// Persisted lifecycle state for one container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LifecycleState {
    pub container_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub lifecycle_ran: HashMap<String, PhaseRecord>,
}

impl LifecycleState {
    fn new(container_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            container_id: container_id.to_string(),
            created_at: now,
            updated_at: now,
            lifecycle_ran: HashMap::new(),
        }
    }
}

/// SHA-256 of the canonical (sorted-keys) JSON re-serialization of a
/// command's raw payload. Identical for semantically equal commands built
/// two different ways, because it hashes the canonicalized value, not the
/// original source text (Testable Property 7).
pub fn command_hash(payload: &serde_json::Value) -> String {
    let canonical = canonicalize(payload);
    let serialized = serde_json::to_string(&canonical).unwrap_or_default();
    let digest = Sha256::digest(serialized.as_bytes());
    format!("{digest:x}")
}

fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted: Vec<(&String, &serde_json::Value)> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), canonicalize(v));
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

/// Whether a phase should run, given its prior record (Testable Property 6).
///
/// | phase | command nil | no prior record | prior hash matches | prior hash differs |
/// |---|---|---|---|---|
/// | `postStart` | false | true | true | true |
/// | others | false | true | false | true |
pub fn should_run(phase: Phase, command_present: bool, prior: Option<&PhaseRecord>, new_hash: &str) -> bool {
    if !command_present {
        return false;
    }
    if phase == Phase::PostStart {
        return true;
    }
    match prior {
        None => true,
        Some(record) => record.command_hash != new_hash,
    }
}

/// Root directory for lifecycle state files:
/// `${XDG_DATA_HOME:-$HOME/.local/share}/packnplay/metadata`.
pub fn metadata_dir() -> Result<PathBuf> {
    let dirs = directories_next::ProjectDirs::from("", "", "packnplay").ok_or_else(|| {
        StateError::Corrupt {
            path: "<unresolvable>".to_string(),
            message: "could not determine a data directory for this platform".to_string(),
        }
    })?;
    Ok(dirs.data_dir().join("metadata"))
}

fn state_path(container_id: &str) -> Result<PathBuf> {
    Ok(metadata_dir()?.join(format!("{container_id}.json")))
}

/// Per-process store guarding read-modify-write of the on-disk lifecycle
/// state files. Cross-process contention (two independent `packnplay`
/// invocations) is resolved by full-file overwrite: the last writer wins,
/// which is acceptable because a single Launch Controller instance owns a
/// given container's hook execution for the duration of one launch.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, container_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(container_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Load the persisted state for `container_id`, or an empty record if
    /// no file exists yet.
    #[instrument(skip(self))]
    pub async fn load(&self, container_id: &str) -> Result<LifecycleState> {
        let path = state_path(container_id)?;
        read_state(&path, container_id)
    }

    /// Determine whether `phase` should run for `command`, without
    /// persisting anything.
    pub async fn should_run(
        &self,
        container_id: &str,
        phase: Phase,
        command: Option<&serde_json::Value>,
    ) -> Result<bool> {
        let state = self.load(container_id).await?;
        let present = command.is_some();
        let hash = command.map(command_hash).unwrap_or_default();
        let prior = state.lifecycle_ran.get(phase.as_str());
        Ok(should_run(phase, present, prior, &hash))
    }

    /// Record a successful execution of `phase` with `command`'s hash.
    #[instrument(skip(self, command))]
    pub async fn record_success(
        &self,
        container_id: &str,
        phase: Phase,
        command: &serde_json::Value,
    ) -> Result<()> {
        let guard = self.lock_for(container_id).await;
        let _permit = guard.lock().await;

        let path = state_path(container_id)?;
        let mut state = read_state(&path, container_id)?;
        let now = Utc::now();
        state.updated_at = now;
        state.lifecycle_ran.insert(
            phase.as_str().to_string(),
            PhaseRecord {
                executed: true,
                timestamp: now,
                command_hash: command_hash(command),
            },
        );
        write_state(&path, &state)
    }

    /// Remove all persisted state for `container_id` (external cleanup on
    /// container removal; not performed automatically by the core).
    pub async fn clear(&self, container_id: &str) -> Result<()> {
        let path = state_path(container_id)?;
        if path.exists() {
            std::fs::remove_file(&path).map_err(StateError::Io)?;
        }
        Ok(())
    }
}

fn read_state(path: &Path, container_id: &str) -> Result<LifecycleState> {
    if !path.exists() {
        debug!(container_id, "no lifecycle state file yet, starting empty");
        return Ok(LifecycleState::new(container_id, Utc::now()));
    }

    let content = std::fs::read_to_string(path).map_err(StateError::Io)?;
    serde_json::from_str(&content).map_err(|e| {
        StateError::Corrupt {
            path: path.display().to_string(),
            message: e.to_string(),
        }
        .into()
    })
}

fn write_state(path: &Path, state: &LifecycleState) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(StateError::Io)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(meta) = std::fs::metadata(parent) {
                let mut perms = meta.permissions();
                perms.set_mode(0o755);
                let _ = std::fs::set_permissions(parent, perms);
            }
        }
    }

    let serialized = serde_json::to_string_pretty(state).map_err(StateError::Serde)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serialized).map_err(StateError::Io)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o644));
    }

    std::fs::rename(&tmp, path).map_err(StateError::Io)?;
    Ok(())
}
