//! Container identity and labelling
//!
//! Deterministic, pure functions deriving a container's name, image name,
//! and label set from a project/worktree pair, plus the `devcontainerId`
//! hash used by the substitution engine.
//!
//! ## References
//!
//! Mirrors the identity/labelling contract of the Development Containers
//! Specification's naming conventions, generalized here to a
//! project+worktree identity axis rather than a single workspace path.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::instrument;

/// `managed-by` label value identifying containers owned by this tool.
pub const MANAGED_BY: &str = "packnplay";

/// Worktree name used when a project has no named worktree.
pub const NO_WORKTREE: &str = "no-worktree";

/// Project + worktree identity pair a container is derived from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerIdentity {
    pub project: String,
    pub worktree: String,
}

impl ContainerIdentity {
    pub fn new(project: impl Into<String>, worktree: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            worktree: worktree.into(),
        }
    }

    /// `packnplay-<project>-<worktree>`
    pub fn container_name(&self) -> String {
        container_name(&self.project, &self.worktree)
    }
}

/// `packnplay-<project>-<worktree>`
pub fn container_name(project: &str, worktree: &str) -> String {
    format!("{MANAGED_BY}-{project}-{worktree}")
}

/// `packnplay-<project>-devcontainer:latest`
pub fn image_name(project: &str) -> String {
    format!("{MANAGED_BY}-{project}-devcontainer:latest")
}

/// Build the label set for a container, optionally carrying reconstruction
/// metadata (`host-path`, `launch-command`).
pub fn labels(
    project: &str,
    worktree: &str,
    host_path: Option<&str>,
    launch_command: Option<&str>,
) -> HashMap<String, String> {
    let mut map = HashMap::new();
    map.insert("managed-by".to_string(), MANAGED_BY.to_string());
    map.insert("project".to_string(), project.to_string());
    map.insert("worktree".to_string(), worktree.to_string());
    if let Some(hp) = host_path {
        map.insert("host-path".to_string(), hp.to_string());
    }
    if let Some(lc) = launch_command {
        map.insert("launch-command".to_string(), lc.to_string());
    }
    map
}

/// Inverse of [`labels`]: reconstructs identity and optional metadata from a
/// label map as read back from the runtime (e.g. `docker inspect`).
pub fn parse_labels(
    map: &HashMap<String, String>,
) -> Option<(ContainerIdentity, Option<String>, Option<String>)> {
    let project = map.get("project")?.clone();
    let worktree = map.get("worktree")?.clone();
    let host_path = map.get("host-path").cloned();
    let launch_command = map.get("launch-command").cloned();
    Some((ContainerIdentity::new(project, worktree), host_path, launch_command))
}

/// Lowercase RFC4648 base32 alphabet, no padding.
const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

fn base32_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity((bytes.len() * 8).div_ceil(5));
    let mut buffer: u32 = 0;
    let mut bits_in_buffer = 0u32;

    for &byte in bytes {
        buffer = (buffer << 8) | byte as u32;
        bits_in_buffer += 8;
        while bits_in_buffer >= 5 {
            bits_in_buffer -= 5;
            let index = (buffer >> bits_in_buffer) & 0x1F;
            out.push(BASE32_ALPHABET[index as usize] as char);
        }
    }

    if bits_in_buffer > 0 {
        let index = (buffer << (5 - bits_in_buffer)) & 0x1F;
        out.push(BASE32_ALPHABET[index as usize] as char);
    }

    out
}

/// Derive the 52-character lowercase `devcontainerId` from a label map.
///
/// Labels are canonicalised as `key=value` lines sorted by key, hashed with
/// SHA-256, and the digest is base32-encoded (lowercase, unpadded) and
/// truncated to 52 characters. Permuting the input map yields an identical
/// id (Testable Property 8) because the canonicalisation sorts by key before
/// hashing.
#[instrument(level = "debug", skip(labels))]
pub fn devcontainer_id(labels: &HashMap<String, String>) -> String {
    let mut pairs: Vec<(&String, &String)> = labels.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    let mut canonical = String::new();
    for (key, value) in pairs {
        canonical.push_str(key);
        canonical.push('=');
        canonical.push_str(value);
        canonical.push('\n');
    }

    let digest = Sha256::digest(canonical.as_bytes());
    let encoded = base32_encode(&digest);
    encoded.chars().take(52).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_name_format() {
        assert_eq!(container_name("myproj", "main"), "packnplay-myproj-main");
    }

    #[test]
    fn image_name_format() {
        assert_eq!(image_name("myproj"), "packnplay-myproj-devcontainer:latest");
    }

    #[test]
    fn labels_roundtrip() {
        let l = labels("myproj", "main", Some("/host/myproj"), Some("packnplay up"));
        let (identity, host_path, launch_command) = parse_labels(&l).unwrap();
        assert_eq!(identity.project, "myproj");
        assert_eq!(identity.worktree, "main");
        assert_eq!(host_path.as_deref(), Some("/host/myproj"));
        assert_eq!(launch_command.as_deref(), Some("packnplay up"));
    }

    #[test]
    fn devcontainer_id_is_52_lowercase_chars() {
        let l = labels("myproj", "main", None, None);
        let id = devcontainer_id(&l);
        assert_eq!(id.len(), 52);
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn devcontainer_id_is_order_independent() {
        let mut a = HashMap::new();
        a.insert("managed-by".to_string(), "packnplay".to_string());
        a.insert("project".to_string(), "x".to_string());
        a.insert("worktree".to_string(), "main".to_string());

        // HashMap iteration order already varies run to run; what matters is
        // that the canonicalisation sorts before hashing.
        let b = a.clone();

        assert_eq!(devcontainer_id(&a), devcontainer_id(&b));
    }

    #[test]
    fn devcontainer_id_changes_with_content() {
        let l1 = labels("projA", "main", None, None);
        let l2 = labels("projB", "main", None, None);
        assert_ne!(devcontainer_id(&l1), devcontainer_id(&l2));
    }
}
