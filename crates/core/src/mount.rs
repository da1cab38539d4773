//! Mount assembly (§4.K)
//!
//! Configuration-declared mounts are opaque, already-substituted strings
//! passed straight through to the runtime as `--mount` arguments. This
//! module's job is composing the Launch Controller's own structural mounts
//! (project, `.git`, workspace) alongside those opaque strings, in the
//! fixed order the start-argument assembly requires.

use std::path::Path;

/// One structural mount the Launch Controller assembles itself, as opposed
/// to an opaque string taken verbatim from configuration or a feature.
#[derive(Debug, Clone, PartialEq)]
pub struct BindMount {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

impl BindMount {
    pub fn new(source: impl Into<String>, target: impl Into<String>, read_only: bool) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only,
        }
    }

    /// Render as a `--mount type=bind,source=...,target=...[,readonly]`
    /// argument value.
    pub fn to_arg(&self) -> String {
        let mut arg = format!("type=bind,source={},target={}", self.source, self.target);
        if self.read_only {
            arg.push_str(",readonly");
        }
        arg
    }
}

/// The project mount: `<host_path>:<host_path>` read-write, preserving the
/// host path inside the container so tools embedding absolute paths keep
/// working.
pub fn project_mount(host_path: &Path) -> BindMount {
    let path = host_path.to_string_lossy().to_string();
    BindMount::new(path.clone(), path, false)
}

/// The main repository's real `.git` directory, mounted at the same
/// absolute location, for worktree checkouts where git metadata lives
/// outside the worktree itself.
pub fn git_mount(main_repo_git_path: &Path) -> BindMount {
    let path = main_repo_git_path.to_string_lossy().to_string();
    BindMount::new(path.clone(), path, false)
}

/// Render a list of structural mounts followed by opaque, already
/// substituted configuration/feature mount strings into `--mount <value>`
/// flag pairs, in the order the caller provides them.
pub fn mount_args(structural: &[BindMount], opaque: &[String]) -> Vec<String> {
    let mut args = Vec::with_capacity((structural.len() + opaque.len()) * 2);
    for mount in structural {
        args.push("--mount".to_string());
        args.push(mount.to_arg());
    }
    for raw in opaque {
        args.push("--mount".to_string());
        args.push(raw.clone());
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn project_mount_preserves_host_path_both_sides() {
        let mount = project_mount(&PathBuf::from("/home/user/myproj"));
        assert_eq!(mount.source, "/home/user/myproj");
        assert_eq!(mount.target, "/home/user/myproj");
        assert!(!mount.read_only);
    }

    #[test]
    fn bind_mount_arg_rendering() {
        let mount = BindMount::new("/src", "/dst", true);
        assert_eq!(mount.to_arg(), "type=bind,source=/src,target=/dst,readonly");
    }

    #[test]
    fn mount_args_structural_before_opaque() {
        let structural = vec![project_mount(&PathBuf::from("/work/proj"))];
        let opaque = vec!["type=volume,source=cache,target=/cache".to_string()];
        let args = mount_args(&structural, &opaque);
        assert_eq!(
            args,
            vec![
                "--mount".to_string(),
                "type=bind,source=/work/proj,target=/work/proj".to_string(),
                "--mount".to_string(),
                "type=volume,source=cache,target=/cache".to_string(),
            ]
        );
    }
}
