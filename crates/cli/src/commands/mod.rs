//! Subcommand implementations.

pub mod exec;
pub mod read_configuration;
pub mod up;

use packnplay_core::identity;
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// The worktree label identifying a container alongside its project name:
/// the current git branch, or [`identity::NO_WORKTREE`] outside a git
/// repository or on detached HEAD. Resolving this from version control is
/// the caller's job — the core only ever consumes the resulting label.
pub fn worktree_label(workspace_root: &Path) -> String {
    let output = Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .current_dir(workspace_root)
        .output();

    match output {
        Ok(output) if output.status.success() => {
            let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if branch.is_empty() || branch == "HEAD" {
                identity::NO_WORKTREE.to_string()
            } else {
                branch
            }
        }
        _ => {
            debug!("not a git worktree or git unavailable, using no-worktree label");
            identity::NO_WORKTREE.to_string()
        }
    }
}
