//! `exec`: run a command inside an already-running container, identified by
//! the same project/worktree identity `up` would derive, without going
//! through the launch sequence.

use crate::cli::ExecArgs;
use anyhow::{Context, Result};
use packnplay_core::identity::ContainerIdentity;
use packnplay_core::runtime::CliRuntimeClient;
use packnplay_core::workspace;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;

pub async fn run(args: ExecArgs) -> Result<()> {
    let raw_workspace = args.workspace_folder.clone().unwrap_or_else(|| PathBuf::from("."));
    let workspace_root = workspace::resolve_workspace_root(&raw_workspace)?;
    let project = workspace::project_name(&workspace_root);
    let worktree = super::worktree_label(&workspace_root);
    let identity = ContainerIdentity::new(project, worktree);
    let container_name = identity.container_name();

    let runtime = CliRuntimeClient::from_env();
    let mut exec_args = vec!["exec".to_string(), "-it".to_string()];
    if let Some(user) = &args.user {
        exec_args.push("-u".to_string());
        exec_args.push(user.clone());
    }
    exec_args.push(container_name);
    exec_args.extend(args.command.iter().cloned());

    let err = Command::new(runtime.command()).args(&exec_args).exec();
    Err(err).with_context(|| "failed to exec into container")
}
