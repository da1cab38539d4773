use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Launch and attach to project development containers.
#[derive(Parser, Debug)]
#[command(name = env!("CARGO_PKG_NAME"), version, about = "Launch and attach to devcontainer-described development containers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Prepare the image, start or reuse the container, run lifecycle
    /// hooks, and attach.
    Up(UpArgs),
    /// Run a command inside an already-running container without going
    /// through the launch sequence.
    Exec(ExecArgs),
    /// Resolve devcontainer.json and print the substituted configuration
    /// as JSON, without touching the runtime.
    ReadConfiguration(ReadConfigurationArgs),
}

#[derive(Parser, Debug)]
pub struct UpArgs {
    /// Workspace directory to launch. Defaults to the current directory.
    #[arg(long)]
    pub workspace_folder: Option<PathBuf>,

    /// Path to devcontainer.json, overriding discovery.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Reconnect to an already-running container instead of failing.
    #[arg(long)]
    pub reconnect: bool,

    /// Forward AWS credentials from the host environment.
    #[arg(long)]
    pub aws: bool,

    /// Additional `-e KEY=VALUE` environment overrides, applied last.
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Additional explicit port mappings, applied after `forwardPorts`.
    #[arg(long = "port", value_name = "SPEC")]
    pub port: Vec<String>,

    /// Command to run once attached. Defaults to an interactive shell.
    #[arg(trailing_var_arg = true)]
    pub command: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct ReadConfigurationArgs {
    /// Workspace directory to resolve. Defaults to the current directory.
    #[arg(long)]
    pub workspace_folder: Option<PathBuf>,

    /// Path to devcontainer.json, overriding discovery.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct ExecArgs {
    /// Workspace directory identifying the target container. Defaults to
    /// the current directory.
    #[arg(long)]
    pub workspace_folder: Option<PathBuf>,

    /// User to run the command as, overriding the container's configured
    /// remote user.
    #[arg(long)]
    pub user: Option<String>,

    /// Command to execute inside the container.
    #[arg(trailing_var_arg = true, required = true)]
    pub command: Vec<String>,
}
