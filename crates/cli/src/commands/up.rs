//! `up`: prepare the image, start or reuse the container, run lifecycle
//! hooks, and attach.

use crate::cli::UpArgs;
use anyhow::{Context, Result};
use packnplay_core::config::ConfigLoader;
use packnplay_core::feature_cache::{self, ReqwestClient};
use packnplay_core::feature_resolver::{self, FeatureInput};
use packnplay_core::features::{FeatureRef, OptionValue};
use packnplay_core::identity::{self, ContainerIdentity};
use packnplay_core::launch::{self, LaunchRequest, ReconnectPolicy};
use packnplay_core::lockfile;
use packnplay_core::runtime::CliRuntimeClient;
use packnplay_core::variable::SubstitutionContext;
use packnplay_core::workspace;
use std::collections::HashMap;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;
use tracing::{info, instrument};

#[instrument(skip(args))]
pub async fn run(args: UpArgs) -> Result<()> {
    let raw_workspace = args.workspace_folder.clone().unwrap_or_else(|| PathBuf::from("."));
    let workspace_root = workspace::resolve_workspace_root(&raw_workspace)?;
    let project = workspace::project_name(&workspace_root);
    let worktree = super::worktree_label(&workspace_root);
    let main_repo_git_path = workspace::main_repository_git_dir(&workspace_root)?;

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => ConfigLoader::discover_config(&workspace_root)?.path,
    };
    let config_dir = config_path.parent().unwrap_or(&workspace_root).to_path_buf();

    let identity = ContainerIdentity::new(project.clone(), worktree);
    let launch_command = Some(format!("packnplay up {}", raw_workspace.display()));
    let labels = identity::labels(
        &identity.project,
        &identity.worktree,
        Some(&workspace_root.to_string_lossy()),
        launch_command.as_deref(),
    );
    let devcontainer_id = identity::devcontainer_id(&labels);

    let config = ConfigLoader::load_from_path(&config_path)?;
    let ctx = SubstitutionContext::new(&workspace_root, config.workspace_folder.as_deref(), devcontainer_id);
    let config = config.apply_variable_substitution(&ctx);

    let lockfile_path = lockfile::get_lockfile_path(&config_path);
    let lockfile = lockfile::read_lockfile(&lockfile_path)?;

    let cache_root = cache_root_dir()?;
    let http_client = ReqwestClient::new();
    let mut inputs = Vec::new();
    for (reference, raw_options) in parse_features_map(&config.features) {
        let feature_ref = FeatureRef::parse(&reference);
        let install_path = feature_cache::materialize(
            &http_client,
            &cache_root,
            &workspace_root,
            &feature_ref,
            lockfile.as_ref(),
        )
        .await
        .with_context(|| format!("materializing feature {reference}"))?;
        inputs.push(FeatureInput::from_install_path(&install_path, raw_options));
    }
    let ordered_features = feature_resolver::resolve(inputs, &config.override_feature_install_order)?;

    let runtime = CliRuntimeClient::from_env();
    let reconnect = if args.reconnect { ReconnectPolicy::Reconnect } else { ReconnectPolicy::Fail };

    let request = LaunchRequest {
        config: &config,
        config_dir: &config_dir,
        identity,
        host_path: workspace_root.clone(),
        main_repo_git_path,
        ordered_features: &ordered_features,
        explicit_env: args.env.clone(),
        explicit_ports: args.port.clone(),
        aws_capability_enabled: args.aws,
        extra_credential_mounts: Vec::new(),
        reconnect,
        launch_command,
    };

    let container_name = launch::launch(request, &runtime).await?;
    info!(container = %container_name, "attaching");

    attach(&runtime.command().to_string(), &container_name, &args.command)
}

/// Replace the current process with the runtime's `exec`, so the caller's
/// command inherits this process's stdio directly (§4.K ATTACHED).
fn attach(runtime_binary: &str, container_name: &str, command: &[String]) -> Result<()> {
    let mut exec_args = vec!["exec".to_string(), "-it".to_string(), container_name.to_string()];
    if command.is_empty() {
        exec_args.push("sh".to_string());
    } else {
        exec_args.extend(command.iter().cloned());
    }

    let err = Command::new(runtime_binary).args(&exec_args).exec();
    Err(err).with_context(|| "failed to exec into container")
}

fn parse_features_map(value: &serde_json::Value) -> Vec<(String, HashMap<String, OptionValue>)> {
    let mut out = Vec::new();
    if let serde_json::Value::Object(map) = value {
        for (reference, raw) in map {
            let options = match raw {
                serde_json::Value::Object(_) => serde_json::from_value(raw.clone()).unwrap_or_default(),
                _ => HashMap::new(),
            };
            out.push((reference.clone(), options));
        }
    }
    out
}

fn cache_root_dir() -> Result<PathBuf> {
    directories_next::ProjectDirs::from("", "", "packnplay")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .context("could not determine a cache directory for this platform")
}
