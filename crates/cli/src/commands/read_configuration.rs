//! `read-configuration`: resolve `devcontainer.json` and print the
//! variable-substituted configuration as JSON, without touching the
//! runtime. Lets callers (editors, scripts) introspect what `up` would act
//! on — workspace folder, mounts, lifecycle commands — without launching
//! anything.

use crate::cli::ReadConfigurationArgs;
use anyhow::{Context, Result};
use packnplay_core::config::ConfigLoader;
use packnplay_core::identity::{self, ContainerIdentity};
use packnplay_core::variable::SubstitutionContext;
use packnplay_core::workspace;
use std::path::PathBuf;

pub async fn run(args: ReadConfigurationArgs) -> Result<()> {
    let raw_workspace = args.workspace_folder.clone().unwrap_or_else(|| PathBuf::from("."));
    let workspace_root = workspace::resolve_workspace_root(&raw_workspace)?;
    let project = workspace::project_name(&workspace_root);
    let worktree = super::worktree_label(&workspace_root);

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => ConfigLoader::discover_config(&workspace_root)?.path,
    };

    let identity = ContainerIdentity::new(project, worktree);
    let labels = identity::labels(&identity.project, &identity.worktree, Some(&workspace_root.to_string_lossy()), None);
    let devcontainer_id = identity::devcontainer_id(&labels);

    let config = ConfigLoader::load_from_path(&config_path)?;
    let ctx = SubstitutionContext::new(&workspace_root, config.workspace_folder.as_deref(), devcontainer_id);
    let config = config.apply_variable_substitution(&ctx);

    let json = serde_json::to_string_pretty(&config).context("serializing resolved configuration")?;
    println!("{json}");

    Ok(())
}
