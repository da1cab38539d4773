//! Launch Controller (§4.K)
//!
//! Orchestrates components A–J behind one state machine:
//! `Init → PreparedImage → (Reuse | FreshStart) → Hooks → Attached`.
//! The transition logic lives in [`launch`]; the thirteen-step
//! start-argument assembly is split into the pure [`assemble_run_args`] so
//! its ordering is unit-testable without a runtime.

use crate::config::DevContainerConfig;
use crate::errors::{DockerError, PacknplayError, Result};
use crate::feature_resolver::ResolvedFeature;
use crate::identity::{self, ContainerIdentity};
use crate::image_preparer;
use crate::lifecycle::executor::LifecycleExecutor;
use crate::lifecycle::merger::merge_phase;
use crate::mount::{self, BindMount};
use crate::ports;
use crate::runtime::RuntimeClient;
use crate::secrets;
use crate::state::Phase;
use crate::text::boxing::boxed_section;
use crate::user_detection;
use crate::variable::{resolve_environment, SubstitutionContext};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// States of one launch, per §4.K.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    Init,
    PreparedImage,
    Reuse,
    FreshStart,
    Hooks,
    Attached,
}

/// Whether a container of the target name already exists, and if so, in
/// what state. The runtime never tells the core more than exit status and
/// text, so a failed `inspect` is read as "absent" rather than as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExistingContainer {
    Running,
    Stopped,
    Absent,
}

/// The runtime's own identifier for the container named `name`, stable
/// across restarts but distinct after the container is removed and
/// recreated — unlike `name`, which is deterministic from project+worktree
/// and identical before and after recreation. This is what the Lifecycle
/// State Store keys on, so a fresh container never inherits a stale
/// predecessor's recorded phase hashes.
async fn container_id_of<R: RuntimeClient>(runtime: &R, name: &str) -> Result<String> {
    let output = runtime
        .run(&[
            "inspect".to_string(),
            "--format".to_string(),
            "{{.Id}}".to_string(),
            name.to_string(),
        ])
        .await?;
    if !output.success() {
        return Err(DockerError::CommandFailed { message: output.stderr }.into());
    }
    Ok(output.stdout.trim().to_string())
}

#[instrument(skip(runtime))]
async fn existing_container<R: RuntimeClient>(runtime: &R, name: &str) -> Result<ExistingContainer> {
    let output = runtime
        .run(&[
            "inspect".to_string(),
            "--format".to_string(),
            "{{.State.Running}}".to_string(),
            name.to_string(),
        ])
        .await?;

    if !output.success() {
        return Ok(ExistingContainer::Absent);
    }

    if output.stdout.trim() == "true" {
        Ok(ExistingContainer::Running)
    } else {
        Ok(ExistingContainer::Stopped)
    }
}

/// What the caller wants to happen when a container of this name is already
/// running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Fail with `ContainerAlreadyRunning` carrying a reconstructed
    /// reconnect/stop one-liner.
    Fail,
    /// Attach to the running container, skipping image/start steps.
    Reconnect,
}

/// Everything the Launch Controller needs to run one launch end to end,
/// already resolved by the caller: configuration, its directory, the
/// identity axis, the host mount path, and the feature installation plan.
pub struct LaunchRequest<'a> {
    pub config: &'a DevContainerConfig,
    pub config_dir: &'a Path,
    pub identity: ContainerIdentity,
    pub host_path: PathBuf,
    pub main_repo_git_path: Option<PathBuf>,
    pub ordered_features: &'a [ResolvedFeature],
    pub explicit_env: Vec<String>,
    pub explicit_ports: Vec<String>,
    pub aws_capability_enabled: bool,
    pub extra_credential_mounts: Vec<BindMount>,
    pub reconnect: ReconnectPolicy,
    pub launch_command: Option<String>,
}

/// Aggregate feature-contributed run properties (§4.K step 11). Booleans
/// OR across features; cap-add/security-opt/mounts accumulate; entrypoint
/// is last-feature-wins with a warning if more than one feature sets it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureContributions {
    pub privileged: bool,
    pub cap_add: Vec<String>,
    pub security_opt: Vec<String>,
    pub init: bool,
    pub entrypoint: Option<Vec<String>>,
    pub mounts: Vec<String>,
}

pub fn collect_feature_contributions(ordered_features: &[ResolvedFeature]) -> FeatureContributions {
    let mut out = FeatureContributions::default();
    let mut entrypoint_sources = 0u32;

    for feature in ordered_features {
        let metadata = &feature.metadata;
        if metadata.privileged == Some(true) {
            out.privileged = true;
        }
        if metadata.init == Some(true) {
            out.init = true;
        }
        out.cap_add.extend(metadata.cap_add.iter().cloned());
        out.security_opt.extend(metadata.security_opt.iter().cloned());
        out.mounts.extend(metadata.mounts.iter().cloned());
        if let Some(argv) = metadata.entrypoint_argv() {
            entrypoint_sources += 1;
            out.entrypoint = Some(argv);
        }
    }

    if entrypoint_sources > 1 {
        warn!(count = entrypoint_sources, "multiple features set an entrypoint; last one wins");
    }

    out
}

/// Safe terminal/locale variables forwarded from the host, in a fixed
/// order: `TERM`, `LANG`, `COLORTERM`, then any `LC_*` variable present,
/// sorted by name.
fn locale_env_vars() -> Vec<(String, String)> {
    let mut out = Vec::new();
    for name in ["TERM", "LANG", "COLORTERM"] {
        if let Ok(value) = std::env::var(name) {
            out.push((name.to_string(), value));
        }
    }

    let mut lc_vars: Vec<(String, String)> = std::env::vars().filter(|(k, _)| k.starts_with("LC_")).collect();
    lc_vars.sort_by(|a, b| a.0.cmp(&b.0));
    out.extend(lc_vars);

    out
}

/// A fully resolved plan for [`assemble_run_args`]: every field already
/// substituted, ordered, and normalized — the function itself does no
/// further resolution, only CLI-flag emission.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub image: String,
    pub identity: ContainerIdentity,
    pub host_path: PathBuf,
    pub host_path_label: Option<String>,
    pub launch_command_label: Option<String>,
    pub structural_mounts: Vec<BindMount>,
    pub config_mounts: Vec<String>,
    pub remote_user: Option<String>,
    pub container_env: IndexMap<String, String>,
    pub remote_env: IndexMap<String, Option<String>>,
    pub explicit_env: Vec<String>,
    pub forward_ports: Vec<String>,
    pub explicit_ports: Vec<String>,
    pub run_args: Vec<String>,
    pub features: FeatureContributions,
    pub aws_capability_enabled: bool,
}

/// A mount value from `config.mounts`/feature mounts, already substituted,
/// rendered into a `--mount <value>` ready string. Object-shaped mounts
/// carry `type`/`source`/`target`/`readonly` in that key order; anything
/// else passes through the caller's literal string.
pub fn mount_value_to_arg(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(map) => {
            let mut parts = Vec::new();
            for key in ["type", "source", "target"] {
                if let Some(v) = map.get(key).and_then(|v| v.as_str()) {
                    parts.push(format!("{key}={v}"));
                }
            }
            if map.get("readonly").and_then(|v| v.as_bool()) == Some(true) {
                parts.push("readonly".to_string());
            }
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(","))
            }
        }
        _ => None,
    }
}

/// Assemble the full `run` argument vector, in the thirteen-step order
/// §4.K's start-argument assembly specifies.
pub fn assemble_run_args(plan: &LaunchPlan) -> Vec<String> {
    let mut args = vec!["run".to_string(), "-d".to_string()];

    // 2. Identity label flags.
    let labels = identity::labels(
        &plan.identity.project,
        &plan.identity.worktree,
        plan.host_path_label.as_deref(),
        plan.launch_command_label.as_deref(),
    );
    let mut label_keys: Vec<&String> = labels.keys().collect();
    label_keys.sort();
    for key in label_keys {
        args.push("--label".to_string());
        args.push(format!("{key}={}", labels[key]));
    }

    // 3. Name.
    args.push("--name".to_string());
    args.push(plan.identity.container_name());

    // 4. Mounts: project, optional .git, optional WorkspaceMount.
    args.extend(mount::mount_args(&plan.structural_mounts, &[]));

    // 5. Working directory.
    args.push("-w".to_string());
    args.push(plan.host_path.to_string_lossy().to_string());

    // 6. Environment.
    for (key, value) in locale_env_vars() {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }
    if let Some(user) = &plan.remote_user {
        args.push("-e".to_string());
        args.push(format!("HOME=/home/{user}"));
    }
    args.push("-e".to_string());
    args.push("IS_SANDBOX=1".to_string());
    for (key, value) in secrets::proxied_env_vars() {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }
    for (key, value) in secrets::aws_env_vars(plan.aws_capability_enabled) {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }
    let mut container_env_keys: Vec<&String> = plan.container_env.keys().collect();
    container_env_keys.sort();
    for key in container_env_keys {
        args.push("-e".to_string());
        args.push(format!("{key}={}", plan.container_env[key]));
    }
    for (key, value) in &plan.remote_env {
        if let Some(value) = value {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
    }
    for flag in &plan.explicit_env {
        args.push("--env".to_string());
        args.push(flag.clone());
    }

    // 7. Ports.
    args.extend(ports::port_args(&plan.forward_ports, &plan.explicit_ports));

    // 8. config.mounts.
    for value in &plan.config_mounts {
        args.push("--mount".to_string());
        args.push(value.clone());
    }

    // 9. --user.
    if let Some(user) = &plan.remote_user {
        args.push("--user".to_string());
        args.push(user.clone());
    }

    // 10. run_args.
    args.extend(plan.run_args.iter().cloned());

    // 11. Feature-contributed properties.
    if plan.features.privileged {
        args.push("--privileged".to_string());
    }
    for cap in &plan.features.cap_add {
        args.push(format!("--cap-add={cap}"));
    }
    for opt in &plan.features.security_opt {
        args.push(format!("--security-opt={opt}"));
    }
    if plan.features.init {
        args.push("--init".to_string());
    }
    if let Some(entrypoint) = &plan.features.entrypoint {
        args.push(format!("--entrypoint={}", entrypoint.join(" ")));
    }
    for mount in &plan.features.mounts {
        args.push("--mount".to_string());
        args.push(mount.clone());
    }

    // 12. Image name.
    args.push(plan.image.clone());

    // 13. Trailing keep-alive command, trapping the stop signal.
    args.extend(keep_alive_command());

    args
}

/// A foreground shell loop that blocks until the runtime's stop signal
/// arrives, then exits cleanly rather than leaving the container to be
/// force-killed.
fn keep_alive_command() -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        "trap 'exit 0' TERM INT; while true; do sleep 3600 & wait; done".to_string(),
    ]
}

/// Build the `AlreadyRunning` user-visible message: a boxed summary plus a
/// ready-to-copy reconnect command and stop command.
pub fn already_running_message(
    identity: &ContainerIdentity,
    host_path: Option<&str>,
    launch_command: Option<&str>,
    runtime_command: &str,
) -> String {
    let name = identity.container_name();
    let mut content = format!(
        "name: {name}\nstatus: running\nproject: {}\nworktree: {}",
        identity.project, identity.worktree
    );
    if let Some(hp) = host_path {
        content.push_str(&format!("\nhost-path: {hp}"));
    }
    if let Some(lc) = launch_command {
        content.push_str(&format!("\nlaunch-command: {lc}"));
    }
    content.push_str(&format!(
        "\n\nreconnect: {runtime_command} exec -it {name} sh\nstop:      {runtime_command} stop {name}"
    ));
    boxed_section("Already running", &content)
}

/// Drive one launch end to end: ensure the image, decide reuse vs. fresh
/// start, run the appropriate lifecycle phases, and return the container
/// name ready for the caller to `exec` into.
#[instrument(skip(request, runtime), fields(project = %request.identity.project, worktree = %request.identity.worktree))]
pub async fn launch<R: RuntimeClient + Clone + 'static>(request: LaunchRequest<'_>, runtime: &R) -> Result<String> {
    // INIT: base already decided by configuration; nothing further to
    // validate here beyond what `DevContainerConfig` already enforced.

    // PREPARED_IMAGE.
    let image = image_preparer::prepare(
        request.config,
        &request.identity.project,
        request.config_dir,
        request.ordered_features,
        runtime,
    )
    .await?;

    let remote_user = match &request.config.remote_user {
        Some(user) => Some(user.clone()),
        None => Some(user_detection::detect_remote_user(runtime, &image).await?),
    };

    let name = request.identity.container_name();

    // REUSE vs FRESH_START.
    let state = existing_container(runtime, &name).await?;
    let launch_state = match state {
        ExistingContainer::Running => match request.reconnect {
            ReconnectPolicy::Reconnect => LaunchState::Reuse,
            ReconnectPolicy::Fail => {
                return Err(PacknplayError::ContainerAlreadyRunning(already_running_message(
                    &request.identity,
                    Some(&request.host_path.to_string_lossy()),
                    request.launch_command.as_deref(),
                    runtime.command(),
                )));
            }
        },
        ExistingContainer::Stopped => {
            info!(name = %name, "removing stopped container of the same name");
            let _ = runtime
                .run(&["rm".to_string(), "-f".to_string(), name.clone()])
                .await;
            LaunchState::FreshStart
        }
        ExistingContainer::Absent => LaunchState::FreshStart,
    };

    let container_id = if launch_state == LaunchState::FreshStart {
        start_fresh(&request, runtime, &image, remote_user.as_deref(), &name).await?
    } else {
        container_id_of(runtime, &name).await?
    };

    // HOOKS. The Lifecycle State Store is keyed by the runtime's own
    // container id, not `name`: a recreated container reuses the same
    // name but gets a fresh id, so a stale onCreate record never survives
    // removal and recreation (see DESIGN.md's container-identity note).
    let executor = LifecycleExecutor::new(runtime.clone(), container_id, remote_user.clone(), false);
    let cancel = CancellationToken::new();

    if launch_state == LaunchState::FreshStart {
        run_hook(&executor, Phase::OnCreate, request.config, request.ordered_features, &cancel).await?;
        run_hook(&executor, Phase::UpdateContent, request.config, request.ordered_features, &cancel).await?;
        run_hook(&executor, Phase::PostCreate, request.config, request.ordered_features, &cancel).await?;
    }
    run_hook(&executor, Phase::PostStart, request.config, request.ordered_features, &cancel).await?;
    run_hook(&executor, Phase::PostAttach, request.config, request.ordered_features, &cancel).await?;

    // ATTACHED is the caller's responsibility: it owns process replacement
    // (exec), which this crate does not perform on the caller's behalf.
    Ok(name)
}

/// Run one phase's merged command. Per §7's error taxonomy, a `HookFailed`/
/// `ParallelFailures` is best-effort beyond `onCreate`: the controller "owns"
/// the container once it creates it, so a failed `onCreate` aborts the
/// launch before reaching ATTACHED, but every later phase only logs a
/// warning and lets the attach proceed (see DESIGN.md's Open Question
/// decision).
async fn run_hook<R: RuntimeClient + 'static>(
    executor: &LifecycleExecutor<R>,
    phase: Phase,
    config: &DevContainerConfig,
    ordered_features: &[ResolvedFeature],
    cancel: &CancellationToken,
) -> Result<()> {
    let user_command = match phase {
        Phase::OnCreate => config.on_create_command.as_ref(),
        Phase::UpdateContent => config.update_content_command.as_ref(),
        Phase::PostCreate => config.post_create_command.as_ref(),
        Phase::PostStart => config.post_start_command.as_ref(),
        Phase::PostAttach => config.post_attach_command.as_ref(),
    };
    let merged = merge_phase(phase, ordered_features, user_command);
    match executor.run_phase(phase, merged.as_ref(), cancel).await {
        Ok(()) => Ok(()),
        Err(e) if phase == Phase::OnCreate => Err(e.into()),
        Err(e) => {
            warn!(phase = phase.as_str(), error = ?PacknplayError::from(e), "lifecycle phase failed; continuing to attach");
            Ok(())
        }
    }
}

async fn start_fresh<R: RuntimeClient>(
    request: &LaunchRequest<'_>,
    runtime: &R,
    image: &str,
    remote_user: Option<&str>,
    name: &str,
) -> Result<String> {
    let devcontainer_id = identity::devcontainer_id(&identity::labels(
        &request.identity.project,
        &request.identity.worktree,
        Some(&request.host_path.to_string_lossy()),
        request.launch_command.as_deref(),
    ));

    let mut ctx = SubstitutionContext::new(&request.host_path, request.config.workspace_folder.as_deref(), devcontainer_id);

    let container_env: IndexMap<String, String> = request.config.container_env.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    let remote_env: IndexMap<String, Option<String>> = request.config.remote_env.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    let (resolved_container_env, resolved_remote_env) = resolve_environment(&mut ctx, &container_env, &remote_env);

    let mut structural_mounts = vec![mount::project_mount(&request.host_path)];
    if let Some(git_path) = &request.main_repo_git_path {
        structural_mounts.push(mount::git_mount(git_path));
    }
    if let Some(workspace_mount) = &request.config.workspace_mount {
        if request.config.workspace_folder.is_none() {
            return Err(crate::errors::ConfigError::Validation {
                message: "workspaceMount requires workspaceFolder to also be set".to_string(),
            }
            .into());
        }
        let substituted = crate::variable::substitute_string(workspace_mount, &ctx);
        structural_mounts.push(mount::BindMount::new(substituted.clone(), substituted, false));
    }
    structural_mounts.extend(request.extra_credential_mounts.iter().cloned());

    let config_mounts: Vec<String> = request
        .config
        .mounts
        .iter()
        .map(|v| crate::variable::substitute_json_value(v, &ctx))
        .filter_map(|v| mount_value_to_arg(&v))
        .collect();

    let forward_ports = ports::normalize_all(&request.config.forward_ports)?;

    let run_args: Vec<String> = request
        .config
        .run_args
        .iter()
        .map(|arg| crate::variable::substitute_string(arg, &ctx))
        .collect();

    let features = collect_feature_contributions(request.ordered_features);
    let feature_mounts: Vec<String> = features
        .mounts
        .iter()
        .map(|m| crate::variable::substitute_string(m, &ctx))
        .collect();
    let features = FeatureContributions { mounts: feature_mounts, ..features };

    let plan = LaunchPlan {
        image: image.to_string(),
        identity: request.identity.clone(),
        host_path: request.host_path.clone(),
        host_path_label: Some(request.host_path.to_string_lossy().to_string()),
        launch_command_label: request.launch_command.clone(),
        structural_mounts,
        config_mounts,
        remote_user: remote_user.map(str::to_string),
        container_env: resolved_container_env,
        remote_env: resolved_remote_env,
        explicit_env: request.explicit_env.clone(),
        forward_ports,
        explicit_ports: request.explicit_ports.clone(),
        run_args,
        features,
        aws_capability_enabled: request.aws_capability_enabled,
    };

    for ancestor in ancestors_of(&plan.host_path) {
        let _ = runtime
            .run(&[
                "exec".to_string(),
                name.to_string(),
                "mkdir".to_string(),
                "-p".to_string(),
                ancestor,
            ])
            .await;
    }

    let args = assemble_run_args(&plan);
    let output = runtime.run(&args).await?;
    if !output.success() {
        return Err(DockerError::CommandFailed { message: output.stderr }.into());
    }

    // `docker run -d` prints the new container's full id on stdout.
    let id = output.stdout.trim().to_string();
    if id.is_empty() {
        container_id_of(runtime, name).await
    } else {
        Ok(id)
    }
}

/// Every ancestor directory of `path`, shallowest first, as strings —
/// used to `mkdir -p` one missing ancestor at a time before attach.
fn ancestors_of(path: &Path) -> Vec<String> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    let mut out = Vec::new();
    for component in path.components() {
        parts.push(component.as_os_str());
        let joined: PathBuf = parts.iter().collect();
        out.push(joined.to_string_lossy().to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LifecycleCommand;
    use crate::features::FeatureMetadata;
    use crate::runtime::RuntimeOutput;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[derive(Clone)]
    struct FailingRuntime;

    impl RuntimeClient for FailingRuntime {
        async fn run(&self, _args: &[String]) -> Result<RuntimeOutput> {
            Ok(RuntimeOutput { status: 1, stdout: String::new(), stderr: "boom".to_string() })
        }

        async fn run_with_progress(&self, _image_name: &str, _args: &[String]) -> Result<()> {
            Ok(())
        }

        fn command(&self) -> &str {
            "docker"
        }
    }

    fn failing_config(phase_setter: impl FnOnce(&mut DevContainerConfig)) -> DevContainerConfig {
        let mut config = DevContainerConfig::default();
        phase_setter(&mut config);
        config
    }

    #[tokio::test]
    async fn on_create_failure_aborts() {
        let temp = TempDir::new().unwrap();
        std::env::set_var("XDG_DATA_HOME", temp.path());
        let executor = LifecycleExecutor::new(FailingRuntime, "container-abort-test", None, false);
        let cancel = CancellationToken::new();
        let config = failing_config(|c| c.on_create_command = Some(LifecycleCommand::Scalar("false".to_string())));

        let result = run_hook(&executor, Phase::OnCreate, &config, &[], &cancel).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn post_start_failure_is_logged_not_fatal() {
        let temp = TempDir::new().unwrap();
        std::env::set_var("XDG_DATA_HOME", temp.path());
        let executor = LifecycleExecutor::new(FailingRuntime, "container-warn-test", None, false);
        let cancel = CancellationToken::new();
        let config = failing_config(|c| c.post_start_command = Some(LifecycleCommand::Scalar("false".to_string())));

        let result = run_hook(&executor, Phase::PostStart, &config, &[], &cancel).await;
        assert!(result.is_ok());
    }

    fn base_plan() -> LaunchPlan {
        LaunchPlan {
            image: "packnplay-proj-devcontainer:latest".to_string(),
            identity: ContainerIdentity::new("proj", "main"),
            host_path: PathBuf::from("/home/user/proj"),
            host_path_label: Some("/home/user/proj".to_string()),
            launch_command_label: Some("packnplay up".to_string()),
            structural_mounts: vec![mount::project_mount(&PathBuf::from("/home/user/proj"))],
            config_mounts: Vec::new(),
            remote_user: Some("vscode".to_string()),
            container_env: IndexMap::new(),
            remote_env: IndexMap::new(),
            explicit_env: Vec::new(),
            forward_ports: Vec::new(),
            explicit_ports: Vec::new(),
            run_args: Vec::new(),
            features: FeatureContributions::default(),
            aws_capability_enabled: false,
        }
    }

    #[test]
    fn step_order_matches_spec() {
        let args = assemble_run_args(&base_plan());

        let name_pos = args.iter().position(|a| a == "--name").unwrap();
        let mount_pos = args.iter().position(|a| a == "--mount").unwrap();
        let workdir_pos = args.iter().position(|a| a == "-w").unwrap();
        let image_pos = args.iter().position(|a| a == "packnplay-proj-devcontainer:latest").unwrap();
        let user_pos = args.iter().position(|a| a == "--user").unwrap();

        assert!(name_pos < mount_pos);
        assert!(mount_pos < workdir_pos);
        assert!(workdir_pos < user_pos);
        assert!(user_pos < image_pos);
        assert_eq!(image_pos, args.len() - 1 - keep_alive_command().len());
    }

    #[test]
    fn home_derives_from_remote_user() {
        let args = assemble_run_args(&base_plan());
        let home_idx = args.iter().position(|a| a == "HOME=/home/vscode").unwrap();
        assert!(args[home_idx - 1] == "-e");
    }

    #[test]
    fn is_sandbox_marker_always_present() {
        let args = assemble_run_args(&base_plan());
        assert!(args.contains(&"IS_SANDBOX=1".to_string()));
    }

    #[test]
    fn container_env_emitted_in_sorted_key_order() {
        let mut plan = base_plan();
        plan.container_env.insert("ZETA".to_string(), "1".to_string());
        plan.container_env.insert("ALPHA".to_string(), "2".to_string());
        let args = assemble_run_args(&plan);
        let alpha_pos = args.iter().position(|a| a == "ALPHA=2").unwrap();
        let zeta_pos = args.iter().position(|a| a == "ZETA=1").unwrap();
        assert!(alpha_pos < zeta_pos);
    }

    #[test]
    fn remote_env_deletion_marker_is_omitted() {
        let mut plan = base_plan();
        plan.remote_env.insert("FOO".to_string(), None);
        plan.remote_env.insert("BAR".to_string(), Some("baz".to_string()));
        let args = assemble_run_args(&plan);
        assert!(!args.iter().any(|a| a.starts_with("FOO=")));
        assert!(args.contains(&"BAR=baz".to_string()));
    }

    #[test]
    fn explicit_env_overrides_come_last_before_ports() {
        let mut plan = base_plan();
        plan.explicit_env.push("OVERRIDE=1".to_string());
        let args = assemble_run_args(&plan);
        let override_pos = args.iter().position(|a| a == "OVERRIDE=1").unwrap();
        let sandbox_pos = args.iter().position(|a| a == "IS_SANDBOX=1").unwrap();
        assert!(sandbox_pos < override_pos);
    }

    #[test]
    fn forward_ports_precede_explicit_ports() {
        let mut plan = base_plan();
        plan.forward_ports.push("127.0.0.1:3000:3000".to_string());
        plan.explicit_ports.push("4000:4000".to_string());
        let args = assemble_run_args(&plan);
        let forward_pos = args.iter().position(|a| a == "127.0.0.1:3000:3000").unwrap();
        let explicit_pos = args.iter().position(|a| a == "4000:4000").unwrap();
        assert!(forward_pos < explicit_pos);
    }

    #[test]
    fn feature_privileged_and_cap_add_emitted() {
        let mut plan = base_plan();
        plan.features.privileged = true;
        plan.features.cap_add = vec!["NET_ADMIN".to_string()];
        plan.features.init = true;
        let args = assemble_run_args(&plan);
        assert!(args.contains(&"--privileged".to_string()));
        assert!(args.contains(&"--cap-add=NET_ADMIN".to_string()));
        assert!(args.contains(&"--init".to_string()));
    }

    fn feature(id: &str, entrypoint: Option<serde_json::Value>) -> ResolvedFeature {
        ResolvedFeature {
            id: id.to_string(),
            version: "1.0.0".to_string(),
            install_path: PathBuf::from(format!("/features/{id}")),
            options: HashMap::new(),
            metadata: FeatureMetadata {
                id: id.to_string(),
                version: "1.0.0".to_string(),
                name: None,
                description: None,
                documentation_url: None,
                license_url: None,
                options: HashMap::new(),
                container_env: HashMap::new(),
                mounts: Vec::new(),
                init: None,
                privileged: None,
                cap_add: Vec::new(),
                security_opt: Vec::new(),
                entrypoint,
                depends_on: HashMap::new(),
                installs_after: Vec::new(),
                on_create_command: None,
                update_content_command: None,
                post_create_command: None,
                post_start_command: None,
                post_attach_command: None,
            },
            depends_on: Vec::new(),
            installs_after: Vec::new(),
        }
    }

    #[test]
    fn last_feature_entrypoint_wins() {
        let features = vec![
            feature("a", Some(serde_json::json!("/bin/a"))),
            feature("b", Some(serde_json::json!(["/bin/b", "--flag"]))),
        ];
        let contributions = collect_feature_contributions(&features);
        assert_eq!(contributions.entrypoint, Some(vec!["/bin/b".to_string(), "--flag".to_string()]));
    }

    #[test]
    fn already_running_message_contains_reconnect_and_stop_commands() {
        let identity = ContainerIdentity::new("proj", "main");
        let message = already_running_message(&identity, Some("/home/user/proj"), Some("packnplay up"), "docker");
        assert!(message.contains("reconnect: docker exec -it packnplay-proj-main sh"));
        assert!(message.contains("stop:      docker stop packnplay-proj-main"));
    }

    #[test]
    fn ancestors_of_lists_shallowest_first() {
        let ancestors = ancestors_of(&PathBuf::from("/a/b/c"));
        assert_eq!(ancestors.first().unwrap(), "/");
        assert_eq!(ancestors.last().unwrap(), "/a/b/c");
    }

    #[derive(Clone)]
    struct InspectIdRuntime {
        id: String,
    }

    impl RuntimeClient for InspectIdRuntime {
        async fn run(&self, args: &[String]) -> Result<RuntimeOutput> {
            assert_eq!(args[0], "inspect");
            assert_eq!(args[2], "{{.Id}}");
            Ok(RuntimeOutput { status: 0, stdout: format!("{}\n", self.id), stderr: String::new() })
        }

        async fn run_with_progress(&self, _image_name: &str, _args: &[String]) -> Result<()> {
            Ok(())
        }

        fn command(&self) -> &str {
            "docker"
        }
    }

    #[tokio::test]
    async fn container_id_of_reads_runtime_assigned_id() {
        let runtime = InspectIdRuntime { id: "sha256deadbeef".to_string() };
        let id = container_id_of(&runtime, "packnplay-proj-main").await.unwrap();
        assert_eq!(id, "sha256deadbeef");
    }

    #[tokio::test]
    async fn recreated_container_gets_a_different_id() {
        // Distinct `InspectIdRuntime` instances stand in for a container
        // before and after `rm -f` + `run -d`: same name, different id,
        // which is exactly what must change for the Lifecycle State Store
        // key to distinguish the two instances (see S3).
        let before = InspectIdRuntime { id: "container-id-1".to_string() };
        let after = InspectIdRuntime { id: "container-id-2".to_string() };

        let id_before = container_id_of(&before, "packnplay-proj-main").await.unwrap();
        let id_after = container_id_of(&after, "packnplay-proj-main").await.unwrap();

        assert_ne!(id_before, id_after);
    }
}
