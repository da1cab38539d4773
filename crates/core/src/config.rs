//! Configuration resolution and parsing
//!
//! Parses `devcontainer.json`/`devcontainer.jsonc` following the Development
//! Containers Specification's JSON-with-comments tolerance and union-typed
//! fields (lifecycle commands, forward ports, entrypoint, cache_from).
//!
//! Unknown top-level keys are logged at DEBUG and otherwise ignored — this
//! keeps the loader forward compatible with configuration fields this crate
//! doesn't model yet.
//!
//! ## References
//!
//! Mirrors the [Development Containers Specification](https://containers.dev/implementors/spec/)
//! configuration schema.

use crate::errors::{ConfigError, Result};
use crate::variable::{substitute_json_value, substitute_string, SubstitutionContext};
use indexmap::IndexMap;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

fn default_empty_object() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

/// Configuration file location information.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigLocation {
    pub path: PathBuf,
    pub exists: bool,
}

impl ConfigLocation {
    pub fn new(path: PathBuf) -> Self {
        let exists = path.exists();
        Self { path, exists }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.exists
    }
}

/// A lifecycle command, decoded from one of the three shapes the
/// specification allows, or synthesized by the lifecycle merger.
///
/// Decoding tries, in order: string, array of strings, map of task name to
/// (string or array of strings). Numbers and booleans are rejected at any
/// position.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LifecycleCommand {
    /// `"echo hi"` — run via `sh -c`.
    Scalar(String),
    /// `["echo", "hi"]` — run directly, no shell.
    Exec(Vec<String>),
    /// `{"a": "...", "b": [...]}` — run every task concurrently.
    Parallel(IndexMap<String, ParallelTask>),
    /// Synthesized by the lifecycle merger: a sequence of scalar commands
    /// run one after another, stopping at the first failure. Never produced
    /// by configuration decoding.
    Merged(Vec<String>),
}

/// A single task's command inside a `Parallel` lifecycle command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParallelTask {
    Scalar(String),
    Exec(Vec<String>),
}

impl ParallelTask {
    fn from_value(value: &serde_json::Value) -> std::result::Result<Self, String> {
        match value {
            serde_json::Value::String(s) => Ok(ParallelTask::Scalar(s.clone())),
            serde_json::Value::Array(items) => {
                let strings = strings_from_array(items)?;
                Ok(ParallelTask::Exec(strings))
            }
            other => Err(format!(
                "parallel task must be a string or array of strings, got {}",
                value_kind(other)
            )),
        }
    }
}

fn value_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

fn strings_from_array(
    items: &[serde_json::Value],
) -> std::result::Result<Vec<String>, String> {
    items
        .iter()
        .map(|item| match item {
            serde_json::Value::String(s) => Ok(s.clone()),
            other => Err(format!(
                "expected a string element, got {}",
                value_kind(other)
            )),
        })
        .collect()
}

impl LifecycleCommand {
    fn from_value(value: &serde_json::Value) -> std::result::Result<Self, String> {
        match value {
            serde_json::Value::String(s) => Ok(LifecycleCommand::Scalar(s.clone())),
            serde_json::Value::Array(items) => {
                Ok(LifecycleCommand::Exec(strings_from_array(items)?))
            }
            serde_json::Value::Object(map) => {
                let mut tasks = IndexMap::with_capacity(map.len());
                for (name, task_value) in map {
                    let task = ParallelTask::from_value(task_value)
                        .map_err(|reason| format!("task '{name}': {reason}"))?;
                    tasks.insert(name.clone(), task);
                }
                Ok(LifecycleCommand::Parallel(tasks))
            }
            other => Err(format!(
                "lifecycle command must be a string, array, or map, got {}",
                value_kind(other)
            )),
        }
    }

    /// Flatten this command into a list of shell-executable strings, the way
    /// the lifecycle merger does when folding feature and user hooks
    /// together: `Scalar` becomes one element, `Exec` becomes one
    /// space-joined element, and `Parallel` contributes one element per
    /// task (its values flattened the same way).
    pub fn flatten(&self) -> Vec<String> {
        match self {
            LifecycleCommand::Scalar(s) => vec![s.clone()],
            LifecycleCommand::Exec(parts) => vec![parts.join(" ")],
            LifecycleCommand::Parallel(tasks) => tasks
                .values()
                .map(|task| match task {
                    ParallelTask::Scalar(s) => s.clone(),
                    ParallelTask::Exec(parts) => parts.join(" "),
                })
                .collect(),
            LifecycleCommand::Merged(parts) => parts.clone(),
        }
    }
}

impl<'de> Deserialize<'de> for LifecycleCommand {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        LifecycleCommand::from_value(&value).map_err(D::Error::custom)
    }
}

/// A forward-port entry: either a bare port number or an opaque
/// `host:port`/`ip:host:port` specification string.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ForwardPort {
    Port(u16),
    Spec(String),
}

impl<'de> Deserialize<'de> for ForwardPort {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        match &value {
            serde_json::Value::Number(n) => {
                let as_i64 = n.as_i64().ok_or_else(|| {
                    D::Error::custom(format!("forwardPorts entry {n} is not an integer"))
                })?;
                if !(1..=65535).contains(&as_i64) {
                    return Err(D::Error::custom(format!(
                        "forwardPorts entry {as_i64} is out of range 1..65535"
                    )));
                }
                Ok(ForwardPort::Port(as_i64 as u16))
            }
            serde_json::Value::String(s) => Ok(ForwardPort::Spec(s.clone())),
            other => Err(D::Error::custom(format!(
                "forwardPorts entry must be an integer or string, got {}",
                value_kind(other)
            ))),
        }
    }
}

/// A field that accepts either a single string or an array of strings, with
/// non-string array elements rejected (used for `entrypoint` and
/// `cacheFrom`).
fn deserialize_string_or_array<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match &value {
        serde_json::Value::String(s) => Ok(vec![s.clone()]),
        serde_json::Value::Array(items) => {
            strings_from_array(items).map_err(D::Error::custom)
        }
        other => Err(D::Error::custom(format!(
            "expected a string or array of strings, got {}",
            value_kind(other)
        ))),
    }
}

fn deserialize_opt_string_or_array<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Some(deserialize_string_or_array(deserializer)?))
}

/// DevContainer configuration, following the Development Containers
/// Specification's schema.
///
/// ## References
///
/// - [DevContainer Configuration Reference](https://containers.dev/implementors/json_reference/)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevContainerConfig {
    /// Human-readable name for the development container.
    pub name: Option<String>,

    /// Container image to use.
    pub image: Option<String>,

    /// Path to Dockerfile relative to devcontainer.json.
    #[serde(rename = "dockerFile")]
    pub dockerfile: Option<String>,

    /// Build configuration when using a Dockerfile (context, build args,
    /// target, cacheFrom live inside this opaque object).
    pub build: Option<serde_json::Value>,

    /// Features to install, keyed by feature reference string, each value
    /// an options map. Resolved into typed `FeatureRef`s by the feature
    /// resolver, not here.
    #[serde(default = "default_empty_object")]
    pub features: serde_json::Value,

    /// Explicit feature install order overriding the resolver's natural
    /// dependency-respecting order for listed ids.
    #[serde(default)]
    pub override_feature_install_order: Vec<String>,

    /// Tool-specific customizations, passed through opaque.
    #[serde(default = "default_empty_object")]
    pub customizations: serde_json::Value,

    /// Path to workspace folder inside the container.
    pub workspace_folder: Option<String>,

    /// Mount specification overriding the default workspace bind mount.
    pub workspace_mount: Option<String>,

    /// Additional mount points for the container, opaque strings or mount
    /// objects substituted verbatim.
    #[serde(default)]
    pub mounts: Vec<serde_json::Value>,

    /// Environment variables set in the container image layer.
    #[serde(default)]
    pub container_env: HashMap<String, String>,

    /// Environment variables set for the remote/user process. An explicit
    /// empty string value is a deletion marker, not a literal empty value.
    #[serde(default)]
    pub remote_env: HashMap<String, Option<String>>,

    /// User to run as inside the container, if not the image default.
    pub remote_user: Option<String>,

    /// Ports to forward from the container.
    #[serde(default)]
    pub forward_ports: Vec<ForwardPort>,

    /// Per-port attributes, passed through opaque (labels, protocol, etc).
    pub ports_attributes: Option<serde_json::Value>,

    /// Additional arguments to pass to the container run command.
    #[serde(default)]
    pub run_args: Vec<String>,

    /// Action to take when shutting down the container. Recognised but
    /// inert: this crate's Launch Controller owns the container lifecycle
    /// directly rather than delegating teardown policy to the runtime.
    pub shutdown_action: Option<String>,

    /// Whether to override the image's default command with a keep-alive
    /// command so the controller can attach later.
    pub override_command: Option<bool>,

    /// Probe the user's shell environment before running commands.
    pub user_env_probe: Option<String>,

    /// Container entrypoint, string or array of strings.
    #[serde(default, deserialize_with = "deserialize_opt_string_or_array")]
    pub entrypoint: Option<Vec<String>>,

    /// Images to pass as `--cache-from` during build.
    #[serde(default)]
    pub cache_from: Vec<String>,

    pub privileged: Option<bool>,
    #[serde(default)]
    pub cap_add: Vec<String>,
    #[serde(default)]
    pub security_opt: Vec<String>,
    pub init: Option<bool>,

    pub on_create_command: Option<LifecycleCommand>,
    pub update_content_command: Option<LifecycleCommand>,
    pub post_create_command: Option<LifecycleCommand>,
    pub post_start_command: Option<LifecycleCommand>,
    pub post_attach_command: Option<LifecycleCommand>,
    pub initialize_command: Option<LifecycleCommand>,
}

impl DevContainerConfig {
    /// Substitute every `${...}` placeholder across the fields that carry
    /// user-authored strings. Non-string JSON content (numbers, booleans)
    /// inside opaque fields passes through unchanged.
    #[instrument(skip_all)]
    pub fn apply_variable_substitution(&self, ctx: &SubstitutionContext) -> Self {
        let mut config = self.clone();

        if let Some(ref workspace_folder) = config.workspace_folder {
            config.workspace_folder = Some(substitute_string(workspace_folder, ctx));
        }
        if let Some(ref workspace_mount) = config.workspace_mount {
            config.workspace_mount = Some(substitute_string(workspace_mount, ctx));
        }

        config.mounts = config
            .mounts
            .iter()
            .map(|mount| substitute_json_value(mount, ctx))
            .collect();

        config.run_args = config
            .run_args
            .iter()
            .map(|arg| substitute_string(arg, ctx))
            .collect();

        config.container_env = config
            .container_env
            .iter()
            .map(|(key, value)| (key.clone(), substitute_string(value, ctx)))
            .collect();

        config.remote_env = config
            .remote_env
            .iter()
            .map(|(key, value)| {
                let substituted = value.as_ref().map(|v| substitute_string(v, ctx));
                (key.clone(), substituted)
            })
            .collect();

        macro_rules! substitute_lifecycle {
            ($field:ident) => {
                if let Some(ref cmd) = config.$field {
                    config.$field = Some(substitute_lifecycle_command(cmd, ctx));
                }
            };
        }
        substitute_lifecycle!(on_create_command);
        substitute_lifecycle!(update_content_command);
        substitute_lifecycle!(post_create_command);
        substitute_lifecycle!(post_start_command);
        substitute_lifecycle!(post_attach_command);
        substitute_lifecycle!(initialize_command);

        debug!("applied variable substitution to devcontainer configuration");
        config
    }

    /// True if a Dockerfile-based build is configured.
    pub fn has_dockerfile(&self) -> bool {
        self.dockerfile.is_some()
            || self
                .build
                .as_ref()
                .and_then(|b| b.get("dockerfile").or_else(|| b.get("dockerFile")))
                .is_some()
    }

    /// The configured Dockerfile path, from either `dockerFile` or
    /// `build.dockerfile`.
    pub fn get_dockerfile(&self) -> Option<String> {
        self.dockerfile.clone().or_else(|| {
            self.build
                .as_ref()
                .and_then(|b| b.get("dockerfile").or_else(|| b.get("dockerFile")))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
    }

    /// Whether the container's default command should be overridden with a
    /// keep-alive command. Defaults to true: without an explicit command to
    /// attach to, the controller needs the container to stay up.
    pub fn should_override_command(&self) -> bool {
        self.override_command.unwrap_or(true)
    }

    /// Validate internal consistency. Does not require network or runtime
    /// access.
    fn validate(&self) -> Result<()> {
        if self.image.is_none() && self.dockerfile.is_none() && self.build.is_none() {
            let features_configured = self
                .features
                .as_object()
                .map(|m| !m.is_empty())
                .unwrap_or(false);
            if !features_configured {
                return Err(ConfigError::UnconfiguredBase.into());
            }
        }

        if let Some(action) = &self.shutdown_action {
            match action.as_str() {
                "none" | "stopContainer" | "stopCompose" => {}
                other => {
                    return Err(ConfigError::Validation {
                        message: format!(
                            "invalid shutdownAction '{other}' - must be 'none', 'stopContainer', or 'stopCompose'"
                        ),
                    }
                    .into());
                }
            }
        }

        Ok(())
    }
}

fn substitute_lifecycle_command(cmd: &LifecycleCommand, ctx: &SubstitutionContext) -> LifecycleCommand {
    match cmd {
        LifecycleCommand::Scalar(s) => LifecycleCommand::Scalar(substitute_string(s, ctx)),
        LifecycleCommand::Exec(parts) => {
            LifecycleCommand::Exec(parts.iter().map(|p| substitute_string(p, ctx)).collect())
        }
        LifecycleCommand::Parallel(tasks) => {
            let substituted = tasks
                .iter()
                .map(|(name, task)| {
                    let task = match task {
                        ParallelTask::Scalar(s) => ParallelTask::Scalar(substitute_string(s, ctx)),
                        ParallelTask::Exec(parts) => ParallelTask::Exec(
                            parts.iter().map(|p| substitute_string(p, ctx)).collect(),
                        ),
                    };
                    (name.clone(), task)
                })
                .collect();
            LifecycleCommand::Parallel(substituted)
        }
        LifecycleCommand::Merged(parts) => {
            LifecycleCommand::Merged(parts.iter().map(|p| substitute_string(p, ctx)).collect())
        }
    }
}

impl Default for DevContainerConfig {
    fn default() -> Self {
        Self {
            name: None,
            image: None,
            dockerfile: None,
            build: None,
            features: default_empty_object(),
            override_feature_install_order: Vec::new(),
            customizations: default_empty_object(),
            workspace_folder: None,
            workspace_mount: None,
            mounts: Vec::new(),
            container_env: HashMap::new(),
            remote_env: HashMap::new(),
            remote_user: None,
            forward_ports: Vec::new(),
            ports_attributes: None,
            run_args: Vec::new(),
            shutdown_action: None,
            override_command: None,
            user_env_probe: None,
            entrypoint: None,
            cache_from: Vec::new(),
            privileged: None,
            cap_add: Vec::new(),
            security_opt: Vec::new(),
            init: None,
            on_create_command: None,
            update_content_command: None,
            post_create_command: None,
            post_start_command: None,
            post_attach_command: None,
            initialize_command: None,
        }
    }
}

/// Loader for `devcontainer.json`/`devcontainer.jsonc` files.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Search `.devcontainer/devcontainer.json` then `.devcontainer.json`,
    /// returning the first that exists, or the preferred path if neither
    /// does.
    #[instrument(skip_all, fields(workspace = %workspace.display()))]
    pub fn discover_config(workspace: &Path) -> Result<ConfigLocation> {
        if !workspace.exists() {
            return Err(ConfigError::NotFound {
                path: workspace.display().to_string(),
            }
            .into());
        }

        let search_paths = [
            workspace.join(".devcontainer").join("devcontainer.json"),
            workspace.join(".devcontainer.json"),
        ];

        for path in &search_paths {
            if path.exists() {
                debug!("found configuration file: {}", path.display());
                return Ok(ConfigLocation::new(path.clone()));
            }
        }

        let default_path = search_paths[0].clone();
        debug!(
            "no configuration file found, defaulting to: {}",
            default_path.display()
        );
        Ok(ConfigLocation::new(default_path))
    }

    /// Load and validate a configuration file. Tolerates comments and
    /// trailing commas (JSONC); rejects `extends` (unimplemented); logs
    /// unknown top-level keys at DEBUG without failing the load.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn load_from_path(path: &Path) -> Result<DevContainerConfig> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.display().to_string(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

        let raw_value: serde_json::Value = json5::from_str(&content).map_err(|e| ConfigError::Parsing {
            message: format!("JSON parsing error: {e}"),
        })?;

        if let serde_json::Value::Object(obj) = &raw_value {
            Self::log_unknown_keys(obj);
            if obj.contains_key("extends") {
                return Err(ConfigError::NotImplemented {
                    feature: "extends configuration".to_string(),
                }
                .into());
            }
        }

        let config: DevContainerConfig =
            serde_json::from_value(raw_value).map_err(|e| ConfigError::Malformed {
                field: malformed_field_hint(&e),
                reason: e.to_string(),
            })?;

        config.validate()?;

        debug!("loaded configuration with name: {:?}", config.name);
        Ok(config)
    }

    /// Load a configuration file and apply variable substitution in one
    /// call.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn load_with_substitution(
        path: &Path,
        ctx: &SubstitutionContext,
    ) -> Result<DevContainerConfig> {
        let config = Self::load_from_path(path)?;
        Ok(config.apply_variable_substitution(ctx))
    }

    fn log_unknown_keys(obj: &serde_json::Map<String, serde_json::Value>) {
        const KNOWN_KEYS: &[&str] = &[
            "name",
            "image",
            "dockerFile",
            "build",
            "features",
            "overrideFeatureInstallOrder",
            "customizations",
            "workspaceFolder",
            "workspaceMount",
            "mounts",
            "containerEnv",
            "remoteEnv",
            "remoteUser",
            "forwardPorts",
            "portsAttributes",
            "runArgs",
            "shutdownAction",
            "overrideCommand",
            "userEnvProbe",
            "entrypoint",
            "cacheFrom",
            "privileged",
            "capAdd",
            "securityOpt",
            "init",
            "onCreateCommand",
            "updateContentCommand",
            "postCreateCommand",
            "postStartCommand",
            "postAttachCommand",
            "initializeCommand",
        ];

        for key in obj.keys() {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                debug!("unknown configuration key '{}' - will be ignored", key);
            }
        }
    }
}

/// Best-effort extraction of a field name from a serde_json decode error, for
/// `ConfigError::Malformed`'s `field` slot.
fn malformed_field_hint(err: &serde_json::Error) -> String {
    // serde_json errors don't expose a structured path; the message itself
    // usually names the offending field (e.g. "missing field `id`").
    err.to_string()
        .split_whitespace()
        .find(|w| w.starts_with('`') && w.ends_with('`'))
        .map(|w| w.trim_matches('`').to_string())
        .unwrap_or_else(|| "<root>".to_string())
}
