//! Variable substitution engine
//!
//! Implements the `${…}` placeholder grammar over any JSON-shaped value,
//! following the Development Containers Specification's substitution rules
//! as enumerated for this crate's supported placeholder set.
//!
//! ## Supported placeholders
//!
//! - `${env:NAME}` / `${localEnv:NAME}` — host environment variable, empty
//!   string if absent.
//! - `${localEnv:NAME:default}` — default applies when absent; everything
//!   after the first `:` is the default, including further colons.
//! - `${containerEnv:NAME}` / `${containerEnv:NAME:default}` — value from the
//!   accumulating container-environment map.
//! - `${localWorkspaceFolder}` / `${localWorkspaceFolderBasename}`
//! - `${containerWorkspaceFolder}` / `${containerWorkspaceFolderBasename}`
//! - `${devcontainerId}`
//!
//! ## Substitution purity (Testable Property 1)
//!
//! `substitute_*` depends only on its `ctx` and input value. The one
//! documented side effect is that resolving `containerEnv:NAME` writes the
//! resolved value back into `ctx.container_env` so later lookups (and a
//! later `remoteEnv` resolution) can observe it.

use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Regular expression pattern for `${...}` placeholder tokens.
const VARIABLE_PATTERN: &str = r"\$\{([^}]+)\}";

/// Values needed to resolve every recognised placeholder.
#[derive(Debug, Clone)]
pub struct SubstitutionContext {
    /// Absolute workspace path on the host.
    pub local_workspace_folder: String,
    /// Target path inside the container, already resolved one level deep
    /// (any placeholders inside its own configured value are substituted
    /// before this field is populated).
    pub container_workspace_folder: String,
    /// Host environment variables, snapshotted at context creation.
    pub local_env: HashMap<String, String>,
    /// Accumulating container-environment map; grows as `containerEnv:`
    /// placeholders are resolved (write-through).
    pub container_env: HashMap<String, String>,
    /// Pre-computed `devcontainerId`, derived from the container's label set.
    pub devcontainer_id: String,
}

impl SubstitutionContext {
    /// Build a context from a host workspace path, an (optional) configured
    /// container workspace folder, and a pre-computed devcontainer id.
    ///
    /// If `container_workspace_folder_raw` itself contains placeholders,
    /// they are resolved once against this same context (minus
    /// `containerWorkspaceFolder` itself, which cannot self-reference)
    /// before being stored — this is the one-level recursion the
    /// specification calls out for that single field.
    pub fn new(
        local_workspace_folder: &Path,
        container_workspace_folder_raw: Option<&str>,
        devcontainer_id: String,
    ) -> Self {
        let local_workspace_folder = local_workspace_folder.to_string_lossy().to_string();
        let local_env: HashMap<String, String> = std::env::vars().collect();

        let mut ctx = Self {
            local_workspace_folder,
            container_workspace_folder: String::new(),
            local_env,
            container_env: HashMap::new(),
            devcontainer_id,
        };

        let resolved_container_workspace_folder = match container_workspace_folder_raw {
            Some(raw) => substitute_string(raw, &ctx),
            None => String::new(),
        };
        ctx.container_workspace_folder = resolved_container_workspace_folder;
        ctx
    }
}

fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Split `NAME[:default]` at the first colon. Everything after the first
/// colon, including further colons, is the default.
fn split_name_default(expr: &str) -> (&str, Option<&str>) {
    match expr.find(':') {
        Some(idx) => (&expr[..idx], Some(&expr[idx + 1..])),
        None => (expr, None),
    }
}

/// Resolve a single placeholder expression (the text between `${` and `}`).
///
/// Returns `None` only for expressions that are entirely unrecognised;
/// every recognised placeholder always resolves to *some* string (possibly
/// empty), per the specification's "no substitution ever fails" rule.
fn resolve_variable(expr: &str, ctx: &mut SubstitutionContext) -> Option<String> {
    if let Some(rest) = expr.strip_prefix("containerEnv:") {
        let (name, default) = split_name_default(rest);
        return Some(
            ctx.container_env
                .get(name)
                .cloned()
                .or_else(|| default.map(str::to_string))
                .unwrap_or_default(),
        );
    }
    if let Some(rest) = expr.strip_prefix("localEnv:") {
        let (name, default) = split_name_default(rest);
        return Some(
            ctx.local_env
                .get(name)
                .cloned()
                .or_else(|| default.map(str::to_string))
                .unwrap_or_default(),
        );
    }
    if let Some(rest) = expr.strip_prefix("env:") {
        let (name, default) = split_name_default(rest);
        return Some(
            ctx.local_env
                .get(name)
                .cloned()
                .or_else(|| default.map(str::to_string))
                .unwrap_or_default(),
        );
    }

    match expr {
        "localWorkspaceFolder" => Some(ctx.local_workspace_folder.clone()),
        "localWorkspaceFolderBasename" => Some(basename(&ctx.local_workspace_folder)),
        "containerWorkspaceFolder" => Some(ctx.container_workspace_folder.clone()),
        "containerWorkspaceFolderBasename" => Some(basename(&ctx.container_workspace_folder)),
        "devcontainerId" => Some(ctx.devcontainer_id.clone()),
        _ => None,
    }
}

/// Substitute every `${...}` token in a string, leaving unknown tokens and
/// malformed (unclosed) `${` sequences verbatim.
pub fn substitute_string(input: &str, ctx: &SubstitutionContext) -> String {
    // `resolve_variable` needs `&mut` only for the containerEnv write-through,
    // but that write-through happens on the *resolver's* copy of the map
    // (passed in by `substitute_json_value`'s caller for containerEnv
    // specifically); plain string substitution never mutates ctx, so we
    // clone locally to keep this function's signature pure for callers that
    // don't need the write-through (Testable Property 1).
    let mut scratch = ctx.clone();
    substitute_string_mut(input, &mut scratch)
}

fn substitute_string_mut(input: &str, ctx: &mut SubstitutionContext) -> String {
    let regex = regex::Regex::new(VARIABLE_PATTERN).expect("variable pattern is valid");

    // regex::Regex::replace_all can't take a closure capturing &mut ctx
    // across multiple calls cleanly with replace_all's Fn bound, so walk
    // matches manually to allow write-through on containerEnv resolution.
    let mut result = String::with_capacity(input.len());
    let mut last_end = 0;
    for caps in regex.captures_iter(input) {
        let m = caps.get(0).unwrap();
        result.push_str(&input[last_end..m.start()]);
        let expr = &caps[1];
        match resolve_variable(expr, ctx) {
            Some(value) => {
                debug!("resolved placeholder '{}' -> '{}'", expr, value);
                if let Some(rest) = expr.strip_prefix("containerEnv:") {
                    let (name, _) = split_name_default(rest);
                    ctx.container_env.insert(name.to_string(), value.clone());
                }
                result.push_str(&value);
            }
            None => {
                debug!("unknown placeholder '{}': left unchanged", expr);
                result.push_str(m.as_str());
            }
        }
        last_end = m.end();
    }
    result.push_str(&input[last_end..]);
    result
}

/// Recursively substitute through a JSON value. Non-string scalars (numbers,
/// booleans, null) pass through unchanged (Testable Property 2).
pub fn substitute_json_value(value: &Value, ctx: &SubstitutionContext) -> Value {
    let mut scratch = ctx.clone();
    substitute_json_value_mut(value, &mut scratch)
}

fn substitute_json_value_mut(value: &Value, ctx: &mut SubstitutionContext) -> Value {
    match value {
        Value::String(s) => Value::String(substitute_string_mut(s, ctx)),
        Value::Array(arr) => {
            Value::Array(arr.iter().map(|v| substitute_json_value_mut(v, ctx)).collect())
        }
        Value::Object(obj) => {
            let mut out = serde_json::Map::with_capacity(obj.len());
            for (k, v) in obj {
                out.insert(k.clone(), substitute_json_value_mut(v, ctx));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Resolve `containerEnv` then `remoteEnv` in the documented order, writing
/// each resolved `containerEnv` value into `ctx.container_env` as it
/// resolves so later entries (and `remoteEnv`) can reference it via
/// `${containerEnv:...}`. Returns the resolved maps in the caller's
/// insertion order; sorting for stable flag emission is the caller's job
/// (see `identity`/`launch` for where that ordering is applied).
///
/// A `remote_env` value of the empty string is a deletion marker and is
/// passed through as `None` rather than substituted.
pub fn resolve_environment(
    ctx: &mut SubstitutionContext,
    container_env: &indexmap::IndexMap<String, String>,
    remote_env: &indexmap::IndexMap<String, Option<String>>,
) -> (
    indexmap::IndexMap<String, String>,
    indexmap::IndexMap<String, Option<String>>,
) {
    let mut resolved_container_env = indexmap::IndexMap::new();
    for (key, raw) in container_env {
        let value = substitute_string_mut(raw, ctx);
        ctx.container_env.insert(key.clone(), value.clone());
        resolved_container_env.insert(key.clone(), value);
    }

    let mut resolved_remote_env = indexmap::IndexMap::new();
    for (key, raw) in remote_env {
        let resolved = match raw {
            Some(v) if v.is_empty() => None,
            Some(v) => Some(substitute_string_mut(v, ctx)),
            None => None,
        };
        resolved_remote_env.insert(key.clone(), resolved);
    }

    (resolved_container_env, resolved_remote_env)
}
