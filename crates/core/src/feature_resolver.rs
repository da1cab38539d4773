//! Feature dependency resolution
//!
//! Orders a set of materialized features into an installation sequence that
//! respects hard dependencies (`dependsOn`) and soft dependencies
//! (`installsAfter`), deterministically, and validates/normalizes each
//! feature's caller-supplied options.
//!
//! There's no teacher precedent for this specific algorithm — the feature
//! system this crate replaces was a placeholder — so the round-based
//! ordering here is written directly from first principles: repeatedly
//! install every feature whose dependencies are already satisfied, in
//! id-sorted batches, until nothing remains or nothing can proceed.

use crate::errors::{FeatureError, Result};
use crate::features::{contains_forbidden_char, FeatureMetadata, OptionSpec, OptionValue};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// A feature as materialized on disk, ready for dependency ordering.
#[derive(Debug, Clone)]
pub struct FeatureInput {
    pub id: String,
    pub install_path: PathBuf,
    pub metadata: FeatureMetadata,
    /// Caller-supplied option values from the configuration's `features`
    /// map entry for this feature, prior to default-filling or validation.
    pub raw_options: HashMap<String, OptionValue>,
}

impl FeatureInput {
    /// Build an input from a materialized feature directory, loading
    /// `devcontainer-feature.json` if present or synthesizing minimal
    /// metadata (`id = basename(install_path)`, `version = "1.0.0"`) if
    /// absent.
    pub fn from_install_path(
        install_path: &Path,
        raw_options: HashMap<String, OptionValue>,
    ) -> Self {
        let metadata_path = install_path.join("devcontainer-feature.json");
        let metadata = crate::features::parse_feature_metadata(&metadata_path).unwrap_or_else(|_| {
            let id = install_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            FeatureMetadata {
                id,
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
                entrypoint: None,
                depends_on: HashMap::new(),
                installs_after: Vec::new(),
                on_create_command: None,
                update_content_command: None,
                post_create_command: None,
                post_start_command: None,
                post_attach_command: None,
            }
        });

        Self {
            id: metadata.id.clone(),
            install_path: install_path.to_path_buf(),
            metadata,
            raw_options,
        }
    }
}

/// A feature placed into its final install position, with defaulted and
/// validated options.
#[derive(Debug, Clone)]
pub struct ResolvedFeature {
    pub id: String,
    pub version: String,
    pub install_path: PathBuf,
    pub options: HashMap<String, OptionValue>,
    pub metadata: FeatureMetadata,
    pub depends_on: Vec<String>,
    pub installs_after: Vec<String>,
}

/// Order `inputs` into an installation sequence, honoring hard/soft
/// dependencies and an optional override order.
#[instrument(skip_all)]
pub fn resolve(
    inputs: Vec<FeatureInput>,
    override_install_order: &[String],
) -> Result<Vec<ResolvedFeature>> {
    for input in &inputs {
        if contains_forbidden_char(&input.id) {
            return Err(FeatureError::InvalidId { id: input.id.clone() }.into());
        }
    }

    let by_id: HashMap<String, &FeatureInput> =
        inputs.iter().map(|f| (f.id.clone(), f)).collect();
    let present_ids: HashSet<&str> = by_id.keys().map(String::as_str).collect();

    let mut remaining: HashSet<String> = inputs.iter().map(|f| f.id.clone()).collect();
    let mut installed: HashSet<String> = HashSet::new();
    let mut order: Vec<String> = Vec::new();

    while !remaining.is_empty() {
        let mut ready: Vec<&str> = remaining
            .iter()
            .filter(|id| {
                let input = by_id[id.as_str()];
                let hard_ok = input
                    .metadata
                    .depends_on
                    .keys()
                    .all(|dep| installed.contains(dep));
                let soft_ok = input
                    .metadata
                    .installs_after
                    .iter()
                    .all(|dep| !present_ids.contains(dep.as_str()) || installed.contains(dep));
                hard_ok && soft_ok
            })
            .map(String::as_str)
            .collect();

        if ready.is_empty() {
            let mut remaining_ids: Vec<String> = remaining.into_iter().collect();
            remaining_ids.sort();
            return Err(FeatureError::UnresolvableDependencies {
                remaining: remaining_ids,
            }
            .into());
        }

        ready.sort();
        for id in ready {
            installed.insert(id.to_string());
            order.push(id.to_string());
        }
        remaining.retain(|id| !installed.contains(id));
    }

    if !override_install_order.is_empty() {
        let mut reordered: Vec<String> = Vec::with_capacity(order.len());
        for id in override_install_order {
            if present_ids.contains(id.as_str()) {
                reordered.push(id.clone());
            }
        }
        for id in &order {
            if !reordered.contains(id) {
                reordered.push(id.clone());
            }
        }

        // Hard-dependency violations still apply under an override: a
        // feature cannot precede one of its own hard dependencies.
        let position: HashMap<&str, usize> = reordered
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        for id in &reordered {
            let input = by_id[id.as_str()];
            for dep in input.metadata.depends_on.keys() {
                if let (Some(&dep_pos), Some(&own_pos)) = (position.get(dep.as_str()), position.get(id.as_str())) {
                    if dep_pos > own_pos {
                        return Err(FeatureError::UnresolvableDependencies {
                            remaining: vec![id.clone()],
                        }
                        .into());
                    }
                }
            }
        }

        order = reordered;
    }

    debug!("resolved feature install order: {:?}", order);

    order
        .into_iter()
        .map(|id| {
            let input = by_id[id.as_str()];
            let options = resolve_options(&input.metadata.options, &input.raw_options)?;
            Ok(ResolvedFeature {
                id: input.id.clone(),
                version: input.metadata.version.clone(),
                install_path: input.install_path.clone(),
                options,
                metadata: input.metadata.clone(),
                depends_on: input.metadata.depends_on.keys().cloned().collect(),
                installs_after: input.metadata.installs_after.clone(),
            })
        })
        .collect()
}

/// Fill in defaults and validate caller-supplied option values. Unknown
/// option names (present in `raw` but not in `spec`) are silently dropped.
fn resolve_options(
    spec: &HashMap<String, OptionSpec>,
    raw: &HashMap<String, OptionValue>,
) -> Result<HashMap<String, OptionValue>> {
    let mut resolved = HashMap::with_capacity(spec.len());

    for (name, option_spec) in spec {
        let value = match raw.get(name) {
            Some(v) => {
                option_spec.validate_value(v).map_err(|message| FeatureError::OptionValidation {
                    option: name.clone(),
                    message,
                })?;
                v.clone()
            }
            None => match &option_spec.default {
                Some(default) => default.clone(),
                None => continue,
            },
        };
        resolved.insert(name.clone(), value);
    }

    Ok(resolved)
}

/// Normalize a feature option name into the `ENV` variable name used inside
/// the generated Dockerfile recipe: non-alphanumeric/underscore characters
/// become `_`, a leading run of digits/underscores collapses to a single
/// `_`, and the result is uppercased.
pub fn normalize_option_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    let leading_run_len = replaced
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '_')
        .count();

    let normalized = if leading_run_len > 0 {
        let mut s = String::from("_");
        s.push_str(&replaced[leading_run_len..]);
        s
    } else {
        replaced
    };

    normalized.to_uppercase()
}
