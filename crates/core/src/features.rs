//! Feature references and metadata
//!
//! Parses `devcontainer-feature.json` and the feature reference strings used
//! as keys in a configuration's `features` map.

use crate::errors::{FeatureError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, instrument};

/// A resolved value for a feature option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Boolean(bool),
    String(String),
    Number(f64),
}

impl OptionValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            OptionValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Render as the string form used for Dockerfile `ENV` directives:
    /// booleans as `true`/`false`, numbers in canonical decimal form,
    /// strings passed through.
    pub fn to_env_string(&self) -> String {
        match self {
            OptionValue::Boolean(b) => b.to_string(),
            OptionValue::String(s) => s.clone(),
            OptionValue::Number(n) => {
                if n.fract() == 0.0 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
        }
    }
}

/// The declared type and constraints for a feature option, following
/// `devcontainer-feature.json`'s `options.<name>` schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionSpec {
    #[serde(rename = "type")]
    pub option_type: OptionType,
    #[serde(default)]
    pub default: Option<OptionValue>,
    /// Allowed values, meaningful only for `type: string`.
    #[serde(default)]
    pub proposals: Option<Vec<String>>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    String,
    Boolean,
    Number,
}

impl OptionSpec {
    /// Validate a caller-supplied value against this option's declared
    /// type and (for strings) its `proposals` constraint. Unknown option
    /// names are never routed here — the resolver silently ignores those
    /// before calling this.
    pub fn validate_value(&self, value: &OptionValue) -> std::result::Result<(), String> {
        match (self.option_type, value) {
            (OptionType::Boolean, OptionValue::Boolean(_)) => Ok(()),
            (OptionType::Number, OptionValue::Number(_)) => Ok(()),
            (OptionType::String, OptionValue::String(s)) => {
                if let Some(proposals) = &self.proposals {
                    if !proposals.contains(s) {
                        return Err(format!(
                            "value '{s}' is not one of the allowed proposals: {proposals:?}"
                        ));
                    }
                }
                Ok(())
            }
            (expected, _) => Err(format!("expected a {expected:?} value")),
        }
    }
}

/// Feature metadata, as declared in `devcontainer-feature.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureMetadata {
    pub id: String,
    pub version: String,

    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub documentation_url: Option<String>,
    #[serde(default)]
    pub license_url: Option<String>,

    #[serde(default)]
    pub options: HashMap<String, OptionSpec>,

    #[serde(default)]
    pub container_env: HashMap<String, String>,
    #[serde(default)]
    pub mounts: Vec<String>,
    #[serde(default)]
    pub init: Option<bool>,
    #[serde(default)]
    pub privileged: Option<bool>,
    #[serde(default)]
    pub cap_add: Vec<String>,
    #[serde(default)]
    pub security_opt: Vec<String>,

    /// Container entrypoint override, string or array of strings.
    #[serde(default)]
    pub entrypoint: Option<serde_json::Value>,

    /// Hard dependencies: every listed feature id must be installed first.
    #[serde(default)]
    pub depends_on: HashMap<String, serde_json::Value>,
    /// Soft dependencies: installed first only if also present in the
    /// input set.
    #[serde(default)]
    pub installs_after: Vec<String>,

    #[serde(default)]
    pub on_create_command: Option<serde_json::Value>,
    #[serde(default)]
    pub update_content_command: Option<serde_json::Value>,
    #[serde(default)]
    pub post_create_command: Option<serde_json::Value>,
    #[serde(default)]
    pub post_start_command: Option<serde_json::Value>,
    #[serde(default)]
    pub post_attach_command: Option<serde_json::Value>,
}

impl FeatureMetadata {
    pub fn has_lifecycle_commands(&self) -> bool {
        self.on_create_command.is_some()
            || self.update_content_command.is_some()
            || self.post_create_command.is_some()
            || self.post_start_command.is_some()
            || self.post_attach_command.is_some()
    }

    /// Entrypoint as a list of argv elements, regardless of whether it was
    /// declared as a string or array.
    pub fn entrypoint_argv(&self) -> Option<Vec<String>> {
        match &self.entrypoint {
            Some(serde_json::Value::String(s)) => Some(vec![s.clone()]),
            Some(serde_json::Value::Array(items)) => Some(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            _ => None,
        }
    }

    fn validate(&self) -> std::result::Result<(), FeatureError> {
        if self.id.is_empty() {
            return Err(FeatureError::Parsing {
                message: "feature id is required and cannot be empty".to_string(),
            });
        }
        if contains_forbidden_char(&self.id) {
            return Err(FeatureError::InvalidId { id: self.id.clone() });
        }

        for (option_name, option_def) in &self.options {
            if let Some(default_value) = &option_def.default {
                if let Err(err) = option_def.validate_value(default_value) {
                    return Err(FeatureError::OptionValidation {
                        option: option_name.clone(),
                        message: format!("default value is invalid: {err}"),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Characters forbidden in a feature id (Testable Property grounding §4.D).
pub fn contains_forbidden_char(id: &str) -> bool {
    id.contains('/') || id.contains(':') || id.contains('\\') || id.contains('.')
}

/// Parse `devcontainer-feature.json` from a feature's materialized
/// directory. Missing metadata is not an error here — callers (the feature
/// resolver) synthesize a minimal `FeatureMetadata` from the directory name
/// when this returns `NotFound`.
#[instrument(level = "debug")]
pub fn parse_feature_metadata(path: &Path) -> Result<FeatureMetadata> {
    if !path.exists() {
        return Err(FeatureError::NotFound {
            path: path.display().to_string(),
        }
        .into());
    }

    let content = std::fs::read_to_string(path).map_err(FeatureError::Io)?;
    let metadata: FeatureMetadata =
        serde_json::from_str(&content).map_err(|e| FeatureError::Parsing {
            message: e.to_string(),
        })?;

    debug!("parsed feature: id={}, version={}", metadata.id, metadata.version);
    metadata.validate()?;

    Ok(metadata)
}

/// A feature's source location, as declared in a configuration's `features`
/// map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeatureRef {
    /// A path on the local filesystem, relative to the devcontainer.json
    /// directory or absolute. Never cached — used in place.
    Local(String),
    /// An OCI registry reference, e.g.
    /// `ghcr.io/devcontainers/features/common-utils:1`.
    Oci(String),
    /// A direct URL to a `.tgz`/`.tar.gz` archive.
    Https(String),
}

impl FeatureRef {
    /// Parse a feature reference string as it appears as a key in the
    /// configuration's `features` map.
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with("./") || raw.starts_with("../") || raw.starts_with('/') {
            FeatureRef::Local(raw.to_string())
        } else if raw.starts_with("https://") || raw.starts_with("http://") {
            FeatureRef::Https(raw.to_string())
        } else {
            FeatureRef::Oci(raw.to_string())
        }
    }

    /// The reference's display form, used as a cache key basis and in error
    /// messages.
    pub fn as_str(&self) -> &str {
        match self {
            FeatureRef::Local(s) | FeatureRef::Oci(s) | FeatureRef::Https(s) => s,
        }
    }

    /// The last path segment of the reference, with `:` replaced by `-`,
    /// used as the feature cache's directory name.
    pub fn cache_key(&self) -> String {
        let raw = self.as_str();
        let last_segment = raw.rsplit('/').next().unwrap_or(raw);
        last_segment.replace(':', "-")
    }
}
