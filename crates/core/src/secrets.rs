//! Proxied environment-variable allowlist
//!
//! The Launch Controller's start-argument assembly (§4.K step 6) forwards a
//! fixed list of well-known API-key environment variables from the host
//! process into the container, alongside AWS credentials when that
//! capability is enabled. This module owns that allowlist and the small
//! amount of logic needed to turn "what's set in my environment" into
//! `KEY=VALUE` pairs ready to become `--env` flags.
//!
//! Values are never logged; only variable names appear in tracing output.

use std::collections::HashMap;
use std::env;
use tracing::debug;

/// Default proxied API-key environment variables. Forwarded only when set
/// in the launching process's environment.
pub const PROXIED_ENV_VARS: &[&str] = &[
    "ANTHROPIC_API_KEY",
    "OPENAI_API_KEY",
    "GITHUB_TOKEN",
    "GH_TOKEN",
    "NPM_TOKEN",
    "OPENROUTER_API_KEY",
    "HF_TOKEN",
];

/// AWS credential environment variables, forwarded before AWS config vars
/// when the AWS capability is enabled (§4.K step 6).
pub const AWS_CREDENTIAL_VARS: &[&str] = &["AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY", "AWS_SESSION_TOKEN"];
pub const AWS_CONFIG_VARS: &[&str] = &["AWS_REGION", "AWS_DEFAULT_REGION", "AWS_PROFILE"];

/// Collect proxied API-key variables present in the host environment, in
/// `PROXIED_ENV_VARS` order.
pub fn proxied_env_vars() -> Vec<(String, String)> {
    collect(PROXIED_ENV_VARS)
}

/// Collect AWS variables, credentials first then config, when the AWS
/// capability is enabled. Returns an empty vector otherwise.
pub fn aws_env_vars(enabled: bool) -> Vec<(String, String)> {
    if !enabled {
        return Vec::new();
    }
    let mut out = collect(AWS_CREDENTIAL_VARS);
    out.extend(collect(AWS_CONFIG_VARS));
    out
}

fn collect(names: &[&str]) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for name in names {
        if let Ok(value) = env::var(name) {
            debug!(variable = %name, "forwarding host environment variable to container");
            out.push((name.to_string(), value));
        }
    }
    out
}

/// Collect proxied + AWS variables into a single ordered map, for callers
/// that want name lookups rather than the assembly order.
pub fn as_map(aws_enabled: bool) -> HashMap<String, String> {
    proxied_env_vars()
        .into_iter()
        .chain(aws_env_vars(aws_enabled))
        .collect()
}
