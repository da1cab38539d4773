//! Lifecycle merger (§4.I)
//!
//! For each of the five hook phases, in feature installation order: append
//! every feature's hook of that phase (flattened, whatever its shape),
//! then the user's hook of that phase (same flattening), and wrap the
//! result in `LifecycleCommand::Merged` for the executor. A stricter
//! contract than "keep shape, track source": this merger always emits
//! `Merged`, never a raw shape, so the executor has one dispatch path for
//! anything that reaches it post-merge.

use crate::config::LifecycleCommand;
use crate::feature_resolver::ResolvedFeature;
use crate::state::Phase;

fn feature_command(feature: &ResolvedFeature, phase: Phase) -> Option<LifecycleCommand> {
    let value = match phase {
        Phase::OnCreate => feature.metadata.on_create_command.as_ref(),
        Phase::UpdateContent => feature.metadata.update_content_command.as_ref(),
        Phase::PostCreate => feature.metadata.post_create_command.as_ref(),
        Phase::PostStart => feature.metadata.post_start_command.as_ref(),
        Phase::PostAttach => feature.metadata.post_attach_command.as_ref(),
    }?;
    serde_json::from_value(value.clone()).ok()
}

/// Merge feature and user hooks for one phase. `None` if the combined
/// slice is empty (no entry is emitted for that phase).
pub fn merge_phase(
    phase: Phase,
    ordered_features: &[ResolvedFeature],
    user_command: Option<&LifecycleCommand>,
) -> Option<LifecycleCommand> {
    let mut steps = Vec::new();

    for feature in ordered_features {
        if let Some(cmd) = feature_command(feature, phase) {
            steps.extend(cmd.flatten());
        }
    }

    if let Some(cmd) = user_command {
        steps.extend(cmd.flatten());
    }

    if steps.is_empty() {
        None
    } else {
        Some(LifecycleCommand::Merged(steps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureMetadata;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn feature_with_on_create(id: &str, command: serde_json::Value) -> ResolvedFeature {
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
                entrypoint: None,
                depends_on: HashMap::new(),
                installs_after: Vec::new(),
                on_create_command: Some(command),
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
    fn feature_hooks_precede_user_hook() {
        let features = vec![
            feature_with_on_create("a", serde_json::json!("echo a")),
            feature_with_on_create("b", serde_json::json!(["echo", "b"])),
        ];
        let user = LifecycleCommand::Scalar("echo user".to_string());

        let merged = merge_phase(Phase::OnCreate, &features, Some(&user)).unwrap();
        match merged {
            LifecycleCommand::Merged(steps) => {
                assert_eq!(steps, vec!["echo a".to_string(), "echo b".to_string(), "echo user".to_string()]);
            }
            other => panic!("expected Merged, got {other:?}"),
        }
    }

    #[test]
    fn empty_combined_slice_yields_none() {
        let features: Vec<ResolvedFeature> = Vec::new();
        assert!(merge_phase(Phase::PostCreate, &features, None).is_none());
    }

    #[test]
    fn only_user_hook_still_wrapped_in_merged() {
        let features: Vec<ResolvedFeature> = Vec::new();
        let user = LifecycleCommand::Scalar("echo solo".to_string());
        let merged = merge_phase(Phase::PostStart, &features, Some(&user)).unwrap();
        assert_eq!(merged, LifecycleCommand::Merged(vec!["echo solo".to_string()]));
    }
}
