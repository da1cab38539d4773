//! Image recipe generator (§4.E)
//!
//! Synthesizes a deterministic Dockerfile-shaped build recipe from an
//! ordered feature installation plan, a base image, and an optional
//! remote user. `COPY` instructions only ever read paths relative to the
//! build context — by the time [`generate`] runs, the Image Preparer has
//! already staged any feature whose `install_path` fell outside the build
//! context into `<build_context>/oci-cache/<basename>` (§4.E/§4.F), so
//! every `ResolvedFeature` this module sees is a context descendant.

use crate::feature_resolver::{normalize_option_name, ResolvedFeature};
use std::path::{Path, PathBuf};

/// Per-feature destination directory inside the build context, indexed by
/// installation order.
pub fn feature_dest(index: usize, feature_id: &str) -> String {
    format!("/tmp/devcontainer-features/{index}-{feature_id}")
}

/// Whether `features` requires a multi-stage recipe: true if any ordered
/// feature's `install_path` is not a descendant of `build_context`. Such
/// features must be staged into the context by the caller before
/// [`generate`] is invoked (see [`crate::image_preparer`]); this function
/// only decides which recipe shape to emit, not where to physically place
/// the directories.
pub fn needs_multi_stage(features: &[ResolvedFeature], build_context: &Path) -> bool {
    features.iter().any(|f| !f.install_path.starts_with(build_context))
}

/// Render `install_path` as a path relative to `build_context`, suitable
/// for a Dockerfile `COPY` source. Falls back to the path as given if it is
/// not (yet) a descendant of the context — the caller is responsible for
/// staging it there first.
fn context_relative(install_path: &Path, build_context: &Path) -> PathBuf {
    install_path
        .strip_prefix(build_context)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| install_path.to_path_buf())
}

/// Generate the full image recipe text. `multi_stage` is decided by the
/// caller from features' *original* install paths (see
/// [`needs_multi_stage`]) — by the time this runs, every feature's
/// `install_path` is expected to already be a descendant of `build_context`
/// (staged there by the Image Preparer if it originally lived elsewhere),
/// which would make recomputing the decision here always come out false.
pub fn generate(
    features: &[ResolvedFeature],
    build_context: &Path,
    base_image: &str,
    remote_user: Option<&str>,
    multi_stage: bool,
) -> String {
    if multi_stage {
        generate_multi_stage(features, build_context, base_image, remote_user)
    } else {
        generate_single_stage(features, build_context, base_image, remote_user)
    }
}

fn generate_single_stage(
    features: &[ResolvedFeature],
    build_context: &Path,
    base_image: &str,
    remote_user: Option<&str>,
) -> String {
    let mut out = format!("FROM {base_image}\n\n");
    for (index, feature) in features.iter().enumerate() {
        out.push_str(&feature_block(index, feature, build_context, &feature_dest(index, &feature.id)));
    }
    out.push_str(&tail(remote_user));
    out
}

fn generate_multi_stage(
    features: &[ResolvedFeature],
    build_context: &Path,
    base_image: &str,
    remote_user: Option<&str>,
) -> String {
    let mut out = String::from("FROM scratch AS feature-prep\n");
    for (index, feature) in features.iter().enumerate() {
        out.push_str(&format!(
            "COPY {}/ {}/\n",
            context_relative(&feature.install_path, build_context).display(),
            feature_dest(index, &feature.id)
        ));
    }
    out.push('\n');

    out.push_str(&format!("FROM {base_image}\n\n"));
    for (index, feature) in features.iter().enumerate() {
        let dest = feature_dest(index, &feature.id);
        out.push_str(&format!("# feature: {}\n", feature.id));
        out.push_str(&option_env_lines(feature));
        out.push_str(&container_env_lines(feature));
        out.push_str(&format!("COPY --from=feature-prep {dest}/ {dest}/\n"));
        out.push_str(&format!("RUN cd {dest} && chmod +x install.sh && ./install.sh\n\n"));
    }
    out.push_str(&tail(remote_user));
    out
}

fn feature_block(index: usize, feature: &ResolvedFeature, build_context: &Path, dest: &str) -> String {
    let mut out = format!("# feature: {}\n", feature.id);
    out.push_str(&option_env_lines(feature));
    out.push_str(&container_env_lines(feature));
    out.push_str(&format!(
        "COPY {}/ {dest}/\n",
        context_relative(&feature.install_path, build_context).display()
    ));
    out.push_str(&format!("RUN cd {dest} && chmod +x install.sh && ./install.sh\n\n"));
    out
}

fn option_env_lines(feature: &ResolvedFeature) -> String {
    let mut names: Vec<&String> = feature.options.keys().collect();
    names.sort();
    let mut out = String::new();
    for name in names {
        let value = &feature.options[name];
        out.push_str(&format!("ENV {}={}\n", normalize_option_name(name), value.to_env_string()));
    }
    out
}

fn container_env_lines(feature: &ResolvedFeature) -> String {
    let mut keys: Vec<&String> = feature.metadata.container_env.keys().collect();
    keys.sort();
    let mut out = String::new();
    for key in keys {
        out.push_str(&format!("ENV {}={}\n", key, feature.metadata.container_env[key]));
    }
    out
}

fn tail(remote_user: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(user) = remote_user {
        out.push_str(&format!("USER {user}\n"));
    }
    out.push_str("WORKDIR /workspace\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FeatureMetadata, OptionValue};
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn feature(id: &str, install_path: PathBuf) -> ResolvedFeature {
        ResolvedFeature {
            id: id.to_string(),
            version: "1.0.0".to_string(),
            install_path,
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
    fn single_stage_when_all_features_inside_context() {
        let ctx = PathBuf::from("/work/.devcontainer");
        let features = vec![feature("common-utils", ctx.join("features/common-utils"))];
        assert!(!needs_multi_stage(&features, &ctx));
    }

    #[test]
    fn multi_stage_when_feature_outside_context() {
        let ctx = PathBuf::from("/work/.devcontainer");
        let features = vec![feature("common-utils", PathBuf::from("/cache/oci-cache/common-utils"))];
        assert!(needs_multi_stage(&features, &ctx));
    }

    #[test]
    fn generated_recipe_includes_feature_steps_in_order() {
        let ctx = PathBuf::from("/work/.devcontainer");
        let mut f1 = feature("A", ctx.join("features/a"));
        f1.options.insert("enableFoo".to_string(), OptionValue::Boolean(true));
        let f2 = feature("B", ctx.join("features/b"));
        let recipe = generate(&[f1, f2], &ctx, "alpine:latest", Some("vscode"), false);

        assert!(recipe.starts_with("FROM alpine:latest"));
        assert!(recipe.contains("ENV ENABLEFOO=true"));
        assert!(recipe.contains("0-A"));
        assert!(recipe.contains("1-B"));
        assert!(recipe.find("0-A").unwrap() < recipe.find("1-B").unwrap());
        assert!(recipe.contains("USER vscode"));
        assert!(recipe.contains("WORKDIR /workspace"));
    }

    #[test]
    fn recipe_without_remote_user_omits_user_directive() {
        let ctx = PathBuf::from("/work/.devcontainer");
        let recipe = generate(&[], &ctx, "alpine:latest", None, false);
        assert!(!recipe.contains("USER"));
        assert!(recipe.contains("WORKDIR /workspace"));
    }

    #[test]
    fn generate_multi_stage_emits_prep_stage_and_from_copy() {
        let ctx = PathBuf::from("/work/.devcontainer");
        let staged = feature("common-utils", ctx.join("oci-cache/common-utils"));
        let recipe = generate(&[staged], &ctx, "alpine:latest", None, true);

        assert!(recipe.starts_with("FROM scratch AS feature-prep"));
        assert!(recipe.contains("COPY oci-cache/common-utils/ 0-common-utils/\n"));
        assert!(recipe.contains("COPY --from=feature-prep 0-common-utils/ 0-common-utils/"));
    }
}
