//! Image preparer (§4.F)
//!
//! Decides among pull, build-from-Dockerfile, and build-with-features;
//! invokes the runtime client with progress reporting; checks existence
//! first so a launch against an already-prepared image is a no-op.

use crate::config::DevContainerConfig;
use crate::errors::{ConfigError, Result};
use crate::feature_resolver::ResolvedFeature;
use crate::recipe;
use crate::runtime::RuntimeClient;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// Translated form of a configuration's `build` object plus top-level
/// `cacheFrom`, ready for argument assembly.
#[derive(Debug, Clone, Default)]
pub struct BuildSpec {
    pub dockerfile: Option<String>,
    pub context: PathBuf,
    pub build_args: Vec<(String, String)>,
    pub target: Option<String>,
    pub cache_from: Vec<String>,
    /// Opaque extra build options (e.g. `--network=host`), passed through
    /// verbatim after the structured flags.
    pub options: Vec<String>,
}

impl BuildSpec {
    /// Derive a `BuildSpec` from a configuration's opaque `build` object
    /// and `cacheFrom` list, defaulting the context to `.devcontainer`
    /// beside `config_dir`.
    pub fn from_config(config: &DevContainerConfig, config_dir: &Path) -> Self {
        let build = config.build.as_ref();

        let dockerfile = config.get_dockerfile();

        let context = build
            .and_then(|b| b.get("context"))
            .and_then(|v| v.as_str())
            .map(|s| config_dir.join(s))
            .unwrap_or_else(|| config_dir.join(".devcontainer"));

        let build_args = build
            .and_then(|b| b.get("args"))
            .and_then(|v| v.as_object())
            .map(|m| {
                let mut pairs: Vec<(String, String)> = m
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect();
                pairs.sort_by(|a, b| a.0.cmp(&b.0));
                pairs
            })
            .unwrap_or_default();

        let target = build
            .and_then(|b| b.get("target"))
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Self {
            dockerfile,
            context,
            build_args,
            target,
            cache_from: config.cache_from.clone(),
            options: Vec::new(),
        }
    }
}

/// Translate a `BuildSpec` into runtime build arguments, tagging the
/// resulting image as `tag` (§4.F order: `-t`, `-f`, `--build-arg`s,
/// optional `--target`, `--cache-from`s, opaque options, context path).
pub fn build_args(spec: &BuildSpec, tag: &str) -> Vec<String> {
    let mut args = vec!["build".to_string(), "-t".to_string(), tag.to_string()];

    if let Some(dockerfile) = &spec.dockerfile {
        args.push("-f".to_string());
        args.push(dockerfile.clone());
    }

    for (key, value) in &spec.build_args {
        args.push("--build-arg".to_string());
        args.push(format!("{key}={value}"));
    }

    if let Some(target) = &spec.target {
        args.push("--target".to_string());
        args.push(target.clone());
    }

    for cache in &spec.cache_from {
        args.push("--cache-from".to_string());
        args.push(cache.clone());
    }

    args.extend(spec.options.iter().cloned());
    args.push(spec.context.to_string_lossy().to_string());

    args
}

/// Decide among pull / build-from-Dockerfile / build-with-features and
/// drive the runtime, returning the image name/tag to run.
#[instrument(skip(config, ordered_features, runtime))]
pub async fn prepare<R: RuntimeClient>(
    config: &DevContainerConfig,
    project: &str,
    config_dir: &Path,
    ordered_features: &[ResolvedFeature],
    runtime: &R,
) -> Result<String> {
    if !ordered_features.is_empty() || config.has_dockerfile() {
        let target = crate::identity::image_name(project);

        if image_exists(runtime, &target).await? {
            info!(image = %target, "generated image already present, reusing");
            return Ok(target);
        }

        let mut spec = BuildSpec::from_config(config, config_dir);
        let mut staged_dirs = Vec::new();
        if !ordered_features.is_empty() {
            if spec.dockerfile.is_none() {
                // Decided from the *original* install paths: staging every
                // out-of-context feature into the build context below would
                // otherwise make every feature a context descendant by the
                // time the recipe is rendered, always collapsing this to
                // single-stage regardless of where features really live.
                let multi_stage = recipe::needs_multi_stage(ordered_features, &spec.context);
                let (staged_features, dirs) = stage_out_of_context_features(ordered_features, &spec.context)?;
                staged_dirs = dirs;
                let base = config.image.clone().unwrap_or_else(|| "scratch".to_string());
                let recipe_text = recipe::generate(
                    &staged_features,
                    &spec.context,
                    &base,
                    config.remote_user.as_deref(),
                    multi_stage,
                );
                let recipe_path = spec.context.join("Dockerfile.packnplay");
                std::fs::create_dir_all(&spec.context).map_err(ConfigError::Io)?;
                std::fs::write(&recipe_path, recipe_text).map_err(ConfigError::Io)?;
                spec.dockerfile = Some(recipe_path.to_string_lossy().to_string());
            }
        }

        let args = build_args(&spec, &target);
        let build_result = runtime.run_with_progress(&target, &args).await;

        // Staging directories are removed after a successful build only;
        // a failed build's directory is left in place so a retry by the
        // caller (or a human inspecting the failure) can see what was
        // actually fed to the builder.
        if build_result.is_ok() {
            for dir in &staged_dirs {
                let _ = std::fs::remove_dir_all(dir);
            }
        }
        build_result?;
        return Ok(target);
    }

    if let Some(image) = &config.image {
        if image_exists(runtime, image).await? {
            return Ok(image.clone());
        }
        runtime.run_with_progress(image, &["pull".to_string(), image.clone()]).await?;
        return Ok(image.clone());
    }

    Err(ConfigError::UnconfiguredBase.into())
}

/// Copy every feature whose `install_path` is not a descendant of
/// `build_context` into `<build_context>/oci-cache/<basename>` so the
/// recipe generator only ever needs to emit context-relative `COPY`
/// sources (§4.E/§4.F). Returns the adjusted feature list (features already
/// inside the context are returned unchanged) plus the list of staged
/// directories created, for cleanup by the caller after a successful build.
fn stage_out_of_context_features(
    features: &[ResolvedFeature],
    build_context: &Path,
) -> Result<(Vec<ResolvedFeature>, Vec<PathBuf>)> {
    let mut staged = Vec::with_capacity(features.len());
    let mut created_dirs = Vec::new();

    for feature in features {
        if feature.install_path.starts_with(build_context) {
            staged.push(feature.clone());
            continue;
        }

        let basename = feature
            .install_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| feature.id.clone());
        let staged_path = build_context.join("oci-cache").join(&basename);

        if staged_path.exists() {
            std::fs::remove_dir_all(&staged_path).map_err(ConfigError::Io)?;
        }
        copy_dir_recursive(&feature.install_path, &staged_path).map_err(ConfigError::Io)?;
        created_dirs.push(staged_path.clone());

        let mut adjusted = feature.clone();
        adjusted.install_path = staged_path;
        staged.push(adjusted);
    }

    Ok((staged, created_dirs))
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let dest_path = dst.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir_recursive(&entry.path(), &dest_path)?;
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(entry.path())?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(target, &dest_path)?;
            #[cfg(not(unix))]
            std::fs::copy(entry.path(), &dest_path).map(|_| ())?;
        } else {
            std::fs::copy(entry.path(), &dest_path)?;
        }
    }
    Ok(())
}

async fn image_exists<R: RuntimeClient>(runtime: &R, image: &str) -> Result<bool> {
    let output = runtime
        .run(&["image".to_string(), "inspect".to_string(), image.to_string()])
        .await?;
    Ok(output.success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeOutput;

    struct FakeRuntime {
        image_present: bool,
    }

    impl RuntimeClient for FakeRuntime {
        async fn run(&self, _args: &[String]) -> Result<RuntimeOutput> {
            Ok(RuntimeOutput {
                status: if self.image_present { 0 } else { 1 },
                stdout: String::new(),
                stderr: String::new(),
            })
        }

        async fn run_with_progress(&self, _image_name: &str, _args: &[String]) -> Result<()> {
            Ok(())
        }

        fn command(&self) -> &str {
            "docker"
        }
    }

    #[test]
    fn build_args_order() {
        let spec = BuildSpec {
            dockerfile: Some("Dockerfile".to_string()),
            context: PathBuf::from("/work/.devcontainer"),
            build_args: vec![("A".to_string(), "1".to_string())],
            target: Some("dev".to_string()),
            cache_from: vec!["myimage:cache".to_string()],
            options: vec!["--network=host".to_string()],
        };
        let args = build_args(&spec, "packnplay-proj-devcontainer:latest");
        assert_eq!(
            args,
            vec![
                "build",
                "-t",
                "packnplay-proj-devcontainer:latest",
                "-f",
                "Dockerfile",
                "--build-arg",
                "A=1",
                "--target",
                "dev",
                "--cache-from",
                "myimage:cache",
                "--network=host",
                "/work/.devcontainer",
            ]
        );
    }

    #[tokio::test]
    async fn pulls_plain_image_when_absent() {
        let config = DevContainerConfig {
            image: Some("alpine:latest".to_string()),
            ..Default::default()
        };
        let runtime = FakeRuntime { image_present: false };
        let image = prepare(&config, "proj", Path::new("/work"), &[], &runtime).await.unwrap();
        assert_eq!(image, "alpine:latest");
    }

    #[tokio::test]
    async fn skips_pull_when_image_already_present() {
        let config = DevContainerConfig {
            image: Some("alpine:latest".to_string()),
            ..Default::default()
        };
        let runtime = FakeRuntime { image_present: true };
        let image = prepare(&config, "proj", Path::new("/work"), &[], &runtime).await.unwrap();
        assert_eq!(image, "alpine:latest");
    }

    #[tokio::test]
    async fn unconfigured_base_fails() {
        let config = DevContainerConfig::default();
        let runtime = FakeRuntime { image_present: false };
        let result = prepare(&config, "proj", Path::new("/work"), &[], &runtime).await;
        assert!(result.is_err());
    }

    fn test_feature(id: &str, install_path: PathBuf) -> ResolvedFeature {
        use crate::features::FeatureMetadata;
        use std::collections::HashMap;
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
    fn staging_copies_out_of_context_feature_into_oci_cache() {
        let context_dir = tempfile::TempDir::new().unwrap();
        let source_dir = tempfile::TempDir::new().unwrap();
        std::fs::write(source_dir.path().join("install.sh"), "#!/bin/sh\necho hi\n").unwrap();

        let features = vec![test_feature("common-utils", source_dir.path().to_path_buf())];
        let (staged, created) = stage_out_of_context_features(&features, context_dir.path()).unwrap();

        assert_eq!(created.len(), 1);
        assert!(staged[0].install_path.starts_with(context_dir.path()));
        assert!(staged[0].install_path.join("install.sh").exists());
        assert!(!recipe::needs_multi_stage(&staged, context_dir.path()));
    }

    #[test]
    fn staging_leaves_in_context_feature_untouched() {
        let context_dir = tempfile::TempDir::new().unwrap();
        let inside = context_dir.path().join("features").join("local-one");
        std::fs::create_dir_all(&inside).unwrap();
        std::fs::write(inside.join("install.sh"), "#!/bin/sh\n").unwrap();

        let features = vec![test_feature("local-one", inside.clone())];
        let (staged, created) = stage_out_of_context_features(&features, context_dir.path()).unwrap();

        assert!(created.is_empty());
        assert_eq!(staged[0].install_path, inside);
    }
}
