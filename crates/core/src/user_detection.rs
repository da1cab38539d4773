//! Remote-user detection (§4.K)
//!
//! When a configuration omits `remoteUser`, the Launch Controller falls
//! back to whatever user the image itself runs as. A single `inspect`
//! probes `Config.User`; an empty value (the common case for images that
//! don't set `USER`) falls back to `root`.

use crate::errors::Result;
use crate::runtime::RuntimeClient;
use tracing::{debug, instrument};

/// Probe `image`'s `Config.User` via `inspect --format`, defaulting to
/// `root` when the image doesn't set one.
#[instrument(skip(runtime))]
pub async fn detect_remote_user<R: RuntimeClient>(runtime: &R, image: &str) -> Result<String> {
    let output = runtime
        .run(&[
            "inspect".to_string(),
            "--format".to_string(),
            "{{.Config.User}}".to_string(),
            image.to_string(),
        ])
        .await?;

    let user = output.stdout.trim();
    if user.is_empty() {
        debug!(image, "image sets no user, defaulting to root");
        Ok("root".to_string())
    } else {
        // `Config.User` may carry a `uid:gid` pair; only the user portion
        // is meaningful for `docker run --user`.
        let user = user.split(':').next().unwrap_or(user);
        Ok(user.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeOutput;

    struct FakeRuntime {
        stdout: &'static str,
    }

    impl RuntimeClient for FakeRuntime {
        async fn run(&self, _args: &[String]) -> Result<RuntimeOutput> {
            Ok(RuntimeOutput {
                status: 0,
                stdout: self.stdout.to_string(),
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

    #[tokio::test]
    async fn blank_user_falls_back_to_root() {
        let runtime = FakeRuntime { stdout: "\n" };
        assert_eq!(detect_remote_user(&runtime, "alpine").await.unwrap(), "root");
    }

    #[tokio::test]
    async fn reports_configured_user() {
        let runtime = FakeRuntime { stdout: "vscode\n" };
        assert_eq!(detect_remote_user(&runtime, "mcr/devcontainer").await.unwrap(), "vscode");
    }

    #[tokio::test]
    async fn strips_gid_suffix() {
        let runtime = FakeRuntime { stdout: "1000:1000\n" };
        assert_eq!(detect_remote_user(&runtime, "custom").await.unwrap(), "1000");
    }
}
