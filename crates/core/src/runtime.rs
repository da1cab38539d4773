//! Runtime client adapter (§4.L, §6.2)
//!
//! A narrow capability interface over the external container runtime: the
//! core never reasons about image stores, daemons, or registry access
//! directly, only through `run`/`run_with_progress`/`command`. All other
//! interactions (image existence, `ps` filtering, `inspect`, `cp`) are
//! expressed as `run` invocations with runtime-specific argument shapes;
//! the core does not interpret output beyond exit status and captured text.

use crate::errors::{DockerError, Result};
use std::io::{IsTerminal, Write};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

/// Captured output of one `run` invocation.
#[derive(Debug, Clone)]
pub struct RuntimeOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RuntimeOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Capability interface the core consumes to talk to a container runtime.
#[allow(async_fn_in_trait)]
pub trait RuntimeClient: Send + Sync {
    /// Invoke the runtime synchronously with an opaque argument vector,
    /// capturing stdout/stderr.
    async fn run(&self, args: &[String]) -> Result<RuntimeOutput>;

    /// Same as `run`, but `image_name` identifies the image/operation so a
    /// progress renderer can label output; streams combined output as it
    /// arrives rather than buffering it all.
    async fn run_with_progress(&self, image_name: &str, args: &[String]) -> Result<()>;

    /// The runtime's base command (to be spawned for exec-replacement at
    /// attach time).
    fn command(&self) -> &str;
}

/// Default `RuntimeClient` implementation shelling out to a configured
/// binary (`docker` unless overridden).
#[derive(Debug, Clone)]
pub struct CliRuntimeClient {
    binary: String,
}

impl CliRuntimeClient {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    /// Resolve the binary from `PACKNPLAY_RUNTIME`, defaulting to `docker`.
    pub fn from_env() -> Self {
        let binary = std::env::var("PACKNPLAY_RUNTIME").unwrap_or_else(|_| "docker".to_string());
        Self::new(binary)
    }
}

impl Default for CliRuntimeClient {
    fn default() -> Self {
        Self::from_env()
    }
}

impl RuntimeClient for CliRuntimeClient {
    #[instrument(skip(self), fields(binary = %self.binary))]
    async fn run(&self, args: &[String]) -> Result<RuntimeOutput> {
        debug!(?args, "invoking runtime");
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| DockerError::RuntimeUnavailable { message: e.to_string() })?;

        Ok(RuntimeOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    #[instrument(skip(self), fields(binary = %self.binary, image = %image_name))]
    async fn run_with_progress(&self, image_name: &str, args: &[String]) -> Result<()> {
        let tty = std::io::stdout().is_terminal();
        debug!(tty, "running runtime command with progress");

        let mut child = Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DockerError::RuntimeUnavailable { message: e.to_string() })?;

        let mut stdout_lines = BufReader::new(child.stdout.take().expect("piped stdout")).lines();
        let mut stderr = child.stderr.take().expect("piped stderr");

        let label = image_name.to_string();
        let stdout_task = tokio::spawn(async move {
            while let Ok(Some(line)) = stdout_lines.next_line().await {
                if tty {
                    println!("[{label}] {line}");
                } else {
                    println!("{line}");
                }
                let _ = std::io::stdout().flush();
            }
        });

        let mut captured_stderr = String::new();
        stderr.read_to_string(&mut captured_stderr).await.ok();

        let _ = stdout_task.await;
        let status = child
            .wait()
            .await
            .map_err(|e| DockerError::RuntimeUnavailable { message: e.to_string() })?;

        if !status.success() {
            warn!(stderr = %captured_stderr, "runtime command failed");
            return Err(DockerError::ImageBuild {
                output: captured_stderr,
            }
            .into());
        }

        Ok(())
    }

    fn command(&self) -> &str {
        &self.binary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_defaults_to_docker() {
        std::env::remove_var("PACKNPLAY_RUNTIME");
        assert_eq!(CliRuntimeClient::from_env().command(), "docker");
    }

    #[test]
    fn from_env_honors_override() {
        std::env::set_var("PACKNPLAY_RUNTIME", "podman");
        assert_eq!(CliRuntimeClient::from_env().command(), "podman");
        std::env::remove_var("PACKNPLAY_RUNTIME");
    }

    #[tokio::test]
    async fn run_captures_exit_status_and_output() {
        let client = CliRuntimeClient::new("echo");
        let output = client.run(&["hello".to_string()]).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn run_reports_runtime_unavailable_for_missing_binary() {
        let client = CliRuntimeClient::new("packnplay-definitely-not-a-real-binary");
        let result = client.run(&[]).await;
        assert!(matches!(
            result,
            Err(crate::errors::PacknplayError::Docker(DockerError::RuntimeUnavailable { .. }))
        ));
    }
}
