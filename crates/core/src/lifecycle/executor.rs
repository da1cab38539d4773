//! Lifecycle executor (§4.G)
//!
//! Executes one `LifecycleCommand` inside a running container, as the
//! configured user, dispatching by shape. Consults the Lifecycle State
//! Store's `ShouldRun` before running a tracked phase and records success
//! after; `postStart` always runs but still has its hash recorded for
//! diagnostics.

use crate::config::{LifecycleCommand, ParallelTask};
use crate::errors::PacknplayError;
use crate::runtime::RuntimeClient;
use crate::state::{Phase, StateStore};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// One failed Parallel task entry: `(task_name, message)`.
pub type TaskFailure = (String, String);

/// Errors the executor itself can report, distinct from the crate-wide
/// error type because `ParallelFailures` needs to carry multiple named
/// failures that a single run didn't necessarily abort on.
#[derive(Debug)]
pub enum ExecError {
    Hook { message: String },
    Parallel { failures: Vec<TaskFailure> },
    Cancelled,
}

impl From<ExecError> for PacknplayError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::Hook { message } => PacknplayError::HookFailed {
                phase: "lifecycle".to_string(),
                message,
            },
            ExecError::Parallel { failures } => PacknplayError::ParallelFailures { failures },
            ExecError::Cancelled => PacknplayError::HookFailed {
                phase: "lifecycle".to_string(),
                message: "cancelled".to_string(),
            },
        }
    }
}

/// Executes lifecycle commands against one container.
pub struct LifecycleExecutor<R: RuntimeClient> {
    runtime: Arc<R>,
    container_id: String,
    user: Option<String>,
    verbose: bool,
    state: StateStore,
}

impl<R: RuntimeClient + 'static> LifecycleExecutor<R> {
    pub fn new(runtime: R, container_id: impl Into<String>, user: Option<String>, verbose: bool) -> Self {
        Self {
            runtime: Arc::new(runtime),
            container_id: container_id.into(),
            user,
            verbose,
            state: StateStore::new(),
        }
    }

    fn exec_args(&self, command_args: Vec<String>) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        if let Some(user) = &self.user {
            args.push("-u".to_string());
            args.push(user.clone());
        }
        args.push(self.container_id.clone());
        args.extend(command_args);
        args
    }

    async fn run_one(&self, task: &ParallelTask, cancel: &CancellationToken) -> Result<(), String> {
        if cancel.is_cancelled() {
            return Err("cancelled".to_string());
        }
        let args = match task {
            ParallelTask::Scalar(cmd) => self.exec_args(vec!["sh".to_string(), "-c".to_string(), cmd.clone()]),
            ParallelTask::Exec(argv) => self.exec_args(argv.clone()),
        };

        let output = self.runtime.run(&args).await.map_err(|e| e.to_string())?;
        if self.verbose {
            print!("{}", output.stdout);
            eprint!("{}", output.stderr);
        }
        if output.success() {
            Ok(())
        } else if self.verbose {
            Err(format!("exit status {}", output.status))
        } else {
            Err(format!("exit status {}: {}", output.status, output.stderr))
        }
    }

    /// Run a single command shape, without any state-store interaction.
    /// Used for `initializeCommand`, which runs on the host before any
    /// container exists.
    #[instrument(skip(self, command, cancel))]
    pub async fn run(&self, command: &LifecycleCommand, cancel: &CancellationToken) -> Result<(), ExecError> {
        match command {
            LifecycleCommand::Scalar(cmd) => {
                let task = ParallelTask::Scalar(cmd.clone());
                self.run_one(&task, cancel).await.map_err(|message| ExecError::Hook { message })
            }
            LifecycleCommand::Exec(argv) => {
                let task = ParallelTask::Exec(argv.clone());
                self.run_one(&task, cancel).await.map_err(|message| ExecError::Hook { message })
            }
            LifecycleCommand::Parallel(tasks) => {
                let mut set = JoinSet::new();
                for (name, task) in tasks.iter() {
                    let name = name.clone();
                    let args = match task {
                        ParallelTask::Scalar(cmd) => self.exec_args(vec!["sh".to_string(), "-c".to_string(), cmd.clone()]),
                        ParallelTask::Exec(argv) => self.exec_args(argv.clone()),
                    };
                    let runtime = Arc::clone(&self.runtime);
                    set.spawn(async move {
                        let result = runtime.run(&args).await;
                        (name, result)
                    });
                }

                let mut failures = Vec::new();
                while let Some(joined) = set.join_next().await {
                    match joined {
                        Ok((name, Ok(output))) if output.success() => {}
                        Ok((name, Ok(output))) => failures.push((name, format!("exit status {}: {}", output.status, output.stderr))),
                        Ok((name, Err(e))) => failures.push((name, e.to_string())),
                        Err(join_err) => failures.push(("<unknown>".to_string(), join_err.to_string())),
                    }
                }

                if failures.is_empty() {
                    Ok(())
                } else {
                    Err(ExecError::Parallel { failures })
                }
            }
            LifecycleCommand::Merged(steps) => {
                for step in steps {
                    if cancel.is_cancelled() {
                        return Err(ExecError::Cancelled);
                    }
                    let task = ParallelTask::Scalar(step.clone());
                    self.run_one(&task, cancel).await.map_err(|message| ExecError::Hook { message })?;
                }
                Ok(())
            }
        }
    }

    /// Run `command` for `phase`, consulting the state store first and
    /// recording success after. A no-op (success) when `ShouldRun` is
    /// false. Partial failure (Parallel with some tasks failing) is never
    /// recorded as successful.
    #[instrument(skip(self, command, cancel), fields(phase = phase.as_str()))]
    pub async fn run_phase(
        &self,
        phase: Phase,
        command: Option<&LifecycleCommand>,
        cancel: &CancellationToken,
    ) -> Result<(), ExecError> {
        let Some(command) = command else {
            return Ok(());
        };

        let payload = command_payload(command);
        let should = self
            .state
            .should_run(&self.container_id, phase, Some(&payload))
            .await
            .map_err(|e| ExecError::Hook { message: e.to_string() })?;

        if !should {
            info!("phase already executed with identical command, skipping");
            return Ok(());
        }

        let result = self.run(command, cancel).await;

        match &result {
            Ok(()) => {
                self.state
                    .record_success(&self.container_id, phase, &payload)
                    .await
                    .map_err(|e| ExecError::Hook { message: e.to_string() })?;
            }
            Err(e) => {
                warn!(error = ?e, "lifecycle phase failed");
            }
        }

        result
    }
}


fn command_payload(command: &LifecycleCommand) -> serde_json::Value {
    match command {
        LifecycleCommand::Scalar(s) => serde_json::Value::String(s.clone()),
        LifecycleCommand::Exec(argv) => serde_json::Value::Array(
            argv.iter().map(|s| serde_json::Value::String(s.clone())).collect(),
        ),
        LifecycleCommand::Parallel(tasks) => {
            let mut map = serde_json::Map::new();
            for (name, task) in tasks.iter() {
                let value = match task {
                    ParallelTask::Scalar(s) => serde_json::Value::String(s.clone()),
                    ParallelTask::Exec(argv) => serde_json::Value::Array(
                        argv.iter().map(|s| serde_json::Value::String(s.clone())).collect(),
                    ),
                };
                map.insert(name.clone(), value);
            }
            serde_json::Value::Object(map)
        }
        LifecycleCommand::Merged(steps) => serde_json::Value::Array(
            steps.iter().map(|s| serde_json::Value::String(s.clone())).collect(),
        ),
    }
}
